use std::{path::PathBuf, sync::Arc};

use shared::{
    domain::{Identifier, MapId},
    protocol::OutboundEvent,
};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

pub mod api_key;
pub mod camera;
pub mod capability;
pub mod dispatcher;
pub mod error;
pub mod headless;
pub mod ids;
pub mod image_spec;
pub mod map_view;
pub mod marker;
pub mod registry;
pub mod router;
pub mod search;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

use api_key::{ApiKeyGuard, ApiKeyOutcome};
use capability::{
    CallbackSender, MapKitRuntime, MapSurface, SearchBackend, UnavailableSearchBackend,
};
use dispatcher::{EventDispatcher, EventPump};
use error::BridgeError;
use headless::HeadlessRuntime;
use ids::{session_key, IdGenerator};
use image_spec::{AssetResolver, FsAssetResolver, ImageResolver};
use map_view::MapDirectory;
use marker::{discard_placemark, MarkerSnapshot};
use registry::{EntityRecord, Registry};
use search::SessionStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Capacity of the outbound event bus; slow subscribers lose events
    /// beyond it.
    pub event_buffer: usize,
    pub default_zoom: f32,
    /// Multiplies explicit icon width/height before fitting.
    pub device_pixel_ratio: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_buffer: 1024,
            default_zoom: 17.0,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Capability providers the bridge drives.
pub struct BridgeServices {
    pub runtime: Arc<dyn MapKitRuntime>,
    pub search: Arc<dyn SearchBackend>,
    pub assets: Arc<dyn AssetResolver>,
}

impl BridgeServices {
    pub fn headless(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime: Arc::new(HeadlessRuntime::new()),
            search: Arc::new(UnavailableSearchBackend),
            assets: Arc::new(FsAssetResolver::new(asset_root)),
        }
    }
}

pub struct Bridge {
    config: BridgeConfig,
    ids: IdGenerator,
    registry: Arc<Registry>,
    maps: Arc<MapDirectory>,
    runtime: Arc<dyn MapKitRuntime>,
    search: Arc<dyn SearchBackend>,
    images: ImageResolver,
    api_key: ApiKeyGuard,
    callbacks: CallbackSender,
    events: broadcast::Sender<OutboundEvent>,
}

impl Bridge {
    /// Builds a bridge together with the pump that delivers its capability
    /// callbacks. Nothing is delivered until the pump runs.
    pub fn new(services: BridgeServices, config: BridgeConfig) -> (Arc<Self>, EventPump) {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (callbacks, callback_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new());
        let maps = Arc::new(MapDirectory::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&maps),
            events.clone(),
        ));

        let bridge = Arc::new(Self {
            images: ImageResolver::new(services.assets, config.device_pixel_ratio),
            config,
            ids: IdGenerator::new(),
            registry,
            maps,
            runtime: services.runtime,
            search: services.search,
            api_key: ApiKeyGuard::new(),
            callbacks,
            events,
        });
        (bridge, EventPump::new(dispatcher, callback_rx))
    }

    /// Like `new`, with the event pump spawned on the current runtime.
    pub fn start(services: BridgeServices, config: BridgeConfig) -> Arc<Self> {
        let (bridge, pump) = Self::new(services, config);
        tokio::spawn(pump.run());
        bridge
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OutboundEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn apply_api_key(&self, api_key: &str) -> Result<ApiKeyOutcome, BridgeError> {
        self.api_key.apply(self.runtime.as_ref(), api_key).await
    }

    pub async fn attach_map(&self, surface: Arc<dyn MapSurface>) -> MapId {
        let view = self.maps.attach(surface).await;
        info!(map_id = %view.id(), "map view attached");
        view.id()
    }

    /// Detaches a map view and removes every marker placed on it. Returns
    /// `false` for an unknown map.
    pub async fn detach_map(&self, map_id: MapId) -> bool {
        if self.maps.remove(map_id).await.is_none() {
            return false;
        }
        let markers = self.registry.lock().await.remove_matching(|record| {
            record
                .as_marker()
                .is_some_and(|marker| marker.map_id() == map_id)
        });
        for record in &markers {
            if let Some(marker) = record.as_marker() {
                discard_placemark(marker).await;
            }
        }
        info!(map_id = %map_id, markers = markers.len(), "map view detached");
        true
    }

    pub async fn map_ids(&self) -> Vec<MapId> {
        self.maps.ids().await
    }

    pub async fn marker(&self, id: &Identifier) -> Option<MarkerSnapshot> {
        self.registry
            .lock()
            .await
            .lookup(id)
            .and_then(EntityRecord::as_marker)
            .map(|marker| marker.snapshot())
    }

    /// Status of a session that is still registered. Sessions leave the
    /// registry once terminal, so this is `Pending` or `None`.
    pub async fn session_status(
        &self,
        manager_id: &Identifier,
        session_id: &str,
    ) -> Option<SessionStatus> {
        self.registry
            .lock()
            .await
            .lookup(&session_key(manager_id, session_id))
            .and_then(EntityRecord::as_search_session)
            .map(|session| session.status())
    }

    pub async fn pending_sessions(&self, manager_id: &Identifier) -> Option<Vec<String>> {
        self.registry
            .lock()
            .await
            .lookup(manager_id)
            .and_then(EntityRecord::as_search_manager)
            .map(|manager| manager.session_ids())
    }
}
