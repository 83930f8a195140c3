use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::Value;
use shared::{
    domain::{Animation, CameraPosition, MapId, Point, Polygon, SearchManagerType},
    protocol::{map_channel, CommandEnvelope, CommandReply, OutboundEvent},
};
use tokio::sync::{broadcast, Mutex, Notify};

use crate::{
    capability::{
        CameraCallbacks, MapSurface, MarkerCallbacks, Placemark, PointQuery, SearchBackend,
        SearchCallbacks, SearchManagerHandle, SearchSessionHandle, SuggestCallbacks,
        SuggestQuery,
    },
    dispatcher::EventPump,
    headless::{HeadlessMapSurface, HeadlessRuntime},
    image_spec::{AssetResolver, ResolvedIcon},
    Bridge, BridgeConfig, BridgeServices,
};

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let bitmap = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(bitmap)
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

#[derive(Default)]
pub(crate) struct MemoryAssets {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub(crate) fn with(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), bytes);
        self
    }
}

#[async_trait]
impl AssetResolver for MemoryAssets {
    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no asset named {path}"))
    }
}

#[derive(Default)]
pub(crate) struct RecordingSession {
    cancelled: AtomicBool,
}

impl RecordingSession {
    pub(crate) fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchSessionHandle for RecordingSession {
    async fn cancel(&self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct Submitted {
    pub(crate) query: PointQuery,
    pub(crate) callbacks: SearchCallbacks,
    pub(crate) session: Arc<RecordingSession>,
}

/// Manager that keeps every request so a test can answer it later.
pub(crate) struct RecordingManager {
    pub(crate) kind: SearchManagerType,
    submits: Mutex<Vec<Submitted>>,
    suggests: Mutex<Vec<(SuggestQuery, SuggestCallbacks)>>,
    cancel_suggest_calls: AtomicUsize,
}

impl RecordingManager {
    fn new(kind: SearchManagerType) -> Self {
        Self {
            kind,
            submits: Mutex::new(Vec::new()),
            suggests: Mutex::new(Vec::new()),
            cancel_suggest_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) async fn submitted(
        &self,
        index: usize,
    ) -> (PointQuery, SearchCallbacks, Arc<RecordingSession>) {
        let submits = self.submits.lock().await;
        let submitted = &submits[index];
        (
            submitted.query,
            submitted.callbacks.clone(),
            Arc::clone(&submitted.session),
        )
    }

    pub(crate) async fn submit_count(&self) -> usize {
        self.submits.lock().await.len()
    }

    pub(crate) async fn suggested(&self, index: usize) -> (SuggestQuery, SuggestCallbacks) {
        self.suggests.lock().await[index].clone()
    }

    pub(crate) fn cancel_suggest_calls(&self) -> usize {
        self.cancel_suggest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchManagerHandle for RecordingManager {
    async fn submit_with_point(
        &self,
        query: &PointQuery,
        callbacks: SearchCallbacks,
    ) -> Result<Arc<dyn SearchSessionHandle>> {
        let session = Arc::new(RecordingSession::default());
        self.submits.lock().await.push(Submitted {
            query: *query,
            callbacks,
            session: Arc::clone(&session),
        });
        Ok(session as Arc<dyn SearchSessionHandle>)
    }

    async fn suggest(&self, query: &SuggestQuery, callbacks: SuggestCallbacks) -> Result<()> {
        self.suggests.lock().await.push((query.clone(), callbacks));
        Ok(())
    }

    async fn cancel_suggest(&self) -> Result<()> {
        self.cancel_suggest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSearchBackend {
    managers: Mutex<Vec<Arc<RecordingManager>>>,
}

impl RecordingSearchBackend {
    pub(crate) async fn manager(&self, index: usize) -> Arc<RecordingManager> {
        Arc::clone(&self.managers.lock().await[index])
    }
}

#[async_trait]
impl SearchBackend for RecordingSearchBackend {
    async fn create_manager(
        &self,
        kind: SearchManagerType,
    ) -> Result<Arc<dyn SearchManagerHandle>> {
        let manager = Arc::new(RecordingManager::new(kind));
        self.managers.lock().await.push(Arc::clone(&manager));
        Ok(manager as Arc<dyn SearchManagerHandle>)
    }
}

/// Surface whose placemarks park inside `set_visible` until `release` is
/// notified. `entered` fires when a call starts waiting.
#[derive(Default)]
pub(crate) struct GatedSurface {
    pub(crate) entered: Arc<Notify>,
    pub(crate) release: Arc<Notify>,
}

struct GatedPlacemark {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Placemark for GatedPlacemark {
    async fn set_icon(&self, _icon: &ResolvedIcon) -> Result<()> {
        Ok(())
    }

    async fn set_visible(&self, _visible: bool) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }

    async fn set_draggable(&self, _draggable: bool) -> Result<()> {
        Ok(())
    }

    async fn set_z_index(&self, _z_index: f32) -> Result<()> {
        Ok(())
    }

    async fn set_opacity(&self, _opacity: f32) -> Result<()> {
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MapSurface for GatedSurface {
    async fn move_camera(
        &self,
        _position: CameraPosition,
        _animation: Option<Animation>,
        _callbacks: CameraCallbacks,
    ) -> Result<()> {
        Ok(())
    }

    async fn add_polygon(&self, _polygon: Polygon) -> Result<()> {
        Ok(())
    }

    async fn add_placemark(
        &self,
        _point: Point,
        _callbacks: MarkerCallbacks,
    ) -> Result<Arc<dyn Placemark>> {
        Ok(Arc::new(GatedPlacemark {
            entered: Arc::clone(&self.entered),
            release: Arc::clone(&self.release),
        }))
    }

    async fn show_user_location(&self, _icon: ResolvedIcon) -> Result<()> {
        Ok(())
    }
}

/// A bridge with one headless map attached and fakes for every other
/// collaborator. The event pump is driven by hand.
pub(crate) struct Harness {
    pub(crate) bridge: Arc<Bridge>,
    pub(crate) pump: EventPump,
    pub(crate) events: broadcast::Receiver<OutboundEvent>,
    pub(crate) surface: HeadlessMapSurface,
    pub(crate) map_id: MapId,
    pub(crate) runtime: Arc<HeadlessRuntime>,
    pub(crate) search: Arc<RecordingSearchBackend>,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        Self::with_assets(MemoryAssets::default().with("icons/pin.png", png_bytes(40, 20))).await
    }

    pub(crate) async fn with_assets(assets: MemoryAssets) -> Self {
        let runtime = Arc::new(HeadlessRuntime::new());
        let search = Arc::new(RecordingSearchBackend::default());
        let services = BridgeServices {
            runtime: runtime.clone(),
            search: search.clone(),
            assets: Arc::new(assets),
        };
        let (bridge, pump) = Bridge::new(services, BridgeConfig::default());
        let events = bridge.subscribe_events();
        let surface = HeadlessMapSurface::new();
        let map_id = bridge.attach_map(Arc::new(surface.clone())).await;
        Self {
            bridge,
            pump,
            events,
            surface,
            map_id,
            runtime,
            search,
        }
    }

    pub(crate) fn map_channel(&self) -> String {
        map_channel(self.map_id)
    }

    pub(crate) async fn command(
        &self,
        channel: &str,
        method: &str,
        arguments: Value,
    ) -> CommandReply {
        self.bridge
            .handle(CommandEnvelope::new(channel, method, arguments))
            .await
    }

    pub(crate) async fn map_command(&self, method: &str, arguments: Value) -> CommandReply {
        let channel = self.map_channel();
        self.command(&channel, method, arguments).await
    }

    /// Dispatches queued callbacks and returns everything published so far.
    pub(crate) async fn drain_events(&mut self) -> Vec<OutboundEvent> {
        self.pump.pump_pending().await;
        let mut published = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            published.push(event);
        }
        published
    }
}
