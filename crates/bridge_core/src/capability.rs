//! Interfaces of the capability providers the bridge drives (map surface,
//! search backend, runtime) and the callback handles they use to report
//! asynchronous results.
//!
//! Callback handles never touch bridge state directly: they push a
//! `CapabilityEvent` onto an unbounded channel that the event dispatcher
//! drains, so they are safe to invoke from any provider thread.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{
        Animation, BoundingBox, CameraPosition, Identifier, MapId, Point, Polygon,
        SearchManagerType, SearchTypes,
    },
    protocol::{SearchItem, SuggestItem},
};
use tokio::sync::mpsc;
use tracing::trace;

use crate::image_spec::ResolvedIcon;

const SEARCH_UNAVAILABLE: &str = "search backend is unavailable";

pub type CallbackSender = mpsc::UnboundedSender<CapabilityEvent>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarkerEvent {
    DragStart,
    Drag(Point),
    DragEnd,
    Tap(Point),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Response(SearchResponse),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestOutcome {
    Items(Vec<SuggestItem>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityEvent {
    CameraPositionChanged {
        map_id: MapId,
        generation: u64,
        position: CameraPosition,
        finished: bool,
    },
    Marker {
        id: Identifier,
        event: MarkerEvent,
    },
    SearchCompleted {
        session_key: Identifier,
        outcome: SearchOutcome,
    },
    SuggestCompleted {
        manager_id: Identifier,
        outcome: SuggestOutcome,
    },
}

fn emit(tx: &CallbackSender, event: CapabilityEvent) {
    if tx.send(event).is_err() {
        trace!("event dispatcher stopped; dropping capability callback");
    }
}

/// Camera listener handed to the surface for one `move`.
#[derive(Debug, Clone)]
pub struct CameraCallbacks {
    map_id: MapId,
    generation: u64,
    tx: CallbackSender,
}

impl CameraCallbacks {
    pub(crate) fn new(map_id: MapId, generation: u64, tx: CallbackSender) -> Self {
        Self {
            map_id,
            generation,
            tx,
        }
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn position_changed(&self, position: CameraPosition, finished: bool) {
        emit(
            &self.tx,
            CapabilityEvent::CameraPositionChanged {
                map_id: self.map_id,
                generation: self.generation,
                position,
                finished,
            },
        );
    }
}

/// Tap and drag listener attached to one placemark.
#[derive(Debug, Clone)]
pub struct MarkerCallbacks {
    id: Identifier,
    tx: CallbackSender,
}

impl MarkerCallbacks {
    pub(crate) fn new(id: Identifier, tx: CallbackSender) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn drag_start(&self) {
        self.send(MarkerEvent::DragStart);
    }

    pub fn drag(&self, point: Point) {
        self.send(MarkerEvent::Drag(point));
    }

    pub fn drag_end(&self) {
        self.send(MarkerEvent::DragEnd);
    }

    pub fn tap(&self, point: Point) {
        self.send(MarkerEvent::Tap(point));
    }

    fn send(&self, event: MarkerEvent) {
        emit(
            &self.tx,
            CapabilityEvent::Marker {
                id: self.id.clone(),
                event,
            },
        );
    }
}

/// Response handler of a single submitted search.
#[derive(Debug, Clone)]
pub struct SearchCallbacks {
    session_key: Identifier,
    tx: CallbackSender,
}

impl SearchCallbacks {
    pub(crate) fn new(session_key: Identifier, tx: CallbackSender) -> Self {
        Self { session_key, tx }
    }

    pub fn respond(&self, response: SearchResponse) {
        self.send(SearchOutcome::Response(response));
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.send(SearchOutcome::Error(message.into()));
    }

    fn send(&self, outcome: SearchOutcome) {
        emit(
            &self.tx,
            CapabilityEvent::SearchCompleted {
                session_key: self.session_key.clone(),
                outcome,
            },
        );
    }
}

/// Suggest sink shared by every suggest request of one manager.
#[derive(Debug, Clone)]
pub struct SuggestCallbacks {
    manager_id: Identifier,
    tx: CallbackSender,
}

impl SuggestCallbacks {
    pub(crate) fn new(manager_id: Identifier, tx: CallbackSender) -> Self {
        Self { manager_id, tx }
    }

    pub fn respond(&self, items: Vec<SuggestItem>) {
        self.send(SuggestOutcome::Items(items));
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.send(SuggestOutcome::Error(message.into()));
    }

    fn send(&self, outcome: SuggestOutcome) {
        emit(
            &self.tx,
            CapabilityEvent::SuggestCompleted {
                manager_id: self.manager_id.clone(),
                outcome,
            },
        );
    }
}

#[async_trait]
pub trait MapSurface: Send + Sync {
    /// Starts a camera move. The surface reports progress through
    /// `callbacks`, ending with a `finished = true` position.
    async fn move_camera(
        &self,
        position: CameraPosition,
        animation: Option<Animation>,
        callbacks: CameraCallbacks,
    ) -> Result<()>;
    async fn add_polygon(&self, polygon: Polygon) -> Result<()>;
    async fn add_placemark(
        &self,
        point: Point,
        callbacks: MarkerCallbacks,
    ) -> Result<Arc<dyn Placemark>>;
    async fn show_user_location(&self, icon: ResolvedIcon) -> Result<()>;
}

#[async_trait]
pub trait Placemark: Send + Sync {
    async fn set_icon(&self, icon: &ResolvedIcon) -> Result<()>;
    async fn set_visible(&self, visible: bool) -> Result<()>;
    async fn set_draggable(&self, draggable: bool) -> Result<()>;
    async fn set_z_index(&self, z_index: f32) -> Result<()>;
    async fn set_opacity(&self, opacity: f32) -> Result<()>;
    async fn remove(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointQuery {
    pub point: Point,
    pub zoom: f32,
    pub types: SearchTypes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestQuery {
    pub text: String,
    pub window: Option<BoundingBox>,
    pub types: SearchTypes,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn create_manager(&self, kind: SearchManagerType)
        -> Result<Arc<dyn SearchManagerHandle>>;
}

#[async_trait]
pub trait SearchManagerHandle: Send + Sync {
    async fn submit_with_point(
        &self,
        query: &PointQuery,
        callbacks: SearchCallbacks,
    ) -> Result<Arc<dyn SearchSessionHandle>>;
    async fn suggest(&self, query: &SuggestQuery, callbacks: SuggestCallbacks) -> Result<()>;
    async fn cancel_suggest(&self) -> Result<()>;
}

#[async_trait]
pub trait SearchSessionHandle: Send + Sync {
    /// Best effort: the backend may still finish the search afterwards.
    async fn cancel(&self) -> Result<()>;
}

#[async_trait]
pub trait MapKitRuntime: Send + Sync {
    async fn set_api_key(&self, api_key: &str) -> Result<()>;
}

/// Backend used when no search provider is wired in. Every search and
/// suggest completes with a failure message.
pub struct UnavailableSearchBackend;

#[async_trait]
impl SearchBackend for UnavailableSearchBackend {
    async fn create_manager(
        &self,
        _kind: SearchManagerType,
    ) -> Result<Arc<dyn SearchManagerHandle>> {
        Ok(Arc::new(UnavailableSearchManager))
    }
}

struct UnavailableSearchManager;

#[async_trait]
impl SearchManagerHandle for UnavailableSearchManager {
    async fn submit_with_point(
        &self,
        _query: &PointQuery,
        callbacks: SearchCallbacks,
    ) -> Result<Arc<dyn SearchSessionHandle>> {
        callbacks.fail(SEARCH_UNAVAILABLE);
        Ok(Arc::new(UnavailableSearchSession))
    }

    async fn suggest(&self, _query: &SuggestQuery, callbacks: SuggestCallbacks) -> Result<()> {
        callbacks.fail(SEARCH_UNAVAILABLE);
        Ok(())
    }

    async fn cancel_suggest(&self) -> Result<()> {
        Ok(())
    }
}

struct UnavailableSearchSession;

#[async_trait]
impl SearchSessionHandle for UnavailableSearchSession {
    async fn cancel(&self) -> Result<()> {
        Ok(())
    }
}
