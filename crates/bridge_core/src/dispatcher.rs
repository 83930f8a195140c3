//! Routes capability callbacks to outbound channels.
//!
//! Every entity-bound event is published while the registry lock is held, so
//! a command that removes the entity either runs entirely before the
//! delivery (the event is dropped) or entirely after it.

use std::sync::Arc;

use shared::{
    domain::{CameraPosition, Identifier, MapId},
    protocol::{
        map_channel, search_manager_channel, BridgeEvent, CameraPositionChangedPayload,
        MapObjectPayload, OutboundEvent, SearchResponsePayload, SuggestResultPayload,
    },
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::{
    camera::Observation,
    capability::{CapabilityEvent, MarkerEvent, SearchOutcome, SuggestOutcome},
    map_view::MapDirectory,
    registry::{EntityRecord, Registry},
    search::retire_session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
}

pub struct EventDispatcher {
    registry: Arc<Registry>,
    maps: Arc<MapDirectory>,
    outbound: broadcast::Sender<OutboundEvent>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<Registry>,
        maps: Arc<MapDirectory>,
        outbound: broadcast::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            registry,
            maps,
            outbound,
        }
    }

    /// Publishes `event` on the channel of `target` if it is still registered.
    pub async fn deliver(&self, target: &Identifier, event: BridgeEvent) -> Delivery {
        let table = self.registry.lock().await;
        match table.lookup(target) {
            Some(record) => {
                self.publish(record.outbound_channel(), event);
                Delivery::Delivered
            }
            None => {
                trace!(id = %target, method = event.method(), "dropping event for unknown entity");
                Delivery::Dropped
            }
        }
    }

    pub async fn dispatch(&self, event: CapabilityEvent) -> Delivery {
        match event {
            CapabilityEvent::CameraPositionChanged {
                map_id,
                generation,
                position,
                finished,
            } => {
                self.camera_changed(map_id, generation, position, finished)
                    .await
            }
            CapabilityEvent::Marker { id, event } => self.marker_event(&id, event).await,
            CapabilityEvent::SearchCompleted {
                session_key,
                outcome,
            } => self.search_completed(&session_key, outcome).await,
            CapabilityEvent::SuggestCompleted {
                manager_id,
                outcome,
            } => self.suggest_completed(&manager_id, outcome).await,
        }
    }

    async fn camera_changed(
        &self,
        map_id: MapId,
        generation: u64,
        position: CameraPosition,
        finished: bool,
    ) -> Delivery {
        let Some(view) = self.maps.get(map_id).await else {
            trace!(map_id = %map_id, "dropping camera event for detached map");
            return Delivery::Dropped;
        };
        let observation = view
            .camera()
            .lock()
            .await
            .observe(generation, position, finished);
        if observation == Observation::Stale {
            trace!(map_id = %map_id, generation, "camera event from a preempted move");
        }
        self.publish(
            map_channel(map_id),
            BridgeEvent::CameraPositionChanged(CameraPositionChangedPayload {
                position,
                finished,
            }),
        );
        Delivery::Delivered
    }

    async fn marker_event(&self, id: &Identifier, event: MarkerEvent) -> Delivery {
        let mut table = self.registry.lock().await;
        let Some(marker) = table.lookup_mut(id).and_then(EntityRecord::as_marker_mut) else {
            trace!(id = %id, ?event, "dropping marker event for removed marker");
            return Delivery::Dropped;
        };
        let payload = |point| MapObjectPayload {
            id: id.clone(),
            point,
        };
        let event = match event {
            MarkerEvent::DragStart => BridgeEvent::MapObjectDragStart(payload(None)),
            MarkerEvent::Drag(point) => {
                marker.moved_to(point);
                BridgeEvent::MapObjectDrag(payload(Some(point)))
            }
            MarkerEvent::DragEnd => BridgeEvent::MapObjectDragEnd(payload(None)),
            MarkerEvent::Tap(point) => BridgeEvent::MapObjectTap(payload(Some(point))),
        };
        self.publish(map_channel(marker.map_id()), event);
        Delivery::Delivered
    }

    async fn search_completed(
        &self,
        session_key: &Identifier,
        outcome: SearchOutcome,
    ) -> Delivery {
        let mut table = self.registry.lock().await;
        let Some(session) = table
            .lookup_mut(session_key)
            .and_then(EntityRecord::as_search_session_mut)
        else {
            trace!(session = %session_key, "dropping search result for retired session");
            return Delivery::Dropped;
        };
        if !session.complete(&outcome) {
            trace!(session = %session_key, "dropping duplicate search result");
            return Delivery::Dropped;
        }
        let session_id = session.session_id().to_string();
        let channel = search_manager_channel(session.manager_id());
        let query = *session.query();
        retire_session(&mut table, session_key);

        let event = match outcome {
            SearchOutcome::Response(response) => BridgeEvent::SearchSuccess(SearchResponsePayload {
                session_id,
                is_success: true,
                items: response.items,
                error: None,
            }),
            SearchOutcome::Error(message) => BridgeEvent::SearchFailure(SearchResponsePayload {
                session_id,
                is_success: false,
                items: Vec::new(),
                error: Some(message),
            }),
        };
        debug!(
            session = %session_key,
            method = event.method(),
            zoom = query.zoom,
            types = query.types.bits(),
            "search finished"
        );
        self.publish(channel, event);
        Delivery::Delivered
    }

    async fn suggest_completed(
        &self,
        manager_id: &Identifier,
        outcome: SuggestOutcome,
    ) -> Delivery {
        let table = self.registry.lock().await;
        if table
            .lookup(manager_id)
            .and_then(EntityRecord::as_search_manager)
            .is_none()
        {
            trace!(manager_id = %manager_id, "dropping suggestions for disposed manager");
            return Delivery::Dropped;
        }
        let payload = match outcome {
            SuggestOutcome::Items(items) => SuggestResultPayload {
                is_error: false,
                error: None,
                items,
            },
            SuggestOutcome::Error(message) => SuggestResultPayload {
                is_error: true,
                error: Some(message),
                items: Vec::new(),
            },
        };
        self.publish(
            search_manager_channel(manager_id),
            BridgeEvent::SuggestResponse(payload),
        );
        Delivery::Delivered
    }

    fn publish(&self, channel: String, event: BridgeEvent) {
        if self.outbound.send(OutboundEvent { channel, event }).is_err() {
            trace!("no outbound subscribers; event discarded");
        }
    }
}

/// Drains capability callbacks into the dispatcher, one at a time and in
/// arrival order.
pub struct EventPump {
    dispatcher: Arc<EventDispatcher>,
    rx: mpsc::UnboundedReceiver<CapabilityEvent>,
}

impl EventPump {
    pub(crate) fn new(
        dispatcher: Arc<EventDispatcher>,
        rx: mpsc::UnboundedReceiver<CapabilityEvent>,
    ) -> Self {
        Self { dispatcher, rx }
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.dispatcher.dispatch(event).await;
        }
        debug!("event pump stopped");
    }

    /// Waits for the next callback and dispatches it. `None` once every
    /// callback sender is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        let event = self.rx.recv().await?;
        Some(self.dispatcher.dispatch(event).await)
    }

    /// Dispatches every callback already queued and returns how many were
    /// delivered (dropped ones are not counted).
    pub async fn pump_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.dispatcher.dispatch(event).await == Delivery::Delivered {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
