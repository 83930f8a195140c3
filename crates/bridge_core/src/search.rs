//! Search managers and the sessions they own.
//!
//! A session lives in the registry under `session_key(manager, session_id)`
//! while it is `Pending`. Reaching any terminal state removes it, so late
//! backend responses find nothing to deliver to.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;
use shared::{
    domain::{Identifier, Point, SearchManagerType, SearchTypes},
    protocol::{CreateSearchManagerArgs, SubmitWithPointArgs, SuggestWithTextArgs},
};
use tracing::{debug, info, warn};

use crate::{
    capability::{
        PointQuery, SearchCallbacks, SearchManagerHandle, SearchOutcome, SearchSessionHandle,
        SuggestCallbacks, SuggestQuery,
    },
    error::BridgeError,
    ids::session_key,
    registry::{Controller, EntityKind, EntityRecord, EntityTable},
    router::{decode_args, decode_args_or_default},
    Bridge,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

pub struct SearchSessionController {
    session_id: String,
    manager_id: Identifier,
    query: PointQuery,
    status: SessionStatus,
    handle: Arc<dyn SearchSessionHandle>,
}

impl SearchSessionController {
    pub fn new(
        session_id: String,
        manager_id: Identifier,
        query: PointQuery,
        handle: Arc<dyn SearchSessionHandle>,
    ) -> Self {
        Self {
            session_id,
            manager_id,
            query,
            status: SessionStatus::Pending,
            handle,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn manager_id(&self) -> &Identifier {
        &self.manager_id
    }

    pub(crate) fn query(&self) -> &PointQuery {
        &self.query
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Records the backend's answer. Returns `false` when the session had
    /// already left `Pending`, in which case the outcome must not be published.
    pub fn complete(&mut self, outcome: &SearchOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = match outcome {
            SearchOutcome::Response(_) => SessionStatus::Completed,
            SearchOutcome::Error(_) => SessionStatus::Failed,
        };
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Cancelled;
        true
    }

    pub(crate) fn handle(&self) -> Arc<dyn SearchSessionHandle> {
        Arc::clone(&self.handle)
    }
}

pub struct SearchManagerController {
    id: Identifier,
    kind: SearchManagerType,
    handle: Arc<dyn SearchManagerHandle>,
    next_session: u64,
    sessions: BTreeMap<String, Identifier>,
}

impl SearchManagerController {
    pub fn new(
        id: Identifier,
        kind: SearchManagerType,
        handle: Arc<dyn SearchManagerHandle>,
    ) -> Self {
        Self {
            id,
            kind,
            handle,
            next_session: 0,
            sessions: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub(crate) fn kind(&self) -> SearchManagerType {
        self.kind
    }

    /// Ids of the sessions still pending.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub(crate) fn handle(&self) -> Arc<dyn SearchManagerHandle> {
        Arc::clone(&self.handle)
    }

    fn allocate_session(&mut self) -> (String, Identifier) {
        let session_id = self.next_session.to_string();
        self.next_session += 1;
        let key = session_key(&self.id, &session_id);
        self.sessions.insert(session_id.clone(), key.clone());
        (session_id, key)
    }

    pub(crate) fn forget_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

/// Drops a finished or cancelled session from the table and from its
/// manager's bookkeeping.
pub(crate) fn retire_session(table: &mut EntityTable, key: &Identifier) -> Option<EntityRecord> {
    let record = table.remove(key)?;
    if let Some(session) = record.as_search_session() {
        let manager_id = session.manager_id().clone();
        if let Some(manager) = table
            .lookup_mut(&manager_id)
            .and_then(EntityRecord::as_search_manager_mut)
        {
            manager.forget_session(session.session_id());
        }
    }
    Some(record)
}

fn manager_handle(
    table: &EntityTable,
    manager_id: &Identifier,
) -> Result<Arc<dyn SearchManagerHandle>, BridgeError> {
    table
        .lookup(manager_id)
        .and_then(EntityRecord::as_search_manager)
        .map(SearchManagerController::handle)
        .ok_or_else(|| BridgeError::unknown(manager_id))
}

/// Accepts either a raw id string or an object carrying the id under `key`.
fn raw_id(arguments: &Value, key: &str) -> Result<String, BridgeError> {
    let raw = match arguments {
        Value::String(raw) => Some(raw.as_str()),
        Value::Object(map) => map.get(key).and_then(Value::as_str),
        _ => None,
    };
    raw.map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BridgeError::invalid(format!("expected a {key} string")))
}

fn search_types(names: Option<Vec<String>>) -> SearchTypes {
    names.map(SearchTypes::from_names).unwrap_or_default()
}

impl Bridge {
    pub(crate) async fn create_search_manager(
        &self,
        arguments: Value,
    ) -> Result<Identifier, BridgeError> {
        let args: CreateSearchManagerArgs = decode_args_or_default(arguments)?;
        let kind = args
            .kind
            .as_deref()
            .map(SearchManagerType::parse)
            .unwrap_or_default();
        let handle = self
            .search
            .create_manager(kind)
            .await
            .map_err(BridgeError::capability("create search manager"))?;

        let id = self.ids.next();
        let manager = SearchManagerController::new(id.clone(), kind, handle);
        self.registry
            .lock()
            .await
            .insert(EntityRecord::new(id.clone(), Controller::SearchManager(manager)))?;
        info!(id = %id, kind = kind.as_str(), "search manager created");
        Ok(id)
    }

    pub(crate) async fn dispose_search_manager(&self, arguments: Value) -> Result<(), BridgeError> {
        let manager_id = Identifier::new(raw_id(&arguments, "id")?);

        let (manager, sessions) = {
            let mut table = self.registry.lock().await;
            let kind = table.lookup(&manager_id).map(EntityRecord::kind);
            if kind != Some(EntityKind::SearchManager) {
                return Err(BridgeError::unknown(&manager_id));
            }
            let record = table
                .remove(&manager_id)
                .ok_or_else(|| BridgeError::unknown(&manager_id))?;
            let sessions = table.remove_matching(|record| {
                record
                    .as_search_session()
                    .is_some_and(|session| session.manager_id() == &manager_id)
            });
            (record, sessions)
        };

        for mut record in sessions {
            if let Some(session) = record.as_search_session_mut() {
                if session.cancel() {
                    if let Err(err) = session.handle().cancel().await {
                        warn!(
                            manager_id = %manager_id,
                            session_id = session.session_id(),
                            error = %err,
                            "backend refused session cancel"
                        );
                    }
                }
            }
        }
        if let Some(manager) = manager.as_search_manager() {
            if let Err(err) = manager.handle().cancel_suggest().await {
                warn!(manager_id = %manager_id, error = %err, "backend refused suggest cancel");
            }
            info!(id = %manager_id, kind = manager.kind().as_str(), "search manager disposed");
        }
        Ok(())
    }

    pub(crate) async fn submit_with_point(
        &self,
        manager_id: &Identifier,
        arguments: Value,
    ) -> Result<String, BridgeError> {
        let args: SubmitWithPointArgs = decode_args_or_default(arguments)?;
        let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) else {
            return Err(BridgeError::invalid("Invalid parameters"));
        };
        let point = Point::new(latitude, longitude);
        if !point.is_valid() {
            return Err(BridgeError::invalid(format!(
                "point ({latitude}, {longitude}) is out of range"
            )));
        }
        let zoom = args.zoom.unwrap_or(self.config.default_zoom);
        if !zoom.is_finite() {
            return Err(BridgeError::invalid(format!("zoom {zoom} is not finite")));
        }
        let query = PointQuery {
            point,
            zoom,
            types: search_types(args.types),
        };

        let mut table = self.registry.lock().await;
        let handle = manager_handle(&table, manager_id)?;
        let (session_id, key) = match table
            .lookup_mut(manager_id)
            .and_then(EntityRecord::as_search_manager_mut)
        {
            Some(manager) => manager.allocate_session(),
            None => return Err(BridgeError::unknown(manager_id)),
        };

        let callbacks = SearchCallbacks::new(key.clone(), self.callbacks.clone());
        let session_handle = match handle.submit_with_point(&query, callbacks).await {
            Ok(session_handle) => session_handle,
            Err(err) => {
                if let Some(manager) = table
                    .lookup_mut(manager_id)
                    .and_then(EntityRecord::as_search_manager_mut)
                {
                    manager.forget_session(&session_id);
                }
                return Err(BridgeError::capability("submit search")(err));
            }
        };

        let session = SearchSessionController::new(
            session_id.clone(),
            manager_id.clone(),
            query,
            session_handle,
        );
        table.insert(EntityRecord::new(key, Controller::SearchSession(session)))?;
        debug!(
            manager_id = %manager_id,
            session_id = %session_id,
            types = query.types.bits(),
            "search submitted"
        );
        Ok(session_id)
    }

    pub(crate) async fn suggest_with_text(
        &self,
        manager_id: &Identifier,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let args: SuggestWithTextArgs = decode_args(arguments)?;
        if let Some(window) = args.bounding_box.as_ref().filter(|window| !window.is_valid()) {
            return Err(BridgeError::invalid(format!(
                "bounding box corner out of range: {window:?}"
            )));
        }
        let query = SuggestQuery {
            text: args.text.unwrap_or_default(),
            window: args.bounding_box,
            types: search_types(args.types),
        };

        let handle = manager_handle(&*self.registry.lock().await, manager_id)?;
        let callbacks = SuggestCallbacks::new(manager_id.clone(), self.callbacks.clone());
        handle
            .suggest(&query, callbacks)
            .await
            .map_err(BridgeError::capability("suggest"))?;
        debug!(manager_id = %manager_id, text = %query.text, "suggest requested");
        Ok(())
    }

    pub(crate) async fn cancel_search(
        &self,
        manager_id: &Identifier,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let session_id = raw_id(&arguments, "sessionId")?;
        let key = session_key(manager_id, &session_id);

        let retired = {
            let mut table = self.registry.lock().await;
            match table.lookup(&key).map(EntityRecord::kind) {
                Some(EntityKind::SearchSession) => retire_session(&mut table, &key),
                _ => None,
            }
        };
        let Some(mut record) = retired else {
            return Err(BridgeError::unknown(&key));
        };
        if let Some(session) = record.as_search_session_mut() {
            if session.cancel() {
                if let Err(err) = session.handle().cancel().await {
                    warn!(
                        manager_id = %manager_id,
                        session_id = %session_id,
                        error = %err,
                        "backend refused session cancel"
                    );
                }
            }
        }
        info!(manager_id = %manager_id, session_id = %session_id, "search cancelled");
        Ok(())
    }

    pub(crate) async fn cancel_suggest(&self, manager_id: &Identifier) -> Result<(), BridgeError> {
        let handle = manager_handle(&*self.registry.lock().await, manager_id)?;
        handle
            .cancel_suggest()
            .await
            .map_err(BridgeError::capability("cancel suggest"))?;
        debug!(manager_id = %manager_id, "suggest cancelled");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod tests;
