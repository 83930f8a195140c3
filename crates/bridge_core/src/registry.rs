//! Identifier → controller table shared by command handlers and the event
//! dispatcher. It is the single source of truth for entity liveness.

use std::collections::HashMap;

use shared::{
    domain::Identifier,
    protocol::{map_channel, search_manager_channel},
};
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    error::RegistryError,
    marker::MarkerController,
    search::{SearchManagerController, SearchSessionController},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Marker,
    SearchSession,
    SearchManager,
}

pub enum Controller {
    Marker(MarkerController),
    SearchSession(SearchSessionController),
    SearchManager(SearchManagerController),
}

impl Controller {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Marker(_) => EntityKind::Marker,
            Self::SearchSession(_) => EntityKind::SearchSession,
            Self::SearchManager(_) => EntityKind::SearchManager,
        }
    }
}

pub struct EntityRecord {
    pub id: Identifier,
    pub controller: Controller,
}

impl EntityRecord {
    pub fn new(id: Identifier, controller: Controller) -> Self {
        Self { id, controller }
    }

    pub fn kind(&self) -> EntityKind {
        self.controller.kind()
    }

    /// Channel on which events for this entity are published. Markers
    /// publish on their map's channel, sessions on their manager's.
    pub fn outbound_channel(&self) -> String {
        match &self.controller {
            Controller::Marker(marker) => map_channel(marker.map_id()),
            Controller::SearchSession(session) => search_manager_channel(session.manager_id()),
            Controller::SearchManager(manager) => search_manager_channel(manager.id()),
        }
    }

    pub fn as_marker(&self) -> Option<&MarkerController> {
        match &self.controller {
            Controller::Marker(marker) => Some(marker),
            _ => None,
        }
    }

    pub fn as_marker_mut(&mut self) -> Option<&mut MarkerController> {
        match &mut self.controller {
            Controller::Marker(marker) => Some(marker),
            _ => None,
        }
    }

    pub fn as_search_manager(&self) -> Option<&SearchManagerController> {
        match &self.controller {
            Controller::SearchManager(manager) => Some(manager),
            _ => None,
        }
    }

    pub fn as_search_manager_mut(&mut self) -> Option<&mut SearchManagerController> {
        match &mut self.controller {
            Controller::SearchManager(manager) => Some(manager),
            _ => None,
        }
    }

    pub fn as_search_session(&self) -> Option<&SearchSessionController> {
        match &self.controller {
            Controller::SearchSession(session) => Some(session),
            _ => None,
        }
    }

    pub fn as_search_session_mut(&mut self) -> Option<&mut SearchSessionController> {
        match &mut self.controller {
            Controller::SearchSession(session) => Some(session),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct EntityTable {
    records: HashMap<Identifier, EntityRecord>,
}

impl EntityTable {
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateId` when the id is already present.
    /// Generated ids never collide, so this indicates a programming error.
    pub fn insert(&mut self, record: EntityRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn lookup(&self, id: &Identifier) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    pub fn lookup_mut(&mut self, id: &Identifier) -> Option<&mut EntityRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.records.contains_key(id)
    }

    pub fn remove(&mut self, id: &Identifier) -> Option<EntityRecord> {
        self.records.remove(id)
    }

    pub fn remove_matching<F>(&mut self, mut predicate: F) -> Vec<EntityRecord>
    where
        F: FnMut(&EntityRecord) -> bool,
    {
        let ids: Vec<Identifier> = self
            .records
            .values()
            .filter(|record| predicate(record))
            .map(|record| record.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.records.remove(id)).collect()
    }

    #[cfg(test)]
    pub(crate) fn count_of(&self, kind: EntityKind) -> usize {
        self.records
            .values()
            .filter(|record| record.kind() == kind)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lock-guarded `EntityTable`. Holding the guard makes a liveness check and
/// whatever follows it (delivery, state transition, removal) one atomic step.
#[derive(Default)]
pub struct Registry {
    table: Mutex<EntityTable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, EntityTable> {
        self.table.lock().await
    }

    pub async fn contains(&self, id: &Identifier) -> bool {
        self.table.lock().await.contains(id)
    }

    #[cfg(test)]
    pub(crate) async fn kind_of(&self, id: &Identifier) -> Option<EntityKind> {
        self.table.lock().await.lookup(id).map(EntityRecord::kind)
    }

    pub async fn remove(&self, id: &Identifier) -> Option<EntityRecord> {
        self.table.lock().await.remove(id)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
