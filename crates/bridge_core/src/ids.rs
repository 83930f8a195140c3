use shared::domain::Identifier;
use uuid::Uuid;

/// Hands out random (v4 UUID) identifiers that are never reused within the
/// process.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn next(&self) -> Identifier {
        Identifier::new(Uuid::new_v4().to_string())
    }
}

/// Registry key of a search session. Session ids are only unique within
/// their manager, so the registry addresses them through the manager id.
pub fn session_key(manager_id: &Identifier, session_id: &str) -> Identifier {
    Identifier::new(format!("{manager_id}#{session_id}"))
}
