use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Organization,
    Booking,
    Member,
    Session,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Organization => "organization",
            Entity::Booking => "booking",
            Entity::Member => "member",
            Entity::Session => "session",
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found: {1}")]
    NotFound(Entity, String),
    #[error("{0} already exists: {1}")]
    AlreadyExists(Entity, String),
    #[error("conflict with booking: {0}")]
    Conflict(u64),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl StoreError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        StoreError::NotFound(entity, id.to_string())
    }
}
