use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, Span};

/// Which directory a missing id was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Room,
    Guest,
    Booking,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Room => "room",
            Entity::Guest => "guest",
            Entity::Booking => "booking",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Ulid },

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("invalid range: {0}")]
    InvalidRange(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// The requested stay overlaps an active booking; `stay` is that booking's interval.
    #[error("room is not available: conflicts with booking {booking_id} [{}, {})", .stay.start, .stay.end)]
    Conflict { booking_id: Ulid, stay: Span },

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn not_found(entity: Entity, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }
}
