use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::model::{BookingStatus, StayRange};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("check-out date must be after check-in date")]
    InvalidDateRange,
    #[error("stay of {nights} nights outside allowed {min}..={max}")]
    BookingLengthOutOfRange { nights: u32, min: u32, max: u32 },
    #[error("room not found: {0}")]
    RoomNotFound(Ulid),
    #[error("room {room_id} already booked for part of {requested}")]
    RoomUnavailable { room_id: Ulid, requested: StayRange },
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    #[error("not authorized: {0}")]
    Unauthorized(&'static str),
    #[error("cannot move booking from {from} to {to}")]
    InvalidStateTransition { from: BookingStatus, to: BookingStatus },
    #[error("invalid status: {0:?}")]
    InvalidStatus(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("room {0} is busy, try again")]
    Busy(Ulid),
    #[error("WAL error: {0}")]
    WalError(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Store or runtime failures, as opposed to outcomes the caller caused.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            EngineError::Busy(_)
                | EngineError::WalError(_)
                | EngineError::Catalog(_)
                | EngineError::Internal(_)
        )
    }

    /// Stable code reported over the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidDateRange => "invalid_date_range",
            EngineError::BookingLengthOutOfRange { .. } => "booking_length_out_of_range",
            EngineError::RoomNotFound(_) => "room_not_found",
            EngineError::RoomUnavailable { .. } => "room_unavailable",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::InvalidStatus(_) => "invalid_status",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Busy(_) => "busy",
            EngineError::WalError(_) | EngineError::Catalog(_) | EngineError::Internal(_) => {
                "internal"
            }
        }
    }
}
