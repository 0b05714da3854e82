//! Booking state machine.
//!
//! ```text
//! pending ──► confirmed ──► completed
//!    │            │
//!    ├────────────┴──► cancelled
//!    └───────────────► completed
//! ```
//!
//! `completed` and `cancelled` are terminal. Owners confirm and complete; the booking's customer
//! cancels. Through the owner's status update an owner may also cancel (decline) a booking.

use crate::model::*;

use super::EngineError;

/// Which operation asked for the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Owners move bookings forward, customers cancel their own.
    Lifecycle,
    /// The owner's direct status update; everything requires room ownership.
    OwnerUpdate,
}

pub fn is_edge(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Completed)
            | (Confirmed, Completed)
            | (Pending, Cancelled)
            | (Confirmed, Cancelled)
    )
}

/// Terminal state first, then who is asking, then whether the edge exists.
pub(crate) fn check_transition(
    booking: &Booking,
    actor: &Actor,
    target: BookingStatus,
    surface: Surface,
) -> Result<(), EngineError> {
    let from = booking.status;
    if from.is_terminal() {
        return Err(EngineError::InvalidStateTransition { from, to: target });
    }
    authorize(booking, actor, target, surface)?;
    if !is_edge(from, target) {
        return Err(EngineError::InvalidStateTransition { from, to: target });
    }
    Ok(())
}

fn authorize(
    booking: &Booking,
    actor: &Actor,
    target: BookingStatus,
    surface: Surface,
) -> Result<(), EngineError> {
    let customer_cancel = surface == Surface::Lifecycle && target == BookingStatus::Cancelled;
    if customer_cancel {
        if actor.role == Role::Customer && actor.id == booking.customer_id {
            return Ok(());
        }
        return Err(EngineError::Unauthorized("only the booking's customer can cancel it"));
    }
    if actor.role == Role::HouseOwner && actor.id == booking.owner_id {
        return Ok(());
    }
    Err(EngineError::Unauthorized("only the room's owner can change this booking"))
}
