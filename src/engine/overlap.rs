use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{EngineError, Journal};

/// Free-function form of [`StayRange::overlaps`].
pub fn overlaps(a: &StayRange, b: &StayRange) -> bool {
    a.overlaps(b)
}

pub(crate) fn validate_range(check_in: NaiveDate, check_out: NaiveDate) -> Result<StayRange, EngineError> {
    StayRange::checked(check_in, check_out).ok_or(EngineError::InvalidDateRange)
}

pub(crate) fn check_length(room: &Room, range: &StayRange) -> Result<(), EngineError> {
    let nights = range.nights();
    if room.accepts_length(nights) {
        Ok(())
    } else {
        Err(EngineError::BookingLengthOutOfRange {
            nights,
            min: room.min_nights,
            max: room.max_nights,
        })
    }
}

/// Find an active booking overlapping `range`. Settled stays met along the way are pruned,
/// which is why this needs the ledger mutably. Caller holds the room's exclusion scope.
pub(crate) async fn find_conflict(
    ledger: &mut RoomLedger,
    range: &StayRange,
    journal: &Journal,
) -> Option<Ulid> {
    let candidates: Vec<Ulid> = ledger
        .overlapping(range)
        .filter(|stay| overlaps(&stay.range, range))
        .map(|stay| stay.booking_id)
        .collect();

    let mut conflict = None;
    for id in candidates {
        match journal.status_of(&id).await {
            Some(status) if status.is_active() => {
                conflict = Some(id);
                break;
            }
            _ => {
                ledger.remove_stay(id);
            }
        }
    }
    conflict
}

/// Drop every settled stay from the ledger. Used when the ledger hits its size cap.
pub(crate) async fn prune_settled(ledger: &mut RoomLedger, journal: &Journal) {
    let ids: Vec<Ulid> = ledger.stays.iter().map(|s| s.booking_id).collect();
    for id in ids {
        let active = journal.status_of(&id).await.is_some_and(|s| s.is_active());
        if !active {
            ledger.remove_stay(id);
        }
    }
}

/// Active stays in the ledger, in check-in order. Reads only; nothing is pruned.
pub(crate) async fn active_stays(ledger: &RoomLedger, journal: &Journal) -> Vec<StayRange> {
    let mut out = Vec::with_capacity(ledger.stays.len());
    for stay in &ledger.stays {
        if journal.status_of(&stay.booking_id).await.is_some_and(|s| s.is_active()) {
            out.push(stay.range);
        }
    }
    out
}

pub(crate) fn check_capacity(ledger: &RoomLedger) -> Result<(), EngineError> {
    if ledger.stays.len() >= MAX_STAYS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many bookings on room"));
    }
    Ok(())
}
