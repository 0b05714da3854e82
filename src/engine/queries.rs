use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::overlap::{active_stays, check_length, validate_range};
use super::{sort_newest_first, Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub nights: u32,
    pub daily_rate: Amount,
    pub total_price: Amount,
}

impl Engine {
    /// Visible to the booking's customer and the room's owner only.
    pub async fn get_booking(&self, booking_id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let shared = self
            .journal
            .shared_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let booking = shared.lock().await.clone();
        let visible = match actor.role {
            Role::Customer => actor.id == booking.customer_id,
            Role::HouseOwner => actor.id == booking.owner_id,
        };
        if !visible {
            return Err(EngineError::Unauthorized("booking belongs to someone else"));
        }
        Ok(booking)
    }

    /// Date ranges of the room's active bookings, check-in ascending (the customer and owner
    /// listings are newest first). This is what calendars disable. Unknown rooms have no
    /// bookings.
    pub async fn list_bookings_for_room(&self, room_id: Ulid) -> Vec<StayRange> {
        let Some(ledger) = self.existing_ledger(&room_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        active_stays(&guard, &self.journal).await
    }

    pub async fn list_bookings_for_customer(&self, customer_id: Ulid) -> Vec<Booking> {
        let ids = self
            .journal
            .by_customer
            .get(&customer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings = self.snapshot(ids).await;
        sort_newest_first(&mut bookings);
        bookings
    }

    /// Every booking, of any status, on rooms the owner currently holds.
    pub async fn list_bookings_for_owner_rooms(&self, owner_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rooms: HashSet<Ulid> = self
            .catalog
            .rooms_owned_by(owner_id)
            .await?
            .into_iter()
            .collect();
        if rooms.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Ulid> = self.journal.bookings.iter().map(|e| *e.key()).collect();
        let mut bookings = self.snapshot(ids).await;
        bookings.retain(|b| rooms.contains(&b.room_id));
        sort_newest_first(&mut bookings);
        Ok(bookings)
    }

    /// Nights inside `[from, until)` taken by an active booking, ascending and deduplicated.
    pub async fn blocked_nights(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let window = validate_range(from, until)?;
        if window.nights() > MAX_QUERY_NIGHTS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mut nights = BTreeSet::new();
        for stay in self.list_bookings_for_room(room_id).await {
            if !stay.overlaps(&window) {
                continue;
            }
            let clipped = StayRange::new(
                stay.check_in.max(window.check_in),
                stay.check_out.min(window.check_out),
            );
            nights.extend(clipped.nights_iter());
        }
        Ok(nights.into_iter().collect())
    }

    /// Non-authoritative preview: a `true` here can still lose the race in `create_booking`.
    pub async fn is_available(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, EngineError> {
        let range = validate_range(check_in, check_out)?;
        if self.catalog.room(room_id).await?.is_none() {
            return Err(EngineError::RoomNotFound(room_id));
        }
        let taken = self.list_bookings_for_room(room_id).await;
        Ok(!taken.iter().any(|stay| stay.overlaps(&range)))
    }

    /// `nights × daily_rate`, after the same range and length checks admission makes.
    pub async fn quote(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Quote, EngineError> {
        let range = validate_range(check_in, check_out)?;
        let room = self
            .catalog
            .room(room_id)
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))?;
        check_length(&room, &range)?;
        Ok(Quote {
            nights: range.nights(),
            daily_rate: room.daily_rate,
            total_price: room.price_for(range.nights()),
        })
    }
}
