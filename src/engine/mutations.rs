use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedRwLockWriteGuard};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::*;

use super::lifecycle::check_transition;
use super::overlap::{check_capacity, check_length, find_conflict, prune_settled, validate_range};
use super::{Engine, EngineError, Journal, PricePolicy, SharedBooking, Surface, WalCommand};

impl Engine {
    /// Admit a booking for `actor` or reject it. Concurrent admissions on one room are
    /// serialized by the room's exclusion scope; different rooms never wait on each other.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        total_price: Amount,
    ) -> Result<Booking, EngineError> {
        let result = self
            .admit(actor, room_id, check_in, check_out, total_price)
            .await;
        let outcome = match &result {
            Ok(booking) => {
                debug!(booking = %booking.id, room = %room_id, "admitted {}", booking.stay);
                "admitted"
            }
            Err(e) => {
                debug!(room = %room_id, "admission rejected: {e}");
                e.kind()
            }
        };
        metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn admit(
        &self,
        actor: &Actor,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        quoted_price: Amount,
    ) -> Result<Booking, EngineError> {
        let range = validate_range(check_in, check_out)?;
        if actor.role != Role::Customer {
            return Err(EngineError::Unauthorized("only customers can book rooms"));
        }
        let room = self
            .catalog
            .room(room_id)
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))?;
        check_length(&room, &range)?;
        let total_price = self.settle_price(&room, &range, quoted_price);

        let ledger = self.ledger(room_id);
        let wait_start = Instant::now();
        let mut guard = if self.settings.lock_timeout.is_zero() {
            ledger.write_owned().await
        } else {
            tokio::time::timeout(self.settings.lock_timeout, ledger.write_owned())
                .await
                .map_err(|_| EngineError::Busy(room_id))?
        };
        metrics::histogram!(ROOM_LOCK_WAIT_SECONDS).record(wait_start.elapsed().as_secs_f64());

        if let Some(existing) = find_conflict(&mut guard, &range, &self.journal).await {
            debug!(room = %room_id, conflict = %existing, "overlap on {range}");
            return Err(EngineError::RoomUnavailable {
                room_id,
                requested: range,
            });
        }
        if check_capacity(&guard).is_err() {
            prune_settled(&mut guard, &self.journal).await;
            check_capacity(&guard)?;
        }

        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            room_id,
            customer_id: actor.id,
            owner_id: room.owner_id,
            stay: range,
            total_price,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        // Once the overlap check has passed the commit runs on its own task, still holding the
        // room guard, so a caller dropping this future cannot leave a half-written booking.
        tokio::spawn(commit_admission(self.journal.clone(), guard, booking))
            .await
            .map_err(|e| EngineError::Internal(format!("admission task failed: {e}")))?
    }

    fn settle_price(&self, room: &Room, range: &StayRange, quoted: Amount) -> Amount {
        let expected = room.price_for(range.nights());
        if quoted != expected {
            warn!(
                room = %room.id,
                "quoted price {quoted} differs from {} nights x {} = {expected}",
                range.nights(),
                room.daily_rate
            );
            metrics::counter!(PRICE_MISMATCH_TOTAL).increment(1);
        }
        match self.settings.price_policy {
            PricePolicy::Recompute => expected,
            PricePolicy::Trust => quoted,
        }
    }

    /// Move a booking along the lifecycle: owners confirm and complete, customers cancel.
    pub async fn transition_status(
        &self,
        booking_id: Ulid,
        actor: &Actor,
        target: BookingStatus,
    ) -> Result<Booking, EngineError> {
        self.apply_transition(booking_id, actor, target, Surface::Lifecycle)
            .await
    }

    /// The owner's status update. Accepts any of the four status names; the state machine
    /// still decides whether the move is allowed.
    pub async fn set_status(
        &self,
        booking_id: Ulid,
        actor: &Actor,
        status: &str,
    ) -> Result<Booking, EngineError> {
        let target: BookingStatus = status
            .parse()
            .map_err(|_| EngineError::InvalidStatus(status.to_string()))?;
        self.apply_transition(booking_id, actor, target, Surface::OwnerUpdate)
            .await
    }

    /// Customer's cancel.
    pub async fn cancel_booking(&self, booking_id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        self.transition_status(booking_id, actor, BookingStatus::Cancelled)
            .await
    }

    async fn apply_transition(
        &self,
        booking_id: Ulid,
        actor: &Actor,
        target: BookingStatus,
        surface: Surface,
    ) -> Result<Booking, EngineError> {
        let shared = self
            .journal
            .shared_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let updated = tokio::spawn(commit_transition(
            self.journal.clone(),
            shared,
            *actor,
            target,
            surface,
        ))
        .await
        .map_err(|e| EngineError::Internal(format!("transition task failed: {e}")))??;

        metrics::counter!(STATUS_TRANSITIONS_TOTAL, "to" => target.as_str()).increment(1);
        debug!(booking = %booking_id, actor = %actor.id, "status now {target}");
        Ok(updated)
    }

    /// Rewrite the WAL as one `BookingAdmitted` per booking carrying its current status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.journal.gate.write().await;

        let shared: Vec<SharedBooking> = self
            .journal
            .bookings
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut bookings = Vec::with_capacity(shared.len());
        for b in shared {
            bookings.push(b.lock().await.clone());
        }
        bookings.sort_by_key(|b| b.id);
        let events = bookings
            .into_iter()
            .map(|booking| Event::BookingAdmitted { booking })
            .collect();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.journal
            .wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}

async fn commit_admission(
    journal: Journal,
    mut ledger: OwnedRwLockWriteGuard<RoomLedger>,
    booking: Booking,
) -> Result<Booking, EngineError> {
    let _gate = journal.gate.read().await;
    let event = Event::BookingAdmitted {
        booking: booking.clone(),
    };
    journal.wal_append(&event).await?;

    journal
        .bookings
        .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
    journal
        .by_customer
        .entry(booking.customer_id)
        .or_default()
        .push(booking.id);
    ledger.insert_stay(Stay {
        booking_id: booking.id,
        range: booking.stay,
    });
    metrics::gauge!(BOOKINGS_LOADED).set(journal.bookings.len() as f64);
    journal.notify.send(&event);
    Ok(booking)
}

/// Row-level read-modify-write: only the booking's own lock is held, never the room's.
async fn commit_transition(
    journal: Journal,
    shared: SharedBooking,
    actor: Actor,
    target: BookingStatus,
    surface: Surface,
) -> Result<Booking, EngineError> {
    let _gate = journal.gate.read().await;
    let mut booking = shared.lock().await;
    check_transition(&booking, &actor, target, surface)?;

    let at = Utc::now();
    let event = Event::BookingStatusChanged {
        id: booking.id,
        room_id: booking.room_id,
        status: target,
        at,
    };
    journal.wal_append(&event).await?;
    booking.status = target;
    booking.updated_at = at;
    journal.notify.send(&event);
    Ok(booking.clone())
}
