mod error;
mod lifecycle;
mod mutations;
mod overlap;
mod queries;

pub use error::EngineError;
pub use lifecycle::{is_edge, Surface};
pub use overlap::overlaps;
pub use queries::Quote;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::catalog::RoomCatalog;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomLedger = Arc<RwLock<RoomLedger>>;
pub type SharedBooking = Arc<Mutex<Booking>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

/// On failure every caller in the batch is told the write failed, so none of the batch may
/// survive: the log is cut back to where it stood before the batch.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), "WAL flush failed, rolling back batch: {e}");
        if let Err(rollback) = wal.discard_unsynced() {
            tracing::error!("WAL rollback failed: {rollback}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Settings ─────────────────────────────────────────────

/// What to store as a booking's total price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PricePolicy {
    /// Store `nights × daily_rate`, ignoring the caller's figure.
    #[default]
    Recompute,
    /// Store the caller's figure as given.
    Trust,
}

impl FromStr for PricePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recompute" => Ok(PricePolicy::Recompute),
            "trust" => Ok(PricePolicy::Trust),
            other => Err(format!("unknown price policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Longest an admission waits for its room's exclusion scope. Zero waits without limit.
    pub lock_timeout: Duration,
    pub price_policy: PricePolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            price_policy: PricePolicy::default(),
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Everything a commit task needs once it has been handed its locks.
#[derive(Clone)]
pub(super) struct Journal {
    wal_tx: mpsc::Sender<WalCommand>,
    bookings: Arc<DashMap<Ulid, SharedBooking>>,
    by_customer: Arc<DashMap<Ulid, Vec<Ulid>>>,
    /// Commits hold it shared; compaction holds it exclusively while snapshotting.
    gate: Arc<RwLock<()>>,
    notify: Arc<NotifyHub>,
}

impl Journal {
    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    fn shared_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    async fn status_of(&self, id: &Ulid) -> Option<BookingStatus> {
        let shared = self.shared_booking(id)?;
        let status = shared.lock().await.status;
        Some(status)
    }
}

pub struct Engine {
    /// Per-room exclusion scope and stay index, created on a room's first booking.
    rooms: DashMap<Ulid, SharedRoomLedger>,
    journal: Journal,
    catalog: Arc<dyn RoomCatalog>,
    settings: EngineSettings,
    /// Makes the writer's next flush fail.
    #[cfg(test)]
    wal_fault: Arc<std::sync::atomic::AtomicBool>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<dyn RoomCatalog>,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        #[cfg(test)]
        let wal_fault = wal.fail_next_flush.clone();
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Fold the log into plain values first; nothing is shared yet.
        let mut latest: HashMap<Ulid, Booking> = HashMap::new();
        for event in events {
            match event {
                Event::BookingAdmitted { booking } => {
                    latest.insert(booking.id, booking);
                }
                Event::BookingStatusChanged { id, status, at, .. } => {
                    if let Some(booking) = latest.get_mut(&id) {
                        booking.status = status;
                        booking.updated_at = at;
                    }
                }
            }
        }

        let mut ledgers: HashMap<Ulid, RoomLedger> = HashMap::new();
        let bookings = DashMap::new();
        let by_customer: DashMap<Ulid, Vec<Ulid>> = DashMap::new();
        for (id, booking) in latest {
            if booking.status.is_active() {
                ledgers
                    .entry(booking.room_id)
                    .or_insert_with(|| RoomLedger::new(booking.room_id))
                    .insert_stay(Stay {
                        booking_id: id,
                        range: booking.stay,
                    });
            }
            by_customer.entry(booking.customer_id).or_default().push(id);
            bookings.insert(id, Arc::new(Mutex::new(booking)));
        }
        metrics::gauge!(crate::observability::BOOKINGS_LOADED).set(bookings.len() as f64);

        Ok(Self {
            rooms: ledgers
                .into_iter()
                .map(|(room_id, ledger)| (room_id, Arc::new(RwLock::new(ledger))))
                .collect(),
            journal: Journal {
                wal_tx,
                bookings: Arc::new(bookings),
                by_customer: Arc::new(by_customer),
                gate: Arc::new(RwLock::new(())),
                notify,
            },
            catalog,
            settings,
            #[cfg(test)]
            wal_fault,
        })
    }

    #[cfg(test)]
    pub(super) fn fail_next_wal_flush(&self) {
        self.wal_fault.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn booking_count(&self) -> usize {
        self.journal.bookings.len()
    }

    /// Committed events for one room, from now on.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.journal.notify.subscribe(room_id)
    }

    pub(super) fn ledger(&self, room_id: Ulid) -> SharedRoomLedger {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomLedger::new(room_id))))
            .clone()
    }

    pub(super) fn existing_ledger(&self, room_id: &Ulid) -> Option<SharedRoomLedger> {
        self.rooms.get(room_id).map(|e| e.value().clone())
    }

    /// Current values of the given bookings. Ids no longer present are skipped.
    pub(super) async fn snapshot(&self, ids: impl IntoIterator<Item = Ulid>) -> Vec<Booking> {
        let shared: Vec<SharedBooking> = ids
            .into_iter()
            .filter_map(|id| self.journal.shared_booking(&id))
            .collect();
        let mut out = Vec::with_capacity(shared.len());
        for booking in shared {
            out.push(booking.lock().await.clone());
        }
        out
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Newest check-in first; ties broken by id so output is stable.
pub(super) fn sort_newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| {
        b.stay
            .check_in
            .cmp(&a.stay.check_in)
            .then_with(|| b.id.cmp(&a.id))
    });
}
