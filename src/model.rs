use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in the smallest currency unit.
pub type Amount = u64;

/// Half-open day range `[check_in, check_out)`. The check-out day is free for the next guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "check-in must be before check-out");
        Self { check_in, check_out }
    }

    /// `None` for zero-length or inverted ranges.
    pub fn checked(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_in < check_out).then_some(Self { check_in, check_out })
    }

    pub fn nights(&self) -> u32 {
        (self.check_out - self.check_in).num_days() as u32
    }

    /// Half-open overlap: back-to-back stays (one's check-out is the other's check-in) never
    /// overlap.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// Every occupied night, check-in inclusive, check-out exclusive.
    pub fn nights_iter(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.check_out;
        self.check_in.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for StayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Active bookings hold the calendar.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown booking status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    HouseOwner,
}

/// The authenticated caller, passed explicitly into every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: Ulid) -> Self {
        Self { id, role: Role::Customer }
    }

    pub fn owner(id: Ulid) -> Self {
        Self { id, role: Role::HouseOwner }
    }
}

fn default_min_nights() -> u32 {
    1
}

fn default_max_nights() -> u32 {
    30
}

/// What the booking core needs to know about a listed room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub owner_id: Ulid,
    #[serde(default)]
    pub name: Option<String>,
    pub daily_rate: Amount,
    #[serde(default = "default_min_nights")]
    pub min_nights: u32,
    #[serde(default = "default_max_nights")]
    pub max_nights: u32,
}

impl Room {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_nights == 0 {
            return Err("min_nights must be at least 1");
        }
        if self.max_nights < self.min_nights {
            return Err("max_nights must not be below min_nights");
        }
        if self.daily_rate == 0 {
            return Err("daily_rate must be positive");
        }
        Ok(())
    }

    pub fn accepts_length(&self, nights: u32) -> bool {
        (self.min_nights..=self.max_nights).contains(&nights)
    }

    pub fn price_for(&self, nights: u32) -> Amount {
        self.daily_rate.saturating_mul(nights as Amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub customer_id: Ulid,
    /// Copied from the room at admission; not re-synced afterwards.
    pub owner_id: Ulid,
    pub stay: StayRange,
    pub total_price: Amount,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One room's entry in the stay index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stay {
    pub booking_id: Ulid,
    pub range: StayRange,
}

/// Per-room stay index, sorted by check-in. Holds booking ids only; status lives on the booking.
#[derive(Debug, Clone)]
pub struct RoomLedger {
    pub room_id: Ulid,
    pub stays: Vec<Stay>,
}

impl RoomLedger {
    pub fn new(room_id: Ulid) -> Self {
        Self {
            room_id,
            stays: Vec::new(),
        }
    }

    /// Insert maintaining sort order by check-in.
    pub fn insert_stay(&mut self, stay: Stay) {
        let pos = self
            .stays
            .partition_point(|s| s.range.check_in <= stay.range.check_in);
        self.stays.insert(pos, stay);
    }

    pub fn remove_stay(&mut self, booking_id: Ulid) -> Option<Stay> {
        let pos = self.stays.iter().position(|s| s.booking_id == booking_id)?;
        Some(self.stays.remove(pos))
    }

    /// Stays whose range overlaps `query`. Binary search skips stays checking in at or after
    /// `query.check_out`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Stay> {
        let right_bound = self
            .stays
            .partition_point(|s| s.range.check_in < query.check_out);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.range.check_out > query.check_in)
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingAdmitted {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::BookingAdmitted { booking } => booking.room_id,
            Event::BookingStatusChanged { room_id, .. } => *room_id,
        }
    }
}
