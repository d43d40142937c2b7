use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_USER_ID_LEN;

/// Unix milliseconds. Every timestamp in the system uses this type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Callers validate `start < end` first; see `engine::validate_span`.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The acting principal. Opaque to the core, only compared for ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Taken verbatim. Empty, overlong, or whitespace-padded ids are rejected rather
    /// than normalised, so two distinct logins never share an ownership key.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_USER_ID_LEN || raw.trim() != raw {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Hold,
    Confirmed,
    Canceled,
    Expired,
}

impl ReservationStatus {
    /// Active reservations claim their slot; at most one per slot.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Hold | ReservationStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Hold => "HOLD",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Canceled => "CANCELED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HOLD" => Ok(ReservationStatus::Hold),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            // accept the double-l spelling clients tend to send
            "CANCELED" | "CANCELLED" => Ok(ReservationStatus::Canceled),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: UserId,
    pub time_slot_id: Ulid,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A room row plus its slots, sorted by `span.start`. Guarded as one unit so the
/// overlap check and the insert happen under the same lock.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub slots: Vec<TimeSlot>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            slots: Vec::new(),
        }
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: TimeSlot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    /// Slots whose span overlaps the query window.
    /// Binary search skips slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &TimeSlot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

/// A slot row plus every reservation ever placed on it, in insertion order.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: TimeSlot,
    pub reservations: Vec<Reservation>,
}

impl SlotState {
    pub fn new(slot: TimeSlot) -> Self {
        Self {
            slot,
            reservations: Vec::new(),
        }
    }

    /// The reservation currently claiming this slot, if any.
    pub fn active(&self) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.status.is_active())
    }

    pub fn find(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Most recently placed reservation by this user on this slot.
    pub fn latest_for(&self, user: &UserId) -> Option<&Reservation> {
        self.reservations.iter().rev().find(|r| &r.user_id == user)
    }
}

/// WAL record payload. One commit is a `Vec<Event>` applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        description: Option<String>,
        at: Ms,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        description: Option<String>,
        at: Ms,
    },
    TimeSlotCreated {
        id: Ulid,
        room_id: Ulid,
        span: Span,
        at: Ms,
    },
    ReservationPlaced {
        id: Ulid,
        user_id: UserId,
        time_slot_id: Ulid,
        at: Ms,
    },
    ReservationStatusChanged {
        id: Ulid,
        time_slot_id: Ulid,
        status: ReservationStatus,
        at: Ms,
    },
}
