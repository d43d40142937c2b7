use thiserror::Error;
use ulid::Ulid;

use crate::model::Span;

/// Failures of the store itself. Constraint violations are not errors here; they come
/// back as `WriteOutcome::Violated` so callers branch on them explicitly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid interval {0}: start must be before end")]
    InvalidSpan(Span),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("room {0} is missing from the slot index")]
    Inconsistent(Ulid),
    #[error("WAL error: {0}")]
    WalError(String),
}

/// Store-enforced integrity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// A row with this id already exists.
    PrimaryKey,
    /// A referenced parent row (room or time slot) does not exist.
    ForeignKey,
    /// Room names are unique.
    RoomName,
    /// A room's slots never overlap.
    SlotOverlap,
    /// At most one HOLD/CONFIRMED reservation per slot.
    ActiveReservation,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Constraint::PrimaryKey => "primary_key",
            Constraint::ForeignKey => "foreign_key",
            Constraint::RoomName => "rooms_name_key",
            Constraint::SlotOverlap => "time_slots_no_overlap",
            Constraint::ActiveReservation => "reservations_one_active_per_slot",
        };
        f.write_str(name)
    }
}

/// Result of a constrained write: either it landed, or exactly one constraint refused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Applied(T),
    Violated(Constraint),
}

impl<T> WriteOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            WriteOutcome::Applied(v) => Some(v),
            WriteOutcome::Violated(_) => None,
        }
    }

    pub fn violation(&self) -> Option<Constraint> {
        match self {
            WriteOutcome::Applied(_) => None,
            WriteOutcome::Violated(c) => Some(*c),
        }
    }
}
