use thiserror::Error;
use ulid::Ulid;

use crate::engine::{Constraint, EngineError};
use crate::model::{ReservationStatus, Span};

/// Coarse classification used by the protocol layer to pick a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Internal,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("room {0} not found")]
    RoomNotFound(Ulid),
    #[error("time slot {0} not found")]
    TimeSlotNotFound(Ulid),
    #[error("reservation {0} not found")]
    ReservationNotFound(Ulid),

    #[error("room named {0:?} already exists")]
    RoomAlreadyExists(String),
    #[error("time slot {0} is already reserved")]
    ReservationConflict(Ulid),
    #[error("time slot {0} overlaps an existing time slot")]
    TimeSlotOverlap(Span),
    #[error("one or more time slots overlap")]
    SlotsOverlap,
    #[error("id {0} is already taken")]
    DuplicateId(Ulid),

    #[error("time slot {0} does not exist")]
    WrongTimeSlot(Ulid),
    #[error("reservation {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("invalid interval {0}: start must be before end")]
    InvalidSpan(Span),
    #[error("{0}")]
    LimitExceeded(&'static str),
    #[error("invalid user id")]
    InvalidUser,

    #[error("internal error")]
    Internal(#[source] EngineError),
    #[error("internal error")]
    UnexpectedConstraint(Constraint),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::RoomNotFound(_)
            | BookingError::TimeSlotNotFound(_)
            | BookingError::ReservationNotFound(_) => ErrorKind::NotFound,
            BookingError::RoomAlreadyExists(_)
            | BookingError::ReservationConflict(_)
            | BookingError::TimeSlotOverlap(_)
            | BookingError::SlotsOverlap
            | BookingError::DuplicateId(_) => ErrorKind::Conflict,
            BookingError::WrongTimeSlot(_)
            | BookingError::InvalidStatusTransition { .. }
            | BookingError::InvalidSpan(_)
            | BookingError::LimitExceeded(_)
            | BookingError::InvalidUser => ErrorKind::BadRequest,
            BookingError::Internal(_) | BookingError::UnexpectedConstraint(_) => ErrorKind::Internal,
        }
    }
}

impl From<EngineError> for BookingError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidSpan(span) => BookingError::InvalidSpan(span),
            EngineError::LimitExceeded(what) => BookingError::LimitExceeded(what),
            other => BookingError::Internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let id = Ulid::new();
        assert_eq!(BookingError::ReservationNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(BookingError::ReservationConflict(id).kind(), ErrorKind::Conflict);
        assert_eq!(BookingError::SlotsOverlap.kind(), ErrorKind::Conflict);
        assert_eq!(BookingError::WrongTimeSlot(id).kind(), ErrorKind::BadRequest);
        assert_eq!(
            BookingError::InvalidStatusTransition {
                id,
                from: ReservationStatus::Expired,
                to: ReservationStatus::Confirmed,
            }
            .kind(),
            ErrorKind::BadRequest
        );
    }

    #[test]
    fn store_failures_stay_opaque() {
        let err = BookingError::from(EngineError::WalError("disk on fire".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "internal error");

        let err = BookingError::from(EngineError::LimitExceeded("batch too large"));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
