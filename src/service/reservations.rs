use std::sync::Arc;

use ulid::Ulid;

use crate::engine::{Constraint, Engine, WriteOutcome};
use crate::model::{Reservation, ReservationStatus, UserId};

use super::{BookingError, TimeSlotService};

/// How `reserve` treats a caller's earlier reservation on the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservePolicy {
    /// Hand back an earlier CANCELED reservation instead of placing a new hold.
    /// On by default; a canceled reservation then blocks its owner from re-holding
    /// the slot. Pending product decision.
    pub reuse_canceled: bool,
}

impl Default for ReservePolicy {
    fn default() -> Self {
        Self {
            reuse_canceled: true,
        }
    }
}

/// Result of `reserve`: the reservation plus whether this call created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserved {
    pub reservation: Reservation,
    pub created: bool,
}

/// The reservation lifecycle: HOLD on reserve, then CONFIRMED or CANCELED by the
/// owner, or EXPIRED by the sweeper. Holds no state; every guarantee comes from
/// the store's constraints and conditional updates.
#[derive(Clone)]
pub struct ReservationService {
    engine: Arc<Engine>,
    time_slots: TimeSlotService,
    policy: ReservePolicy,
}

impl ReservationService {
    pub fn new(engine: Arc<Engine>, time_slots: TimeSlotService, policy: ReservePolicy) -> Self {
        Self {
            engine,
            time_slots,
            policy,
        }
    }

    /// Place a HOLD on a time slot for `user`.
    ///
    /// Repeating the call returns the caller's existing hold with `created = false`.
    pub async fn reserve(
        &self,
        user: &UserId,
        time_slot_id: Ulid,
        id: Option<Ulid>,
    ) -> Result<Reserved, BookingError> {
        if let Some(existing) = self.engine.find_latest_reservation(time_slot_id, user).await
            && self.reusable(existing.status)
        {
            metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "existing")
                .increment(1);
            return Ok(Reserved {
                reservation: existing,
                created: false,
            });
        }

        if self.time_slots.find_time_slot(time_slot_id).await.is_none() {
            return Err(BookingError::WrongTimeSlot(time_slot_id));
        }

        let id = id.unwrap_or_else(Ulid::new);
        match self
            .engine
            .insert_reservation(id, user.clone(), time_slot_id)
            .await?
        {
            WriteOutcome::Applied(reservation) => {
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "created")
                    .increment(1);
                tracing::debug!(reservation = %id, slot = %time_slot_id, user = %user, "hold placed");
                Ok(Reserved {
                    reservation,
                    created: true,
                })
            }
            WriteOutcome::Violated(Constraint::ActiveReservation) => {
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "conflict")
                    .increment(1);
                Err(BookingError::ReservationConflict(time_slot_id))
            }
            WriteOutcome::Violated(Constraint::ForeignKey) => Err(BookingError::WrongTimeSlot(time_slot_id)),
            WriteOutcome::Violated(Constraint::PrimaryKey) => Err(BookingError::DuplicateId(id)),
            WriteOutcome::Violated(other) => Err(BookingError::UnexpectedConstraint(other)),
        }
    }

    pub async fn confirm(&self, user: &UserId, id: Ulid) -> Result<Reservation, BookingError> {
        self.change_status_to(user, id, ReservationStatus::Confirmed).await
    }

    pub async fn cancel(&self, user: &UserId, id: Ulid) -> Result<Reservation, BookingError> {
        self.change_status_to(user, id, ReservationStatus::Canceled).await
    }

    /// Move the caller's HOLD to `target` with one conditional update.
    ///
    /// If nothing changed, the current row decides the answer: missing is not-found,
    /// already at `target` is success, anything else is an invalid transition.
    /// Only CONFIRMED and CANCELED can be requested.
    pub async fn change_status_to(
        &self,
        user: &UserId,
        id: Ulid,
        target: ReservationStatus,
    ) -> Result<Reservation, BookingError> {
        if !matches!(target, ReservationStatus::Confirmed | ReservationStatus::Canceled) {
            let current = self.get_reservation(user, id).await?;
            return Err(BookingError::InvalidStatusTransition {
                id,
                from: current.status,
                to: target,
            });
        }

        let changed = self
            .engine
            .update_reservation_status(user, id, ReservationStatus::Hold, target)
            .await?;
        let current = self.get_reservation(user, id).await?;

        if changed == 1 {
            metrics::counter!(crate::observability::RESERVATION_TRANSITIONS_TOTAL, "to" => target.as_str())
                .increment(1);
            tracing::debug!(reservation = %id, status = %target, "reservation status changed");
            return Ok(current);
        }
        if current.status == target {
            return Ok(current);
        }
        Err(BookingError::InvalidStatusTransition {
            id,
            from: current.status,
            to: target,
        })
    }

    /// Owner-scoped lookup. Someone else's reservation is reported as not found.
    pub async fn get_reservation(&self, user: &UserId, id: Ulid) -> Result<Reservation, BookingError> {
        self.engine
            .find_reservation_for_owner(user, id)
            .await
            .ok_or(BookingError::ReservationNotFound(id))
    }

    fn reusable(&self, status: ReservationStatus) -> bool {
        match status {
            ReservationStatus::Hold => true,
            ReservationStatus::Canceled => self.policy.reuse_canceled,
            ReservationStatus::Confirmed | ReservationStatus::Expired => false,
        }
    }
}
