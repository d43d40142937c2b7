use std::sync::Arc;

use ulid::Ulid;

use crate::engine::{validate_span, Constraint, Engine, WriteOutcome};
use crate::model::{Span, TimeSlot};

use super::{BookingError, RoomService};

/// Slot creation with the per-room overlap guard, plus slot lookups.
#[derive(Clone)]
pub struct TimeSlotService {
    engine: Arc<Engine>,
    rooms: RoomService,
}

impl TimeSlotService {
    pub fn new(engine: Arc<Engine>, rooms: RoomService) -> Self {
        Self { engine, rooms }
    }

    /// Create one slot. An overlap with an existing slot of the room is
    /// reported with the rejected interval.
    pub async fn create_time_slot(
        &self,
        room_id: Ulid,
        id: Option<Ulid>,
        span: Span,
    ) -> Result<TimeSlot, BookingError> {
        self.rooms.get_room(room_id).await?;
        validate_span(&span)?;
        let id = id.unwrap_or_else(Ulid::new);

        match self.engine.insert_time_slots(room_id, vec![(id, span)]).await? {
            WriteOutcome::Applied(mut created) => created
                .pop()
                .ok_or(BookingError::TimeSlotNotFound(id)),
            WriteOutcome::Violated(Constraint::SlotOverlap) => Err(BookingError::TimeSlotOverlap(span)),
            WriteOutcome::Violated(c) => Err(violation(c, room_id, id)),
        }
    }

    /// Create many slots in one all-or-nothing write. Any overlap, against existing
    /// slots or within the batch, rejects every slot with a single aggregate error.
    pub async fn create_time_slots(
        &self,
        room_id: Ulid,
        slots: Vec<(Option<Ulid>, Span)>,
    ) -> Result<Vec<TimeSlot>, BookingError> {
        self.rooms.get_room(room_id).await?;
        for (_, span) in &slots {
            validate_span(span)?;
        }
        let slots: Vec<(Ulid, Span)> = slots
            .into_iter()
            .map(|(id, span)| (id.unwrap_or_else(Ulid::new), span))
            .collect();
        let ids: Vec<Ulid> = slots.iter().map(|(id, _)| *id).collect();

        match self.engine.insert_time_slots(room_id, slots).await? {
            WriteOutcome::Applied(created) => {
                tracing::debug!(room = %room_id, count = created.len(), "time slots created");
                Ok(created)
            }
            WriteOutcome::Violated(Constraint::SlotOverlap) => Err(BookingError::SlotsOverlap),
            WriteOutcome::Violated(Constraint::PrimaryKey) => {
                Err(BookingError::DuplicateId(self.first_taken_id(&ids).await))
            }
            WriteOutcome::Violated(c) => Err(violation(c, room_id, Ulid::nil())),
        }
    }

    /// The first id in `ids` that repeats within the batch or already names a slot.
    async fn first_taken_id(&self, ids: &[Ulid]) -> Ulid {
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            if !seen.insert(*id) || self.engine.get_time_slot(*id).await.is_some() {
                return *id;
            }
        }
        Ulid::nil()
    }

    pub async fn get_time_slot(&self, id: Ulid) -> Result<TimeSlot, BookingError> {
        self.find_time_slot(id)
            .await
            .ok_or(BookingError::TimeSlotNotFound(id))
    }

    pub async fn find_time_slot(&self, id: Ulid) -> Option<TimeSlot> {
        self.engine.get_time_slot(id).await
    }

    pub async fn list_time_slots(&self, room_id: Ulid) -> Result<Vec<TimeSlot>, BookingError> {
        self.engine
            .list_time_slots(room_id)
            .await
            .ok_or(BookingError::RoomNotFound(room_id))
    }

    /// Slots of the room with no HOLD or CONFIRMED reservation.
    pub async fn list_available_time_slots(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<TimeSlot>, BookingError> {
        self.engine
            .list_available_time_slots(room_id)
            .await
            .ok_or(BookingError::RoomNotFound(room_id))
    }
}

fn violation(c: Constraint, room_id: Ulid, slot_id: Ulid) -> BookingError {
    match c {
        Constraint::ForeignKey => BookingError::RoomNotFound(room_id),
        Constraint::PrimaryKey => BookingError::DuplicateId(slot_id),
        other => BookingError::UnexpectedConstraint(other),
    }
}
