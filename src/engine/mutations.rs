use std::collections::HashSet;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_batch_overlap, find_overlap, now_ms, validate_room_fields, validate_span};
use super::{Constraint, Engine, EngineError, WalCommand, WriteOutcome};

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        description: Option<String>,
    ) -> Result<WriteOutcome<Room>, EngineError> {
        validate_room_fields(&name, description.as_deref())?;
        let _gate = self.checkpoint.read().await;
        let _catalog = self.catalog.lock().await;

        if self.tables.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.tables.contains_room(&id) {
            return Ok(WriteOutcome::Violated(Constraint::PrimaryKey));
        }
        if self.tables.room_id_for_name(&name).is_some() {
            return Ok(WriteOutcome::Violated(Constraint::RoomName));
        }

        let event = Event::RoomCreated {
            id,
            name,
            description,
            at: now_ms(),
        };
        self.wal_append(vec![event.clone()]).await?;
        let room = self
            .tables
            .apply_room_created(&event)
            .ok_or(EngineError::Inconsistent(id))?;
        Ok(WriteOutcome::Applied(room))
    }

    /// Change a room's name and/or description. Fields left `None` keep their value;
    /// `Some(None)` clears the description. `Ok(None)` if the room doesn't exist.
    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        description: Option<Option<String>>,
    ) -> Result<Option<WriteOutcome<Room>>, EngineError> {
        let _gate = self.checkpoint.read().await;
        let _catalog = self.catalog.lock().await;

        let Some(rs) = self.tables.get_room(&id) else {
            return Ok(None);
        };
        let mut guard = rs.write().await;
        let name = name.unwrap_or_else(|| guard.room.name.clone());
        let description = description.unwrap_or_else(|| guard.room.description.clone());
        validate_room_fields(&name, description.as_deref())?;
        if self
            .tables
            .room_id_for_name(&name)
            .is_some_and(|owner| owner != id)
        {
            return Ok(Some(WriteOutcome::Violated(Constraint::RoomName)));
        }

        let event = Event::RoomUpdated {
            id,
            name,
            description,
            at: now_ms(),
        };
        self.persist_and_apply_room(&mut guard, vec![event]).await?;
        Ok(Some(WriteOutcome::Applied(guard.room.clone())))
    }

    /// Insert one or more slots into a room as a single all-or-nothing write.
    ///
    /// Every new span is checked against the room's existing slots and against every
    /// other span in the batch. One violation rejects the whole batch.
    pub async fn insert_time_slots(
        &self,
        room_id: Ulid,
        slots: Vec<(Ulid, Span)>,
    ) -> Result<WriteOutcome<Vec<TimeSlot>>, EngineError> {
        if slots.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for (_, span) in &slots {
            validate_span(span)?;
        }

        let _gate = self.checkpoint.read().await;
        let _catalog = self.catalog.lock().await;

        let Some(rs) = self.tables.get_room(&room_id) else {
            return Ok(WriteOutcome::Violated(Constraint::ForeignKey));
        };
        let mut guard = rs.write().await;
        if slots.is_empty() {
            return Ok(WriteOutcome::Applied(Vec::new()));
        }
        if guard.slots.len() + slots.len() > MAX_SLOTS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many time slots in room"));
        }

        let mut ids = HashSet::with_capacity(slots.len());
        for (id, _) in &slots {
            if !ids.insert(*id) || self.tables.contains_slot(id) {
                return Ok(WriteOutcome::Violated(Constraint::PrimaryKey));
            }
        }
        if slots
            .iter()
            .any(|(_, span)| find_overlap(&guard, span).is_some())
        {
            return Ok(WriteOutcome::Violated(Constraint::SlotOverlap));
        }
        let spans: Vec<Span> = slots.iter().map(|(_, span)| *span).collect();
        if find_batch_overlap(&spans).is_some() {
            return Ok(WriteOutcome::Violated(Constraint::SlotOverlap));
        }

        let at = now_ms();
        let commit: Vec<Event> = slots
            .iter()
            .map(|(id, span)| Event::TimeSlotCreated {
                id: *id,
                room_id,
                span: *span,
                at,
            })
            .collect();
        self.persist_and_apply_room(&mut guard, commit).await?;

        let created = slots
            .into_iter()
            .map(|(id, span)| TimeSlot {
                id,
                room_id,
                span,
                created_at: at,
                updated_at: at,
            })
            .collect();
        Ok(WriteOutcome::Applied(created))
    }

    /// Insert a HOLD reservation. The active-reservation check and the insert run under
    /// the slot's write lock, so of any number of concurrent callers at most one lands.
    pub async fn insert_reservation(
        &self,
        id: Ulid,
        user: UserId,
        time_slot_id: Ulid,
    ) -> Result<WriteOutcome<Reservation>, EngineError> {
        let _gate = self.checkpoint.read().await;
        let Some(ss) = self.tables.get_slot(&time_slot_id) else {
            return Ok(WriteOutcome::Violated(Constraint::ForeignKey));
        };
        let mut guard = ss.write().await;

        if guard.active().is_some() {
            return Ok(WriteOutcome::Violated(Constraint::ActiveReservation));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many reservations on time slot"));
        }
        if !self.tables.claim_reservation_id(id, time_slot_id) {
            return Ok(WriteOutcome::Violated(Constraint::PrimaryKey));
        }

        let event = Event::ReservationPlaced {
            id,
            user_id: user,
            time_slot_id,
            at: now_ms(),
        };
        if let Err(e) = self.persist_and_apply_slot(&mut guard, event).await {
            self.tables.release_reservation_id(&id);
            return Err(e);
        }
        guard
            .find(id)
            .cloned()
            .map(WriteOutcome::Applied)
            .ok_or(EngineError::Inconsistent(id))
    }

    /// Compare-and-swap on a reservation's status.
    ///
    /// Changes the row only if it exists, belongs to `user`, and currently has status
    /// `expected`. Returns the number of rows changed (0 or 1).
    pub async fn update_reservation_status(
        &self,
        user: &UserId,
        id: Ulid,
        expected: ReservationStatus,
        new: ReservationStatus,
    ) -> Result<u64, EngineError> {
        let _gate = self.checkpoint.read().await;
        let Some(slot_id) = self.tables.slot_for_reservation(&id) else {
            return Ok(0);
        };
        let Some(ss) = self.tables.get_slot(&slot_id) else {
            return Ok(0);
        };
        let mut guard = ss.write().await;

        let matches = guard
            .find(id)
            .is_some_and(|r| &r.user_id == user && r.status == expected);
        if !matches {
            return Ok(0);
        }
        // Reviving a released row would let two active reservations share the slot.
        if new.is_active() && !expected.is_active() && guard.active().is_some() {
            return Ok(0);
        }

        let event = Event::ReservationStatusChanged {
            id,
            time_slot_id: slot_id,
            status: new,
            at: now_ms(),
        };
        self.persist_and_apply_slot(&mut guard, event).await?;
        Ok(1)
    }

    /// Move every HOLD created at or before `cutoff` to EXPIRED in one commit.
    /// Returns how many reservations changed.
    pub async fn expire_holds(&self, cutoff: Ms) -> Result<u64, EngineError> {
        let _gate = self.checkpoint.read().await;

        let mut candidates = Vec::new();
        for slot_id in self.tables.slot_ids() {
            let Some(ss) = self.tables.get_slot(&slot_id) else {
                continue;
            };
            let guard = ss.read().await;
            if guard.reservations.iter().any(|r| is_stale_hold(r, cutoff)) {
                candidates.push(ss.clone());
            }
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        // slot_ids() is sorted, so locks are taken in ascending id order.
        let mut guards = Vec::with_capacity(candidates.len());
        for ss in candidates {
            guards.push(ss.write_owned().await);
        }

        // Re-check under the write locks: a confirm or cancel may have won the race.
        let at = now_ms();
        let mut commit = Vec::new();
        for guard in &guards {
            for r in guard.reservations.iter().filter(|r| is_stale_hold(r, cutoff)) {
                commit.push(Event::ReservationStatusChanged {
                    id: r.id,
                    time_slot_id: r.time_slot_id,
                    status: ReservationStatus::Expired,
                    at,
                });
            }
        }
        if commit.is_empty() {
            return Ok(0);
        }

        let expired = commit.len() as u64;
        self.wal_append(commit.clone()).await?;
        for event in &commit {
            if let Event::ReservationStatusChanged { time_slot_id, .. } = event
                && let Some(guard) = guards.iter_mut().find(|g| g.slot.id == *time_slot_id)
            {
                self.tables.apply_to_slot(guard, event);
            }
        }
        Ok(expired)
    }

    /// Rewrite the WAL as the minimal commit that recreates the current state.
    ///
    /// Takes the checkpoint exclusively, so no write is in flight while the snapshot
    /// is taken and swapped in.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.checkpoint.write().await;
        let mut snapshot = Vec::new();

        for room_id in self.tables.room_ids() {
            let Some(rs) = self.tables.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            let room = &guard.room;
            snapshot.push(Event::RoomCreated {
                id: room.id,
                name: room.name.clone(),
                description: room.description.clone(),
                at: room.created_at,
            });
            if room.updated_at != room.created_at {
                snapshot.push(Event::RoomUpdated {
                    id: room.id,
                    name: room.name.clone(),
                    description: room.description.clone(),
                    at: room.updated_at,
                });
            }
            for slot in &guard.slots {
                snapshot.push(Event::TimeSlotCreated {
                    id: slot.id,
                    room_id: slot.room_id,
                    span: slot.span,
                    at: slot.created_at,
                });
            }
        }

        for slot_id in self.tables.slot_ids() {
            let Some(ss) = self.tables.get_slot(&slot_id) else {
                continue;
            };
            let guard = ss.read().await;
            for r in &guard.reservations {
                snapshot.push(Event::ReservationPlaced {
                    id: r.id,
                    user_id: r.user_id.clone(),
                    time_slot_id: r.time_slot_id,
                    at: r.created_at,
                });
                if r.status != ReservationStatus::Hold {
                    snapshot.push(Event::ReservationStatusChanged {
                        id: r.id,
                        time_slot_id: r.time_slot_id,
                        status: r.status,
                        at: r.updated_at,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                snapshot,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
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

fn is_stale_hold(r: &Reservation, cutoff: Ms) -> bool {
    r.status == ReservationStatus::Hold && r.created_at <= cutoff
}
