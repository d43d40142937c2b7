use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// The three tables plus the indexes that back their constraints.
///
/// Rows are grouped by owner: a room's slots live in its `RoomState`, a slot's
/// reservations in its `SlotState`. Each group sits behind one lock, which is the
/// granularity of the store's row locking.
pub struct Tables {
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Unique index: room name → room id.
    room_names: DashMap<String, Ulid>,
    slots: DashMap<Ulid, SharedSlotState>,
    /// Reservation id → owning slot id.
    reservation_slot: DashMap<Ulid, Ulid>,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            room_names: DashMap::new(),
            slots: DashMap::new(),
            reservation_slot: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn room_id_for_name(&self, name: &str) -> Option<Ulid> {
        self.room_names.get(name).map(|e| *e.value())
    }

    // ── Time slots ───────────────────────────────────────────

    pub fn contains_slot(&self, id: &Ulid) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.slots.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Reservation index ────────────────────────────────────

    pub fn slot_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_slot.get(reservation_id).map(|e| *e.value())
    }

    /// Claim a reservation id for a slot. Returns false if the id is already taken.
    pub fn claim_reservation_id(&self, reservation_id: Ulid, slot_id: Ulid) -> bool {
        match self.reservation_slot.entry(reservation_id) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(v) => {
                v.insert(slot_id);
                true
            }
        }
    }

    pub fn release_reservation_id(&self, reservation_id: &Ulid) {
        self.reservation_slot.remove(reservation_id);
    }

    // ── Event application ────────────────────────────────────

    /// Materialize a new room row. Returns the row as stored.
    pub fn apply_room_created(&self, event: &Event) -> Option<Room> {
        let Event::RoomCreated {
            id,
            name,
            description,
            at,
        } = event
        else {
            return None;
        };
        let room = Room {
            id: *id,
            name: name.clone(),
            description: description.clone(),
            created_at: *at,
            updated_at: *at,
        };
        self.room_names.insert(name.clone(), *id);
        self.rooms
            .insert(*id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        Some(room)
    }

    /// Apply a room-scoped event. Caller holds the room's write lock.
    pub fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated {
                id,
                name,
                description,
                at,
            } => {
                if rs.room.name != *name {
                    self.room_names.remove_if(&rs.room.name, |_, owner| owner == id);
                    self.room_names.insert(name.clone(), *id);
                }
                rs.room.name = name.clone();
                rs.room.description = description.clone();
                rs.room.updated_at = *at;
            }
            Event::TimeSlotCreated {
                id,
                room_id,
                span,
                at,
            } => {
                let slot = TimeSlot {
                    id: *id,
                    room_id: *room_id,
                    span: *span,
                    created_at: *at,
                    updated_at: *at,
                };
                self.slots
                    .insert(*id, Arc::new(RwLock::new(SlotState::new(slot.clone()))));
                rs.insert_slot(slot);
            }
            Event::RoomCreated { .. }
            | Event::ReservationPlaced { .. }
            | Event::ReservationStatusChanged { .. } => {}
        }
    }

    /// Apply a slot-scoped event. Caller holds the slot's write lock.
    pub fn apply_to_slot(&self, ss: &mut SlotState, event: &Event) {
        match event {
            Event::ReservationPlaced {
                id,
                user_id,
                time_slot_id,
                at,
            } => {
                self.reservation_slot.insert(*id, *time_slot_id);
                ss.reservations.push(Reservation {
                    id: *id,
                    user_id: user_id.clone(),
                    time_slot_id: *time_slot_id,
                    status: ReservationStatus::Hold,
                    created_at: *at,
                    updated_at: *at,
                });
            }
            Event::ReservationStatusChanged { id, status, at, .. } => {
                if let Some(r) = ss.find_mut(*id) {
                    r.status = *status;
                    r.updated_at = *at;
                }
            }
            Event::RoomCreated { .. }
            | Event::RoomUpdated { .. }
            | Event::TimeSlotCreated { .. } => {}
        }
    }
}

/// Which lock an event must be applied under.
pub(crate) enum EventTarget {
    NewRoom,
    Room(Ulid),
    Slot(Ulid),
}

pub(crate) fn event_target(event: &Event) -> EventTarget {
    match event {
        Event::RoomCreated { .. } => EventTarget::NewRoom,
        Event::RoomUpdated { id, .. } => EventTarget::Room(*id),
        Event::TimeSlotCreated { room_id, .. } => EventTarget::Room(*room_id),
        Event::ReservationPlaced { time_slot_id, .. }
        | Event::ReservationStatusChanged { time_slot_id, .. } => EventTarget::Slot(*time_slot_id),
    }
}
