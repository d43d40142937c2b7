use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_room(&self, id: Ulid) -> Option<Room> {
        let rs = self.tables.get_room(&id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    /// Rooms ordered by id, which is creation order for generated ids.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for id in self.tables.room_ids() {
            if let Some(room) = self.get_room(id).await {
                rooms.push(room);
            }
        }
        rooms
    }

    pub async fn find_room_by_name(&self, name: &str) -> Option<Room> {
        let id = self.tables.room_id_for_name(name)?;
        self.get_room(id).await
    }

    pub async fn get_time_slot(&self, id: Ulid) -> Option<TimeSlot> {
        let ss = self.tables.get_slot(&id)?;
        let guard = ss.read().await;
        Some(guard.slot.clone())
    }

    /// A room's slots ordered by start. `None` if the room doesn't exist.
    pub async fn list_time_slots(&self, room_id: Ulid) -> Option<Vec<TimeSlot>> {
        let rs = self.tables.get_room(&room_id)?;
        let guard = rs.read().await;
        Some(guard.slots.clone())
    }

    /// A room's slots with no HOLD or CONFIRMED reservation, ordered by start.
    pub async fn list_available_time_slots(&self, room_id: Ulid) -> Option<Vec<TimeSlot>> {
        let slots = self.list_time_slots(room_id).await?;
        let mut available = Vec::with_capacity(slots.len());
        for slot in slots {
            let Some(ss) = self.tables.get_slot(&slot.id) else {
                continue;
            };
            if ss.read().await.active().is_none() {
                available.push(slot);
            }
        }
        Some(available)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let slot_id = self.tables.slot_for_reservation(&id)?;
        let ss = self.tables.get_slot(&slot_id)?;
        let guard = ss.read().await;
        guard.find(id).cloned()
    }

    /// The reservation, if it exists and belongs to `user`.
    pub async fn find_reservation_for_owner(&self, user: &UserId, id: Ulid) -> Option<Reservation> {
        self.get_reservation(id)
            .await
            .filter(|r| &r.user_id == user)
    }

    /// The most recent reservation `user` placed on the slot, whatever its status.
    pub async fn find_latest_reservation(
        &self,
        time_slot_id: Ulid,
        user: &UserId,
    ) -> Option<Reservation> {
        let ss = self.tables.get_slot(&time_slot_id)?;
        let guard = ss.read().await;
        guard.latest_for(user).cloned()
    }

    /// Every reservation ever placed on the slot, in placement order.
    pub async fn reservations_for_slot(&self, time_slot_id: Ulid) -> Option<Vec<Reservation>> {
        let ss = self.tables.get_slot(&time_slot_id)?;
        let guard = ss.read().await;
        Some(guard.reservations.clone())
    }
}
