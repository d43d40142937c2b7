use std::sync::Arc;

use ulid::Ulid;

use crate::engine::{Constraint, Engine, WriteOutcome};
use crate::model::Room;

use super::BookingError;

#[derive(Clone)]
pub struct RoomService {
    engine: Arc<Engine>,
}

impl RoomService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Create a room. `id` defaults to a fresh ULID.
    pub async fn create_room(
        &self,
        id: Option<Ulid>,
        name: String,
        description: Option<String>,
    ) -> Result<Room, BookingError> {
        let id = id.unwrap_or_else(Ulid::new);
        match self.engine.create_room(id, name.clone(), description).await? {
            WriteOutcome::Applied(room) => {
                tracing::debug!(room = %room.id, name = %room.name, "room created");
                Ok(room)
            }
            WriteOutcome::Violated(Constraint::RoomName) => Err(BookingError::RoomAlreadyExists(name)),
            WriteOutcome::Violated(Constraint::PrimaryKey) => Err(BookingError::DuplicateId(id)),
            WriteOutcome::Violated(other) => Err(BookingError::UnexpectedConstraint(other)),
        }
    }

    /// Update the given fields; `description: Some(None)` clears it.
    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        description: Option<Option<String>>,
    ) -> Result<Room, BookingError> {
        match self.engine.update_room(id, name.clone(), description).await? {
            None => Err(BookingError::RoomNotFound(id)),
            Some(WriteOutcome::Applied(room)) => Ok(room),
            Some(WriteOutcome::Violated(Constraint::RoomName)) => {
                Err(BookingError::RoomAlreadyExists(name.unwrap_or_default()))
            }
            Some(WriteOutcome::Violated(other)) => Err(BookingError::UnexpectedConstraint(other)),
        }
    }

    pub async fn get_room(&self, id: Ulid) -> Result<Room, BookingError> {
        self.engine
            .get_room(id)
            .await
            .ok_or(BookingError::RoomNotFound(id))
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        self.engine.list_rooms().await
    }
}
