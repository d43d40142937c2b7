//! Domain operations over the store: room catalog, time slot overlap guard, and the
//! reservation lifecycle. Services are cheap to clone and carry no mutable state.

mod error;
mod reservations;
mod rooms;
mod time_slots;

pub use error::{BookingError, ErrorKind};
pub use reservations::{ReservePolicy, ReservationService, Reserved};
pub use rooms::RoomService;
pub use time_slots::TimeSlotService;

use std::sync::Arc;

use crate::engine::Engine;

/// Every service wired to one store. One per process, shared by all connections.
#[derive(Clone)]
pub struct Services {
    pub rooms: RoomService,
    pub time_slots: TimeSlotService,
    pub reservations: ReservationService,
}

impl Services {
    pub fn new(engine: Arc<Engine>, policy: ReservePolicy) -> Self {
        let rooms = RoomService::new(engine.clone());
        let time_slots = TimeSlotService::new(engine.clone(), rooms.clone());
        let reservations = ReservationService::new(engine, time_slots.clone(), policy);
        Self {
            rooms,
            time_slots,
            reservations,
        }
    }
}
