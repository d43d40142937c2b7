//! Hard caps applied at the store boundary. Anything past these is rejected as a bad request.

use crate::model::Ms;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_USER_ID_LEN: usize = 128;

pub const MAX_SLOTS_PER_ROOM: usize = 100_000;
pub const MAX_RESERVATIONS_PER_SLOT: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 1000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single slot may not be longer than one week.
pub const MAX_SLOT_DURATION_MS: Ms = 7 * 24 * 3_600_000;
