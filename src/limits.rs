//! Hard caps that keep one client from exhausting the server.

use crate::model::{DAY_MS, Ms};

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_GUESTS: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_AMENITIES: usize = 64;
pub const MAX_AMENITY_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 64;
pub const MAX_NOTES_LEN: usize = 4096;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest single stay.
pub const MAX_STAY_MS: Ms = 366 * DAY_MS;
/// Widest window accepted by availability and free-window queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * DAY_MS;

pub const MAX_PAGE_SIZE: usize = 100;

/// Largest encoded WAL record. Every field above is capped, so real events
/// stay far below this; a bigger length prefix on disk is corruption.
pub const MAX_EVENT_BYTES: usize = 1 << 20;
