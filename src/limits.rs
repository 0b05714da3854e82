/// Active plus not-yet-pruned stays one room's ledger may hold.
pub const MAX_STAYS_PER_ROOM: usize = 10_000;

/// Blocked-night and availability queries never look further than this many nights.
pub const MAX_QUERY_NIGHTS: u32 = 3_660;

pub const MAX_ROOM_NAME_LEN: usize = 256;

pub const MAX_CATALOG_ROOMS: usize = 100_000;

/// Longest JSON request line the wire codec will buffer.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Rooms a single connection may watch at once.
pub const MAX_WATCHES_PER_CONNECTION: usize = 64;
