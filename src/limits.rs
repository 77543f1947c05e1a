use crate::model::Ms;

pub const MAX_SLOTS: u32 = 1024;
pub const MAX_BOOKING_DURATION_MS: Ms = 7 * 24 * 3_600_000;
/// Accepted instants: the unix epoch through the end of year 9999.
pub const MIN_INSTANT_MS: Ms = 0;
pub const MAX_INSTANT_MS: Ms = 253_402_300_799_999;
/// Upper bound for the confirm and payment windows.
pub const MAX_WINDOW_MS: u64 = 24 * 3_600_000;
/// Longest request line a client may send.
pub const MAX_LINE_LEN: usize = 64 * 1024;
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
