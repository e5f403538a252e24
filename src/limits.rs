/// Max items a single ledger will hold.
pub const MAX_ITEMS: usize = 100_000;

/// Max bookings (any status) per item.
pub const MAX_BOOKINGS_PER_ITEM: usize = 10_000;

/// Longest booking the ledger accepts, in days.
pub const MAX_BOOKING_DAYS: u32 = 366;

/// Max length of owner and renter names.
pub const MAX_NAME_LEN: usize = 256;

/// Upper bound on a daily rate, in whole currency units.
pub const MAX_DAILY_RATE: i64 = 1_000_000_000;

/// Calendar years accepted anywhere in the ledger.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;
