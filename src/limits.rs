pub const MAX_ROLLS: usize = 200_000;
pub const MAX_ORDERS: usize = 500_000;
pub const MAX_RECUTS_PER_ORDER: usize = 1_000;

pub const MAX_ARTICLE_LEN: usize = 128;
pub const MAX_ROLL_NUMBER_LEN: usize = 64;
pub const MAX_TEXT_LEN: usize = 1_024;

/// Largest quantity (meters) accepted on any roll, order or recut.
pub const MAX_METERS: f64 = 1_000_000.0;

/// A heal transfer writes two rolls; editors rarely need more.
pub const MAX_TRANSACTION_WRITES: usize = 64;
