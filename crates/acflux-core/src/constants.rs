/// used when no meteo row is found within the tolerance
pub const DEFAULT_TEMPERATURE: f64 = 10.0;
pub const DEFAULT_PRESSURE: f64 = 1000.0;
/// meters
pub const DEFAULT_HEIGHT: f64 = 1.0;

pub const GAS_CONSTANT: f64 = 8.314;
pub const KELVIN_OFFSET: f64 = 273.15;

/// seconds, nearest meteo lookup accepts rows this far from the target
pub const METEO_TOLERANCE_S: i64 = 1800;

/// cycles per batch flush
pub const CHUNK_SIZE: usize = 100;

// lag search
pub const LAG_SEARCH_LEN: i64 = 160;
pub const LAG_SHIFT_STEP: i64 = 10;
pub const LAG_SUSPECT_AFTER: i64 = 100;
pub const LAG_ZERO_SHIFTS: usize = 12;
pub const LAG_SUSPECT_SHIFTS: usize = 10;

// regression window search
pub const WINDOW_STEP: i64 = 15;
pub const MIN_WINDOW_LEN: i64 = 120;
pub const SECOND_PASS_BELOW_R: f64 = 0.5;
pub const SECOND_PASS_FRACTION: f64 = 0.7;
pub const MAX_MISSING_FRACTION: f64 = 0.1;
pub const LOW_R_LIMIT: f64 = 0.1;
pub const FALLBACK_WINDOW_LEN: i64 = 180;

// validity checks
pub const R_STD_LIMIT: f64 = 0.13;
pub const MIN_UNIQUE_VALUES: usize = 10;
pub const TREND_BUCKET_S: i64 = 20;
pub const TREND_UP_PERCENT: f64 = 95.0;
pub const TOO_MANY_FACTOR: f64 = 1.1;
pub const TOO_FEW_FACTOR: f64 = 0.9;

pub const ROUND_DECIMALS: i32 = 10;
