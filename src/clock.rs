use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix seconds.
pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Current wall-clock time as signed Unix seconds, for freshness math
/// that may go negative.
pub(crate) fn unix_seconds_i64() -> i64 {
    i64::try_from(unix_seconds()).unwrap_or(i64::MAX)
}
