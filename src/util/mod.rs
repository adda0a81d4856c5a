//! Shared utilities: BCD packing and protocol timestamps.

pub mod bcd;

use chrono::{FixedOffset, Utc};

/// Protocol time zone. All JT/T 808 timestamps are GMT+8.
const GMT8_SECS: i32 = 8 * 3600;

/// Current time as a `YYMMDDhhmmss` string in GMT+8.
pub fn now_timestamp() -> String {
    let tz = FixedOffset::east_opt(GMT8_SECS).expect("fixed offset in range");
    Utc::now().with_timezone(&tz).format("%y%m%d%H%M%S").to_string()
}
