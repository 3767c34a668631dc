//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Default storage format for DATE field values
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Default storage format for TIMESTAMP field values and system timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Storage formats for date and timestamp values, from the app configuration
#[derive(Debug, Clone)]
pub struct TimeFormats {
    pub date: String,
    pub timestamp: String,
}

impl Default for TimeFormats {
    fn default() -> Self {
        Self {
            date: DATE_FORMAT.to_string(),
            timestamp: TIMESTAMP_FORMAT.to_string(),
        }
    }
}

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time rendered with the configured timestamp format
pub fn now_stamp(formats: &TimeFormats) -> String {
    now().format(&formats.timestamp).to_string()
}
