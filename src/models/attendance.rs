use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// One persisted attendance record. At most one exists per
/// `(identity_id, date)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub display_name: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub date: NaiveDate,
}

impl AttendanceEvent {
    /// The event's date is the calendar day of `now` in its own timezone.
    pub fn at<Tz: TimeZone>(identity_id: &str, display_name: &str, now: &DateTime<Tz>) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            display_name: display_name.to_string(),
            timestamp: now.timestamp(),
            date: now.date_naive(),
        }
    }
}

/// An attendance event as listed back out of the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceRow {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub timestamp: i64,
    pub date: String,
}
