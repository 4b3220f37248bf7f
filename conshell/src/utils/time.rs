//! Time utilities for handling and converting timestamps.
use chrono::{DateTime, Local};
use serde::Serializer;
use std::time::SystemTime;

/// `yyyyMMdd-HHmmss`, used in per-process log file names.
pub fn file_stamp(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y%m%d-%H%M%S").to_string()
}

/// `HH:MM:SS`, prefixed to every line of a per-process log.
pub fn clock_stamp(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%H:%M:%S").to_string()
}

/// Full local date and time for log headers and footers.
pub fn full_stamp(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Serializes a `SystemTime` to an RFC 3339 string.
pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let datetime: DateTime<Local> = (*time).into();
    serializer.serialize_str(&datetime.to_rfc3339())
}
