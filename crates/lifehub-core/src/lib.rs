//! Core types: photos, calendar events, content hashing, tracing

pub mod calendar;
pub mod fingerprint;
pub mod photo;
pub mod tracing;

pub use calendar::{
    CalendarEvent, Countdown, CountdownGroup, CountdownStats, EventType, NewCalendarEvent,
    ParseEnumError, Priority, build_countdown,
};
pub use fingerprint::ContentHash;
pub use photo::{
    DriveImageItem, Photo, data_url_mime_type, drive_download_url, normalize_labels,
    strip_data_url_prefix, unique_upload_name,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
