//! Epoch-millisecond timestamps, the unit the data model uses throughout
//! (`createdAt`, `lastUsedAt`, `lastRequestAt`, and the `name` suffix).

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
