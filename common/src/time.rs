/// Milliseconds since the Unix epoch, matching the teacher's
/// `tos_common::time::TimestampMillis` convention.
pub type TimestampMillis = u64;

pub fn current_time_in_millis() -> TimestampMillis {
    chrono::Utc::now().timestamp_millis() as TimestampMillis
}

pub fn current_time_in_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
