//! Session persistence: per-stimulus sample logs and the calibration log.

pub mod calibration_log;
pub mod recorder;

use crate::clock::Timestamp;

/// Session id shared by every file of a session: the session start time
/// as `yyyyMMdd_HHmmss` in local time.
pub fn session_id(started: &Timestamp) -> String {
    started.local().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, TestClock};
    use chrono::TimeZone;

    #[test]
    fn test_session_id_format() {
        let clock = TestClock::new();
        let local = chrono::Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .unwrap();
        clock.set_unix_millis(local.timestamp_millis());
        assert_eq!(session_id(&clock.stamp()), "20240309_140507");
    }
}
