//! Duration formatting for log lines and error messages

use std::time::Duration;

/// Render a duration the way scheduler log lines read.
///
/// Whole minutes become "1 minute" / "5 minutes"; anything else falls back to
/// humantime's compact form ("30s", "1m 30s").
pub fn describe_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if duration.subsec_nanos() == 0 && secs > 0 && secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else {
        humantime::format_duration(*duration).to_string()
    }
}
