//! INDI timestamps: UTC, `YYYY-MM-DDTHH:MM:SS` with optional milliseconds.

use chrono::{DateTime, NaiveDateTime, Utc};

const WITH_MILLIS: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const WITHOUT_MILLIS: &str = "%Y-%m-%dT%H:%M:%S";

/// Formats `time` the way outgoing messages carry it.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(WITH_MILLIS).to_string()
}

/// The current time, formatted.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parses a wire timestamp, with or without milliseconds.
///
/// Devices are lax about timestamps, so anything unparseable (or absent)
/// falls back to the current time rather than failing the message.
pub fn parse_timestamp(text: Option<&str>) -> DateTime<Utc> {
    text.map(str::trim)
        .and_then(|t| {
            NaiveDateTime::parse_from_str(t, WITH_MILLIS)
                .or_else(|_| NaiveDateTime::parse_from_str(t, WITHOUT_MILLIS))
                .ok()
        })
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn test_format_timestamp_has_millisecond_precision() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 21, 5, 7).unwrap() + Duration::milliseconds(42);
        assert_eq!(format_timestamp(time), "2024-03-09T21:05:07.042");
    }

    #[test]
    fn test_parse_timestamp_accepts_both_forms() {
        let with = parse_timestamp(Some("2024-03-09T21:05:07.042"));
        let without = parse_timestamp(Some("2024-03-09T21:05:07"));
        assert_eq!(with.timestamp_subsec_millis(), 42);
        assert_eq!(without.second(), 7);
        assert_eq!(with.timestamp(), without.timestamp());
    }

    #[test]
    fn test_parse_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let parsed = parse_timestamp(Some("yesterday"));
        assert!(parsed >= before);
        assert!(parse_timestamp(None) >= before);
    }
}
