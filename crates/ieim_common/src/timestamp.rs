//! Timestamp formatting shared across all artifact builders.
//!
//! Every `created_at`/`ingested_at`/`received_at` field is formatted as
//! second-precision UTC RFC 3339 with a literal `Z` suffix (never `+00:00`).
//! Decision-hash inputs never include these fields directly.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};

pub fn format_utc(dt: DateTime<Utc>) -> String {
    let truncated = dt.with_nanosecond(0).unwrap_or(dt);
    truncated.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_trailing_z_and_no_subseconds() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(format_utc(dt), "2026-01-02T03:04:05Z");
    }
}
