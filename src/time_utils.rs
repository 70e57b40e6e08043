// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix, keeping only as
/// many fractional digits as the value needs.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC3339 timestamp with any offset into UTC.
pub fn parse_utc_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_uses_z_suffix() {
        let date = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(format_utc_rfc3339(date), "2026-05-01T09:00:00Z");

        let precise = date + chrono::Duration::milliseconds(250);
        assert_eq!(format_utc_rfc3339(precise), "2026-05-01T09:00:00.250Z");
    }

    #[test]
    fn test_parse_converts_offsets() {
        let parsed = parse_utc_rfc3339("2026-05-01T11:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap());
        assert!(parse_utc_rfc3339("yesterday").is_none());
    }
}
