//! Tolerant parsing for externally-sourced badge timestamps.
//!
//! The external catalog reports every field as a string. Two date layouts
//! occur in the wild (with and without fractional seconds); anything that
//! parses as neither stays a plain string rather than failing the sync, to
//! remain tolerant of format drift in the external API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accepted external date layouts, tried in order.
const FORMAT_FRACTIONAL: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const FORMAT_WHOLE_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Best-effort parse of an external timestamp string.
pub fn parse_external_timestamp(value: &str) -> Option<DateTime<Utc>> {
    for format in [FORMAT_FRACTIONAL, FORMAT_WHOLE_SECONDS] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// A badge field value mirrored from the external catalog: a recognised
/// timestamp, or the original string untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BadgeField {
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl BadgeField {
    /// Coerce an external string value, parsing a timestamp out where possible.
    pub fn coerce(value: &str) -> Self {
        match parse_external_timestamp(value) {
            Some(ts) => Self::Timestamp(ts),
            None => Self::Text(value.to_string()),
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Timestamp(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parses_fractional_seconds() {
        let ts = parse_external_timestamp("2022-03-01T09:30:15.123456Z").unwrap();
        assert_eq!(ts.nanosecond(), 123_456_000);
        assert_eq!(ts.hour(), 9);
    }

    #[test]
    fn test_parses_whole_seconds() {
        let ts = parse_external_timestamp("2022-03-01T09:30:15Z").unwrap();
        assert_eq!(ts.second(), 15);
        assert_eq!(ts.nanosecond(), 0);
    }

    #[test]
    fn test_non_dates_stay_strings() {
        assert_eq!(parse_external_timestamp("Python Programming I"), None);
        assert_eq!(parse_external_timestamp("2022-03-01"), None);
        assert_eq!(parse_external_timestamp(""), None);

        let field = BadgeField::coerce("not a date");
        assert_eq!(field, BadgeField::Text("not a date".to_string()));
    }

    #[test]
    fn test_coerce_recognises_timestamps() {
        let field = BadgeField::coerce("2022-03-01T09:30:15Z");
        assert!(field.as_timestamp().is_some());
        assert!(field.as_text().is_none());
    }

    proptest::proptest! {
        /// Coercion is total: any input becomes either a timestamp or the
        /// exact original string, never an error.
        #[test]
        fn coerce_is_total(s in ".*") {
            match BadgeField::coerce(&s) {
                BadgeField::Text(text) => proptest::prop_assert_eq!(text, s),
                BadgeField::Timestamp(_) => {}
            }
        }
    }

    #[test]
    fn test_coercion_is_stable_across_serde() {
        // A coerced field must deserialize back to the same variant, so that
        // repeated catalog syncs with unchanged input leave stored bytes
        // unchanged.
        for raw in ["2022-03-01T09:30:15.5Z", "2022-03-01T09:30:15Z", "plain"] {
            let field = BadgeField::coerce(raw);
            let json = serde_json::to_string(&field).unwrap();
            let back: BadgeField = serde_json::from_str(&json).unwrap();
            assert_eq!(back, field, "unstable roundtrip for {raw:?}");
        }
    }
}
