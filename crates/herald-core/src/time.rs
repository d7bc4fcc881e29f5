//! Conversion of caller-supplied delivery times to epoch milliseconds.
//!
//! Callers may hand over an instant, a numeric epoch in milliseconds, or a
//! formatted date string. Everything is normalised to an `i64` millisecond
//! timestamp before it reaches the store.

use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::ScheduleError;

/// Largest magnitude accepted for an epoch-millisecond timestamp
/// (100,000,000 days either side of the epoch).
pub const MAX_EPOCH_MILLIS: f64 = 8.64e15;

/// Offset-less date-time layouts, interpreted as UTC.
const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// A requested delivery time in any of the accepted forms.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryTime {
    At(DateTime<Utc>),
    EpochMillis(f64),
    Text(String),
}

impl DeliveryTime {
    /// Convert to epoch milliseconds.
    ///
    /// Numeric epochs are rounded to the nearest millisecond. Fails with
    /// [`ScheduleError::InvalidTime`] when the value is not finite, lies
    /// outside [`MAX_EPOCH_MILLIS`], or the text is not a recognised date.
    pub fn to_epoch_millis(&self) -> Result<i64, ScheduleError> {
        match self {
            DeliveryTime::At(instant) => checked_millis(instant.timestamp_millis() as f64),
            DeliveryTime::EpochMillis(millis) => checked_millis(*millis),
            DeliveryTime::Text(text) => {
                let millis = parse_text(text.trim()).ok_or_else(|| {
                    ScheduleError::InvalidTime(format!("unrecognised date format: {text:?}"))
                })?;
                checked_millis(millis as f64)
            }
        }
    }
}

fn checked_millis(millis: f64) -> Result<i64, ScheduleError> {
    if !millis.is_finite() {
        return Err(ScheduleError::InvalidTime(format!(
            "timestamp is not finite: {millis}"
        )));
    }
    if millis.abs() > MAX_EPOCH_MILLIS {
        return Err(ScheduleError::InvalidTime(format!(
            "timestamp out of range: {millis}"
        )));
    }
    Ok(millis.round() as i64)
}

fn parse_text(text: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.timestamp_millis());
    }
    for format in NAIVE_DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl From<DateTime<Utc>> for DeliveryTime {
    fn from(instant: DateTime<Utc>) -> Self {
        DeliveryTime::At(instant)
    }
}

impl From<SystemTime> for DeliveryTime {
    fn from(instant: SystemTime) -> Self {
        DeliveryTime::At(DateTime::<Utc>::from(instant))
    }
}

impl From<i64> for DeliveryTime {
    fn from(millis: i64) -> Self {
        DeliveryTime::EpochMillis(millis as f64)
    }
}

impl From<f64> for DeliveryTime {
    fn from(millis: f64) -> Self {
        DeliveryTime::EpochMillis(millis)
    }
}

impl From<&str> for DeliveryTime {
    fn from(text: &str) -> Self {
        DeliveryTime::Text(text.to_string())
    }
}

impl From<String> for DeliveryTime {
    fn from(text: String) -> Self {
        DeliveryTime::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn millis(time: impl Into<DeliveryTime>) -> i64 {
        time.into().to_epoch_millis().unwrap()
    }

    fn is_invalid(time: impl Into<DeliveryTime>) -> bool {
        matches!(
            time.into().to_epoch_millis(),
            Err(ScheduleError::InvalidTime(_))
        )
    }

    #[test]
    fn numeric_epochs_are_rounded() {
        assert_eq!(millis(1_700_000_000_000i64), 1_700_000_000_000);
        assert_eq!(millis(1500.4), 1500);
        assert_eq!(millis(1500.6), 1501);
        assert_eq!(millis(-2500.0), -2500);
    }

    #[test]
    fn non_finite_and_out_of_range_numbers_are_invalid() {
        assert!(is_invalid(f64::NAN));
        assert!(is_invalid(f64::INFINITY));
        assert!(is_invalid(f64::NEG_INFINITY));
        assert!(is_invalid(8.64e15 + 1.0));
        assert_eq!(millis(8.64e15), 8_640_000_000_000_000);
    }

    #[test]
    fn instants_convert_to_millis() {
        let instant = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(millis(instant), instant.timestamp_millis());

        let system = SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(42);
        assert_eq!(millis(system), 42);
    }

    #[test]
    fn iso_8601_strings_parse() {
        assert_eq!(millis("1970-01-01T00:00:01Z"), 1000);
        assert_eq!(millis("1970-01-01T00:00:01.250Z"), 1250);
        assert_eq!(millis("1970-01-01T01:00:00+01:00"), 0);
        assert_eq!(millis("  1970-01-01T00:00:02Z  "), 2000);
    }

    #[test]
    fn offsetless_and_date_only_strings_are_utc() {
        assert_eq!(millis("1970-01-01T00:00:03"), 3000);
        assert_eq!(millis("1970-01-01T00:00:03.5"), 3500);
        assert_eq!(millis("1970-01-01 00:01:00"), 60_000);
        assert_eq!(millis("1970-01-02"), 86_400_000);
    }

    #[test]
    fn rfc_2822_strings_parse() {
        assert_eq!(millis("Thu, 01 Jan 1970 00:00:05 GMT"), 5000);
    }

    #[test]
    fn garbage_strings_are_invalid() {
        assert!(is_invalid("not-a-date"));
        assert!(is_invalid(""));
        assert!(is_invalid("   "));
        assert!(is_invalid("2024-13-45"));
    }
}
