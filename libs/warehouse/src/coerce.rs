//! Value coercion shared by the extractor and the warehouse reader.
//!
//! Join keys only match when both sides went through the same coercion, so
//! every integer id and every date in the system is parsed here.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Date-only layouts accepted for sale dates, tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"];

/// Timestamp layouts; the time part is dropped
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse an integer, accepting an integral float such as `12.0`
pub fn parse_integer(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a finite decimal. `NaN` and infinities are rejected.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Permissive date parsing, normalized to day granularity
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// serde adapter: integer column read through [`parse_integer`]
pub fn de_integer<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_integer(&s).ok_or_else(|| de::Error::custom(format!("invalid integer '{}'", s)))
}

/// serde adapter: date column read through [`parse_date`]
pub fn de_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_date(&s).ok_or_else(|| de::Error::custom(format!("invalid date '{}'", s)))
}
