//! Human friendly sizes and durations
//!
//! Scenario files describe nodes with values such as `"1 GiB"`, `"2 MB"`,
//! `"8 hours"` or `"3 years"`. Plain numbers are bytes and seconds.

use bytesize::ByteSize;
use serde::{Deserialize, Deserializer};

use crate::bk_error::ConfigError;
use crate::bk_interface::{Bytes, SimTime};

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;
const YEAR: f64 = 52.0 * WEEK;

// largest unit first, used when formatting
const TIME_UNITS: [(f64, &str); 6] = [
    (YEAR, "year"),
    (WEEK, "week"),
    (DAY, "day"),
    (HOUR, "hour"),
    (MINUTE, "minute"),
    (1.0, "second"),
];

/// Parse a data size; decimal (`kB`, `MB`) and binary (`KiB`, `MiB`) units
pub fn parse_size(text: &str) -> Result<Bytes, ConfigError> {
    text.trim()
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|_| ConfigError::InvalidSize(text.to_string()))
}

/// Parse a duration into seconds
///
/// Plain numbers are seconds and years are 52 weeks. Everything else goes
/// through `humantime`, so `"8 hours"` and `"2h 30min"` both work.
pub fn parse_timespan(text: &str) -> Result<SimTime, ConfigError> {
    let invalid = || ConfigError::InvalidTimespan(text.to_string());
    let text = text.trim();
    let seconds = match text.parse::<f64>() {
        Ok(seconds) => seconds,
        Err(_) => match parse_years(text) {
            Some(years) => years * YEAR,
            None => humantime::parse_duration(text)
                .map_err(|_| invalid())?
                .as_secs_f64(),
        },
    };
    if seconds.is_nan() {
        return Err(invalid());
    }
    Ok(seconds)
}

// humantime counts 365.25 days to the year
fn parse_years(text: &str) -> Option<f64> {
    ["years", "year", "y"]
        .iter()
        .filter_map(|unit| text.strip_suffix(unit))
        .find_map(|number| number.trim_end().parse::<f64>().ok())
}

/// Render seconds as `"1 year, 3 days and 2 hours"`
pub fn format_timespan(seconds: SimTime) -> String {
    if !seconds.is_finite() {
        return format!("{} seconds", seconds);
    }
    if seconds < MINUTE {
        return plural(round2(seconds), "second");
    }

    let mut rest = seconds;
    let mut parts = Vec::new();
    for (size, name) in TIME_UNITS {
        if size == 1.0 {
            let secs = round2(rest);
            if secs > 0.0 {
                parts.push(plural(secs, name));
            }
            break;
        }
        let count = (rest / size).floor();
        if count >= 1.0 {
            parts.push(plural(count, name));
            rest -= count * size;
        }
    }

    match parts.len() {
        0 => plural(0.0, "second"),
        1 => parts.remove(0),
        _ => {
            let last = parts.pop().unwrap_or_default();
            format!("{} and {}", parts.join(", "), last)
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn plural(count: f64, unit: &str) -> String {
    if count == 1.0 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

pub fn deserialize_size<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
    match NumberOrText::deserialize(d)? {
        NumberOrText::Number(n) if n >= 0.0 => Ok(n.round() as Bytes),
        NumberOrText::Number(n) => Err(serde::de::Error::custom(format!(
            "size must not be negative: {}",
            n
        ))),
        NumberOrText::Text(t) => parse_size(&t).map_err(serde::de::Error::custom),
    }
}

pub fn deserialize_timespan<'de, D: Deserializer<'de>>(d: D) -> Result<SimTime, D::Error> {
    match NumberOrText::deserialize(d)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(t) => parse_timespan(&t).map_err(serde::de::Error::custom),
    }
}

pub fn deserialize_opt_timespan<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<SimTime>, D::Error> {
    match Option::<NumberOrText>::deserialize(d)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(t)) => parse_timespan(&t)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
