//! Conversions between human-readable durations (`"3d"`, `"1y+12h"`) and year fractions.

use super::error::{DbError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// January 1, 2000, in seconds since the Unix epoch. Timestamps count years from here.
pub const T0: f64 = 946681200.0;

/// 365.25 days in seconds.
pub const YEAR: f64 = 31557600.0;

const UNITS: [(char, f64); 7] = [
    ('y', YEAR),
    ('M', 2629800.0),
    ('w', 604800.0),
    ('d', 86400.0),
    ('h', 3600.0),
    ('m', 60.0),
    ('s', 1.0),
];

fn unit_seconds(unit: char) -> Option<f64> {
    UNITS.iter().find(|(u, _)| *u == unit).map(|&(_, s)| s)
}

/// The current time in years since [`T0`].
pub fn now() -> f64 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    (seconds - T0) / YEAR
}

/// Parses a duration into a year fraction.
///
/// Terms joined by `+` are summed, spaces are ignored, and a plural `s` after a unit letter is
/// tolerated (`"2hs"` is two hours). A bare number is taken as already being in years.
pub fn time_string_to_float(s: &str) -> Result<f64> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(DbError::MalformedDuration(s.to_string()));
    }
    compact
        .split('+')
        .map(|term| parse_term(term, s))
        .sum::<Result<f64>>()
}

fn parse_term(term: &str, original: &str) -> Result<f64> {
    let malformed = || DbError::MalformedDuration(original.to_string());

    if let Ok(years) = term.parse::<f64>() {
        return if years.is_finite() {
            Ok(years)
        } else {
            Err(malformed())
        };
    }

    let mut chars: Vec<char> = term.chars().collect();
    let n = chars.len();
    if n >= 2 && chars[n - 2].is_ascii_alphabetic() && chars[n - 1] == 's' {
        chars.pop();
    }

    let split = chars
        .iter()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(malformed)?;
    if split == 0 || split + 1 != chars.len() {
        return Err(malformed());
    }

    let magnitude: u64 = chars[..split]
        .iter()
        .collect::<String>()
        .parse()
        .map_err(|_| malformed())?;
    let seconds = unit_seconds(chars[split]).ok_or_else(malformed)?;
    Ok(magnitude as f64 * seconds / YEAR)
}

/// Renders a year fraction with the largest unit that gives a count above five.
///
/// Lossy: meant for display (e.g. record ages), never for storage.
pub fn float_to_time_string(t: f64) -> String {
    let seconds = t * YEAR;
    let (unit, unit_len) = UNITS
        .iter()
        .copied()
        .find(|&(_, len)| seconds / len > 5.0)
        .unwrap_or(('s', 1.0));
    format!("{}{}", (seconds / unit_len).round() as i64, unit)
}
