#![forbid(unsafe_code)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Date layout every normalized observation uses.
pub const OBSERVATION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Cell spellings the upstream sources use for a missing observation.
const MISSING_MARKERS: &[&str] = &["", ".", "NA", "N/A", "NaN", "null", "NULL", ":"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Scalar,
    Series,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Series => f.write_str("series"),
        }
    }
}

/// One `(date, value)` pair of a normalized series.
///
/// Serializes as a two-element array `["2020-01-01", 1.5]`, with `null` for a
/// missing value, which is the shape chart consumers and fixtures exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Option<f64>)", into = "(String, Option<f64>)")]
pub struct Observation {
    pub date: String,
    pub value: Option<f64>,
}

impl Observation {
    #[must_use]
    pub fn new(date: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            date: date.into(),
            value,
        }
    }

    #[must_use]
    pub fn present(date: impl Into<String>, value: f64) -> Self {
        Self::new(date, Some(value))
    }

    #[must_use]
    pub fn missing(date: impl Into<String>) -> Self {
        Self::new(date, None)
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

impl From<(String, Option<f64>)> for Observation {
    fn from((date, value): (String, Option<f64>)) -> Self {
        Self { date, value }
    }
}

impl From<Observation> for (String, Option<f64>) {
    fn from(observation: Observation) -> Self {
        (observation.date, observation.value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("invalid observation date {value:?}; expected YYYY-MM-DD")]
    InvalidDate { value: String },
    #[error("value {value:?} is not numeric")]
    NonNumericValue { value: String },
}

/// Parse a numeric literal using the decimal grammar formulas accept:
/// optional sign, digits with an optional fraction (at least one digit in
/// total), and an optional exponent. Spellings such as `inf`, `NaN` or hex
/// are rejected even though `str::parse::<f64>` would take some of them, and
/// so are literals that overflow to infinity.
#[must_use]
pub fn parse_numeric_literal(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if !is_decimal_literal(trimmed.as_bytes()) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn is_decimal_literal(bytes: &[u8]) -> bool {
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;

    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
    }

    if int_digits + frac_digits == 0 {
        return false;
    }

    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

pub fn parse_observation_date(input: &str) -> Result<NaiveDate, TypeError> {
    let trimmed = input.trim();
    // chrono accepts unpadded fields; the wire format does not.
    if trimmed.len() != 10 {
        return Err(TypeError::InvalidDate {
            value: input.to_owned(),
        });
    }
    NaiveDate::parse_from_str(trimmed, OBSERVATION_DATE_FORMAT).map_err(|_| TypeError::InvalidDate {
        value: input.to_owned(),
    })
}

/// Parse a raw cell from a source export into an observation value.
pub fn parse_observation_value(input: &str) -> Result<Option<f64>, TypeError> {
    let trimmed = input.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return Ok(None);
    }
    parse_numeric_literal(trimmed)
        .map(Some)
        .ok_or_else(|| TypeError::NonNumericValue {
            value: trimmed.to_owned(),
        })
}
