//! Parsing for the Go-syntax duration strings used throughout the input
//! objects (`10s`, `1m30s`, `1.5h`, `-10m`).
//!
//! Kubernetes API conventions inherit Go's `time.ParseDuration` format, so
//! field values like a route timeout or a CORS max-age arrive in that syntax.
//! Rust's `std::time::Duration` is unsigned; the sign is tracked separately
//! because a negative value is meaningful input (it rejects the enclosing
//! policy) rather than a parse failure.

use std::{fmt, str::FromStr, time::Duration};

#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct GoDuration {
    duration: Duration,
    negative: bool,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("unknown unit, {}", EXPECTED_UNITS)]
    UnknownUnit,

    #[error("missing a unit, {}", EXPECTED_UNITS)]
    MissingUnit,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("empty duration string")]
    Empty,
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', 'ms', 's', 'm' or 'h'";

impl GoDuration {
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_zero(&self) -> bool {
        self.duration.is_zero()
    }

    /// The magnitude, discarding the sign.
    pub fn magnitude(&self) -> Duration {
        self.duration
    }
}

impl From<GoDuration> for Duration {
    fn from(d: GoDuration) -> Self {
        d.duration
    }
}

fn unit(s: &str) -> Result<Duration, ParseError> {
    match s {
        "ns" => Ok(Duration::from_nanos(1)),
        // U+00B5 (micro sign) and U+03BC (Greek mu) are both accepted by Go.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
        "ms" => Ok(Duration::from_millis(1)),
        "s" => Ok(Duration::from_secs(1)),
        "m" => Ok(Duration::from_secs(60)),
        "h" => Ok(Duration::from_secs(60 * 60)),
        _ => Err(ParseError::UnknownUnit),
    }
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let negative = s.starts_with('-');
        let mut rest = s.trim_start_matches(['+', '-']);

        // Go special-cases a bare "0" as the only unit-less form.
        if rest == "0" {
            return Ok(GoDuration {
                duration: Duration::ZERO,
                negative,
            });
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::MissingUnit)?;
            let (value, tail) = rest.split_at(unit_start);
            let value = value.parse::<f64>()?;

            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit_str, tail) = tail.split_at(unit_end);
            total += unit(unit_str)?.mul_f64(value);
            rest = tail;
        }

        Ok(GoDuration {
            duration: total,
            negative,
        })
    }
}

impl fmt::Debug for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        fmt::Debug::fmt(&self.duration, f)
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
