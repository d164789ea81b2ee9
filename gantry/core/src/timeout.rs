//! Timeout settings distinguish three states the data plane treats
//! differently: "use your default", "explicitly disabled", and a concrete
//! duration. The empty string and a zero duration both mean the default; the
//! literal `infinite` disables the timeout outright.

use crate::duration::{GoDuration, ParseError};
use std::time::Duration;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    /// No opinion: the proxy applies its own default.
    #[default]
    Default,
    /// The timeout is switched off.
    Disabled,
    Duration(Duration),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimeoutError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("negative durations are not valid timeouts")]
    Negative,
}

impl Timeout {
    pub fn parse(s: &str) -> Result<Self, TimeoutError> {
        if s.is_empty() {
            return Ok(Self::Default);
        }
        if s == "infinite" {
            return Ok(Self::Disabled);
        }
        let d: GoDuration = s.parse().map_err(TimeoutError::Parse)?;
        if d.is_negative() {
            return Err(TimeoutError::Negative);
        }
        if d.is_zero() {
            return Ok(Self::Default);
        }
        Ok(Self::Duration(d.magnitude()))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// The value to place on the wire: `None` leaves the field unset,
    /// `Some(ZERO)` disables, anything else bounds.
    pub fn wire_duration(&self) -> Option<Duration> {
        match self {
            Self::Default => None,
            Self::Disabled => Some(Duration::ZERO),
            Self::Duration(d) => Some(*d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_default() {
        assert_eq!(Timeout::parse(""), Ok(Timeout::Default));
    }

    #[test]
    fn infinite_is_disabled() {
        assert_eq!(Timeout::parse("infinite"), Ok(Timeout::Disabled));
    }

    #[test]
    fn zero_is_default() {
        assert_eq!(Timeout::parse("0s"), Ok(Timeout::Default));
    }

    #[test]
    fn durations_parse() {
        assert_eq!(
            Timeout::parse("1m30s"),
            Ok(Timeout::Duration(Duration::from_secs(90)))
        );
        assert_eq!(
            Timeout::parse("900s"),
            Ok(Timeout::Duration(Duration::from_secs(900)))
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Timeout::parse("90").is_err());
        assert!(Timeout::parse("please").is_err());
        assert_eq!(Timeout::parse("-5s"), Err(TimeoutError::Negative));
    }
}
