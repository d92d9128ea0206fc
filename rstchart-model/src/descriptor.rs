//! Event descriptors and delay parsing.
//!
//! A transition's `event` attribute is a whitespace-separated list of
//! descriptors. A descriptor matches an event name when it is equal to it or
//! is a dot-separated prefix of it:
//!
//! - `error` matches `error`, `error.execution`, `error.communication`
//! - `error.*` is the same as `error`
//! - `*` matches every event
//! - `err` does **not** match `error`

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A single event descriptor token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventDescriptor(String);

impl EventDescriptor {
    /// Creates a descriptor, normalising a trailing `.*` or `.`.
    pub fn new(token: impl AsRef<str>) -> Self {
        let token = token.as_ref().trim();
        let token = token.strip_suffix(".*").unwrap_or(token);
        let token = token.strip_suffix('.').unwrap_or(token);
        Self(token.to_string())
    }

    /// Splits a whitespace-separated descriptor list.
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split_whitespace().map(Self::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the descriptor matches the event name.
    pub fn matches(&self, name: &str) -> bool {
        if self.0 == "*" {
            return true;
        }
        match name.strip_prefix(self.0.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses a CSS2 time value (`250ms`, `1.5s`, `0`). A bare number is
/// milliseconds.
pub fn parse_delay(s: &str) -> Result<Duration, ModelError> {
    let trimmed = s.trim();
    let invalid = || ModelError::InvalidDelay {
        value: s.to_string(),
    };

    let (number, scale) = if let Some(ms) = trimmed.strip_suffix("ms") {
        (ms, 1.0)
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        (secs, 1000.0)
    } else {
        (trimmed, 1.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    Ok(Duration::from_micros((value * scale * 1000.0).round() as u64))
}
