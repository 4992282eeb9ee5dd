//! Instance status as seen by external callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of one managed instance.
///
/// Declared in transition order. A run may only move forward through this
/// list, so a late `connected` can never overwrite `disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Start requested, setup in progress.
    Connecting,
    /// Listeners bound and the proxy runtime is accepting.
    Connected,
    /// Setup or runtime failure; the instance stays registered until stopped.
    Error,
    /// Stop requested.
    Disconnected,
}

impl Status {
    /// Text form used across the callback boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::Error => "error",
            Status::Disconnected => "disconnected",
        }
    }

    /// Whether `next` is a valid successor of `self` within one run.
    pub fn can_transition_to(self, next: Status) -> bool {
        next > self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Status::Connecting),
            "connected" => Ok(Status::Connected),
            "error" => Ok(Status::Error),
            "disconnected" => Ok(Status::Disconnected),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}
