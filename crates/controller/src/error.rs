//! Error types for the failure categories the control loop distinguishes.
//!
//! Only [`ConfigurationError`] may stop the process. Sensor and
//! communication errors are ordinary values that the scheduler and the
//! reconcile client turn into sentinel readings or fail-safe instructions.

use reqwest::StatusCode;
use thiserror::Error;

/// Startup-time configuration problem. Fatal: the loop must not start.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// A single sensor read that did not produce a value.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("bad reading: {0}")]
    BadReading(String),
    #[error("bus error: {0}")]
    Bus(String),
}

/// Failure of one report/instructions exchange with the coordinator.
#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("coordinator did not answer in time")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("coordinator returned status {0}")]
    Status(StatusCode),
    #[error("malformed instructions: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for CommunicationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Status(status)
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
