//! Error types for the fake clock

use chrono::Duration;
use thiserror::Error;

use crate::clock::VirtualTime;

/// Errors surfaced by the fallible fake-clock operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("cannot advance to {target}: earlier than current virtual time {current}")]
    TargetInPast {
        target: VirtualTime,
        current: VirtualTime,
    },

    #[error("ticker/timer interval must be positive, got {0}")]
    NonPositiveInterval(Duration),
}
