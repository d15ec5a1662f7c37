//! Error types for the RTT engine.
//!
//! Only programming errors and malformed input are errors. Sequence loss on
//! the wire is a protocol condition and is reported as
//! [`RttEvent::LostSync`](crate::receive::RttEvent::LostSync) instead.

use thiserror::Error;

use crate::clock::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RttError {
    /// A scheduler entry was enqueued before the latest enqueued target time.
    #[error("time ordering violation: {target} < {watermark}")]
    TimeOrderingViolation {
        target: Timestamp,
        watermark: Timestamp,
    },

    #[error(transparent)]
    Unicode(#[from] UnicodeError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The engine task has stopped and no longer accepts commands.
    #[error("engine closed")]
    EngineClosed,
}

/// Malformed UTF-16 input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnicodeError {
    #[error("Unicode error: high surrogate without following low surrogate at index {index}")]
    UnpairedHighSurrogate { index: usize },

    #[error("Unicode error: low surrogate without preceding high surrogate at index {index}")]
    UnpairedLowSurrogate { index: usize },
}
