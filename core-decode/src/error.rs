//! # Decode Error Types
//!
//! Error types surfaced by the decode driver to its consumer.
//!
//! Recoverable bitstream errors never appear here: the driver logs them and
//! keeps decoding. Only source failures, unrecoverable stream errors and
//! driver defects cross the consumer boundary.

use std::io;
use thiserror::Error;

/// Errors that can occur while driving a decode session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// The byte source reported a non-EOF read error.
    #[error("Source read failed ({kind:?}): {message}")]
    SourceReadFailure {
        /// Kind reported by the source.
        kind: io::ErrorKind,
        /// Rendered source error.
        message: String,
    },

    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// The engine reported a bitstream error it cannot resynchronise from.
    #[error("Unrecoverable stream error 0x{code:04x}: {message}")]
    FatalStreamError {
        /// Engine error code.
        code: u16,
        /// Human readable description from the engine.
        message: String,
    },

    /// The engine aborted its run loop without reporting why.
    #[error("Codec engine aborted: {0}")]
    EngineAborted(String),

    // ========================================================================
    // Driver Errors
    // ========================================================================
    /// Internal contract breach (e.g. a zero-length hand-off to the engine).
    #[error("Driver invariant violated: {0}")]
    InvariantViolation(String),

    /// Configuration values were rejected by validation.
    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a session that already left the created state.
    #[error("Decode session already started")]
    AlreadyStarted,

    /// The background decode worker could not be spawned.
    #[error("Failed to spawn decode worker: {0}")]
    SpawnFailed(String),

    /// The background decode worker ended without reporting an outcome.
    #[error("Decode worker terminated unexpectedly")]
    WorkerTerminated,
}

impl DecodeError {
    /// Build a `SourceReadFailure` from an I/O error.
    pub fn source_failure(err: &io::Error) -> Self {
        DecodeError::SourceReadFailure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Returns `true` if this error originated in the byte source.
    pub fn is_source_error(&self) -> bool {
        matches!(self, DecodeError::SourceReadFailure { .. })
    }

    /// Returns `true` if this error originated in the compressed bitstream.
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            DecodeError::FatalStreamError { .. } | DecodeError::EngineAborted(_)
        )
    }

    /// Returns `true` if this error ends the session it occurred in.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            DecodeError::InvalidConfig(_) | DecodeError::AlreadyStarted
        )
    }
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        let kind = match &err {
            DecodeError::SourceReadFailure { kind, .. } => *kind,
            DecodeError::FatalStreamError { .. } | DecodeError::EngineAborted(_) => {
                io::ErrorKind::InvalidData
            }
            DecodeError::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for decode operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
