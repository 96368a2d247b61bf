//! Crate-wide error type.
//!
//! `XpsError` groups failures by the taxonomy the pipeline recovers from
//! differently: `Protocol` and `Lifecycle` errors are logged and the
//! offending message is dropped; `Numeric` errors degrade a single result
//! (flagged peak table, skipped shot emission); `Sink` errors drop the
//! offending client/connection; `Fatal` errors propagate to the process
//! supervisor and trigger shutdown.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, XpsError>;

#[derive(Error, Debug)]
pub enum XpsError {
    #[error("configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed wire frame: {0}")]
    Protocol(String),

    #[error("unknown msg_type: {0}")]
    UnknownMsgType(String),

    #[error("unmapped data_type: {0}")]
    UnmappedDataType(String),

    #[error("binary blob size mismatch: expected {expected} bytes, got {got}")]
    BlobSizeMismatch { expected: usize, got: usize },

    #[error("raw event received with no active scan")]
    EventOutsideScan,

    #[error("scan stop received with no active scan")]
    StopWithoutStart,

    #[error("peak fit did not converge: {0}")]
    FitDidNotConverge(String),

    #[error("spectral transform on empty stack")]
    EmptyStack,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl XpsError {
    /// Lifecycle errors the Operator recovers from by dropping the offending
    /// message and continuing — a stray event before `start`, or a `stop`
    /// with no active scan, must not end the Operator's task.
    pub fn is_recoverable_lifecycle_error(&self) -> bool {
        matches!(self, XpsError::EventOutsideScan | XpsError::StopWithoutStart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_displays_message() {
        let err = XpsError::Protocol("bad json".into());
        assert_eq!(err.to_string(), "malformed wire frame: bad json");
    }

    #[test]
    fn lifecycle_errors_are_recoverable() {
        assert!(XpsError::EventOutsideScan.is_recoverable_lifecycle_error());
        assert!(XpsError::StopWithoutStart.is_recoverable_lifecycle_error());
        assert!(!XpsError::Fatal("x".into()).is_recoverable_lifecycle_error());
    }

    #[test]
    fn blob_size_mismatch_formats_both_sizes() {
        let err = XpsError::BlobSizeMismatch {
            expected: 100,
            got: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("42"));
    }
}
