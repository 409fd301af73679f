//! Custom error types for the acquisition engine.
//!
//! `AcqError` is the single error type surfaced by the engine, the session
//! façade and the processing pipeline. It follows the failure taxonomy the
//! engine is built around:
//!
//! - **`Configuration`**: a requested axis needs a device that does not exist,
//!   or a settings value is out of range. Fatal, never retried.
//! - **`HardwareControl`** / **`BufferOverflow`**: a hardware command still
//!   failed after the retry budget, or the camera ring buffer overflowed.
//!   Fatal to the acquisition; captured as the abort cause.
//! - **`FrameTimeout`**: frame retrieval for one capture ran past its
//!   deadline. Recovered locally by the hardware-control worker and never
//!   propagated to the session.
//! - **`Usage`**: the API was called in the wrong lifecycle state (for
//!   example adding a hook after the session started).
//!
//! Hardware collaborators report failures as `anyhow::Error`; the engine
//! converts them at the retry boundary (see `error_recovery`).

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

/// Every failure the engine reports.
#[derive(Error, Debug)]
pub enum AcqError {
    /// Missing device or an invalid setting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] figment::Error),

    /// A hardware command failed after all retries
    #[error("Hardware control error while {command}: {message}")]
    HardwareControl {
        /// What the engine was doing
        command: String,
        /// Last failure reported by the hardware
        message: String,
    },

    /// The camera ring buffer dropped frames
    #[error("Sequence buffer overflow")]
    BufferOverflow,

    /// Frames did not arrive in time. Not fatal
    #[error("Timed out after {waited_ms} ms waiting for frames ({received}/{expected} received)")]
    FrameTimeout {
        /// Time spent waiting, in ms
        waited_ms: u64,
        /// Frames that did arrive
        received: usize,
        /// Frames the capture should produce
        expected: usize,
    },

    /// API misuse, such as submitting after finish
    #[error("Usage error: {0}")]
    Usage(String),

    /// The sink rejected an operation
    #[error("Data sink error: {0}")]
    Sink(String),

    /// A processor failed on a frame
    #[error("Image processor error: {0}")]
    Processor(String),

    /// JSON could not be parsed or written
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Well-formed JSON that is not a valid event
    #[error("Malformed event wire form: {0}")]
    WireFormat(String),

    /// A pipeline worker has exited
    #[error("Worker '{0}' is no longer running")]
    WorkerStopped(&'static str),

    /// The acquisition was aborted. Not fatal
    #[error("Acquisition aborted")]
    Aborted,
}

impl AcqError {
    /// Wrap a collaborator failure as a fatal hardware-control error.
    pub fn hardware<S: Into<String>>(command: S, source: &anyhow::Error) -> Self {
        Self::HardwareControl {
            command: command.into(),
            message: format!("{source:#}"),
        }
    }

    /// True for errors that must abort the whole acquisition.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AcqError::FrameTimeout { .. } | AcqError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AcqError::Configuration("no focus device".to_string());
        assert_eq!(err.to_string(), "Configuration error: no focus device");
    }

    #[test]
    fn test_hardware_error_keeps_context() {
        let source = anyhow::anyhow!("serial timeout").context("moving Z");
        let err = AcqError::hardware("Moving Z device", &source);
        let text = err.to_string();
        assert!(text.contains("Moving Z device"));
        assert!(text.contains("serial timeout"));
    }

    #[test]
    fn test_timeout_is_not_fatal() {
        let err = AcqError::FrameTimeout {
            waited_ms: 10,
            received: 1,
            expected: 5,
        };
        assert!(!err.is_fatal());
        assert!(AcqError::BufferOverflow.is_fatal());
    }
}
