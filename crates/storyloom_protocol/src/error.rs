//! Error taxonomy shared across the orchestrator.
//!
//! Mirrors the kind/policy table from the error handling design: every
//! variant that can be produced mid-retry carries `is_transient` so callers
//! never have to string-match an error message to decide whether to retry.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Wire-protocol framing errors (header pack/unpack).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("header too short: expected {expected} bytes, got {got}")]
    HeaderTooShort { expected: usize, got: usize },

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("invalid opcode: {0}")]
    InvalidOpCode(u8),

    #[error("payload too large: {size} bytes exceeds max {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("expected {expected} frames, got {got}")]
    InvalidFrameCount { expected: usize, got: usize },

    #[error("payload length mismatch: header says {expected}, got {got}")]
    PayloadLengthMismatch { expected: usize, got: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error currency at crate boundaries.
///
/// Each crate (`storyloom_db`, `storyloom_coordination`, `storyloom_worker`,
/// `storyloom_pipeline`) defines its own local error enum and converts into
/// this one at the seams rather than propagating raw library errors across
/// crate boundaries.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("coordination store unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("processor unavailable: {0}")]
    ProcessorUnavailable(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Whether the retry policy should attempt this job again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CoordinationUnavailable(_)
                | OrchestratorError::ProcessorUnavailable(_)
                | OrchestratorError::TransientIo(_)
                | OrchestratorError::Timeout(_)
        )
    }
}
