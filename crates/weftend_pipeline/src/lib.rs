//! weftend_pipeline — Deterministic orchestration of the evidence engine.
//!
//! Fixed stage order, always: examine → decide → stage → validate →
//! digest → commit. One input produces one evidence root; there is no
//! intra-run parallelism, and the atomic rename in the writer is the only
//! inter-process synchronization point.

#![forbid(unsafe_code)]

use thiserror::Error;
use weftend_core::codes;
use weftend_io::IoError;

pub mod compare;
pub mod examine;
pub mod inspect;
pub mod intake;

/// Pipeline-level error. Fail-closed variants surface a stable reason
/// code as the first line of stderr and exit 40.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error("[{code}] {msg}")]
    FailClosed { code: &'static str, msg: String },
}

impl PipelineError {
    pub fn fail_closed(code: &'static str, msg: impl Into<String>) -> Self {
        PipelineError::FailClosed {
            code,
            msg: msg.into(),
        }
    }

    /// The stable reason code for this failure.
    pub fn reason_code(&self) -> &'static str {
        match self {
            PipelineError::FailClosed { code, .. } => code,
            PipelineError::Io(e) => match e {
                IoError::FailClosed { code, .. } => code,
                _ => codes::INTERNAL_ERROR,
            },
        }
    }

    /// True when this is a fail-closed (exit 40) condition rather than an
    /// unexpected internal error (exit 1).
    pub fn is_fail_closed(&self) -> bool {
        matches!(
            self,
            PipelineError::FailClosed { .. } | PipelineError::Io(IoError::FailClosed { .. })
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
