//! Outcome model: the per-message classification produced by dispatch.
//!
//! The worker translates it into the transport protocol:
//! - `Success` -> ack
//! - `RecoverableFailure` -> transport-level retry
//! - `Fatal` -> non-retryable failure (and a telemetry report)

use serde::{Deserialize, Serialize};

use super::errors::{DispatchError, HandlerError};

/// Serializable tag of a `DispatchOutcome`, for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    RecoverableFailure,
    Fatal,
}

/// Result of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,

    /// The handler returned its declared error.
    RecoverableFailure(HandlerError),

    /// Structural problem or handler panic.
    Fatal(DispatchError),
}

impl DispatchOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            DispatchOutcome::Success => OutcomeKind::Success,
            DispatchOutcome::RecoverableFailure(_) => OutcomeKind::RecoverableFailure,
            DispatchOutcome::Fatal(_) => OutcomeKind::Fatal,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchOutcome::Fatal(_))
    }

    /// Failure message, if any.
    pub fn reason(&self) -> Option<String> {
        match self {
            DispatchOutcome::Success => None,
            DispatchOutcome::RecoverableFailure(err) => Some(err.to_string()),
            DispatchOutcome::Fatal(err) => Some(err.to_string()),
        }
    }
}

impl From<DispatchError> for DispatchOutcome {
    fn from(err: DispatchError) -> Self {
        DispatchOutcome::Fatal(err)
    }
}
