//! Errors - dispatch 時のエラー分類
//!
//! # 分類
//! - **Fatal**（リトライ無意味）: `DispatchError` の各 variant
//!   - UnknownTask / ArityMismatch / ArgumentDecodeFailed / HandlerPanicked
//! - **Recoverable**（transport のリトライに任せる）: `HandlerError`
//!
//! registration 時のエラーは `typed::RegistryError` を参照。

use std::fmt;

/// Declared arity of a task, used in `ArityMismatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    /// Variadic task: the fixed parameters are required, the tail is free.
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, got: usize) -> bool {
        match self {
            Arity::Exactly(n) => got == n,
            Arity::AtLeast(n) => got >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// DecodeError は 1 つの引数を型付きの値に変換できなかったことを表す
///
/// どの引数か（index）、期待した Rust の型、実際に来た JSON の種類を持つ。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("argument {index}: cannot decode {found} into {expected}: {detail}")]
pub struct DecodeError {
    pub index: usize,
    pub expected: &'static str,
    pub found: &'static str,
    pub detail: String,
}

/// The handler's own declared error. Retryable per the task's policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Structural dispatch failure. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown task name [{name}]")]
    UnknownTask { name: String },

    #[error("[{task}]: bad arguments count, got {got}, expect {want}")]
    ArityMismatch { task: String, got: usize, want: Arity },

    #[error("[{task}]: {source}")]
    ArgumentDecodeFailed {
        task: String,
        #[source]
        source: DecodeError,
    },

    #[error("[{task}]: handler panicked: {detail}")]
    HandlerPanicked {
        task: String,
        detail: String,
        stack_trace: String,
    },
}

impl DispatchError {
    /// Task name the failure belongs to.
    pub fn task(&self) -> &str {
        match self {
            DispatchError::UnknownTask { name } => name,
            DispatchError::ArityMismatch { task, .. }
            | DispatchError::ArgumentDecodeFailed { task, .. }
            | DispatchError::HandlerPanicked { task, .. } => task,
        }
    }

    /// Short machine-friendly label, used as a log/report tag.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::UnknownTask { .. } => "unknown_task",
            DispatchError::ArityMismatch { .. } => "arity_mismatch",
            DispatchError::ArgumentDecodeFailed { .. } => "argument_decode_failed",
            DispatchError::HandlerPanicked { .. } => "handler_panicked",
        }
    }
}
