//! ErrorReporter port - Fatal な dispatch の外部通知先
//!
//! 報告は fire-and-forget。失敗しても dispatch の結果は変わらない。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{DispatchError, MessageId, QueueMessage};

/// ReportError は telemetry 送信のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error report failed: {0}")]
pub struct ReportError(pub String);

/// Everything a reporter gets to see about one Fatal dispatch.
///
/// Owned so that it can move into a spawned task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub queue: String,
    pub task: String,
    pub jid: MessageId,
    pub args: Vec<Value>,
    pub code: &'static str,
    pub error: String,
    /// Set for handler panics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ErrorReport {
    pub fn new(queue: &str, message: &QueueMessage, err: &DispatchError) -> Self {
        let stack_trace = match err {
            DispatchError::HandlerPanicked { stack_trace, .. } => Some(stack_trace.clone()),
            _ => None,
        };
        Self {
            queue: queue.to_string(),
            task: message.task.clone(),
            jid: message.jid,
            args: message.args.clone(),
            code: err.code(),
            error: err.to_string(),
            stack_trace,
        }
    }
}

/// Error telemetry port.
#[async_trait]
pub trait ErrorReporter: Send + Sync + 'static {
    async fn capture_error(&self, report: ErrorReport) -> Result<(), ReportError>;
}

/// Drops every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

#[async_trait]
impl ErrorReporter for NoopReporter {
    async fn capture_error(&self, _report: ErrorReport) -> Result<(), ReportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::EnqueueOptions;

    fn message() -> QueueMessage {
        let now = Utc::now();
        QueueMessage::new(
            MessageId::generate(),
            "delay",
            "boom",
            vec![json!(1)],
            &EnqueueOptions::at(now),
            now,
        )
    }

    #[test]
    fn panic_report_keeps_stack_trace() {
        let err = DispatchError::HandlerPanicked {
            task: "boom".to_string(),
            detail: "oops".to_string(),
            stack_trace: "frame 0".to_string(),
        };
        let report = ErrorReport::new("delay", &message(), &err);
        assert_eq!(report.code, "handler_panicked");
        assert_eq!(report.stack_trace.as_deref(), Some("frame 0"));
        assert_eq!(report.args, vec![json!(1)]);
    }

    #[test]
    fn structural_report_has_no_stack_trace() {
        let err = DispatchError::UnknownTask {
            name: "boom".to_string(),
        };
        let report = ErrorReport::new("delay", &message(), &err);
        assert_eq!(report.error, "unknown task name [boom]");
        assert!(report.stack_trace.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("stack_trace").is_none());
        assert_eq!(json["code"], "unknown_task");
    }
}
