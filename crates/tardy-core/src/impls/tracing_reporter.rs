//! TracingReporter - Fatal な dispatch を `tracing` の error event として出す
//!
//! 外部の監視サービスが無い環境向け。subscriber 側で集約できる。

use async_trait::async_trait;
use tracing::error;

use crate::ports::{ErrorReport, ErrorReporter, ReportError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

#[async_trait]
impl ErrorReporter for TracingReporter {
    async fn capture_error(&self, report: ErrorReport) -> Result<(), ReportError> {
        let args = serde_json::to_string(&report.args).map_err(|e| ReportError(e.to_string()))?;
        error!(
            queue = %report.queue,
            task = %report.task,
            message_id = %report.jid,
            code = report.code,
            args = %args,
            stack_trace = report.stack_trace.as_deref().unwrap_or(""),
            "{}",
            report.error
        );
        Ok(())
    }
}
