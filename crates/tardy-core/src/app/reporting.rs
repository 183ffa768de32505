//! ErrorReportingMiddleware - Fatal な dispatch を ErrorReporter に送る
//!
//! - 後続の chain で起きた panic もここで止め、`HandlerPanicked` にする
//! - 報告するのは Fatal だけ（RecoverableFailure は transport の retry に任せる）
//! - 報告は `tokio::spawn` で投げっぱなし。失敗は warn ログのみ

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use super::middleware::{Middleware, Next};
use crate::domain::{DispatchError, DispatchOutcome, QueueMessage};
use crate::ports::{ErrorReport, ErrorReporter};
use crate::typed::invoker::panic_message;

pub struct ErrorReportingMiddleware<R> {
    reporter: Arc<R>,
}

impl<R: ErrorReporter> ErrorReportingMiddleware<R> {
    pub fn new(reporter: R) -> Self {
        Self {
            reporter: Arc::new(reporter),
        }
    }

    pub fn from_arc(reporter: Arc<R>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl<R: ErrorReporter> Middleware for ErrorReportingMiddleware<R> {
    async fn call(&self, queue: &str, message: &QueueMessage, next: Next<'_>) -> DispatchOutcome {
        let outcome = match AssertUnwindSafe(next.run(queue, message)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => DispatchError::HandlerPanicked {
                task: message.task.clone(),
                detail: panic_message(payload.as_ref()),
                stack_trace: Backtrace::force_capture().to_string(),
            }
            .into(),
        };

        if let DispatchOutcome::Fatal(err) = &outcome {
            let report = ErrorReport::new(queue, message, err);
            let reporter = Arc::clone(&self.reporter);
            tokio::spawn(async move {
                let message_id = report.jid;
                if let Err(e) = reporter.capture_error(report).await {
                    warn!(%message_id, error = %e, "failed to report dispatch error");
                }
            });
        }

        outcome
    }
}
