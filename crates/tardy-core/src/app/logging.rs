//! LoggingMiddleware - message ごとの span と結果ログ

use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::middleware::{Middleware, Next};
use crate::domain::{DispatchOutcome, QueueMessage};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn call(&self, queue: &str, message: &QueueMessage, next: Next<'_>) -> DispatchOutcome {
        let span = info_span!(
            "dispatch",
            queue,
            message_id = %message.jid,
            task = %message.task,
            retry_count = message.retry_count,
        );

        async move {
            let started = Instant::now();
            debug!("start");
            let outcome = next.run(queue, message).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                DispatchOutcome::Success => info!(elapsed_ms, "done"),
                DispatchOutcome::RecoverableFailure(err) => {
                    warn!(elapsed_ms, reason = %err, "task failed")
                }
                DispatchOutcome::Fatal(err) => {
                    error!(elapsed_ms, code = err.code(), error = %err, "task failed permanently")
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
