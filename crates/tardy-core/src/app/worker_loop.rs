//! WorkerGroup - N 本の worker で queue を処理する
//!
//! # フロー（1 worker）
//! 1. `QueueTransport::lease(queue)` で 1 件取る（shutdown と select）
//! 2. MiddlewareChain を通して dispatch → DispatchOutcome
//! 3. outcome に応じて lease を確定
//!    - Success → ack
//!    - RecoverableFailure → retry（回数・間隔は transport が判断）
//!    - Fatal → kill（retry しない）
//!
//! middleware が panic しても worker は止めない（HandlerPanicked として kill）。

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::middleware::MiddlewareChain;
use crate::domain::{DispatchError, DispatchOutcome, QueueMessage};
use crate::ports::QueueTransport;
use crate::typed::invoker::panic_message;

/// Worker group handle.
/// - `request_shutdown()` で新しい lease を取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `concurrency` workers on `queue`.
    pub fn spawn(
        concurrency: usize,
        queue: impl Into<String>,
        transport: Arc<dyn QueueTransport>,
        chain: Arc<MiddlewareChain>,
    ) -> Self {
        let queue: Arc<str> = Arc::from(queue.into());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let queue = Arc::clone(&queue);
            let transport = Arc::clone(&transport);
            let chain = Arc::clone(&chain);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, &queue, transport, chain, &mut rx).await;
            });
            joins.push(join);
        }
        info!(%queue, concurrency, "workers started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight handlers run to completion; workers just stop taking new leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: &str,
    transport: Arc<dyn QueueTransport>,
    chain: Arc<MiddlewareChain>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は待つので shutdown と競合させる
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped: treat as shutdown
                    break;
                }
                continue;
            }
            lease = transport.lease(queue) => lease,
        };

        let Some(lease) = lease else {
            debug!(worker_id, %queue, "transport closed");
            break;
        };

        // handler 実行に必要な分だけ owned にする
        let message = lease.message().clone();
        let outcome = run_chain(&chain, queue, &message).await;

        let settled = match outcome {
            DispatchOutcome::Success => lease.ack().await,
            DispatchOutcome::RecoverableFailure(err) => lease.retry(err.to_string()).await,
            DispatchOutcome::Fatal(err) => lease.kill(err.to_string()).await,
        };
        if let Err(e) = settled {
            error!(worker_id, message_id = %message.jid, error = %e, "failed to settle message");
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Runs the chain, folding a panic anywhere in it into a Fatal outcome.
async fn run_chain(
    chain: &MiddlewareChain,
    queue: &str,
    message: &QueueMessage,
) -> DispatchOutcome {
    match AssertUnwindSafe(chain.run(queue, message)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            error!(message_id = %message.jid, task = %message.task, %detail, "middleware panicked");
            DispatchError::HandlerPanicked {
                task: message.task.clone(),
                detail,
                stack_trace: Backtrace::force_capture().to_string(),
            }
            .into()
        }
    }
}
