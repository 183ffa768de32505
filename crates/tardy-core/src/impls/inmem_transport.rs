//! In-memory queue transport.
//!
//! # 状態遷移
//! - Scheduled -> Queued -> Running -> Succeeded
//! - Running -> RetryScheduled -> Queued（retry_count < retry_max の間）
//! - Running -> Dead（retry 無効 / 上限到達 / kill）
//!
//! Succeeded / Dead になった message は `retention` 件まで残し、
//! それを超えたら古いものから捨てる。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::app::TardyConfig;
use crate::domain::message::epoch_seconds;
use crate::domain::{Backoff, EnqueueOptions, MessageId, QueueMessage};
use crate::ports::{MessageLease, QueueTransport, TransportError};

/// Retry ceiling for messages that enable retries without their own `retry_max`.
pub const DEFAULT_RETRY_MAX: u32 = 25;

/// Finished (Succeeded / Dead) messages kept for inspection.
pub const DEFAULT_RETENTION: usize = 10_000;

/// Longest delay a message can be scheduled out.
const MAX_SCHEDULE_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn due_after(delay: Duration) -> Instant {
    Instant::now() + delay.min(MAX_SCHEDULE_DELAY)
}

/// Message state inside the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Waiting for its `at` time.
    Scheduled,

    /// Due, waiting for a worker.
    Queued,

    /// Leased by a worker.
    Running,

    Succeeded,

    /// Failed, waiting for its retry time.
    RetryScheduled,

    /// Failed permanently.
    Dead,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Succeeded | MessageState::Dead)
    }
}

/// Per-queue counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub scheduled: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub retry_scheduled: usize,
    pub dead: usize,
}

impl QueueCounts {
    /// Messages that have not reached a terminal state.
    pub fn pending(&self) -> usize {
        self.scheduled + self.queued + self.running + self.retry_scheduled
    }
}

/// Scheduled entry for the per-queue min-heap (earliest first, FIFO on ties).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledEntry {
    run_at: Instant,
    seq: u64,
    id: MessageId,
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct Lane {
    ready: VecDeque<MessageId>,
    scheduled: BinaryHeap<ScheduledEntry>,
}

#[derive(Debug)]
struct Record {
    message: QueueMessage,
    state: MessageState,
}

#[derive(Debug, Default)]
struct TransportState {
    records: HashMap<MessageId, Record>,
    lanes: HashMap<String, Lane>,
    /// Terminal messages, oldest first.
    finished: VecDeque<MessageId>,
    next_seq: u64,
    closed: bool,
}

impl TransportState {
    fn schedule(&mut self, queue: &str, id: MessageId, run_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.lanes
            .entry(queue.to_string())
            .or_default()
            .scheduled
            .push(ScheduledEntry { run_at, seq, id });
    }

    /// Move due messages of `queue` from scheduled to ready.
    fn promote_due(&mut self, queue: &str, now: Instant) {
        let Some(lane) = self.lanes.get_mut(queue) else {
            return;
        };
        while let Some(entry) = lane.scheduled.peek() {
            if entry.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = lane.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.id)
                && matches!(
                    record.state,
                    MessageState::Scheduled | MessageState::RetryScheduled
                )
            {
                record.state = MessageState::Queued;
                lane.ready.push_back(entry.id);
            }
        }
    }

    fn retire(&mut self, id: MessageId, retention: usize) {
        self.finished.push_back(id);
        while self.finished.len() > retention {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            self.records.remove(&oldest);
        }
    }

    fn next_wake(&self, queue: &str) -> Option<Instant> {
        self.lanes
            .get(queue)
            .and_then(|lane| lane.scheduled.peek())
            .map(|entry| entry.run_at)
    }

    fn counts(&self, queue: &str) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values().filter(|r| r.message.queue == queue) {
            match record.state {
                MessageState::Scheduled => counts.scheduled += 1,
                MessageState::Queued => counts.queued += 1,
                MessageState::Running => counts.running += 1,
                MessageState::Succeeded => counts.succeeded += 1,
                MessageState::RetryScheduled => counts.retry_scheduled += 1,
                MessageState::Dead => counts.dead += 1,
            }
        }
        counts
    }
}

/// In-memory transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
    notify: Arc<Notify>,
    backoff: Backoff,
    default_retry_max: u32,
    retention: usize,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            notify: Arc::new(Notify::new()),
            backoff: Backoff::default_v1(),
            default_retry_max: DEFAULT_RETRY_MAX,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Transport with the config's retry ceiling applied.
    pub fn from_config(config: &TardyConfig) -> Self {
        Self::new().with_default_retry_max(config.default_retry_max)
    }

    /// Backoff used when a retried message has no `retry_interval`.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_default_retry_max(mut self, retry_max: u32) -> Self {
        self.default_retry_max = retry_max;
        self
    }

    /// How many finished messages `message()` and `counts()` still see.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub async fn counts(&self, queue: &str) -> QueueCounts {
        let state = self.state.lock().await;
        state.counts(queue)
    }

    /// Snapshot of a message and its state.
    pub async fn message(&self, id: MessageId) -> Option<(QueueMessage, MessageState)> {
        let state = self.state.lock().await;
        state
            .records
            .get(&id)
            .map(|record| (record.message.clone(), record.state))
    }

    /// Wakes every waiting `lease` and makes them return `None`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Polls `counts(queue)` until nothing is pending, or `timeout` elapses.
    /// Returns the last counts seen.
    pub async fn wait_idle(&self, queue: &str, timeout: Duration) -> QueueCounts {
        let deadline = Instant::now() + timeout;
        loop {
            let counts = self.counts(queue).await;
            if counts.pending() == 0 || Instant::now() >= deadline {
                return counts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn enqueue(
        &self,
        queue: &str,
        task: &str,
        args: Vec<Value>,
        options: EnqueueOptions,
    ) -> Result<MessageId, TransportError> {
        let now = Utc::now();
        let id = MessageId::generate();
        let delay = (options.at - now).to_std().unwrap_or(Duration::ZERO);
        let message = QueueMessage::new(id, queue, task, args, &options, now);

        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.records.insert(
                id,
                Record {
                    message,
                    state: MessageState::Scheduled,
                },
            );
            state.schedule(queue, id, due_after(delay));
        }

        // Notify waiting workers
        self.notify.notify_waiters();
        debug!(
            queue,
            task,
            message_id = %id,
            delay_ms = delay.as_millis() as u64,
            "message enqueued"
        );
        Ok(id)
    }

    async fn lease(&self, queue: &str) -> Option<Box<dyn MessageLease>> {
        loop {
            // enable() before inspecting the state so a notify_waiters()
            // issued after the lock is released is not lost
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                state.promote_due(queue, Instant::now());

                let leased = state
                    .lanes
                    .get_mut(queue)
                    .and_then(|lane| lane.ready.pop_front());
                if let Some(id) = leased
                    && let Some(record) = state.records.get_mut(&id)
                {
                    record.state = MessageState::Running;
                    let lease = InMemoryLease {
                        message: record.message.clone(),
                        transport: self.clone(),
                    };
                    return Some(Box::new(lease));
                }

                state.next_wake(queue)
            };

            // Wait for notification OR next scheduled message time
            if let Some(wake_at) = next_wake {
                tokio::select! {
                    _ = notified => {},
                    _ = tokio::time::sleep_until(wake_at) => {},
                }
            } else {
                notified.await;
            }
        }
    }
}

/// Lease implementation for InMemoryTransport.
struct InMemoryLease {
    message: QueueMessage,
    transport: InMemoryTransport,
}

impl InMemoryLease {
    async fn settle<F>(&self, apply: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut Record, &InMemoryTransport) -> Option<Instant>,
    {
        let id = self.message.jid;
        let rescheduled = {
            let mut state = self.transport.state.lock().await;
            let record = state
                .records
                .get_mut(&id)
                .ok_or(TransportError::UnknownMessage(id))?;
            let run_at = apply(record, &self.transport);
            let terminal = record.state.is_terminal();
            if let Some(run_at) = run_at {
                state.schedule(&self.message.queue, id, run_at);
            }
            if terminal {
                state.retire(id, self.transport.retention);
            }
            run_at.is_some()
        }; // Lock released here

        if rescheduled {
            self.transport.notify.notify_waiters();
        }
        Ok(())
    }
}

fn mark_failed(record: &mut Record, reason: String) {
    record.message.error_message = Some(reason);
    record.message.failed_at = Some(epoch_seconds(Utc::now()));
}

#[async_trait]
impl MessageLease for InMemoryLease {
    fn message(&self) -> &QueueMessage {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.settle(|record, _| {
            record.state = MessageState::Succeeded;
            None
        })
        .await
    }

    async fn retry(self: Box<Self>, reason: String) -> Result<(), TransportError> {
        self.settle(|record, transport| {
            mark_failed(record, reason);
            let message = &mut record.message;
            let retry_max = message.retry_max.unwrap_or(transport.default_retry_max);
            if !message.retry || message.retry_count >= retry_max {
                debug!(
                    message_id = %message.jid,
                    retry_count = message.retry_count,
                    "retries exhausted, marking dead"
                );
                record.state = MessageState::Dead;
                return None;
            }

            message.retry_count += 1;
            let delay = match message.retry_interval {
                Some(secs) => Duration::from_secs(secs),
                None => transport.backoff.next_delay(message.retry_count),
            };
            debug!(
                message_id = %message.jid,
                retry_count = message.retry_count,
                delay_ms = delay.as_millis() as u64,
                "retry scheduled"
            );
            record.state = MessageState::RetryScheduled;
            Some(due_after(delay))
        })
        .await
    }

    async fn kill(self: Box<Self>, reason: String) -> Result<(), TransportError> {
        self.settle(|record, _| {
            mark_failed(record, reason);
            record.state = MessageState::Dead;
            None
        })
        .await
    }
}
