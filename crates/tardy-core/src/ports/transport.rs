//! QueueTransport port - メッセージの置き場所
//!
//! Enqueuer は `enqueue` だけ、worker は `lease` と `MessageLease` だけを使う。
//! retry / dead の判断（回数、backoff）は transport 側の責務。

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{EnqueueOptions, MessageId, QueueMessage};

/// TransportError は transport 操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("message {0} is not known to the transport")]
    UnknownMessage(MessageId),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// A leased message.
/// The worker owns this lease and must settle it exactly once.
#[async_trait]
pub trait MessageLease: Send {
    fn message(&self) -> &QueueMessage;

    /// Mark success.
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;

    /// Retryable failure. The transport applies the message's retry settings
    /// and moves it to dead when they are exhausted.
    async fn retry(self: Box<Self>, reason: String) -> Result<(), TransportError>;

    /// Non-retryable failure. The message goes straight to dead.
    async fn kill(self: Box<Self>, reason: String) -> Result<(), TransportError>;
}

/// Queue transport port (interface).
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Stores a new message on `queue`, to become due at `options.at`.
    async fn enqueue(
        &self,
        queue: &str,
        task: &str,
        args: Vec<Value>,
        options: EnqueueOptions,
    ) -> Result<MessageId, TransportError>;

    /// Leases the next due message on `queue`, waiting until one is due.
    /// Returns `None` once the transport is closed.
    async fn lease(&self, queue: &str) -> Option<Box<dyn MessageLease>>;
}
