//! Queue message: the wire record a transport persists for one delayed call.
//!
//! The JSON shape follows the Sidekiq convention most job queues speak
//! (`jid`, `class`, `args`, `at`, `retry`, ...), so a message written here can
//! be inspected with ordinary queue tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::MessageId;

/// Scheduling and retry metadata handed to `QueueTransport::enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOptions {
    /// Earliest time the message may be delivered.
    pub at: DateTime<Utc>,

    /// Whether the transport should retry after a recoverable failure.
    pub retry: bool,

    /// Retry ceiling. `None` means "transport default".
    pub retry_max: Option<u32>,

    /// Fixed delay between retries in seconds. `None` means "transport backoff".
    pub retry_interval: Option<u64>,
}

impl EnqueueOptions {
    /// Deliver at `at`, no retries.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            retry: false,
            retry_max: None,
            retry_interval: None,
        }
    }
}

/// A message as stored by a transport.
///
/// The core creates it once through the enqueuer and only reads it back
/// during dispatch. `retry_count`, `error_message` and `failed_at` are
/// transport bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub jid: MessageId,

    pub queue: String,

    /// Registered task name.
    #[serde(rename = "class")]
    pub task: String,

    #[serde(default)]
    pub args: Vec<Value>,

    /// Scheduled time, epoch seconds.
    pub at: f64,

    /// Enqueue time, epoch seconds.
    pub enqueued_at: f64,

    #[serde(default)]
    pub retry: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<u64>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<f64>,
}

impl QueueMessage {
    pub fn new(
        jid: MessageId,
        queue: impl Into<String>,
        task: impl Into<String>,
        args: Vec<Value>,
        options: &EnqueueOptions,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            jid,
            queue: queue.into(),
            task: task.into(),
            args,
            at: epoch_seconds(options.at),
            enqueued_at: epoch_seconds(enqueued_at),
            retry: options.retry,
            retry_max: options.retry_max,
            retry_interval: options.retry_interval,
            retry_count: 0,
            error_message: None,
            failed_at: None,
        }
    }

    /// The untyped argument sequence.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Reads one wire field by its JSON name (`"class"`, `"retry_count"`, ...).
    pub fn get_field(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => fields.remove(name),
            _ => None,
        }
    }

    /// `at` as a timestamp. `None` if the stored number is out of range.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        from_epoch_seconds(self.at)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Epoch seconds with microsecond precision.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}
