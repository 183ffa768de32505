//! Enqueuer - 登録済み task を transport に積む
//!
//! # 使用例
//! ```ignore
//! let enqueuer = app.enqueuer();
//! let send_email = app.task("sendEmail").unwrap();
//! enqueuer.delay(send_email, ("a@example.com", "hi")).await?;
//! enqueuer.delay_in(send_email, Duration::from_secs(60), ("b@example.com", "later")).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{EnqueueOptions, MessageId};
use crate::ports::{Clock, QueueTransport, TransportError};
use crate::typed::TaskDescriptor;

/// EnqueueError は enqueue 時のエラー（呼び出し元にそのまま返る）
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("failed to serialize task arguments: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("delay {0:?} is out of range")]
    DelayOutOfRange(Duration),
}

/// Values that can be flattened into a task's untyped argument list.
///
/// Implemented for `()`, tuples of up to 8 `Serialize` values and `Vec<T>`.
pub trait IntoTaskArgs {
    fn into_task_args(self) -> Result<Vec<Value>, serde_json::Error>;
}

impl IntoTaskArgs for () {
    fn into_task_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(Vec::new())
    }
}

impl<T: Serialize> IntoTaskArgs for Vec<T> {
    fn into_task_args(self) -> Result<Vec<Value>, serde_json::Error> {
        self.into_iter().map(serde_json::to_value).collect()
    }
}

macro_rules! impl_into_task_args {
    ($($arg:ident),+) => {
        impl<$($arg: Serialize,)+> IntoTaskArgs for ($($arg,)+) {
            #[allow(non_snake_case)]
            fn into_task_args(self) -> Result<Vec<Value>, serde_json::Error> {
                let ($($arg,)+) = self;
                Ok(vec![$(serde_json::to_value($arg)?),+])
            }
        }
    };
}

impl_into_task_args!(A1);
impl_into_task_args!(A1, A2);
impl_into_task_args!(A1, A2, A3);
impl_into_task_args!(A1, A2, A3, A4);
impl_into_task_args!(A1, A2, A3, A4, A5);
impl_into_task_args!(A1, A2, A3, A4, A5, A6);
impl_into_task_args!(A1, A2, A3, A4, A5, A6, A7);
impl_into_task_args!(A1, A2, A3, A4, A5, A6, A7, A8);

#[derive(Clone)]
pub struct Enqueuer {
    transport: Arc<dyn QueueTransport>,
    queue: String,
    clock: Arc<dyn Clock>,
}

impl Enqueuer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        queue: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            queue: queue.into(),
            clock,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Enqueue to run as soon as possible.
    pub async fn delay(
        &self,
        task: &TaskDescriptor,
        args: impl IntoTaskArgs,
    ) -> Result<MessageId, EnqueueError> {
        self.delay_at(task, self.clock.now(), args).await
    }

    /// Enqueue to run `after` from now.
    pub async fn delay_in(
        &self,
        task: &TaskDescriptor,
        after: Duration,
        args: impl IntoTaskArgs,
    ) -> Result<MessageId, EnqueueError> {
        let at = chrono::Duration::from_std(after)
            .ok()
            .and_then(|offset| self.clock.now().checked_add_signed(offset))
            .ok_or(EnqueueError::DelayOutOfRange(after))?;
        self.delay_at(task, at, args).await
    }

    /// Enqueue to run at `at`. Retry settings come from the task's policy.
    pub async fn delay_at(
        &self,
        task: &TaskDescriptor,
        at: DateTime<Utc>,
        args: impl IntoTaskArgs,
    ) -> Result<MessageId, EnqueueError> {
        let args = args.into_task_args()?;
        let policy = task.retry_policy().unwrap_or_default();
        let options = EnqueueOptions {
            at,
            retry: policy.retries_enabled(),
            retry_max: policy.retry_max(),
            retry_interval: policy.retry_interval(),
        };

        let id = self
            .transport
            .enqueue(&self.queue, task.name(), args, options)
            .await?;
        debug!(queue = %self.queue, task = task.name(), message_id = %id, %at, "task delayed");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::impls::{InMemoryTransport, MessageState};
    use crate::ports::{FixedClock, MessageLease};
    use crate::typed::FunctionRegistry;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(String, String, Vec<Value>, EnqueueOptions)>>,
    }

    #[async_trait]
    impl QueueTransport for RecordingTransport {
        async fn enqueue(
            &self,
            queue: &str,
            task: &str,
            args: Vec<Value>,
            options: EnqueueOptions,
        ) -> Result<MessageId, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((queue.to_string(), task.to_string(), args, options));
            Ok(MessageId::generate())
        }

        async fn lease(&self, _queue: &str) -> Option<Box<dyn MessageLease>> {
            None
        }
    }

    struct DownTransport;

    #[async_trait]
    impl QueueTransport for DownTransport {
        async fn enqueue(
            &self,
            _queue: &str,
            _task: &str,
            _args: Vec<Value>,
            _options: EnqueueOptions,
        ) -> Result<MessageId, TransportError> {
            Err(TransportError::Unavailable("connection refused".to_string()))
        }

        async fn lease(&self, _queue: &str) -> Option<Box<dyn MessageLease>> {
            None
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry
            .register("sendEmail", |_to: String, _body: String| -> Result<(), String> { Ok(()) })
            .unwrap();
        registry
            .register("charge", |_amount: i64, _opts: Option<HashMapOpts>| {})
            .unwrap()
            .retry_count(5)
            .interval(30);
        registry
    }

    type HashMapOpts = std::collections::HashMap<String, String>;

    #[tokio::test]
    async fn delay_uses_clock_and_no_retry_by_default() {
        let transport = Arc::new(RecordingTransport::default());
        let enqueuer = Enqueuer::new(transport.clone(), "delay", Arc::new(FixedClock(t0())));
        let registry = registry();

        enqueuer
            .delay(registry.lookup("sendEmail").unwrap(), ("a@example.com", "hi"))
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        let (queue, task, args, options) = &calls[0];
        assert_eq!(queue, "delay");
        assert_eq!(task, "sendEmail");
        assert_eq!(args, &vec![json!("a@example.com"), json!("hi")]);
        assert_eq!(options.at, t0());
        assert!(!options.retry);
        assert_eq!(options.retry_max, None);
        assert_eq!(options.retry_interval, None);
    }

    #[tokio::test]
    async fn delay_in_offsets_and_carries_policy() {
        let transport = Arc::new(RecordingTransport::default());
        let enqueuer = Enqueuer::new(transport.clone(), "delay", Arc::new(FixedClock(t0())));
        let registry = registry();

        enqueuer
            .delay_in(
                registry.lookup("charge").unwrap(),
                Duration::from_secs(90),
                (100, None::<HashMapOpts>),
            )
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        let (_, task, args, options) = &calls[0];
        assert_eq!(task, "charge");
        assert_eq!(args, &vec![json!(100), Value::Null]);
        assert_eq!(options.at, t0() + chrono::Duration::seconds(90));
        assert!(options.retry);
        assert_eq!(options.retry_max, Some(5));
        assert_eq!(options.retry_interval, Some(30));
    }

    #[tokio::test]
    async fn untyped_and_empty_args() {
        let transport = Arc::new(RecordingTransport::default());
        let enqueuer = Enqueuer::new(transport.clone(), "delay", Arc::new(FixedClock(t0())));
        let registry = registry();
        let task = registry.lookup("sendEmail").unwrap();

        enqueuer.delay(task, vec![json!(1), json!("x")]).await.unwrap();
        enqueuer.delay(task, ()).await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].2, vec![json!(1), json!("x")]);
        assert!(calls[1].2.is_empty());
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let enqueuer = Enqueuer::new(Arc::new(DownTransport), "delay", Arc::new(FixedClock(t0())));
        let registry = registry();

        let err = enqueuer
            .delay(registry.lookup("sendEmail").unwrap(), ("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::Transport(TransportError::Unavailable(ref msg)) if msg == "connection refused"
        ));
    }

    #[tokio::test]
    async fn delay_at_produces_a_stored_message() {
        let transport = Arc::new(InMemoryTransport::new());
        let enqueuer = Enqueuer::new(transport.clone(), "delay", Arc::new(FixedClock(t0())));
        let registry = registry();

        let id = enqueuer
            .delay_at(registry.lookup("sendEmail").unwrap(), t0(), ("a@example.com", "hi"))
            .await
            .unwrap();

        let (message, state) = transport.message(id).await.unwrap();
        assert_eq!(state, MessageState::Scheduled);
        assert_eq!(message.task, "sendEmail");
        assert_eq!(message.get_field("class"), Some(json!("sendEmail")));
        assert_eq!(message.scheduled_at(), Some(t0()));
    }
}
