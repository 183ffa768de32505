//! Dispatcher - QueueMessage 1 件を registry で引いて invoker に渡す
//!
//! handler は同期関数なので `spawn_blocking` で実行する。
//! 長い handler が止めるのはその worker だけ。

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{DispatchError, DispatchOutcome, QueueMessage};
use crate::typed::invoker::{invoke, panic_message};
use crate::typed::FunctionRegistry;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Classifies one message. Never fails: every error is folded into the outcome.
    pub async fn dispatch(&self, message: &QueueMessage) -> DispatchOutcome {
        let task = message.task.clone();
        if !self.registry.contains(&task) {
            return DispatchError::UnknownTask { name: task }.into();
        }

        let registry = Arc::clone(&self.registry);
        let args: Vec<Value> = message.args.clone();
        let name = task.clone();
        let joined = tokio::task::spawn_blocking(move || match registry.lookup(&name) {
            Some(descriptor) => invoke(descriptor, &args),
            None => DispatchError::UnknownTask { name }.into(),
        })
        .await;

        match joined {
            Ok(outcome) => outcome,
            // invoke catches handler panics itself; this is the blocking pool failing
            Err(err) => {
                let detail = if err.is_panic() {
                    panic_message(err.into_panic().as_ref())
                } else {
                    err.to_string()
                };
                DispatchError::HandlerPanicked {
                    task,
                    detail,
                    stack_trace: String::new(),
                }
                .into()
            }
        }
    }
}
