//! Middleware chain
//!
//! 各 middleware は `next.run(..)` を呼ぶかどうか、呼んだ結果をどう扱うかを決める。
//! 登録順に外側から内側へ包み、最内側が `Dispatcher`。

use std::sync::Arc;

use async_trait::async_trait;

use super::dispatch::Dispatcher;
use crate::domain::{DispatchOutcome, QueueMessage};

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn call(&self, queue: &str, message: &QueueMessage, next: Next<'_>) -> DispatchOutcome;
}

/// The rest of the chain after the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    dispatcher: &'a Dispatcher,
}

impl Next<'_> {
    pub async fn run(self, queue: &str, message: &QueueMessage) -> DispatchOutcome {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    dispatcher: self.dispatcher,
                };
                head.call(queue, message, next).await
            }
            None => self.dispatcher.dispatch(message).await,
        }
    }
}

/// Middlewares (outermost first) in front of a dispatcher.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    dispatcher: Dispatcher,
}

impl MiddlewareChain {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            middlewares: Vec::new(),
            dispatcher,
        }
    }

    /// Appends `middleware` inside the ones already added.
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub async fn run(&self, queue: &str, message: &QueueMessage) -> DispatchOutcome {
        let next = Next {
            rest: &self.middlewares,
            dispatcher: &self.dispatcher,
        };
        next.run(queue, message).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::{EnqueueOptions, MessageId};
    use crate::typed::FunctionRegistry;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn call(
            &self,
            queue: &str,
            message: &QueueMessage,
            next: Next<'_>,
        ) -> DispatchOutcome {
            self.log.lock().unwrap().push(format!("{} in", self.name));
            let outcome = next.run(queue, message).await;
            self.log.lock().unwrap().push(format!("{} out", self.name));
            outcome
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn call(
            &self,
            _queue: &str,
            _message: &QueueMessage,
            _next: Next<'_>,
        ) -> DispatchOutcome {
            DispatchOutcome::Success
        }
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>) -> MiddlewareChain {
        let mut registry = FunctionRegistry::new();
        let handler_log = Arc::clone(log);
        registry
            .register("work", move |n: i64| {
                handler_log.lock().unwrap().push(format!("handler {n}"));
            })
            .unwrap();
        MiddlewareChain::new(Dispatcher::new(Arc::new(registry)))
    }

    fn message(args: Vec<serde_json::Value>) -> QueueMessage {
        let now = Utc::now();
        QueueMessage::new(
            MessageId::generate(),
            "delay",
            "work",
            args,
            &EnqueueOptions::at(now),
            now,
        )
    }

    #[tokio::test]
    async fn middlewares_wrap_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log)
            .with(recorder("outer", &log))
            .with(recorder("inner", &log));
        assert_eq!(chain.len(), 2);

        let outcome = chain.run("delay", &message(vec![json!(7)])).await;
        assert!(outcome.is_success());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer in", "inner in", "handler 7", "inner out", "outer out"]
        );
    }

    #[tokio::test]
    async fn middleware_can_skip_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log)
            .with(Arc::new(ShortCircuit))
            .with(recorder("never", &log));

        let outcome = chain.run("delay", &message(vec![json!(1)])).await;
        assert!(outcome.is_success());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_chain_dispatches_directly() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log);
        assert!(chain.is_empty());

        let outcome = chain.run("delay", &message(vec![])).await;
        assert!(outcome.is_fatal());
        assert!(log.lock().unwrap().is_empty());
    }
}
