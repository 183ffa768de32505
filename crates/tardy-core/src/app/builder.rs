//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 登録は `&mut`、起動後は `Arc` で共有（ロック不要）

use std::sync::Arc;

use super::config::TardyConfig;
use super::dispatch::Dispatcher;
use super::enqueuer::Enqueuer;
use super::logging::LoggingMiddleware;
use super::middleware::{Middleware, MiddlewareChain};
use super::reporting::ErrorReportingMiddleware;
use super::worker_loop::WorkerGroup;
use crate::domain::{DispatchOutcome, QueueMessage, RetryPolicy};
use crate::ports::{Clock, ErrorReporter, QueueTransport, SystemClock};
use crate::typed::{FunctionRegistry, RegistryError, TaskDescriptor, TaskFn};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register("sendEmail", send_email)?
///     .register_with_policy("charge", charge, RetryPolicy::new(5, 30))?
///     .expect_tasks(&["sendEmail", "charge"])
///     .reporter(TracingReporter)
///     .build(transport)?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task 名を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: FunctionRegistry,
    expected_tasks: Option<Vec<String>>,
    config: TardyConfig,
    reporting: Option<Arc<dyn Middleware>>,
    logging: bool,
    middlewares: Vec<Arc<dyn Middleware>>,
    clock: Arc<dyn Clock>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing tasks: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

impl AppBuilder {
    /// 新しい AppBuilder を作成
    pub fn new() -> Self {
        Self {
            registry: FunctionRegistry::new(),
            expected_tasks: None,
            config: TardyConfig::default(),
            reporting: None,
            logging: true,
            middlewares: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Task を登録（同名は置き換え）
    pub fn register<F, Args>(
        mut self,
        name: impl Into<String>,
        task: F,
    ) -> Result<Self, RegistryError>
    where
        F: TaskFn<Args>,
        Args: 'static,
    {
        self.registry.register(name, task)?;
        Ok(self)
    }

    pub fn register_with_policy<F, Args>(
        mut self,
        name: impl Into<String>,
        task: F,
        policy: RetryPolicy,
    ) -> Result<Self, RegistryError>
    where
        F: TaskFn<Args>,
        Args: 'static,
    {
        self.registry.register_with_policy(name, task, policy)?;
        Ok(self)
    }

    /// Direct registry access, e.g. for `register(..)?.retry_count(n)` chains.
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// 期待される task 名のリストを設定
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn config(mut self, config: TardyConfig) -> Self {
        self.config = config;
        self
    }

    /// Reports Fatal outcomes to `reporter`. Installed outermost in the chain.
    pub fn reporter<R: ErrorReporter>(mut self, reporter: R) -> Self {
        self.reporting = Some(Arc::new(ErrorReportingMiddleware::new(reporter)));
        self
    }

    /// Per-message logging is on by default.
    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Adds a middleware inside the built-in ones, after those already added.
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - expect_tasks() で設定された task が全て登録されているかチェック
    /// - concurrency が 0 でないかチェック
    pub fn build(self, transport: Arc<dyn QueueTransport>) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        if self.config.concurrency == 0 {
            return Err(BuildError::ZeroConcurrency);
        }

        let registry = Arc::new(self.registry);
        let mut chain = MiddlewareChain::new(Dispatcher::new(Arc::clone(&registry)));
        if let Some(reporting) = self.reporting {
            chain = chain.with(reporting);
        }
        if self.logging {
            chain = chain.with(Arc::new(LoggingMiddleware));
        }
        for middleware in self.middlewares {
            chain = chain.with(middleware);
        }

        Ok(App {
            registry,
            transport,
            chain: Arc::new(chain),
            config: self.config,
            clock: self.clock,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App はアプリケーションのランタイム
///
/// registry は凍結済み。enqueue 側と worker 側の両方をここから作る。
pub struct App {
    registry: Arc<FunctionRegistry>,
    transport: Arc<dyn QueueTransport>,
    chain: Arc<MiddlewareChain>,
    config: TardyConfig,
    clock: Arc<dyn Clock>,
}

impl App {
    pub fn task(&self, name: &str) -> Option<&TaskDescriptor> {
        self.registry.lookup(name)
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &TardyConfig {
        &self.config
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer::new(
            Arc::clone(&self.transport),
            self.config.queue.clone(),
            Arc::clone(&self.clock),
        )
    }

    /// Runs one message through the middleware chain without a transport.
    pub async fn dispatch(&self, message: &QueueMessage) -> DispatchOutcome {
        self.chain.run(&self.config.queue, message).await
    }

    pub fn spawn_workers(&self) -> WorkerGroup {
        WorkerGroup::spawn(
            self.config.concurrency,
            self.config.queue.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.chain),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use serde::Deserialize;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::app::middleware::Next;
    use crate::domain::{DispatchError, EnqueueOptions, MessageId};
    use crate::impls::{InMemoryTransport, MessageState};
    use crate::ports::{ErrorReport, FixedClock, ReportError};

    #[derive(Debug, Default, Clone, PartialEq, Deserialize)]
    struct Options {
        currency: String,
        idempotency_key: Option<String>,
    }

    struct ChannelReporter(mpsc::UnboundedSender<ErrorReport>);

    #[async_trait::async_trait]
    impl ErrorReporter for ChannelReporter {
        async fn capture_error(&self, report: ErrorReport) -> Result<(), ReportError> {
            self.0.send(report).map_err(|e| ReportError(e.to_string()))
        }
    }

    fn noop() {}

    struct PanicsOnFirst;

    #[async_trait::async_trait]
    impl Middleware for PanicsOnFirst {
        async fn call(
            &self,
            queue: &str,
            message: &QueueMessage,
            next: Next<'_>,
        ) -> DispatchOutcome {
            assert_ne!(message.task, "first", "refusing first");
            next.run(queue, message).await
        }
    }

    fn send_email(_to: String, _body: String) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn test_build_success() {
        let app = AppBuilder::new()
            .register("sendEmail", send_email)
            .unwrap()
            .expect_tasks(&["sendEmail"])
            .build(Arc::new(InMemoryTransport::new()));
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_task_types() {
        let app = AppBuilder::new()
            .register("sendEmail", send_email)
            .unwrap()
            .expect_tasks(&["sendEmail", "charge"])
            .build(Arc::new(InMemoryTransport::new()));
        assert!(matches!(
            app,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["charge".to_string()]
        ));
    }

    #[test]
    fn test_build_no_expect_tasks() {
        let app = AppBuilder::new()
            .register("noop", noop)
            .unwrap()
            .build(Arc::new(InMemoryTransport::new()));
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_zero_concurrency() {
        let app = AppBuilder::new()
            .config(TardyConfig::default().with_concurrency(0))
            .build(Arc::new(InMemoryTransport::new()));
        assert!(matches!(app, Err(BuildError::ZeroConcurrency)));
    }

    #[test]
    fn test_register_empty_name() {
        let result = AppBuilder::new().register("", noop);
        assert!(matches!(result, Err(RegistryError::EmptyName)));
    }

    #[test]
    fn test_registry_mut_policy_chain() {
        let mut builder = AppBuilder::new();
        builder
            .registry_mut()
            .register("charge", |_amount: i64| {})
            .unwrap()
            .retry_count(5)
            .interval(30);
        let app = builder.build(Arc::new(InMemoryTransport::new())).unwrap();
        assert_eq!(
            app.task("charge").unwrap().retry_policy(),
            Some(RetryPolicy::new(5, 30))
        );
    }

    #[tokio::test]
    async fn send_email_end_to_end() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let outbox = Arc::clone(&delivered);
        let transport = Arc::new(InMemoryTransport::new());
        let t_now: DateTime<Utc> = Utc::now();

        let app = AppBuilder::new()
            .register("sendEmail", move |to: String, body: String| -> Result<(), String> {
                outbox.lock().unwrap().push((to, body));
                Ok(())
            })
            .unwrap()
            .config(TardyConfig::default().with_concurrency(2))
            .clock(FixedClock(t_now))
            .build(transport.clone())
            .unwrap();

        let id = app
            .enqueuer()
            .delay_at(app.task("sendEmail").unwrap(), t_now, ("a@example.com", "hi"))
            .await
            .unwrap();

        let (message, _) = transport.message(id).await.unwrap();
        assert_eq!(message.queue, "delay");
        assert_eq!(message.task, "sendEmail");
        assert_eq!(message.args, vec![json!("a@example.com"), json!("hi")]);
        assert!(!message.retry);

        let workers = app.spawn_workers();
        let counts = transport.wait_idle("delay", Duration::from_secs(2)).await;
        workers.shutdown_and_join().await;

        assert_eq!(counts.succeeded, 1);
        assert_eq!(
            *delivered.lock().unwrap(),
            vec![("a@example.com".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn charge_with_nil_options_end_to_end() {
        let charged = Arc::new(Mutex::new(Vec::new()));
        let ledger = Arc::clone(&charged);
        let transport = Arc::new(InMemoryTransport::new());

        let app = AppBuilder::new()
            .register_with_policy(
                "charge",
                move |amount: i64, opts: Option<Options>| -> Result<(), String> {
                    ledger.lock().unwrap().push((amount, opts));
                    Ok(())
                },
                RetryPolicy::new(3, 0),
            )
            .unwrap()
            .build(transport.clone())
            .unwrap();

        let charge = app.task("charge").unwrap();
        let enqueuer = app.enqueuer();
        let nil_id = enqueuer.delay(charge, vec![json!(100), Value::Null]).await.unwrap();
        enqueuer
            .delay(
                charge,
                (250, Some(HashMap::from([("Currency", "eur")]))),
            )
            .await
            .unwrap();

        let (message, _) = transport.message(nil_id).await.unwrap();
        assert!(message.retry);
        assert_eq!(message.retry_max, Some(3));
        assert_eq!(message.retry_interval, None);

        let workers = app.spawn_workers();
        let counts = transport.wait_idle("delay", Duration::from_secs(2)).await;
        workers.shutdown_and_join().await;
        assert_eq!(counts.succeeded, 2);

        let mut charged = charged.lock().unwrap().clone();
        charged.sort_by_key(|(amount, _)| *amount);
        assert_eq!(
            charged,
            vec![
                (100, None),
                (
                    250,
                    Some(Options {
                        currency: "eur".to_string(),
                        idempotency_key: None,
                    })
                ),
            ]
        );
    }

    #[tokio::test]
    async fn fatal_outcomes_reach_the_reporter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = Arc::new(InMemoryTransport::new());
        let app = AppBuilder::new()
            .register("count", |_n: i64| {})
            .unwrap()
            .reporter(ChannelReporter(tx))
            .build(transport.clone())
            .unwrap();

        let now = Utc::now();
        let bad_args = QueueMessage::new(
            MessageId::generate(),
            "delay",
            "count",
            vec![json!({"not": "a number"})],
            &EnqueueOptions::at(now),
            now,
        );
        let outcome = app.dispatch(&bad_args).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Fatal(DispatchError::ArgumentDecodeFailed { .. })
        ));

        let report = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.code, "argument_decode_failed");
        assert_eq!(report.jid, bad_args.jid);

        // through the transport as well: unknown task goes dead and is reported
        let ghost = transport
            .enqueue("delay", "ghost", vec![], EnqueueOptions::at(now))
            .await
            .unwrap();
        let workers = app.spawn_workers();
        transport.wait_idle("delay", Duration::from_secs(2)).await;
        workers.shutdown_and_join().await;

        assert_eq!(transport.message(ghost).await.unwrap().1, MessageState::Dead);
        let report = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.code, "unknown_task");
    }

    #[tokio::test]
    async fn middleware_panic_without_reporter_settles_the_message() {
        let transport = Arc::new(InMemoryTransport::new());
        let app = AppBuilder::new()
            .register("first", noop)
            .unwrap()
            .register("second", noop)
            .unwrap()
            .config(TardyConfig::default().with_concurrency(1))
            .middleware(PanicsOnFirst)
            .build(transport.clone())
            .unwrap();

        let enqueuer = app.enqueuer();
        let first = enqueuer.delay(app.task("first").unwrap(), ()).await.unwrap();
        let second = enqueuer.delay(app.task("second").unwrap(), ()).await.unwrap();

        let workers = app.spawn_workers();
        let counts = transport.wait_idle("delay", Duration::from_secs(2)).await;
        workers.shutdown_and_join().await;

        assert_eq!(counts.running, 0);
        assert_eq!(transport.message(first).await.unwrap().1, MessageState::Dead);
        assert_eq!(transport.message(second).await.unwrap().1, MessageState::Succeeded);
    }
}
