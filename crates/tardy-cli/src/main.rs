use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tardy_core::app::{Middleware, Next};
use tardy_core::domain::{DispatchOutcome, QueueMessage};
use tardy_core::impls::{InMemoryTransport, TracingReporter};
use tardy_core::{AppBuilder, RetryPolicy, TardyConfig, Variadic};

#[derive(Debug, Default, Deserialize)]
struct ChargeOptions {
    currency: String,
    capture: bool,
}

/// 結果の種類ごとに数える middleware
#[derive(Clone, Default)]
struct OutcomeCounter {
    success: Arc<AtomicU32>,
    failure: Arc<AtomicU32>,
}

#[async_trait]
impl Middleware for OutcomeCounter {
    async fn call(&self, queue: &str, message: &QueueMessage, next: Next<'_>) -> DispatchOutcome {
        let outcome = next.run(queue, message).await;
        let counter = if outcome.is_success() { &self.success } else { &self.failure };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}

fn send_email(to: String, body: String) -> Result<(), String> {
    if !to.contains('@') {
        return Err(format!("invalid address: {to}"));
    }
    info!(%to, %body, "email sent");
    Ok(())
}

/// `TARDY_QUEUE` / `TARDY_CONCURRENCY` / `TARDY_RETRY_MAX` を options に読む
fn options_from_env() -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix("TARDY_")
                .map(|name| (name.to_ascii_lowercase(), value))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = TardyConfig::from_options(&options_from_env())?;
    let queue = config.queue.clone();

    // (A) transport と task を用意
    let transport = Arc::new(InMemoryTransport::from_config(&config));
    let counter = OutcomeCounter::default();
    let flaky_left = Arc::new(AtomicU32::new(2));

    let mut builder = AppBuilder::new()
        .config(config)
        .reporter(TracingReporter)
        .middleware(counter.clone())
        .register("sendEmail", send_email)?
        .register_with_policy(
            "charge",
            |amount: i64, opts: Option<ChargeOptions>| {
                match opts {
                    Some(opts) => info!(
                        amount,
                        currency = %opts.currency,
                        capture = opts.capture,
                        "charged"
                    ),
                    None => info!(amount, "charged with default options"),
                }
            },
            RetryPolicy::new(3, 0),
        )?
        .register("tag", |id: u64, tags: Variadic<String>| {
            info!(id, tags = ?tags.into_inner(), "tagged");
        })?;
    builder
        .registry_mut()
        .register("flaky", move || -> Result<(), String> {
            let left = flaky_left.load(Ordering::Relaxed);
            if left > 0 {
                flaky_left.fetch_sub(1, Ordering::Relaxed);
                return Err(format!("intentional failure (left={left})"));
            }
            Ok(())
        })?
        .retry_count(5)
        .interval(1);

    let app = builder
        .expect_tasks(&["sendEmail", "charge", "tag", "flaky"])
        .build(transport.clone())?;

    // (B) タスク投入
    let enqueuer = app.enqueuer();
    let task = |name: &str| app.task(name).ok_or_else(|| format!("task {name} not registered"));

    enqueuer.delay(task("sendEmail")?, ("a@example.com", "hi")).await?;
    enqueuer.delay(task("charge")?, vec![json!(100), Value::Null]).await?;
    enqueuer
        .delay_in(
            task("charge")?,
            Duration::from_millis(500),
            (250, json!({"Currency": "eur", "CAPTURE": true})),
        )
        .await?;
    enqueuer.delay(task("tag")?, (7, "red", "green")).await?;
    enqueuer.delay(task("flaky")?, ()).await?;
    enqueuer.delay(task("charge")?, (1,)).await?; // arity mismatch → dead
    enqueuer.delay(task("sendEmail")?, ("nobody", "hi")).await?; // retries off → dead

    // (C) worker を起動して、全部終わるまで待つ
    let workers = app.spawn_workers();
    let counts = transport.wait_idle(&queue, Duration::from_secs(10)).await;
    workers.shutdown_and_join().await;

    info!(
        succeeded = counts.succeeded,
        dead = counts.dead,
        pending = counts.pending(),
        dispatch_success = counter.success.load(Ordering::Relaxed),
        dispatch_failure = counter.failure.load(Ordering::Relaxed),
        "finished"
    );
    Ok(())
}
