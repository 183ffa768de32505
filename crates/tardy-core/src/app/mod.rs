//! App - アプリケーション層
//!
//! ports を組み合わせて enqueue 側と worker 側を実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: 構築とワイヤリング
//! - **Enqueuer**: `delay` / `delay_in` / `delay_at`
//! - **Dispatcher**: message → registry → invoker
//! - **MiddlewareChain**: logging / error reporting / 利用者の middleware
//! - **WorkerGroup**: lease → dispatch → ack / retry / kill
//! - **TardyConfig**: queue 名と並列数

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod enqueuer;
pub mod logging;
pub mod middleware;
pub mod reporting;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::config::{ConfigError, TardyConfig};
pub use self::dispatch::Dispatcher;
pub use self::enqueuer::{EnqueueError, Enqueuer, IntoTaskArgs};
pub use self::logging::LoggingMiddleware;
pub use self::middleware::{Middleware, MiddlewareChain, Next};
pub use self::reporting::ErrorReportingMiddleware;
pub use self::worker_loop::WorkerGroup;
