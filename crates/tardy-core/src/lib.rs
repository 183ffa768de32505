//! tardy-core
//!
//! 普通の関数を名前で登録し、あとで（または指定時刻に）queue 経由で実行する
//! typed delayed-task dispatch の中核。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, outcome, retry, errors）
//! - **typed**: 関数の登録と呼び出し（TaskFn, codec, FunctionRegistry, invoker）
//! - **ports**: 抽象化レイヤー（QueueTransport, ErrorReporter, Clock）
//! - **app**: アプリケーションロジック（builder, enqueuer, middleware, worker_loop, config）
//! - **impls**: 実装（InMemoryTransport, TracingReporter）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{App, AppBuilder, Enqueuer, TardyConfig, WorkerGroup};
pub use domain::{DispatchError, DispatchOutcome, HandlerError, MessageId, QueueMessage, RetryPolicy};
pub use typed::{FunctionRegistry, TaskDescriptor, Variadic};
