//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTransport**: プロセス内のキュー（retry / dead / 予約実行つき）
//! - **TracingReporter**: Fatal を `tracing` の error event として出す
//!
//! 本番用の transport（Redis など）は別クレートに配置する想定です。

pub mod inmem_transport;
pub mod tracing_reporter;

// 主要な型を再エクスポート
pub use self::inmem_transport::{
    DEFAULT_RETENTION, DEFAULT_RETRY_MAX, InMemoryTransport, MessageState, QueueCounts,
};
pub use self::tracing_reporter::TracingReporter;
