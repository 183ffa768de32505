//! Ports - 抽象化レイヤー
//!
//! 外部システム（キュー、エラー監視サービス、時計）へのインターフェース。
//! 実装は `impls` に置き、`app` は trait だけに依存します。

pub mod clock;
pub mod reporter;
pub mod transport;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::reporter::{ErrorReport, ErrorReporter, NoopReporter, ReportError};
pub use self::transport::{MessageLease, QueueTransport, TransportError};
