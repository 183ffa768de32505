//! Typed - 普通の関数を task として登録・呼び出す層
//!
//! 登録側は静的な型（`Fn(A1, .., An) -> R`）、実行側は untyped な
//! `&[serde_json::Value]`。その間を型消去と codec でつなぎます。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskFn<Args>`, `TaskParam`, `TaskReturn` - 型安全
//! - **内部（Dyn）**: `DynTask` - object-safe, type erasure
//!
//! # 構成
//! - **codec**: `Value` → 引数型の decode
//! - **param**: 引数 1 つ分（`Variadic<T>` を含む）
//! - **task**: `TaskFn` と `Signature`
//! - **registry**: `FunctionRegistry`, `TaskDescriptor`
//! - **invoker**: 1 件の呼び出しを `DispatchOutcome` に分類

pub mod codec;
pub mod invoker;
pub mod param;
pub mod registry;
pub mod task;

// 主要な trait/型 を再エクスポート
pub use self::invoker::invoke;
pub use self::param::{ParamInfo, TaskParam, Variadic};
pub use self::registry::{FunctionRegistry, RegistryError, TaskDescriptor};
pub use self::task::{Signature, TaskFn, TaskReturn};
