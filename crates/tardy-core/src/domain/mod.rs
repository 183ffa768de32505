//! Domain model (IDs, messages, outcomes, errors, retry settings).
//!
//! transport や worker の実装に依存しない「形」だけを定義します。

pub mod errors;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod retry;

pub use errors::{Arity, DecodeError, DispatchError, HandlerError};
pub use ids::{IdParseError, MessageId};
pub use message::{EnqueueOptions, QueueMessage};
pub use outcome::{DispatchOutcome, OutcomeKind};
pub use retry::{Backoff, RetryPolicy};
