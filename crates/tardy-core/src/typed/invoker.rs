//! Invoker - 1 件の呼び出しを DispatchOutcome に分類する
//!
//! # 手順
//! 1. 引数の個数チェック（handler は呼ばない）
//! 2. 引数を 1 つずつ decode
//! 3. `catch_unwind` の中で handler を呼ぶ
//! 4. 戻り値を Success / RecoverableFailure に分類
//!
//! # 学習ポイント
//! - `std::panic::catch_unwind` + `AssertUnwindSafe`
//! - panic hook を chain して、panic した地点の backtrace を thread_local に残す
//!   （invoke 中のスレッドだけ。それ以外の panic では何もしない）

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use serde_json::Value;

use super::registry::TaskDescriptor;
use crate::domain::errors::DispatchError;
use crate::domain::outcome::DispatchOutcome;

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
    static TRACE_ARMED: Cell<bool> = const { Cell::new(false) };
}

static TRACE_HOOK: Once = Once::new();

/// Installs (once per process) a panic hook that records the backtrace of a
/// thread panicking inside `invoke`, then defers to the previously installed hook.
fn install_trace_hook() {
    TRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if TRACE_ARMED.try_with(Cell::get).unwrap_or(false) {
                let trace = Backtrace::force_capture().to_string();
                let _ = PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

/// Arms trace capture on this thread until dropped.
struct ArmedTrace;

impl ArmedTrace {
    fn arm() -> Self {
        TRACE_ARMED.with(|armed| armed.set(true));
        ArmedTrace
    }
}

impl Drop for ArmedTrace {
    fn drop(&mut self) {
        let _ = TRACE_ARMED.try_with(|armed| armed.set(false));
    }
}

fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.try_with(|slot| slot.borrow_mut().take()).ok().flatten()
}

/// Calls `descriptor`'s handler with `args` and classifies the result.
///
/// Never panics and never returns an error: every failure mode is folded into
/// the returned outcome.
pub fn invoke(descriptor: &TaskDescriptor, args: &[Value]) -> DispatchOutcome {
    let task = descriptor.name();
    let want = descriptor.signature().arity();
    if !want.accepts(args.len()) {
        return DispatchError::ArityMismatch {
            task: task.to_string(),
            got: args.len(),
            want,
        }
        .into();
    }

    install_trace_hook();
    take_panic_trace();

    let result = {
        let _armed = ArmedTrace::arm();
        panic::catch_unwind(AssertUnwindSafe(|| descriptor.call_untyped(args)))
    };
    match result {
        Ok(Ok(Ok(()))) => DispatchOutcome::Success,
        Ok(Ok(Err(err))) => DispatchOutcome::RecoverableFailure(err),
        Ok(Err(source)) => DispatchError::ArgumentDecodeFailed {
            task: task.to_string(),
            source,
        }
        .into(),
        Err(payload) => {
            let stack_trace =
                take_panic_trace().unwrap_or_else(|| Backtrace::force_capture().to_string());
            DispatchError::HandlerPanicked {
                task: task.to_string(),
                detail: panic_message(payload.as_ref()),
                stack_trace,
            }
            .into()
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
