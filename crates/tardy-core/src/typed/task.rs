//! TaskFn - 普通の関数・クロージャを task handler として扱う
//!
//! # 学習ポイント
//! - マクロで `Fn(A1, .., An) -> R` に trait を実装する（axum の handler と同じ手法）
//! - `TaskFn<Args>` の `Args` は impl を区別するためだけのマーカー
//! - Type erasure: `TypedTask<F, Args>` → `DynTask`（registry に格納できる形）

use std::fmt::Display;
use std::marker::PhantomData;

use serde_json::Value;

use super::param::{ParamInfo, TaskParam};
use crate::domain::errors::{Arity, DecodeError, HandlerError};

/// Return type of a task handler.
///
/// - `()`: no return values, always success.
/// - `Result<T, E>`: error-like last return; `Err` becomes a recoverable failure
///   carrying `E`'s `Display` text.
pub trait TaskReturn: Send + 'static {
    /// 最後の戻り値が error 相当か
    const FALLIBLE: bool;

    fn into_result(self) -> Result<(), HandlerError>;
}

impl TaskReturn for () {
    const FALLIBLE: bool = false;

    fn into_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<T, E> TaskReturn for Result<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    const FALLIBLE: bool = true;

    fn into_result(self) -> Result<(), HandlerError> {
        self.map(|_| ()).map_err(|err| HandlerError::new(err.to_string()))
    }
}

/// Parameter list and return shape of a registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ParamInfo>,
    returns_error: bool,
}

impl Signature {
    pub fn new(params: Vec<ParamInfo>, returns_error: bool) -> Self {
        Self {
            params,
            returns_error,
        }
    }

    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    pub fn returns_error(&self) -> bool {
        self.returns_error
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|param| param.variadic)
    }

    /// Declared parameter count; the variadic slot counts as one.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn arity(&self) -> Arity {
        if self.is_variadic() {
            Arity::AtLeast(self.params.len() - 1)
        } else {
            Arity::Exactly(self.params.len())
        }
    }

    /// 可変長引数は最後にしか置けない
    pub(crate) fn validate(&self) -> Result<(), String> {
        let fixed = self.params.len().saturating_sub(1);
        match self.params[..fixed].iter().position(|param| param.variadic) {
            Some(index) => Err(format!(
                "variadic parameter {index} ({}) must be the last parameter",
                self.params[index].type_name
            )),
            None => Ok(()),
        }
    }
}

/// A callable that can be registered as a task.
///
/// Implemented for every `Fn(A1, .., An) -> R` (n <= 8) whose parameters are
/// `TaskParam` and whose return type is `TaskReturn`.
pub trait TaskFn<Args>: Send + Sync + 'static {
    fn signature(&self) -> Signature;

    /// Decodes `args` and calls the function. The outer `Err` is a decode
    /// failure (the function was not called).
    fn call_untyped(&self, args: &[Value]) -> Result<Result<(), HandlerError>, DecodeError>;
}

macro_rules! impl_task_fn {
    ($($param:ident),*) => {
        impl<F, R, $($param,)*> TaskFn<($($param,)*)> for F
        where
            F: Fn($($param),*) -> R + Send + Sync + 'static,
            R: TaskReturn,
            $($param: TaskParam,)*
        {
            fn signature(&self) -> Signature {
                Signature::new(vec![$($param::info()),*], R::FALLIBLE)
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn call_untyped(
                &self,
                args: &[Value],
            ) -> Result<Result<(), HandlerError>, DecodeError> {
                let mut index = 0;
                $(
                    let $param = $param::take(index, args)?;
                    index += 1;
                )*
                Ok((self)($($param),*).into_result())
            }
        }
    };
}

impl_task_fn!();
impl_task_fn!(A1);
impl_task_fn!(A1, A2);
impl_task_fn!(A1, A2, A3);
impl_task_fn!(A1, A2, A3, A4);
impl_task_fn!(A1, A2, A3, A4, A5);
impl_task_fn!(A1, A2, A3, A4, A5, A6);
impl_task_fn!(A1, A2, A3, A4, A5, A6, A7);
impl_task_fn!(A1, A2, A3, A4, A5, A6, A7, A8);

/// DynTask は object-safe な TaskFn
///
/// `HashMap<String, TaskDescriptor>` に入れるために `Args` を消す。
pub(crate) trait DynTask: Send + Sync {
    fn call_untyped(&self, args: &[Value]) -> Result<Result<(), HandlerError>, DecodeError>;
}

pub(crate) struct TypedTask<F, Args> {
    task: F,
    _marker: PhantomData<fn() -> Args>,
}

impl<F, Args> TypedTask<F, Args> {
    pub(crate) fn new(task: F) -> Self {
        Self {
            task,
            _marker: PhantomData,
        }
    }
}

impl<F, Args> DynTask for TypedTask<F, Args>
where
    F: TaskFn<Args>,
    Args: 'static,
{
    fn call_untyped(&self, args: &[Value]) -> Result<Result<(), HandlerError>, DecodeError> {
        self.task.call_untyped(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::param::Variadic;
    use serde_json::json;

    fn signature_of<Args, F: TaskFn<Args>>(task: F) -> Signature {
        task.signature()
    }

    #[test]
    fn unit_return_is_not_fallible() {
        let sig = signature_of(|_to: String, _body: String| {});
        assert_eq!(sig.param_count(), 2);
        assert!(!sig.returns_error());
        assert_eq!(sig.arity(), Arity::Exactly(2));
    }

    #[test]
    fn result_return_is_fallible() {
        let sig = signature_of(|_amount: i64| -> Result<(), String> { Ok(()) });
        assert!(sig.returns_error());
        assert_eq!(sig.params()[0].type_name, "i64");
    }

    #[test]
    fn zero_param_task() {
        let sig = signature_of(|| {});
        assert_eq!(sig.arity(), Arity::Exactly(0));
    }

    #[test]
    fn trailing_variadic_lowers_minimum_arity() {
        let sig = signature_of(|_id: u64, _tags: Variadic<String>| {});
        assert!(sig.is_variadic());
        assert_eq!(sig.arity(), Arity::AtLeast(1));
        assert!(sig.validate().is_ok());
    }

    #[test]
    fn non_trailing_variadic_is_rejected() {
        let sig = signature_of(|_tags: Variadic<String>, _id: u64| {});
        assert!(!sig.is_variadic());
        let reason = sig.validate().unwrap_err();
        assert!(reason.contains("must be the last parameter"));
    }

    #[test]
    fn call_untyped_decodes_in_order() {
        let task = |a: i64, b: String| -> Result<(), String> {
            if a == 1 && b == "x" { Ok(()) } else { Err(format!("{a} {b}")) }
        };
        let result = task.call_untyped(&[json!(1), json!("x")]).unwrap();
        assert!(result.is_ok());

        let result = task.call_untyped(&[json!(2), json!("y")]).unwrap();
        assert_eq!(result.unwrap_err().message(), "2 y");
    }

    #[test]
    fn call_untyped_surfaces_decode_error() {
        let task = |_a: i64, _b: i64| {};
        let err = task.call_untyped(&[json!(1), json!({"k": 1})]).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.found, "mapping");
    }

    #[test]
    fn typed_task_erases_args() {
        let erased: Box<dyn DynTask> = Box::new(TypedTask::<_, (u32,)>::new(
            |n: u32| -> Result<u32, String> { Ok(n * 2) },
        ));
        assert!(erased.call_untyped(&[json!(21)]).unwrap().is_ok());
    }
}
