//! TaskParam - handler の引数 1 つ分の形と、その作り方
//!
//! # 形（shape）
//! - 通常の引数: `DeserializeOwned + Default` な型すべて
//!   （scalar / Vec などの sequence / struct・HashMap などの keyed mapping）
//! - 可変長引数: 最後の引数に `Variadic<T>` を置く
//!
//! # 学習ポイント
//! - blanket impl と、ローカル型（`Variadic<T>`）への個別 impl の共存
//!   （`Variadic<T>` は `Default` を実装しないので重ならない）

use std::any::type_name;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::codec;
use crate::domain::errors::DecodeError;

/// Declared shape of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    /// Rust type name; for a variadic slot, the element type.
    pub type_name: &'static str,
    pub variadic: bool,
}

/// A type that can sit in a task handler's parameter list.
pub trait TaskParam: Sized + Send + 'static {
    fn info() -> ParamInfo;

    /// Builds the parameter at position `index` from the whole argument list.
    /// A variadic slot consumes `args[index..]`.
    fn take(index: usize, args: &[Value]) -> Result<Self, DecodeError>;
}

impl<T> TaskParam for T
where
    T: DeserializeOwned + Default + Send + 'static,
{
    fn info() -> ParamInfo {
        ParamInfo {
            type_name: type_name::<T>(),
            variadic: false,
        }
    }

    fn take(index: usize, args: &[Value]) -> Result<Self, DecodeError> {
        match args.get(index) {
            Some(value) => codec::decode(index, value),
            // arity check 済みなら来ない
            None => Err(DecodeError {
                index,
                expected: type_name::<T>(),
                found: "nothing",
                detail: "argument missing".to_string(),
            }),
        }
    }
}

/// Trailing variadic parameter: collects every remaining argument.
///
/// A `null` element becomes `T::default()` (the element type's zero value).
///
/// ```ignore
/// registry.register("tag", |id: u64, tags: Variadic<String>| {
///     for tag in tags.iter() { /* ... */ }
/// })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> IntoIterator for Variadic<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T> TaskParam for Variadic<T>
where
    T: DeserializeOwned + Default + Send + 'static,
{
    fn info() -> ParamInfo {
        ParamInfo {
            type_name: type_name::<T>(),
            variadic: true,
        }
    }

    fn take(index: usize, args: &[Value]) -> Result<Self, DecodeError> {
        let rest = args.get(index..).unwrap_or_default();
        rest.iter()
            .enumerate()
            .map(|(offset, value)| codec::decode::<T>(index + offset, value))
            .collect::<Result<Vec<_>, _>>()
            .map(Variadic)
    }
}
