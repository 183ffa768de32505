//! ArgumentCodec - 未型付けの引数（serde_json::Value）を型付きの値に変換
//!
//! # デコード規則
//! - `null` は decoder を通さず `T::default()` を直接作る
//! - mapping → struct はフィールド名を大文字小文字無視でマッチ
//!   （完全一致を優先、知らないキーは無視）
//! - mapping に無いフィールドと `null` のフィールドはゼロ値
//!   （数値 0、空文字列、空の sequence / mapping、`None`、enum は先頭の variant）
//! - 文字列 → enum の unit variant も大文字小文字無視
//! - 整数値の float（`100.0`）は整数型に入る（範囲外はエラー）。整数は float 型に入る
//! - それ以外の型不一致は `DecodeError` として必ず返す（握りつぶさない）
//!
//! # 学習ポイント
//! - serde の `Deserializer` を自前で実装する（`&Value` をラップ）
//! - `deserialize_struct` に渡される `fields` を使った名前解決
//! - `MapAccess` / `SeqAccess` で入れ子の値にも同じ規則を適用

use std::any::type_name;
use std::collections::HashSet;

use serde::de::value::BorrowedStrDeserializer;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use serde_json::{Map, Number, Value};

use crate::domain::errors::DecodeError;

type Error = serde_json::Error;

/// `value` を `T` に変換する。`index` はエラー報告用の引数位置。
///
/// `null` は `T::default()`。ここで decoder を呼ばないのが重要で、
/// コンテナ型の「ゼロ値」を decoder に推測させない。
pub fn decode<T>(index: usize, value: &Value) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    T::deserialize(StructuralDeserializer::new(value)).map_err(|err| DecodeError {
        index,
        expected: type_name::<T>(),
        found: kind_of(value),
        detail: err.to_string(),
    })
}

/// JSON の値の種類名（エラーメッセージ用）
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// `&Value` 上の構造的 Deserializer
pub struct StructuralDeserializer<'de> {
    value: &'de Value,
}

impl<'de> StructuralDeserializer<'de> {
    pub fn new(value: &'de Value) -> Self {
        Self { value }
    }

    fn deserialize_integer<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        if let Value::Number(n) = self.value
            && let Some(f) = integral_float(n)
        {
            // 上限は排他的に比べる（`u64::MAX as f64` は 2^64 に丸まる）
            if (0.0..U64_END).contains(&f) {
                return visitor.visit_u64(f as u64);
            }
            if (I64_START..-I64_START).contains(&f) {
                return visitor.visit_i64(f as i64);
            }
        }
        self.deserialize_any(visitor)
    }
}

/// 2^64
const U64_END: f64 = 18_446_744_073_709_551_616.0;

/// -2^63
const I64_START: f64 = -9_223_372_036_854_775_808.0;

/// 小数部が 0 の float なら Some
fn integral_float(n: &Number) -> Option<f64> {
    if !n.is_f64() {
        return None;
    }
    n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0)
}

fn visit_number<'de, V: Visitor<'de>>(n: &Number, visitor: V) -> Result<V::Value, Error> {
    if let Some(u) = n.as_u64() {
        visitor.visit_u64(u)
    } else if let Some(i) = n.as_i64() {
        visitor.visit_i64(i)
    } else {
        match n.as_f64() {
            Some(f) => visitor.visit_f64(f),
            None => Err(de::Error::custom(format!("unrepresentable number {n}"))),
        }
    }
}

macro_rules! integer_methods {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                self.deserialize_integer(visitor)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for StructuralDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(*b),
            Value::Number(n) => visit_number(n, visitor),
            Value::String(s) => visitor.visit_borrowed_str(s),
            Value::Array(items) => visitor.visit_seq(Elements::new(items)),
            Value::Object(map) => visitor.visit_map(Entries::plain(map)),
        }
    }

    integer_methods! {
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64 deserialize_i128
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64 deserialize_u128
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Null => visitor.visit_unit(),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.value {
            Value::Object(map) => visitor.visit_map(Entries::for_struct(map, fields)),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.value {
            Value::String(s) => {
                let variant = match_name(s, variants).unwrap_or(s.as_str());
                visitor.visit_enum(BorrowedStrDeserializer::<Error>::new(variant))
            }
            // {"Variant": payload} などは serde_json の規則に任せる
            other => other.deserialize_enum(name, variants, visitor),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool f32 f64 char str string bytes byte_buf unit_struct seq tuple
        tuple_struct map identifier
    }
}

/// 完全一致を優先し、なければ大文字小文字無視で探す
fn match_name(key: &str, names: &'static [&'static str]) -> Option<&'static str> {
    names
        .iter()
        .find(|name| **name == key)
        .or_else(|| names.iter().find(|name| name.eq_ignore_ascii_case(key)))
        .copied()
}

/// mapping の 1 エントリの値
#[derive(Clone, Copy)]
enum Slot<'de> {
    Value(&'de Value),
    Zero,
}

struct Entries<'de> {
    iter: std::vec::IntoIter<(&'de str, Slot<'de>)>,
    pending: Option<Slot<'de>>,
}

impl<'de> Entries<'de> {
    fn new(entries: Vec<(&'de str, Slot<'de>)>) -> Self {
        Self {
            iter: entries.into_iter(),
            pending: None,
        }
    }

    fn plain(map: &'de Map<String, Value>) -> Self {
        Self::new(map.iter().map(|(k, v)| (k.as_str(), Slot::Value(v))).collect())
    }

    /// 全フィールドがゼロ値
    fn zeroed(fields: &'static [&'static str]) -> Self {
        Self::new(fields.iter().map(|field| (*field, Slot::Zero)).collect())
    }

    /// キーを struct のフィールド名に寄せ、埋まらなかったフィールドはゼロ値にする
    fn for_struct(map: &'de Map<String, Value>, fields: &'static [&'static str]) -> Self {
        let mut claimed: HashSet<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|key| fields.iter().any(|field| field == key))
            .collect();
        let mut filled: HashSet<&str> = HashSet::with_capacity(fields.len());

        let mut entries = Vec::with_capacity(map.len() + fields.len());
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            if fields.iter().any(|field| *field == key.as_str()) {
                filled.insert(key.as_str());
                entries.push((key.as_str(), Slot::Value(value)));
                continue;
            }
            match fields.iter().find(|field| field.eq_ignore_ascii_case(key)) {
                // 同じフィールドに畳まれる 2 つ目以降のキーは捨てる
                Some(field) => {
                    if claimed.insert(*field) {
                        filled.insert(*field);
                        entries.push((*field, Slot::Value(value)));
                    }
                }
                None => entries.push((key.as_str(), Slot::Value(value))),
            }
        }

        for field in fields {
            if !filled.contains(field) {
                entries.push((*field, Slot::Zero));
            }
        }

        Self::new(entries)
    }
}

impl<'de> MapAccess<'de> for Entries<'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, Error>
    where
        K: DeserializeSeed<'de>,
    {
        match self.iter.next() {
            Some((key, slot)) => {
                self.pending = Some(slot);
                seed.deserialize(BorrowedStrDeserializer::<Error>::new(key))
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, Error>
    where
        V: DeserializeSeed<'de>,
    {
        match self.pending.take() {
            Some(Slot::Value(value)) => seed.deserialize(StructuralDeserializer::new(value)),
            Some(Slot::Zero) => seed.deserialize(ZeroDeserializer),
            None => Err(de::Error::custom("map value requested before its key")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct Elements<'de> {
    iter: std::slice::Iter<'de, Value>,
}

impl<'de> Elements<'de> {
    fn new(items: &'de [Value]) -> Self {
        Self { iter: items.iter() }
    }
}

impl<'de> SeqAccess<'de> for Elements<'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Error>
    where
        T: DeserializeSeed<'de>,
    {
        match self.iter.next() {
            Some(value) => seed.deserialize(StructuralDeserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

/// 要求された型のゼロ値を作る Deserializer（mapping に無いフィールド用）
#[derive(Clone, Copy)]
struct ZeroDeserializer;

macro_rules! zero_methods {
    ($($method:ident => $visit:ident($zero:expr);)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                visitor.$visit($zero)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for ZeroDeserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    zero_methods! {
        deserialize_bool => visit_bool(false);
        deserialize_i8 => visit_i8(0);
        deserialize_i16 => visit_i16(0);
        deserialize_i32 => visit_i32(0);
        deserialize_i64 => visit_i64(0);
        deserialize_i128 => visit_i128(0);
        deserialize_u8 => visit_u8(0);
        deserialize_u16 => visit_u16(0);
        deserialize_u32 => visit_u32(0);
        deserialize_u64 => visit_u64(0);
        deserialize_u128 => visit_u128(0);
        deserialize_f32 => visit_f32(0.0);
        deserialize_f64 => visit_f64(0.0);
        deserialize_char => visit_char('\0');
        deserialize_str => visit_str("");
        deserialize_string => visit_str("");
        deserialize_bytes => visit_bytes(&[]);
        deserialize_byte_buf => visit_bytes(&[]);
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_none()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_seq(Zeros { remaining: 0 })
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_seq(Zeros { remaining: len })
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_map(Entries::new(Vec::new()))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_map(Entries::zeroed(fields))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match variants.first().copied() {
            Some(first) => visitor.visit_enum(BorrowedStrDeserializer::<Error>::new(first)),
            None => Err(de::Error::custom(format!("enum {name} has no variants"))),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        unit identifier
    }
}

/// 固定長の tuple をゼロ値で埋める
struct Zeros {
    remaining: usize,
}

impl<'de> SeqAccess<'de> for Zeros {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Error>
    where
        T: DeserializeSeed<'de>,
    {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(ZeroDeserializer).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}
