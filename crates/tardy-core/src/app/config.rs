//! TardyConfig - 起動時の設定
//!
//! `from_options` は文字列の key/value（環境変数や CLI 由来）から組み立てる。
//! 知らない key は無視する。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::impls::inmem_transport::DEFAULT_RETRY_MAX;

/// ConfigError は設定値の解釈エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for '{key}': {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TardyConfig {
    /// Queue every task is enqueued on and leased from.
    pub queue: String,

    /// Number of workers.
    pub concurrency: usize,

    /// Retry ceiling for messages that enable retries without their own.
    /// Applied by `InMemoryTransport::from_config`.
    pub default_retry_max: u32,
}

impl Default for TardyConfig {
    fn default() -> Self {
        Self {
            queue: "delay".to_string(),
            concurrency: 10,
            default_retry_max: DEFAULT_RETRY_MAX,
        }
    }
}

impl TardyConfig {
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Recognised keys: `queue`, `concurrency`, `retry_max`.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(queue) = options.get("queue") {
            if queue.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "queue",
                    value: queue.clone(),
                    reason: "must not be empty".to_string(),
                });
            }
            config.queue = queue.trim().to_string();
        }

        if let Some(raw) = options.get("concurrency") {
            let concurrency: usize = parse("concurrency", raw)?;
            if concurrency == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "concurrency",
                    value: raw.clone(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.concurrency = concurrency;
        }

        if let Some(raw) = options.get("retry_max") {
            config.default_retry_max = parse("retry_max", raw)?;
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = TardyConfig::default();
        assert_eq!(config.queue, "delay");
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.default_retry_max, 25);
    }

    #[test]
    fn from_options_overrides_and_ignores_unknown_keys() {
        let config = TardyConfig::from_options(&options(&[
            ("queue", "mail"),
            ("concurrency", " 4 "),
            ("retry_max", "3"),
            ("server", "localhost:6379"),
        ]))
        .unwrap();
        assert_eq!(config.queue, "mail");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.default_retry_max, 3);
    }

    #[rstest]
    #[case::empty_queue("queue", "  ")]
    #[case::zero_concurrency("concurrency", "0")]
    #[case::non_numeric_concurrency("concurrency", "many")]
    #[case::negative_retry_max("retry_max", "-1")]
    fn from_options_rejects(#[case] key: &str, #[case] value: &str) {
        let err = TardyConfig::from_options(&options(&[(key, value)])).unwrap_err();
        let ConfigError::InvalidValue { key: reported, .. } = err;
        assert_eq!(reported, key);
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: TardyConfig = serde_json::from_str(r#"{"concurrency": 2}"#).unwrap();
        assert_eq!(config, TardyConfig::default().with_concurrency(2));
    }

    #[test]
    fn builder_setters() {
        let config = TardyConfig::default().with_queue("q").with_concurrency(1);
        assert_eq!(config.queue, "q");
        assert_eq!(config.concurrency, 1);
    }
}
