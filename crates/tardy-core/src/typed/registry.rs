//! FunctionRegistry - task 名から TaskDescriptor を引く表
//!
//! # ライフサイクル
//! - 起動時に `&mut` で組み立てる（register / retry 設定）
//! - worker 起動後は `Arc<FunctionRegistry>` として共有し、読み取り専用
//!
//! 書き込みが起動時に限られることを所有権で保証するので、ロックは不要。
//!
//! # 学習ポイント
//! - Generic method (`register::<F, Args>`) での登録と type erasure
//! - `HashMap::entry` で「置き換え」と `&mut` 返却を同時に行う

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::task::{DynTask, Signature, TaskFn, TypedTask};
use crate::domain::errors::{DecodeError, HandlerError};
use crate::domain::retry::RetryPolicy;

/// RegistryError は registration 時のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("task name must not be empty")]
    EmptyName,

    #[error("task '{name}' is not a dispatchable callable: {reason}")]
    InvalidCallable { name: String, reason: String },
}

/// The registry's record of one task.
///
/// Built by `FunctionRegistry::register`; only the retry policy can change
/// afterwards, and only while the registry is still mutably borrowed.
pub struct TaskDescriptor {
    name: String,
    task: Box<dyn DynTask>,
    signature: Signature,
    retry: Option<RetryPolicy>,
}

impl TaskDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// `None` means "use the transport default".
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry
    }

    /// Sets the retry ceiling. Retries are enabled iff `count > 0`.
    pub fn retry_count(&mut self, count: u32) -> &mut Self {
        self.retry.get_or_insert_with(RetryPolicy::default).retry_count = count;
        self
    }

    /// Sets the fixed delay between retries, in seconds.
    pub fn interval(&mut self, secs: u64) -> &mut Self {
        self.retry.get_or_insert_with(RetryPolicy::default).interval_secs = secs;
        self
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) -> &mut Self {
        self.retry = Some(policy);
        self
    }

    pub(crate) fn call_untyped(
        &self,
        args: &[Value],
    ) -> Result<Result<(), HandlerError>, DecodeError> {
        self.task.call_untyped(args)
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Task name -> descriptor.
///
/// # 使用例
/// ```ignore
/// let mut registry = FunctionRegistry::new();
/// registry
///     .register("sendEmail", |to: String, body: String| -> Result<(), MailError> {
///         mailer::send(&to, &body)
///     })?
///     .retry_count(5)
///     .interval(30);
/// let registry = Arc::new(registry);
/// ```
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    tasks: HashMap<String, TaskDescriptor>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Registers `task` under `name`, replacing any previous registration.
    pub fn register<F, Args>(
        &mut self,
        name: impl Into<String>,
        task: F,
    ) -> Result<&mut TaskDescriptor, RegistryError>
    where
        F: TaskFn<Args>,
        Args: 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let signature = task.signature();
        signature
            .validate()
            .map_err(|reason| RegistryError::InvalidCallable {
                name: name.clone(),
                reason,
            })?;

        let descriptor = TaskDescriptor {
            name: name.clone(),
            task: Box::new(TypedTask::<F, Args>::new(task)),
            signature,
            retry: None,
        };

        let slot = match self.tasks.entry(name) {
            Entry::Occupied(mut entry) => {
                debug!(task = %entry.key(), "replacing existing task registration");
                entry.insert(descriptor);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(descriptor),
        };
        Ok(slot)
    }

    pub fn register_with_policy<F, Args>(
        &mut self,
        name: impl Into<String>,
        task: F,
        policy: RetryPolicy,
    ) -> Result<&mut TaskDescriptor, RegistryError>
    where
        F: TaskFn<Args>,
        Args: 'static,
    {
        let descriptor = self.register(name, task)?;
        descriptor.set_retry_policy(policy);
        Ok(descriptor)
    }

    pub fn lookup(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(name)
    }

    /// Mutable access during startup, e.g. to adjust a policy after the fact.
    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut TaskDescriptor> {
        self.tasks.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::param::Variadic;
    use serde_json::json;

    fn send_email(_to: String, _body: String) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = FunctionRegistry::new();
        registry.register("sendEmail", send_email).unwrap();

        let descriptor = registry.lookup("sendEmail").unwrap();
        assert_eq!(descriptor.name(), "sendEmail");
        assert_eq!(descriptor.signature().param_count(), 2);
        assert!(descriptor.signature().returns_error());
        assert_eq!(descriptor.retry_policy(), None);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = FunctionRegistry::new();
        assert!(registry.lookup("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = FunctionRegistry::new();
        registry.register("job", |_n: i64| {}).unwrap();
        registry
            .register("job", |_a: String, _b: String| -> Result<(), String> {
                Err("new".to_string())
            })
            .unwrap();

        assert_eq!(registry.len(), 1);
        let descriptor = registry.lookup("job").unwrap();
        assert_eq!(descriptor.signature().param_count(), 2);
        let result = descriptor
            .call_untyped(&[json!("a"), json!("b")])
            .unwrap();
        assert_eq!(result.unwrap_err().message(), "new");
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = FunctionRegistry::new();
        let err = registry.register("", || {}).unwrap_err();
        assert_eq!(err, RegistryError::EmptyName);
    }

    #[test]
    fn test_misplaced_variadic_rejected() {
        let mut registry = FunctionRegistry::new();
        let err = registry
            .register("bad", |_tags: Variadic<String>, _id: u64| {})
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCallable { name, .. } if name == "bad"));
        assert!(!registry.contains("bad"));
    }

    #[test]
    fn test_builder_style_policy() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("charge", |_amount: i64| {})
            .unwrap()
            .retry_count(5)
            .interval(30);

        let policy = registry.lookup("charge").unwrap().retry_policy().unwrap();
        assert_eq!(policy, RetryPolicy::new(5, 30));
    }

    #[test]
    fn test_register_with_policy() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_with_policy("charge", |_amount: i64| {}, RetryPolicy::new(3, 0))
            .unwrap();
        let policy = registry.lookup("charge").unwrap().retry_policy().unwrap();
        assert!(policy.retries_enabled());
        assert_eq!(policy.retry_interval(), None);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register("b", || {}).unwrap();
        registry.register("a", || {}).unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_lookup_mut_adjusts_policy() {
        let mut registry = FunctionRegistry::new();
        registry.register("a", || {}).unwrap();
        registry.lookup_mut("a").unwrap().retry_count(2);
        assert_eq!(
            registry.lookup("a").unwrap().retry_policy(),
            Some(RetryPolicy::new(2, 0))
        );
    }
}
