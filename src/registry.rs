//! Handler registration and lookup.
//!
//! The registry maps a task type name to its handler and per-type
//! [`WorkerConfig`]. It is populated before `start()` and read-only
//! afterwards, so no locking is needed on the poll/execute path.

use crate::config::WorkerConfig;
use crate::error::{HandlerError, WorkerError, WorkerResult};
use crate::models::{Task, TaskResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a handler hands back on success.
///
/// The variant — not the value's shape — decides how the output is reported:
/// `Value` is folded under the conventional `"result"` key, `Data` becomes the
/// output map verbatim, and `Full` gives the handler complete control over the
/// result (the runtime only fills in missing identity fields).
#[derive(Debug)]
pub enum HandlerOutput {
    Value(Value),
    Data(Map<String, Value>),
    Full(TaskResult),
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Value(value)
    }
}

impl From<Map<String, Value>> for HandlerOutput {
    fn from(data: Map<String, Value>) -> Self {
        HandlerOutput::Data(data)
    }
}

impl From<TaskResult> for HandlerOutput {
    fn from(result: TaskResult) -> Self {
        HandlerOutput::Full(result)
    }
}

/// An application task handler.
///
/// Receives the task as one aggregate parameter. Handlers that want their
/// input mapped onto named parameters use the [`typed`] adapter instead of
/// implementing this directly.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: Task) -> Result<HandlerOutput, HandlerError>;
}

/// Adapter for plain async functions over the whole [`Task`].
pub fn from_fn<F, Fut, O>(f: F) -> impl TaskHandler + 'static
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    O: Into<HandlerOutput> + 'static,
{
    FnHandler(f)
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut, O> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
    O: Into<HandlerOutput>,
{
    async fn execute(&self, task: Task) -> Result<HandlerOutput, HandlerError> {
        (self.0)(task).await.map(Into::into)
    }
}

/// Adapter mapping task input onto a handler's declared parameters by name.
///
/// The input map is deserialized into `In`; the return value is serialized
/// and reported under the `"result"` output key. An input that cannot be
/// mapped yields a FAILED result rather than a crash.
pub fn typed<In, Out, F, Fut>(f: F) -> impl TaskHandler + 'static
where
    In: serde::de::DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, HandlerError>> + Send + 'static,
{
    TypedHandler {
        f,
        _marker: PhantomData,
    }
}

struct TypedHandler<F, In, Out> {
    f: F,
    _marker: PhantomData<fn(In) -> Out>,
}

#[async_trait]
impl<In, Out, F, Fut> TaskHandler for TypedHandler<F, In, Out>
where
    In: serde::de::DeserializeOwned + Send,
    Out: Serialize + Send,
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out, HandlerError>> + Send,
{
    async fn execute(&self, task: Task) -> Result<HandlerOutput, HandlerError> {
        let input: In = serde_json::from_value(Value::Object(task.input_data))
            .map_err(|e| HandlerError::failed(format!("failed to map task input: {}", e)))?;
        let output = (self.f)(input).await?;
        let value = serde_json::to_value(output)
            .map_err(|e| HandlerError::failed(format!("failed to serialize output: {}", e)))?;
        Ok(HandlerOutput::Value(value))
    }
}

/// A handler together with its execution policy.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn TaskHandler>,
    pub config: WorkerConfig,
}

/// One entry of a discovery pass, see [`HandlerRegistry::register_all`].
pub struct HandlerRegistration {
    pub task_type: String,
    pub handler: Arc<dyn TaskHandler>,
    pub config: WorkerConfig,
}

/// Task type → handler + config table. No network calls happen here.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type.
    ///
    /// The config is validated and per-type environment overrides are applied
    /// before it is stored. Re-registering a type with an identical config
    /// replaces the handler (discovery passes are idempotent); a conflicting
    /// config is a configuration error.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
    ) -> WorkerResult<()> {
        let task_type = task_type.into();
        config.validate(&task_type)?;
        let config = config.with_env_overrides(&task_type)?;

        if let Some(existing) = self.entries.get(&task_type)
            && existing.config != config
        {
            return Err(WorkerError::configuration(
                task_type,
                "Handler already registered with conflicting settings",
            ));
        }

        self.entries
            .insert(task_type, RegisteredHandler { handler, config });
        Ok(())
    }

    /// Install a batch of registrations collected by a discovery pass.
    /// Fails on the first conflicting entry.
    pub fn register_all(
        &mut self,
        registrations: impl IntoIterator<Item = HandlerRegistration>,
    ) -> WorkerResult<()> {
        for r in registrations {
            self.register(r.task_type, r.handler, r.config)?;
        }
        Ok(())
    }

    pub fn lookup(&self, task_type: &str) -> Option<&RegisteredHandler> {
        self.entries.get(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredHandler)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn noop_handler() -> Arc<dyn TaskHandler> {
        Arc::new(from_fn(|_task| async { Ok(json!(null)) }))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("noop", noop_handler(), WorkerConfig::default())
            .unwrap();
        assert!(registry.lookup("noop").is_some());
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("noop", noop_handler(), WorkerConfig::default())
            .unwrap();

        // Same settings: idempotent replace.
        registry
            .register("noop", noop_handler(), WorkerConfig::default())
            .unwrap();

        // Conflicting settings: rejected.
        let conflicting = WorkerConfig {
            concurrency: 4,
            ..Default::default()
        };
        let err = registry
            .register("noop", noop_handler(), conflicting)
            .unwrap_err();
        assert!(matches!(err, WorkerError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_config_rejected_at_registration() {
        let mut registry = HandlerRegistry::new();
        let bad = WorkerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(registry.register("noop", noop_handler(), bad).is_err());
    }

    #[tokio::test]
    async fn test_typed_handler_maps_input_by_name() {
        #[derive(Deserialize)]
        struct Input {
            x: i64,
        }

        let handler = typed(|input: Input| async move { Ok(input.x * 2) });
        let task = Task {
            input_data: json!({"x": 21}).as_object().unwrap().clone(),
            ..Default::default()
        };

        match handler.execute(task).await.unwrap() {
            HandlerOutput::Value(v) => assert_eq!(v, json!(42)),
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typed_handler_unmappable_input_fails() {
        #[derive(Deserialize)]
        struct Input {
            #[allow(dead_code)]
            x: i64,
        }

        let handler = typed(|input: Input| async move { Ok(input.x) });
        let task = Task {
            input_data: json!({"y": "nope"}).as_object().unwrap().clone(),
            ..Default::default()
        };

        let err = handler.execute(task).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }
}
