//! Worker-side runtime for a distributed task queue.
//!
//! The runtime polls a remote orchestration server for ready task instances,
//! dispatches them to application-registered handlers under per-type
//! concurrency limits, keeps long-running leases alive, and reports outcomes
//! back with bounded retry.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use task_worker::{HandlerRegistry, HttpTransport, RuntimeConfig, WorkerConfig, WorkerRuntime};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(
//!     "double_it",
//!     Arc::new(task_worker::typed(|input: DoubleInput| async move { Ok(input.x * 2) })),
//!     WorkerConfig { concurrency: 2, batch_size: 5, ..Default::default() },
//! )?;
//!
//! let config = RuntimeConfig::from_env()?;
//! let transport = Arc::new(HttpTransport::new(&config.server_url)?);
//! let runtime = WorkerRuntime::new(registry, transport, config)?;
//! runtime.start()?;
//! // ...
//! runtime.stop(true).await;
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod runtime;
pub mod transport;
pub mod workers;

pub use config::{ExecutionMode, ReportConfig, RuntimeConfig, WorkerConfig};
pub use error::{HandlerError, WorkerError, WorkerResult};
pub use models::{OUTPUT_VALUE_KEY, Task, TaskLog, TaskResult, TaskStatus, WorkflowState};
pub use registry::{
    HandlerOutput, HandlerRegistration, HandlerRegistry, TaskHandler, from_fn, typed,
};
pub use runtime::WorkerRuntime;
pub use transport::{AuthTokenSource, HttpTransport, TaskTransport};
