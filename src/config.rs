//! Worker configuration management.
//!
//! Provides typed configuration loaded from environment variables with
//! validation. Global settings come from [`RuntimeConfig::from_env`];
//! per-task-type policies are [`WorkerConfig`] values supplied at handler
//! registration, optionally overridden per type through
//! `WORKER_<TYPE>_*` environment variables.

use crate::error::{WorkerError, WorkerResult};
use std::time::Duration;

/// How handler invocations for a task type are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Run on the shared async runtime. Suited to I/O-bound handlers.
    #[default]
    Async,

    /// Drive the handler on a dedicated blocking-pool thread, isolating
    /// CPU-bound work and panics from the async runtime.
    Blocking,
}

/// Global runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Base URL of the orchestration server API.
    pub server_url: String,

    /// Identifier reported with polls and results. Defaults to a random id.
    pub worker_id: String,

    /// Upper bound on worker threads the host should grant the runtime.
    /// Advisory only: this crate never spawns threads itself. Hosts that
    /// build their own tokio runtime pass it to `worker_threads`; `0` means
    /// no cap.
    pub max_worker_threads: usize,

    /// Long-poll timeout passed to the batch poll endpoint.
    pub poll_timeout: Duration,

    /// Result delivery retry policy.
    pub report: ReportConfig,

    /// How long a graceful shutdown waits for in-flight executions.
    pub drain_timeout: Duration,
}

/// Retry policy for result delivery.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Delivery attempts before the result is dropped.
    pub max_attempts: u32,

    /// Backoff delay before the first retry; doubles per attempt.
    pub base_delay: Duration,

    /// Cap on the backoff delay.
    pub max_delay: Duration,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            worker_id: default_worker_id(),
            max_worker_threads: 0,
            poll_timeout: Duration::from_millis(100),
            report: ReportConfig::default(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Load global configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `TASK_SERVER_URL`: base URL of the orchestration server
    ///
    /// Optional environment variables:
    /// - `WORKER_ID`: worker identifier (default: random)
    /// - `MAX_WORKER_THREADS`: advisory worker thread cap (default: 0 = unbounded)
    /// - `POLL_TIMEOUT_MS`: server-side long-poll timeout in ms (default: 100)
    /// - `REPORT_MAX_ATTEMPTS`: result delivery attempts (default: 3)
    /// - `REPORT_BASE_DELAY_MS`: initial retry backoff in ms (default: 100)
    /// - `REPORT_MAX_DELAY_MS`: retry backoff cap in ms (default: 5000)
    /// - `DRAIN_TIMEOUT_SECS`: graceful shutdown drain window (default: 30)
    pub fn from_env() -> WorkerResult<Self> {
        let server_url = std::env::var("TASK_SERVER_URL").map_err(|_| {
            WorkerError::configuration("TASK_SERVER_URL", "Required environment variable not set")
        })?;

        let config = Self {
            server_url,
            worker_id: std::env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            max_worker_threads: parse_env_or("MAX_WORKER_THREADS", 0)?,
            poll_timeout: Duration::from_millis(parse_env_or("POLL_TIMEOUT_MS", 100)?),
            report: ReportConfig {
                max_attempts: parse_env_or("REPORT_MAX_ATTEMPTS", 3)?,
                base_delay: Duration::from_millis(parse_env_or("REPORT_BASE_DELAY_MS", 100)?),
                max_delay: Duration::from_millis(parse_env_or("REPORT_MAX_DELAY_MS", 5000)?),
            },
            drain_timeout: Duration::from_secs(parse_env_or("DRAIN_TIMEOUT_SECS", 30)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.server_url.is_empty() {
            return Err(WorkerError::configuration(
                "TASK_SERVER_URL",
                "Cannot be empty",
            ));
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(WorkerError::configuration(
                "TASK_SERVER_URL",
                "Must start with http:// or https://",
            ));
        }

        if self.report.max_attempts == 0 {
            return Err(WorkerError::configuration(
                "REPORT_MAX_ATTEMPTS",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Per-task-type execution policy, set at registration.
///
/// Mutable at runtime only through pause/resume on the lifecycle manager;
/// everything else is frozen once `start()` runs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Logical partition used to route polling. `None` polls the default
    /// domain.
    pub domain: Option<String>,

    /// Sleep between poll cycles.
    pub poll_interval: Duration,

    /// Maximum tasks requested in one batch poll.
    pub batch_size: usize,

    /// Maximum simultaneous handler executions for this type.
    pub concurrency: usize,

    /// Execution backend for this type's handlers.
    pub execution_mode: ExecutionMode,

    /// Whether long-running executions send lease-extension heartbeats.
    pub extend_lease: bool,

    /// Heartbeat cadence. `None` derives 80% of each task's lease length.
    pub lease_extend_interval: Option<Duration>,

    /// Heartbeats sent before the task is allowed to lapse.
    pub max_lease_extensions: u32,

    /// Start the poll cycle paused.
    pub paused: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            domain: None,
            poll_interval: Duration::from_millis(100),
            batch_size: 1,
            concurrency: 1,
            execution_mode: ExecutionMode::Async,
            extend_lease: false,
            lease_extend_interval: None,
            max_lease_extensions: 5,
            paused: false,
        }
    }
}

impl WorkerConfig {
    /// Apply per-type environment overrides on top of the registered values.
    ///
    /// For a task type `double_it` the variables are:
    /// - `WORKER_DOUBLE_IT_POLL_INTERVAL_MS`
    /// - `WORKER_DOUBLE_IT_BATCH_SIZE`
    /// - `WORKER_DOUBLE_IT_CONCURRENCY`
    /// - `WORKER_DOUBLE_IT_DOMAIN`
    /// - `WORKER_DOUBLE_IT_PAUSED` (0/1)
    pub fn with_env_overrides(mut self, task_type: &str) -> WorkerResult<Self> {
        let prefix = format!(
            "WORKER_{}",
            task_type.to_uppercase().replace(['-', '.'], "_")
        );

        self.poll_interval = Duration::from_millis(parse_env_or(
            &format!("{prefix}_POLL_INTERVAL_MS"),
            self.poll_interval.as_millis() as u64,
        )?);
        self.batch_size = parse_env_or(&format!("{prefix}_BATCH_SIZE"), self.batch_size)?;
        self.concurrency = parse_env_or(&format!("{prefix}_CONCURRENCY"), self.concurrency)?;
        if let Ok(domain) = std::env::var(format!("{prefix}_DOMAIN")) {
            self.domain = Some(domain);
        }
        self.paused = parse_env_or(&format!("{prefix}_PAUSED"), self.paused as u8)? != 0;

        Ok(self)
    }

    /// Validate registration values. Called by the registry.
    pub fn validate(&self, task_type: &str) -> WorkerResult<()> {
        if self.concurrency == 0 {
            return Err(WorkerError::configuration(
                format!("{task_type}.concurrency"),
                "Must be greater than 0",
            ));
        }

        if self.batch_size == 0 {
            return Err(WorkerError::configuration(
                format!("{task_type}.batch_size"),
                "Must be greater than 0",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(WorkerError::configuration(
                format!("{task_type}.poll_interval"),
                "Must be greater than 0",
            ));
        }

        if self.extend_lease && self.max_lease_extensions == 0 {
            return Err(WorkerError::configuration(
                format!("{task_type}.max_lease_extensions"),
                "Must be greater than 0 when lease extension is enabled",
            ));
        }

        Ok(())
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", uuid::Uuid::new_v4())
}

/// Parse an environment variable or return a default value.
fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> WorkerResult<T> {
    match std::env::var(name) {
        Ok(val) => val.parse().map_err(|_| {
            WorkerError::configuration(
                name,
                format!("Invalid value '{}', expected a valid number", val),
            )
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.execution_mode, ExecutionMode::Async);
        assert!(!config.extend_lease);
        assert!(config.validate("noop").is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = WorkerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate("noop").is_err());
    }

    #[test]
    fn test_lease_extension_requires_budget() {
        let config = WorkerConfig {
            extend_lease: true,
            max_lease_extensions: 0,
            ..Default::default()
        };
        assert!(config.validate("noop").is_err());
    }

    #[test]
    fn test_runtime_config_rejects_bad_url() {
        let config = RuntimeConfig {
            server_url: "not-a-url".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        // Env vars are process-global; use a type name unique to this test.
        unsafe {
            std::env::set_var("WORKER_CFG_OVERRIDE_TEST_BATCH_SIZE", "7");
            std::env::set_var("WORKER_CFG_OVERRIDE_TEST_DOMAIN", "staging");
        }
        let config = WorkerConfig::default()
            .with_env_overrides("cfg-override.test")
            .unwrap();
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.domain.as_deref(), Some("staging"));
        unsafe {
            std::env::remove_var("WORKER_CFG_OVERRIDE_TEST_BATCH_SIZE");
            std::env::remove_var("WORKER_CFG_OVERRIDE_TEST_DOMAIN");
        }
    }
}
