//! Lease-extension heartbeats for long-running executions.
//!
//! While a handler runs past a fraction of its task's lease, a shadow timer
//! reports `IN_PROGRESS` with extend-lease set so the server does not reclaim
//! the task. After the configured number of extensions the task is allowed to
//! lapse and the server requeues it.

use crate::config::WorkerConfig;
use crate::metrics;
use crate::models::{Task, TaskResult};
use crate::workers::reporter::Reporter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fraction of the lease length at which heartbeats fire when no explicit
/// interval is configured.
const DEFAULT_LEASE_FRACTION: f64 = 0.8;

/// Handle to a running heartbeat timer. Aborts the timer on drop, so an
/// execution cancelled mid-flight takes its heartbeat down with it and the
/// server-side lease expiry can reclaim the task.
pub struct LeaseHeartbeat {
    handle: JoinHandle<()>,
}

impl LeaseHeartbeat {
    /// Stop the timer before reporting the terminal result so no extension
    /// can race past completion.
    pub fn cancel(self) {}
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a heartbeat timer for one in-flight execution, or `None` when lease
/// extension is disabled for the type or the task carries no usable lease.
pub fn spawn_heartbeat(
    task: &Task,
    config: &WorkerConfig,
    reporter: Arc<Reporter>,
    worker_id: &str,
) -> Option<LeaseHeartbeat> {
    if !config.extend_lease {
        return None;
    }

    let interval = match heartbeat_interval(task, config) {
        Some(interval) => interval,
        None => {
            log::debug!(
                "Task {} has no usable lease, skipping extension",
                task.task_id
            );
            return None;
        }
    };

    let heartbeat = TaskResult::lease_extension(task, worker_id);
    let task_type = task.task_def_name.clone();
    let task_id = task.task_id.clone();
    let max_extensions = config.max_lease_extensions;

    let handle = tokio::spawn(async move {
        for sent in 1..=max_extensions {
            tokio::time::sleep(interval).await;
            match reporter.report_heartbeat(&heartbeat).await {
                Ok(()) => {
                    metrics::record_lease_extension(&task_type);
                    log::debug!(
                        "Extended lease for task {} ({}/{})",
                        task_id,
                        sent,
                        max_extensions
                    );
                }
                Err(e) => {
                    // Best effort: a missed extension only means the server
                    // may requeue the task earlier.
                    log::warn!("Lease extension for task {} failed: {}", task_id, e);
                }
            }
        }
        log::warn!(
            "Task {} exhausted {} lease extensions; letting the lease lapse",
            task_id,
            max_extensions
        );
    });

    Some(LeaseHeartbeat { handle })
}

fn heartbeat_interval(task: &Task, config: &WorkerConfig) -> Option<Duration> {
    if let Some(interval) = config.lease_extend_interval {
        return Some(interval);
    }
    if task.response_timeout_seconds <= 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        task.response_timeout_seconds as f64 * DEFAULT_LEASE_FRACTION,
    ))
}
