//! Result delivery with bounded retry.
//!
//! Delivery is at-least-once from the server's perspective: when every attempt
//! fails, the result is dropped and the server-side lease timeout requeues the
//! task.

use crate::config::ReportConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::models::{TaskResult, WorkflowState};
use crate::transport::TaskTransport;
use std::future::Future;
use std::sync::Arc;

pub struct Reporter {
    transport: Arc<dyn TaskTransport>,
    config: ReportConfig,
}

impl Reporter {
    pub fn new(transport: Arc<dyn TaskTransport>, config: ReportConfig) -> Self {
        Self { transport, config }
    }

    /// Deliver a result, retrying transient failures with exponential backoff.
    ///
    /// Returns whether the result was accepted by the server. On exhaustion
    /// the failure is logged and the result dropped; nothing propagates to the
    /// execution that produced it.
    pub async fn report(&self, result: &TaskResult) -> bool {
        let started = std::time::Instant::now();
        let delivered = self
            .with_retries(result, |r| async move {
                self.transport.update_task(&r).await
            })
            .await
            .is_ok();
        metrics::record_report_duration(started.elapsed().as_secs_f64());
        delivered
    }

    /// Deliver a result through the synchronous endpoint, returning the owning
    /// workflow's current state. Same retry policy as [`report`](Self::report).
    pub async fn report_sync(&self, result: &TaskResult) -> WorkerResult<WorkflowState> {
        self.with_retries(result, |r| async move {
            self.transport.update_task_sync(&r).await
        })
        .await
    }

    /// Single-attempt delivery used for lease-extension heartbeats. A missed
    /// heartbeat only risks an early server-side requeue, so no backoff.
    pub async fn report_heartbeat(&self, result: &TaskResult) -> WorkerResult<()> {
        self.transport.update_task(result).await
    }

    async fn with_retries<T, F, Fut>(&self, result: &TaskResult, send: F) -> WorkerResult<T>
    where
        F: Fn(TaskResult) -> Fut,
        Fut: Future<Output = WorkerResult<T>>,
    {
        let mut refreshed = false;
        let mut delay = self.config.base_delay;

        for attempt in 1..=self.config.max_attempts {
            match send(result.clone()).await {
                Ok(value) => {
                    log::debug!(
                        "Reported task {} as {} (attempt {})",
                        result.task_id,
                        result.status.as_str(),
                        attempt
                    );
                    return Ok(value);
                }
                Err(WorkerError::Authorization(reason)) if !refreshed => {
                    // One refresh-and-retry before falling back to backoff.
                    // The immediate retry does not consume an attempt.
                    refreshed = true;
                    log::warn!(
                        "Authorization failure reporting task {}: {}; refreshing credentials",
                        result.task_id,
                        reason
                    );
                    if let Err(e) = self.transport.refresh_credentials().await {
                        log::error!("Credential refresh failed: {}", e);
                    }
                    match send(result.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(e) => {
                            log::warn!(
                                "Report attempt {}/{} for task {} failed after refresh: {}",
                                attempt,
                                self.config.max_attempts,
                                result.task_id,
                                e
                            );
                        }
                    }
                }
                Err(e) => {
                    log::warn!(
                        "Report attempt {}/{} for task {} failed: {}",
                        attempt,
                        self.config.max_attempts,
                        result.task_id,
                        e
                    );
                }
            }

            if attempt < self.config.max_attempts {
                metrics::record_report_retry();
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.config.max_delay);
            }
        }

        metrics::record_report_dropped();
        log::error!(
            "Dropping result for task {} after {} attempts; the server lease timeout will requeue it",
            result.task_id,
            self.config.max_attempts
        );
        Err(WorkerError::Transport(format!(
            "result delivery for task {} exhausted {} attempts",
            result.task_id, self.config.max_attempts
        )))
    }
}
