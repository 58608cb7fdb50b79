//! Per-task-type polling cycle.
//!
//! Each registered task type gets one independent loop: check the pause flag,
//! request a batch bounded by free execution slots, hand the tasks to the
//! execution pool, sleep, repeat. Transient failures are logged and treated as
//! an empty batch — the loop never terminates on them.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::executor::ExecutionPool;
use crate::metrics;
use crate::registry::TaskHandler;
use crate::transport::TaskTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Everything one poll cycle needs, assembled by the lifecycle manager.
pub struct PollContext {
    pub task_type: String,
    pub handler: Arc<dyn TaskHandler>,
    pub config: WorkerConfig,
    pub transport: Arc<dyn TaskTransport>,
    pub pool: Arc<ExecutionPool>,
    pub worker_id: String,
    pub poll_timeout: Duration,
    pub paused: Arc<AtomicBool>,
}

pub async fn poll_loop(ctx: PollContext, mut shutdown: watch::Receiver<bool>) {
    log::info!(
        "Poll cycle for {} started (batch={}, concurrency={}, domain={:?})",
        ctx.task_type,
        ctx.config.batch_size,
        ctx.config.concurrency,
        ctx.config.domain
    );

    loop {
        if ctx.paused.load(Ordering::Acquire) {
            log::debug!("Poll cycle {}: paused", ctx.task_type);
        } else {
            poll_once(&ctx).await;
        }

        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("Poll cycle {}: shutdown signal received, exiting", ctx.task_type);
                return;
            }
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
}

/// One IDLE → POLLING → DISPATCHING pass.
async fn poll_once(ctx: &PollContext) {
    // Never request more tasks than the concurrency gate can admit.
    let quantity = ctx
        .pool
        .available_permits(&ctx.task_type)
        .min(ctx.config.batch_size);
    if quantity == 0 {
        log::debug!("Poll cycle {}: no free execution slots", ctx.task_type);
        return;
    }

    let batch = ctx
        .transport
        .batch_poll(
            &ctx.task_type,
            &ctx.worker_id,
            ctx.config.domain.as_deref(),
            quantity,
            ctx.poll_timeout,
        )
        .await;

    match batch {
        Ok(tasks) => {
            metrics::record_poll(&ctx.task_type, tasks.len());
            if tasks.is_empty() {
                log::debug!("Poll cycle {}: empty batch", ctx.task_type);
                return;
            }
            log::debug!(
                "Poll cycle {}: dispatching {} tasks",
                ctx.task_type,
                tasks.len()
            );
            for task in tasks {
                ctx.pool
                    .submit(ctx.handler.clone(), ctx.config.clone(), task)
                    .await;
            }
        }
        Err(WorkerError::Authorization(reason)) => {
            metrics::record_poll_error(&ctx.task_type);
            log::warn!(
                "Poll cycle {}: authorization failure ({}); refreshing credentials",
                ctx.task_type,
                reason
            );
            if let Err(e) = ctx.transport.refresh_credentials().await {
                log::error!("Poll cycle {}: credential refresh failed: {}", ctx.task_type, e);
            }
        }
        Err(e) => {
            // Treated as an empty batch; the next cycle retries.
            metrics::record_poll_error(&ctx.task_type);
            log::error!("Poll cycle {}: poll failed: {}", ctx.task_type, e);
        }
    }
}
