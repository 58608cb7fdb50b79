//! Bounded-concurrency execution pool.
//!
//! One counting semaphore per task type gates dispatch; it is the only
//! mutable state shared between the poll scheduler and spawned executions.
//! A permit is acquired before dispatch and released when the execution
//! finishes, including on handler failure and panic.

use crate::config::{ExecutionMode, WorkerConfig};
use crate::error::HandlerError;
use crate::metrics;
use crate::models::{Task, TaskResult};
use crate::registry::{HandlerOutput, HandlerRegistry, TaskHandler};
use crate::workers::lease;
use crate::workers::reporter::Reporter;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

pub struct ExecutionPool {
    gates: HashMap<String, Arc<Semaphore>>,
    reporter: Arc<Reporter>,
    worker_id: String,
    in_flight: Arc<AtomicUsize>,
    aborts: Mutex<HashMap<u64, AbortHandle>>,
    next_execution_id: AtomicU64,
}

impl ExecutionPool {
    /// Build one concurrency gate per registered task type.
    pub fn new(registry: &HandlerRegistry, reporter: Arc<Reporter>, worker_id: String) -> Self {
        let gates = registry
            .iter()
            .map(|(task_type, entry)| {
                (
                    task_type.to_string(),
                    Arc::new(Semaphore::new(entry.config.concurrency)),
                )
            })
            .collect();

        Self {
            gates,
            reporter,
            worker_id,
            in_flight: Arc::new(AtomicUsize::new(0)),
            aborts: Mutex::new(HashMap::new()),
            next_execution_id: AtomicU64::new(0),
        }
    }

    /// Free execution slots for a task type. The poll scheduler uses this to
    /// bound its batch request.
    pub fn available_permits(&self, task_type: &str) -> usize {
        self.gates
            .get(task_type)
            .map(|gate| gate.available_permits())
            .unwrap_or(0)
    }

    /// Currently executing handlers across all task types.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the handler for one polled task and report its outcome.
    ///
    /// Acquires a concurrency permit, spawns the execution, and returns once
    /// the execution is in flight. Every submitted task produces exactly one
    /// terminal result report, whatever the handler does.
    pub async fn submit(
        self: &Arc<Self>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
        task: Task,
    ) {
        let gate = match self.gates.get(&task.task_def_name) {
            Some(gate) => gate.clone(),
            None => {
                log::error!(
                    "No concurrency gate for task type {}; dropping task {}",
                    task.task_def_name,
                    task.task_id
                );
                return;
            }
        };

        // The scheduler never requests more tasks than available permits, so
        // this does not block in practice; it still enforces the limit.
        let permit = match gate.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let execution_id = self.next_execution_id.fetch_add(1, Ordering::Relaxed);
        let slot = ExecutionSlot::claim(self, &task.task_def_name, execution_id);
        let pool = self.clone();

        let handle = tokio::spawn(async move {
            let _slot = slot;
            let task_type = task.task_def_name.clone();
            let started = Instant::now();

            let heartbeat =
                lease::spawn_heartbeat(&task, &config, pool.reporter.clone(), &pool.worker_id);
            let outcome = invoke(config.execution_mode, handler, task.clone()).await;
            if let Some(heartbeat) = heartbeat {
                heartbeat.cancel();
            }

            let result = pool.outcome_to_result(&task, outcome);
            metrics::record_execution(
                &task_type,
                result.status.as_str(),
                started.elapsed().as_secs_f64(),
            );
            pool.reporter.report(&result).await;
            drop(permit);
        });

        if let Ok(mut aborts) = self.aborts.lock() {
            let abort = handle.abort_handle();
            aborts.insert(execution_id, abort);
            if handle.is_finished() {
                aborts.remove(&execution_id);
            }
        }
    }

    /// Wait for in-flight executions to finish, up to `timeout`.
    /// Returns whether the pool fully drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.in_flight();
            if active == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "Drain timeout exceeded with {} executions still active",
                    active
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Cancel all in-flight executions immediately. Cancelled tasks report no
    /// result; the server-side lease expiry requeues them.
    pub fn abort_all(&self) {
        if let Ok(mut aborts) = self.aborts.lock() {
            for (_, abort) in aborts.drain() {
                abort.abort();
            }
        }
    }

    fn outcome_to_result(
        &self,
        task: &Task,
        outcome: Result<HandlerOutput, HandlerError>,
    ) -> TaskResult {
        match outcome {
            Ok(HandlerOutput::Value(value)) => {
                TaskResult::completed_with_value(task, &self.worker_id, value)
            }
            Ok(HandlerOutput::Data(data)) => TaskResult::completed(task, &self.worker_id, data),
            Ok(HandlerOutput::Full(result)) => result.with_task_identity(task, &self.worker_id),
            Err(HandlerError::Failed(reason)) => TaskResult::failed(task, &self.worker_id, reason),
            Err(HandlerError::Terminal(reason)) => {
                TaskResult::terminal_failure(task, &self.worker_id, reason)
            }
        }
    }
}

/// In-flight accounting that survives cancellation: claimed before the
/// execution is spawned, released on drop even if the future is aborted.
struct ExecutionSlot {
    pool: Arc<ExecutionPool>,
    task_type: String,
    execution_id: u64,
}

impl ExecutionSlot {
    fn claim(pool: &Arc<ExecutionPool>, task_type: &str, execution_id: u64) -> Self {
        pool.in_flight.fetch_add(1, Ordering::AcqRel);
        metrics::record_execution_started(task_type);
        Self {
            pool: pool.clone(),
            task_type: task_type.to_string(),
            execution_id,
        }
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        self.pool.in_flight.fetch_sub(1, Ordering::AcqRel);
        metrics::record_execution_finished(&self.task_type);
        if let Ok(mut aborts) = self.pool.aborts.lock() {
            aborts.remove(&self.execution_id);
        }
    }
}

/// Run the handler under the configured execution mode, converting panics and
/// crashes into retryable failures.
async fn invoke(
    mode: ExecutionMode,
    handler: Arc<dyn TaskHandler>,
    task: Task,
) -> Result<HandlerOutput, HandlerError> {
    match mode {
        ExecutionMode::Async => match AssertUnwindSafe(handler.execute(task)).catch_unwind().await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(HandlerError::failed(panic_reason(panic))),
        },
        ExecutionMode::Blocking => {
            let runtime = tokio::runtime::Handle::current();
            match tokio::task::spawn_blocking(move || runtime.block_on(handler.execute(task)))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(HandlerError::failed(format!("handler crashed: {}", e))),
            }
        }
    }
}

fn panic_reason(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
