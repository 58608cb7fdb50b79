//! Shared test infrastructure: an in-memory transport that scripts server
//! behavior and records everything the runtime sends.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_worker::{
    Task, TaskResult, TaskStatus, TaskTransport, WorkerError, WorkerResult, WorkflowState,
};

#[derive(Default)]
struct MockState {
    queued: HashMap<String, VecDeque<Task>>,
    updates: Vec<TaskResult>,
    update_attempts: usize,
    update_failures: VecDeque<WorkerError>,
    poll_failures: VecDeque<WorkerError>,
    polls: HashMap<String, usize>,
    max_poll_count: HashMap<String, usize>,
    refreshes: usize,
}

/// Scriptable in-memory stand-in for the orchestration server.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue tasks the server will hand out for `task_type`, honoring the
    /// requested batch count per poll.
    pub fn enqueue(&self, task_type: &str, tasks: Vec<Task>) {
        let mut state = self.state.lock().unwrap();
        state
            .queued
            .entry(task_type.to_string())
            .or_default()
            .extend(tasks);
    }

    /// Make the next `update_task` calls fail with the given errors, in order.
    pub fn fail_next_updates(&self, errors: Vec<WorkerError>) {
        let mut state = self.state.lock().unwrap();
        state.update_failures.extend(errors);
    }

    /// Make the next `batch_poll` calls fail with the given errors, in order.
    pub fn fail_next_polls(&self, errors: Vec<WorkerError>) {
        let mut state = self.state.lock().unwrap();
        state.poll_failures.extend(errors);
    }

    pub fn updates(&self) -> Vec<TaskResult> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn terminal_updates(&self) -> Vec<TaskResult> {
        self.updates()
            .into_iter()
            .filter(|r| r.status.is_terminal())
            .collect()
    }

    pub fn update_attempts(&self) -> usize {
        self.state.lock().unwrap().update_attempts
    }

    pub fn poll_count(&self, task_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .polls
            .get(task_type)
            .copied()
            .unwrap_or(0)
    }

    /// Largest batch count the runtime ever requested for `task_type`.
    pub fn max_requested(&self, task_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_poll_count
            .get(task_type)
            .copied()
            .unwrap_or(0)
    }

    /// Tasks still queued for `task_type`, i.e. never handed out by a poll.
    pub fn queued_len(&self, task_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queued
            .get(task_type)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn refresh_count(&self) -> usize {
        self.state.lock().unwrap().refreshes
    }

    /// Wait until `n` terminal results were accepted, or panic after
    /// `timeout`.
    pub async fn wait_for_terminal(&self, n: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.terminal_updates().len() >= n {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} terminal results, got {:?}",
                    n,
                    self.updates()
                        .iter()
                        .map(|r| r.status.as_str())
                        .collect::<Vec<_>>()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until `task_type` was polled at least `n` times.
    pub async fn wait_for_polls(&self, task_type: &str, n: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.poll_count(task_type) < n {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} polls of {}, got {}",
                    n,
                    task_type,
                    self.poll_count(task_type)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl TaskTransport for MockTransport {
    async fn batch_poll(
        &self,
        task_type: &str,
        _worker_id: &str,
        _domain: Option<&str>,
        count: usize,
        _timeout: Duration,
    ) -> WorkerResult<Vec<Task>> {
        let mut state = self.state.lock().unwrap();
        *state.polls.entry(task_type.to_string()).or_default() += 1;
        let seen = state.max_poll_count.entry(task_type.to_string()).or_default();
        *seen = (*seen).max(count);

        if let Some(err) = state.poll_failures.pop_front() {
            return Err(err);
        }

        let queue = state.queued.entry(task_type.to_string()).or_default();
        let take = count.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn update_task(&self, result: &TaskResult) -> WorkerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.update_attempts += 1;
        if let Some(err) = state.update_failures.pop_front() {
            return Err(err);
        }
        state.updates.push(result.clone());
        Ok(())
    }

    async fn update_task_sync(&self, result: &TaskResult) -> WorkerResult<WorkflowState> {
        let mut state = self.state.lock().unwrap();
        state.update_attempts += 1;
        if let Some(err) = state.update_failures.pop_front() {
            return Err(err);
        }
        state.updates.push(result.clone());
        Ok(WorkflowState {
            workflow_id: result.workflow_instance_id.clone(),
            status: "RUNNING".to_string(),
        })
    }

    async fn refresh_credentials(&self) -> WorkerResult<()> {
        self.state.lock().unwrap().refreshes += 1;
        Ok(())
    }
}

/// Build a task of `task_type` with the given id and input object.
pub fn make_task(task_type: &str, task_id: &str, input: Value) -> Task {
    Task {
        task_id: task_id.to_string(),
        task_def_name: task_type.to_string(),
        workflow_instance_id: format!("wf-{}", task_id),
        reference_task_name: format!("{}_ref", task_type),
        input_data: input.as_object().cloned().unwrap_or_default(),
        response_timeout_seconds: 30,
        ..Default::default()
    }
}

/// Terminal statuses of all accepted results, in delivery order.
pub fn statuses(updates: &[TaskResult]) -> Vec<TaskStatus> {
    updates.iter().map(|r| r.status).collect()
}

/// Output value reported under the conventional key.
pub fn result_value(result: &TaskResult) -> Value {
    result
        .output_data
        .get("result")
        .cloned()
        .unwrap_or(json!(null))
}

/// Runtime wired to the mock transport with a fast retry policy.
pub fn test_runtime(
    transport: Arc<MockTransport>,
    registry: task_worker::HandlerRegistry,
) -> task_worker::WorkerRuntime {
    let config = task_worker::RuntimeConfig {
        server_url: "http://mock".to_string(),
        worker_id: "test-worker".to_string(),
        poll_timeout: Duration::from_millis(10),
        report: task_worker::ReportConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        drain_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    task_worker::WorkerRuntime::new(registry, transport, config).unwrap()
}

pub fn init_logs() {
    let _ = env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("info"))
        .is_test(true)
        .try_init();
}
