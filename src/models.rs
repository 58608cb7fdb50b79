//! Wire models exchanged with the orchestration server.
//!
//! Field names use the server's camelCase convention via serde renames; the
//! in-process API stays snake_case. Input and output parameter maps preserve
//! insertion order (`serde_json` with `preserve_order`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Conventional output key used when a handler returns a plain value.
pub const OUTPUT_VALUE_KEY: &str = "result";

/// One server-issued execution unit for a task type, tied to a single
/// workflow instance.
///
/// A `Task` is an immutable snapshot of one execution attempt: it is created
/// by the server at poll time, consumed exactly once by one execution slot,
/// and never mutated — a derived [`TaskResult`] is produced instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub task_id: String,

    /// Task type name, matched against handler registrations.
    pub task_def_name: String,

    /// Workflow instance that owns this task.
    pub workflow_instance_id: String,

    /// Reference name of the task inside its workflow definition.
    pub reference_task_name: String,

    /// Input parameters for the handler. Ordered, arbitrarily nested.
    pub input_data: Map<String, Value>,

    /// How many times this task has been polled.
    pub poll_count: i32,

    /// How many times this task has been retried by the server.
    pub retry_count: i32,

    /// Seconds the server waits before making the task pollable again.
    pub callback_after_seconds: i64,

    /// Lease length: seconds the server waits for a terminal result (or a
    /// lease-extension heartbeat) before reclaiming the task.
    pub response_timeout_seconds: i64,
}

/// Task outcome as reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
    FailedWithTerminalError,
}

impl TaskStatus {
    /// Terminal statuses finalize the task on the server; `IN_PROGRESS` does
    /// not and is used for lease extension.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::FailedWithTerminalError => "FAILED_WITH_TERMINAL_ERROR",
        }
    }
}

/// A single log line attached to a [`TaskResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    pub log: String,
    pub created_time: i64,
}

impl TaskLog {
    pub fn new(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            created_time: epoch_millis(),
        }
    }
}

/// The runtime's report of a task's outcome. Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub workflow_instance_id: String,
    pub worker_id: String,
    pub status: TaskStatus,
    pub output_data: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_after_seconds: Option<i64>,

    /// Ask the server to extend the task lease instead of finalizing it.
    /// Only meaningful together with `IN_PROGRESS`.
    #[serde(default)]
    pub extend_lease: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskLog>,
}

impl TaskResult {
    fn base(task: &Task, worker_id: &str, status: TaskStatus) -> Self {
        Self {
            task_id: task.task_id.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            worker_id: worker_id.to_string(),
            status,
            output_data: Map::new(),
            reason_for_incompletion: None,
            callback_after_seconds: None,
            extend_lease: false,
            logs: Vec::new(),
        }
    }

    /// A `COMPLETED` result carrying the full output map.
    pub fn completed(task: &Task, worker_id: &str, output_data: Map<String, Value>) -> Self {
        let mut result = Self::base(task, worker_id, TaskStatus::Completed);
        result.output_data = output_data;
        result
    }

    /// A `COMPLETED` result with a plain value folded under
    /// [`OUTPUT_VALUE_KEY`].
    pub fn completed_with_value(task: &Task, worker_id: &str, value: Value) -> Self {
        let mut output = Map::new();
        output.insert(OUTPUT_VALUE_KEY.to_string(), value);
        Self::completed(task, worker_id, output)
    }

    /// A `FAILED` result; the server may retry the task.
    pub fn failed(task: &Task, worker_id: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut result = Self::base(task, worker_id, TaskStatus::Failed);
        result.logs.push(TaskLog::new(reason.clone()));
        result.reason_for_incompletion = Some(reason);
        result
    }

    /// A `FAILED_WITH_TERMINAL_ERROR` result; excluded from server retry.
    pub fn terminal_failure(task: &Task, worker_id: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut result = Self::base(task, worker_id, TaskStatus::FailedWithTerminalError);
        result.logs.push(TaskLog::new(reason.clone()));
        result.reason_for_incompletion = Some(reason);
        result
    }

    /// An `IN_PROGRESS` lease-extension heartbeat. Not terminal.
    pub fn lease_extension(task: &Task, worker_id: &str) -> Self {
        let mut result = Self::base(task, worker_id, TaskStatus::InProgress);
        result.extend_lease = true;
        result
    }

    /// Fill identity fields a handler-built result left empty.
    pub fn with_task_identity(mut self, task: &Task, worker_id: &str) -> Self {
        if self.task_id.is_empty() {
            self.task_id = task.task_id.clone();
        }
        if self.workflow_instance_id.is_empty() {
            self.workflow_instance_id = task.workflow_instance_id.clone();
        }
        if self.worker_id.is_empty() {
            self.worker_id = worker_id.to_string();
        }
        self
    }

    pub fn add_log(&mut self, line: impl Into<String>) {
        self.logs.push(TaskLog::new(line));
    }
}

/// Minimal view of the owning workflow, returned by the synchronous update
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub workflow_id: String,
    pub status: String,
}

pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
