//! Prometheus metrics for worker runtime observability.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Batch polls issued, by task type
pub static POLLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("worker_polls_total", "Number of batch polls issued"),
        &["task_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Poll failures treated as empty batches, by task type
pub static POLL_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("worker_poll_errors_total", "Number of failed batch polls"),
        &["task_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Tasks polled and handed to the execution pool
pub static TASKS_POLLED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("worker_tasks_polled_total", "Number of tasks polled"),
        &["task_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Handler executions by reported status
pub static EXECUTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "worker_executions_total",
            "Number of handler executions by reported status",
        ),
        &["task_type", "status"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Handler execution duration in seconds
pub static EXECUTION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "worker_execution_duration_seconds",
            "Handler execution duration in seconds",
        ),
        &["task_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

/// Currently executing handlers per task type
pub static IN_FLIGHT: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("worker_in_flight", "Currently executing handlers"),
        &["task_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Lease-extension heartbeats sent
pub static LEASE_EXTENSIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "worker_lease_extensions_total",
            "Lease-extension heartbeats sent",
        ),
        &["task_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Result delivery retries after transient errors
pub static REPORT_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "worker_report_retries_total",
        "Result delivery retries after transient errors",
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Results dropped after retry exhaustion
pub static REPORTS_DROPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "worker_reports_dropped_total",
        "Results dropped after retry exhaustion",
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Time a result spent in delivery, including retries
pub static REPORT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(HistogramOpts::new(
        "worker_report_duration_seconds",
        "Time a result spent in delivery, including retries",
    ))
    .expect("metric can be created");
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub fn record_poll(task_type: &str, task_count: usize) {
    POLLS_TOTAL.with_label_values(&[task_type]).inc();
    TASKS_POLLED_TOTAL
        .with_label_values(&[task_type])
        .inc_by(task_count as u64);
}

pub fn record_poll_error(task_type: &str) {
    POLL_ERRORS_TOTAL.with_label_values(&[task_type]).inc();
}

pub fn record_execution(task_type: &str, status: &str, duration_secs: f64) {
    EXECUTIONS_TOTAL
        .with_label_values(&[task_type, status])
        .inc();
    EXECUTION_DURATION
        .with_label_values(&[task_type])
        .observe(duration_secs);
}

pub fn record_execution_started(task_type: &str) {
    IN_FLIGHT.with_label_values(&[task_type]).inc();
}

pub fn record_execution_finished(task_type: &str) {
    IN_FLIGHT.with_label_values(&[task_type]).dec();
}

pub fn record_lease_extension(task_type: &str) {
    LEASE_EXTENSIONS_TOTAL.with_label_values(&[task_type]).inc();
}

pub fn record_report_retry() {
    REPORT_RETRIES_TOTAL.inc();
}

pub fn record_report_dropped() {
    REPORTS_DROPPED_TOTAL.inc();
}

pub fn record_report_duration(duration_secs: f64) {
    REPORT_DURATION.observe(duration_secs);
}
