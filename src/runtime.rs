//! Lifecycle management for the worker runtime.
//!
//! [`WorkerRuntime`] owns the poll cycles and the execution pool as a unit:
//! `start()` brings up one poll cycle per registered task type, `stop()`
//! tears everything down, draining in-flight work when graceful. Control
//! methods are callable from one control thread while the cycles run.

use crate::config::RuntimeConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::ExecutionPool;
use crate::registry::HandlerRegistry;
use crate::transport::TaskTransport;
use crate::workers::{PollContext, Reporter, poll_loop};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct WorkerRuntime {
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn TaskTransport>,
    config: RuntimeConfig,
    reporter: Arc<Reporter>,
    state: Mutex<Option<RunningState>>,
}

struct RunningState {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    pool: Arc<ExecutionPool>,
    paused: HashMap<String, Arc<AtomicBool>>,
}

impl WorkerRuntime {
    pub fn new(
        registry: HandlerRegistry,
        transport: Arc<dyn TaskTransport>,
        config: RuntimeConfig,
    ) -> WorkerResult<Self> {
        config.validate()?;
        let reporter = Arc::new(Reporter::new(transport.clone(), config.report.clone()));
        Ok(Self {
            registry: Arc::new(registry),
            transport,
            config,
            reporter,
            state: Mutex::new(None),
        })
    }

    /// Start one poll cycle + execution gate per registered task type.
    ///
    /// Registration is frozen from here on; configuration problems surface
    /// now, everything later is logged and reflected only in reported
    /// results.
    pub fn start(&self) -> WorkerResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| WorkerError::Internal("runtime state lock poisoned".into()))?;

        if state.is_some() {
            return Err(WorkerError::configuration("runtime", "Already started"));
        }
        if self.registry.is_empty() {
            return Err(WorkerError::configuration(
                "runtime",
                "No task handlers registered",
            ));
        }

        let pool = Arc::new(ExecutionPool::new(
            &self.registry,
            self.reporter.clone(),
            self.config.worker_id.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut loops = Vec::with_capacity(self.registry.len());
        let mut paused = HashMap::with_capacity(self.registry.len());

        for (task_type, entry) in self.registry.iter() {
            let flag = Arc::new(AtomicBool::new(entry.config.paused));
            paused.insert(task_type.to_string(), flag.clone());

            let ctx = PollContext {
                task_type: task_type.to_string(),
                handler: entry.handler.clone(),
                config: entry.config.clone(),
                transport: self.transport.clone(),
                pool: pool.clone(),
                worker_id: self.config.worker_id.clone(),
                poll_timeout: self.config.poll_timeout,
                paused: flag,
            };
            loops.push(tokio::spawn(poll_loop(ctx, shutdown_rx.clone())));
        }

        log::info!(
            "Worker runtime {} started with {} task types",
            self.config.worker_id,
            loops.len()
        );

        *state = Some(RunningState {
            shutdown: shutdown_tx,
            loops,
            pool,
            paused,
        });
        Ok(())
    }

    /// Stop all poll cycles and release the execution pool.
    ///
    /// Graceful stop waits up to the configured drain timeout for in-flight
    /// executions to finish and report; non-graceful cancels them immediately
    /// and leaves requeueing to the server-side lease expiry.
    pub async fn stop(&self, graceful: bool) {
        let state = self.state.lock().ok().and_then(|mut guard| guard.take());
        let Some(state) = state else {
            log::warn!("stop() called but the runtime is not running");
            return;
        };

        let _ = state.shutdown.send(true);

        // Join the poll cycles before touching the pool: a cycle mid-poll
        // when the signal lands can still dispatch one last batch, which the
        // drain below must see.
        join_all(state.loops).await;

        if graceful {
            if !state.pool.drain(self.config.drain_timeout).await {
                log::warn!("Graceful stop timed out; cancelling remaining executions");
                state.pool.abort_all();
            }
        } else {
            state.pool.abort_all();
        }

        log::info!("Worker runtime {} stopped", self.config.worker_id);
    }

    /// Pause polling for one task type. In-flight executions finish normally.
    pub fn pause(&self, task_type: &str) -> WorkerResult<()> {
        self.set_paused(task_type, true)
    }

    /// Resume polling for a paused task type.
    pub fn resume(&self, task_type: &str) -> WorkerResult<()> {
        self.set_paused(task_type, false)
    }

    fn set_paused(&self, task_type: &str, value: bool) -> WorkerResult<()> {
        let guard = self
            .state
            .lock()
            .map_err(|_| WorkerError::Internal("runtime state lock poisoned".into()))?;
        match guard.as_ref().and_then(|s| s.paused.get(task_type)) {
            Some(flag) => {
                flag.store(value, Ordering::Release);
                log::info!(
                    "Poll cycle {} {}",
                    task_type,
                    if value { "paused" } else { "resumed" }
                );
                Ok(())
            }
            None => Err(WorkerError::configuration(
                task_type,
                "Unknown task type or runtime not started",
            )),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Currently executing handlers across all task types.
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.pool.in_flight()))
            .unwrap_or(0)
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Result reporter, for hosts that push results outside the poll/execute
    /// path (e.g. the synchronous update endpoint).
    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_requires_registered_handlers() {
        let transport =
            Arc::new(crate::transport::HttpTransport::new("http://localhost:1").unwrap());
        let config = RuntimeConfig {
            server_url: "http://localhost:1".into(),
            ..Default::default()
        };
        let runtime = WorkerRuntime::new(HandlerRegistry::new(), transport, config).unwrap();
        assert!(runtime.start().is_err());
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_pause_before_start_is_an_error() {
        let transport =
            Arc::new(crate::transport::HttpTransport::new("http://localhost:1").unwrap());
        let config = RuntimeConfig {
            server_url: "http://localhost:1".into(),
            ..Default::default()
        };
        let runtime = WorkerRuntime::new(HandlerRegistry::new(), transport, config).unwrap();
        assert!(runtime.pause("missing").is_err());
    }
}
