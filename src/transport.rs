//! Transport to the orchestration server.
//!
//! The runtime only ever talks to the server through the [`TaskTransport`]
//! trait; [`HttpTransport`] is the production implementation. Tests substitute
//! their own.

use crate::error::{WorkerError, WorkerResult};
use crate::models::{Task, TaskResult, WorkflowState};
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

/// Server operations the runtime consumes.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Request up to `count` ready tasks of `task_type`, scoped to `domain`
    /// when set. An empty batch is a normal outcome, not an error.
    async fn batch_poll(
        &self,
        task_type: &str,
        worker_id: &str,
        domain: Option<&str>,
        count: usize,
        timeout: Duration,
    ) -> WorkerResult<Vec<Task>>;

    /// Fire-and-forget result update.
    async fn update_task(&self, result: &TaskResult) -> WorkerResult<()>;

    /// Synchronous result update returning the owning workflow's state.
    async fn update_task_sync(&self, result: &TaskResult) -> WorkerResult<WorkflowState>;

    /// Refresh expired credentials. Called once per authorization failure
    /// before the regular retry path takes over.
    async fn refresh_credentials(&self) -> WorkerResult<()>;
}

/// Pluggable credential source for [`HttpTransport`].
#[async_trait]
pub trait AuthTokenSource: Send + Sync {
    async fn fetch_token(&self) -> WorkerResult<String>;
}

/// HTTP/JSON implementation of [`TaskTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
    token_source: Option<Box<dyn AuthTokenSource>>,
}

/// Headroom granted on top of the server-side long-poll window before a poll
/// request is considered lost.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Client-side deadline for one batch poll. The server holds the request open
/// for up to the long-poll window, so the wire timeout must exceed it.
fn poll_request_timeout(timeout: Duration) -> Duration {
    timeout + POLL_TIMEOUT_MARGIN
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> WorkerResult<Self> {
        // Update calls answer immediately; batch polls override this
        // per request via poll_request_timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WorkerError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
            token_source: None,
        })
    }

    /// Attach a credential source used by `refresh_credentials`.
    pub fn with_token_source(mut self, source: Box<dyn AuthTokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self
            .token
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> WorkerResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(WorkerError::Authorization(format!(
                "server returned {}: {}",
                status, body
            )))
        } else {
            Err(WorkerError::Transport(format!(
                "server returned {}: {}",
                status, body
            )))
        }
    }
}

fn send_error(err: reqwest::Error) -> WorkerError {
    WorkerError::Transport(format!("Failed to send request: {}", err))
}

#[async_trait]
impl TaskTransport for HttpTransport {
    async fn batch_poll(
        &self,
        task_type: &str,
        worker_id: &str,
        domain: Option<&str>,
        count: usize,
        timeout: Duration,
    ) -> WorkerResult<Vec<Task>> {
        let url = format!("{}/tasks/poll/batch/{}", self.base_url, task_type);
        let mut request = self
            .client
            .get(&url)
            .timeout(poll_request_timeout(timeout))
            .query(&[
            ("workerid", worker_id.to_string()),
            ("count", count.to_string()),
            ("timeout", timeout.as_millis().to_string()),
        ]);
        if let Some(domain) = domain {
            request = request.query(&[("domain", domain)]);
        }

        let response = self.authorize(request).send().await.map_err(send_error)?;
        let response = Self::check_status(response).await?;

        // The server answers an idle poll with 204 / an empty body.
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let body = response.bytes().await.map_err(send_error)?;
        if body.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&body)
            .map_err(|e| WorkerError::Transport(format!("Invalid poll response: {}", e)))
    }

    async fn update_task(&self, result: &TaskResult) -> WorkerResult<()> {
        let url = format!("{}/tasks/update", self.base_url);
        let request = self.client.post(&url).json(result);
        let response = self.authorize(request).send().await.map_err(send_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn update_task_sync(&self, result: &TaskResult) -> WorkerResult<WorkflowState> {
        let url = format!("{}/tasks/update-sync", self.base_url);
        let request = self.client.post(&url).json(result);
        let response = self.authorize(request).send().await.map_err(send_error)?;
        let response = Self::check_status(response).await?;
        response
            .json::<WorkflowState>()
            .await
            .map_err(|e| WorkerError::Transport(format!("Invalid update response: {}", e)))
    }

    async fn refresh_credentials(&self) -> WorkerResult<()> {
        let source = self.token_source.as_ref().ok_or_else(|| {
            WorkerError::Authorization("no credential source configured".to_string())
        })?;
        let token = source.fetch_token().await?;
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token);
        }
        log::info!("Refreshed server credentials");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_deadline_outlasts_the_long_poll_window() {
        for secs in [0, 1, 10, 30, 120] {
            let window = Duration::from_secs(secs);
            assert!(poll_request_timeout(window) > window);
        }
    }
}
