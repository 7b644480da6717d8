//! Scripted providers and job clients

use async_trait::async_trait;
use provider_fanout::invoker::FnInvoker;
use provider_fanout::{
    JobArtifact, JobClient, JobId, ProviderError, ProviderInvoker, ProviderRegistry,
    ProviderRequest, StatusReport,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Provider that succeeds with a deterministic payload after `delay`
pub fn delayed_success(name: &'static str, delay: Duration) -> impl ProviderInvoker + 'static {
    FnInvoker::new(move |request: ProviderRequest, cancel: CancellationToken| async move {
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            _ = tokio::time::sleep(delay) => Ok(json!({
                "provider": name,
                "echo": request.payload,
            })),
        }
    })
}

/// Provider that fails with `error` after `delay`
pub fn delayed_failure(delay: Duration, error: ProviderError) -> impl ProviderInvoker + 'static {
    FnInvoker::new(move |_request: ProviderRequest, _cancel: CancellationToken| {
        let error = error.clone();
        async move {
            tokio::time::sleep(delay).await;
            Err(error)
        }
    })
}

/// A fails immediately; B, C and D answer after 10, 50 and 100 ms
pub fn scenario_registry() -> ProviderRegistry {
    ProviderRegistry::builder()
        .register(
            "A",
            delayed_failure(
                Duration::ZERO,
                ProviderError::vendor(401, Some("invalid API key".into())),
            ),
        )
        .register("B", delayed_success("B", Duration::from_millis(10)))
        .register("C", delayed_success("C", Duration::from_millis(50)))
        .register("D", delayed_success("D", Duration::from_millis(100)))
        .build()
}

/// Requests for `ids` sharing one payload
pub fn requests_for(ids: &[&str], payload: Value) -> Vec<ProviderRequest> {
    ids.iter()
        .map(|id| ProviderRequest::new(*id, payload.clone()))
        .collect()
}

/// Job client replaying a fixed list of status responses
pub struct ScriptedJob {
    statuses: Mutex<VecDeque<StatusReport>>,
    fallback: StatusReport,
    artifact: JobArtifact,
    /// Status queries issued
    pub polls: AtomicUsize,
    /// Download calls issued
    pub downloads: AtomicUsize,
}

impl ScriptedJob {
    /// Replay `statuses`, then keep answering `processing`
    pub fn new(statuses: Vec<StatusReport>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            fallback: StatusReport::new("processing"),
            artifact: JobArtifact::Bytes(b"artifact".to_vec()),
            polls: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    /// A job that never reaches a terminal state
    pub fn endless() -> Self {
        Self::new(Vec::new())
    }

    /// Status queries issued so far
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Downloads issued so far
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobClient for ScriptedJob {
    async fn submit(
        &self,
        _payload: &Value,
        _cancel: &CancellationToken,
    ) -> Result<JobId, ProviderError> {
        Ok(JobId::from("scripted-job"))
    }

    async fn get_status(&self, _job_id: &JobId) -> Result<StatusReport, ProviderError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn download(&self, _job_id: &JobId) -> Result<JobArtifact, ProviderError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.artifact.clone())
    }
}
