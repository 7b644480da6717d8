//! Submit-then-poll driver for asynchronous remote jobs
//!
//! A [`JobPoller`] submits one job, queries its status on a fixed interval
//! until the vendor reports a terminal state or the wall-clock budget runs out,
//! and downloads the artifact exactly once on completion.
//!
//! Status queries for one job are strictly sequential: the next query is only
//! issued after the previous one returned and the poll interval elapsed.
//!
//! # Example
//!
//! ```no_run
//! use provider_fanout::config::PollingConfig;
//! use provider_fanout::poller::{JobClient, JobPoller};
//! use provider_fanout::progress::NoopProgressSink;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(client: &dyn JobClient) -> Result<(), Box<dyn std::error::Error>> {
//! let poller = JobPoller::new(PollingConfig::default())?;
//! let outcome = poller
//!     .run(
//!         client,
//!         &serde_json::json!({ "document": "report.pdf" }),
//!         Arc::new(NoopProgressSink),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("job {} finished: {:?}", outcome.job.id, outcome.job.result_ref);
//! # Ok(())
//! # }
//! ```

use crate::aggregator::{self, JobEnd};
use crate::config::PollingConfig;
use crate::error::{JobError, ProviderError, Result};
use crate::progress::{ProgressReporter, ProgressSink, SequenceCounter};
use crate::retry::with_retry;
use crate::types::{Event, Job, JobArtifact, JobId, JobOutcome, JobStatus, RemoteState, StatusReport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// Upper bound on a best-effort remote cancel call
const REMOTE_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress for a job is reported as a percentage
const PERCENT_TOTAL: usize = 100;

/// Client for one vendor's job API
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submit a job and return its handle
    async fn submit(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobId, ProviderError>;

    /// Query the job's current status
    async fn get_status(&self, job_id: &JobId) -> std::result::Result<StatusReport, ProviderError>;

    /// Retrieve the artifact of a completed job
    async fn download(&self, job_id: &JobId) -> std::result::Result<JobArtifact, ProviderError>;

    /// Ask the vendor to stop the job
    ///
    /// Returns `false` when the vendor has no cancel endpoint.
    async fn cancel(&self, job_id: &JobId) -> std::result::Result<bool, ProviderError> {
        let _ = job_id;
        Ok(false)
    }
}

#[async_trait]
impl<T: JobClient + ?Sized> JobClient for Arc<T> {
    async fn submit(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobId, ProviderError> {
        (**self).submit(payload, cancel).await
    }

    async fn get_status(&self, job_id: &JobId) -> std::result::Result<StatusReport, ProviderError> {
        (**self).get_status(job_id).await
    }

    async fn download(&self, job_id: &JobId) -> std::result::Result<JobArtifact, ProviderError> {
        (**self).download(job_id).await
    }

    async fn cancel(&self, job_id: &JobId) -> std::result::Result<bool, ProviderError> {
        (**self).cancel(job_id).await
    }
}

/// Drives remote jobs to a terminal state
#[derive(Clone, Debug)]
pub struct JobPoller {
    config: PollingConfig,
    sequence: SequenceCounter,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl JobPoller {
    /// Create a poller, rejecting out-of-range intervals and budgets
    pub fn new(config: PollingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config_unchecked(config))
    }

    /// Create a poller without range checks (sub-second intervals in tests and demos)
    pub fn with_config_unchecked(config: PollingConfig) -> Self {
        Self {
            config,
            sequence: SequenceCounter::new(),
            event_tx: None,
        }
    }

    /// Draw progress sequence numbers from a shared counter
    #[must_use]
    pub fn with_sequence(mut self, sequence: SequenceCounter) -> Self {
        self.sequence = sequence;
        self
    }

    /// Publish job lifecycle events on a broadcast channel
    #[must_use]
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Submit `payload` and wait for the job to finish
    ///
    /// Submit is called exactly once and download at most once. Every way the
    /// wait can end maps to exactly one [`JobError`] variant.
    pub async fn run<C>(
        &self,
        client: &C,
        payload: &serde_json::Value,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobOutcome, JobError>
    where
        C: JobClient + ?Sized,
    {
        let job_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Cancelled before the job was accepted");
                return Err(aggregator::submission_failed("cancelled before the job was accepted"));
            }
            submitted = client.submit(payload, cancel) => match submitted {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, code = e.kind.code(), "Job submission failed");
                    return Err(aggregator::submission_failed(e));
                }
            },
        };

        let started = Instant::now();
        let mut job = Job::submitted(job_id.clone());
        info!(
            job_id = %job_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_wait_ms = self.config.max_wait.as_millis() as u64,
            "Job submitted"
        );
        self.send(Event::JobSubmitted {
            job_id: job_id.clone(),
        });

        let reporter = ProgressReporter::new(sink, self.sequence.clone(), PERCENT_TOTAL);
        let end = self
            .wait(client, &mut job, &reporter, started, cancel)
            .await;

        if matches!(end, JobEnd::Cancelled) && self.config.cancel_remote_on_abort {
            self.cancel_remote(client, &job_id).await;
        }

        let outcome = aggregator::finish_job(job, end);
        self.record_finished(&job_id, &outcome, started.elapsed());
        outcome
    }

    /// Poll until something terminal happens
    async fn wait<C>(
        &self,
        client: &C,
        job: &mut Job,
        reporter: &ProgressReporter,
        started: Instant,
        cancel: &CancellationToken,
    ) -> JobEnd
    where
        C: JobClient + ?Sized,
    {
        let job_id = job.id.clone();
        let label = job_id.to_string();
        let deadline = started + self.config.max_wait;
        let mut polls: u32 = 0;

        loop {
            job.transition(JobStatus::Polling);

            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => return JobEnd::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return JobEnd::TimedOut(started.elapsed()),
                polled = with_retry(&self.config.status_retry, || client.get_status(&job_id)) => {
                    match polled {
                        Ok((report, _attempts)) => report,
                        Err((e, attempts)) => {
                            error!(job_id = %job_id, error = %e, attempts, "Status query failed");
                            return JobEnd::PollingFailed {
                                reason: e.to_string(),
                                attempts,
                            };
                        }
                    }
                }
            };

            polls += 1;
            job.record_poll(&report);
            debug!(
                job_id = %job_id,
                poll = polls,
                status = %report.status,
                percentage = ?report.percentage,
                "Polled job status"
            );

            if let Some(percentage) = report.percentage {
                reporter.advance_to(usize::from(percentage), &label);
                self.send(Event::JobProgress {
                    job_id: job_id.clone(),
                    percentage: percentage.min(100),
                });
            }

            match report.state() {
                RemoteState::Completed => {
                    return tokio::select! {
                        biased;
                        _ = cancel.cancelled() => JobEnd::Cancelled,
                        downloaded = client.download(&job_id) => match downloaded {
                            Ok(artifact) => JobEnd::Completed(artifact),
                            Err(e) => {
                                error!(job_id = %job_id, error = %e, "Artifact download failed");
                                JobEnd::DownloadFailed(e.to_string())
                            }
                        },
                    };
                }
                RemoteState::Failed => {
                    let StatusReport {
                        status, message, ..
                    } = report;
                    // Vendor reason verbatim; the raw status when there is none
                    let reason = message.filter(|m| !m.is_empty()).unwrap_or(status);
                    return JobEnd::Failed(reason);
                }
                RemoteState::Pending => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return JobEnd::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return JobEnd::TimedOut(started.elapsed()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn cancel_remote<C>(&self, client: &C, job_id: &JobId)
    where
        C: JobClient + ?Sized,
    {
        match tokio::time::timeout(REMOTE_CANCEL_TIMEOUT, client.cancel(job_id)).await {
            Ok(Ok(true)) => info!(job_id = %job_id, "Remote job cancelled"),
            Ok(Ok(false)) => debug!(job_id = %job_id, "Vendor has no cancel endpoint"),
            Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "Remote cancel failed"),
            Err(_) => warn!(job_id = %job_id, "Remote cancel timed out"),
        }
    }

    fn record_finished(
        &self,
        job_id: &JobId,
        outcome: &std::result::Result<JobOutcome, JobError>,
        elapsed: Duration,
    ) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let status = match outcome {
            Ok(done) => {
                info!(
                    job_id = %job_id,
                    elapsed_ms,
                    result_ref = ?done.job.result_ref,
                    "Job completed"
                );
                JobStatus::Completed
            }
            Err(e) => {
                warn!(job_id = %job_id, elapsed_ms, code = e.code(), error = %e, "Job did not complete");
                terminal_status(e)
            }
        };
        self.send(Event::JobFinished {
            job_id: job_id.clone(),
            status,
        });
    }

    fn send(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

/// The job state a given error leaves behind
fn terminal_status(error: &JobError) -> JobStatus {
    match error {
        JobError::Download { .. } => JobStatus::Completed,
        JobError::TimedOut { .. } => JobStatus::TimedOut,
        JobError::Cancelled { .. } => JobStatus::Cancelled,
        JobError::Submission { .. }
        | JobError::Failed { .. }
        | JobError::PollingTransport { .. } => JobStatus::Failed,
    }
}
