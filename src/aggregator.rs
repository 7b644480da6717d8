//! Outcome classification shared by the fan-out and the job poller
//!
//! Per-provider outcomes are plain `Result`s turned into [`ProviderResult`]s;
//! aggregation is a filter over those values. Terminal jobs are turned into
//! either a [`JobOutcome`] or exactly one [`JobError`] variant.

use crate::error::{JobError, ProviderError};
use crate::types::{Job, JobArtifact, JobOutcome, JobStatus, ProviderId, ProviderResult};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How an outcome is treated by the next stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Surfaced to the caller
    Success,
    /// Retained for logging, dropped from the useful output
    Skip,
    /// Aborts the whole operation
    Fatal,
}

/// Run one invocation and time it from just before the call until it settles
pub async fn measure<F>(provider_id: ProviderId, invocation: F) -> ProviderResult
where
    F: Future<Output = Result<serde_json::Value, ProviderError>>,
{
    let started = Instant::now();
    let outcome = invocation.await;
    from_outcome(provider_id, outcome, started.elapsed())
}

/// Convert a raw outcome into a result
pub fn from_outcome(
    provider_id: ProviderId,
    outcome: Result<serde_json::Value, ProviderError>,
    elapsed: Duration,
) -> ProviderResult {
    match outcome {
        Ok(payload) => ProviderResult::success(provider_id, payload, elapsed),
        Err(error) => ProviderResult::failure(provider_id, error, elapsed),
    }
}

/// Provider failures never abort a fan-out
pub fn classify(result: &ProviderResult) -> Classification {
    if result.succeeded() {
        Classification::Success
    } else {
        Classification::Skip
    }
}

/// Keep only what the next stage should see, preserving order
pub fn surface(results: Vec<ProviderResult>, include_failures: bool) -> Vec<ProviderResult> {
    if include_failures {
        return results;
    }
    results
        .into_iter()
        .filter(|r| classify(r) == Classification::Success)
        .collect()
}

/// Counts over one fan-out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FanOutSummary {
    /// Requests dispatched
    pub total: usize,
    /// Successful invocations
    pub succeeded: usize,
    /// Failed invocations (including timeouts)
    pub failed: usize,
    /// Failures caused by the per-call timeout
    pub timed_out: usize,
}

/// Summarize a full (unfiltered) result list
pub fn summarize(results: &[ProviderResult]) -> FanOutSummary {
    results
        .iter()
        .fold(FanOutSummary::default(), |mut summary, result| {
            summary.total += 1;
            match result.error() {
                None => summary.succeeded += 1,
                Some(e) => {
                    summary.failed += 1;
                    if e.is_timeout() {
                        summary.timed_out += 1;
                    }
                }
            }
            summary
        })
}

/// How a job's wait ended
#[derive(Debug)]
pub enum JobEnd {
    /// Completed and downloaded
    Completed(JobArtifact),
    /// Completed but the download failed
    DownloadFailed(String),
    /// Remote failure with the vendor's reason
    Failed(String),
    /// Wall-clock budget elapsed
    TimedOut(Duration),
    /// Local wait cancelled
    Cancelled,
    /// Status query failed at the transport level
    PollingFailed {
        /// Last transport error
        reason: String,
        /// Attempts made for the failing tick
        attempts: u32,
    },
}

/// Classify a job by its state
pub fn classify_job(job: &Job) -> Classification {
    match job.status {
        JobStatus::Completed => Classification::Success,
        JobStatus::Submitted | JobStatus::Polling => Classification::Skip,
        JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled => Classification::Fatal,
    }
}

/// Error for a submit call that never produced a job
pub fn submission_failed(reason: impl std::fmt::Display) -> JobError {
    JobError::Submission {
        reason: reason.to_string(),
    }
}

/// Move the job to its terminal state and produce the typed outcome
pub fn finish_job(mut job: Job, end: JobEnd) -> Result<JobOutcome, JobError> {
    let job_id = job.id.clone();
    match end {
        JobEnd::Completed(artifact) => {
            job.transition(JobStatus::Completed);
            job.result_ref = Some(describe_artifact(&artifact));
            Ok(JobOutcome { job, artifact })
        }
        JobEnd::DownloadFailed(reason) => {
            job.transition(JobStatus::Completed);
            Err(JobError::Download { job_id, reason })
        }
        JobEnd::Failed(reason) => {
            job.transition(JobStatus::Failed);
            Err(JobError::Failed { job_id, reason })
        }
        JobEnd::TimedOut(waited) => {
            job.transition(JobStatus::TimedOut);
            Err(JobError::TimedOut { job_id, waited })
        }
        JobEnd::Cancelled => {
            job.transition(JobStatus::Cancelled);
            Err(JobError::Cancelled { job_id })
        }
        JobEnd::PollingFailed { reason, attempts } => {
            job.transition(JobStatus::Failed);
            Err(JobError::PollingTransport {
                job_id,
                reason,
                attempts,
            })
        }
    }
}

fn describe_artifact(artifact: &JobArtifact) -> String {
    match artifact {
        JobArtifact::Bytes(bytes) => format!("bytes:{}", bytes.len()),
        JobArtifact::Urls(urls) => urls
            .first()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "urls:0".to_string()),
    }
}
