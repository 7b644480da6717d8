//! Core types for provider-fanout

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ProviderError;

/// Identifier of a provider (e.g. "openai", "gemini", "stability")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Create a new ProviderId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProviderId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Per-provider configuration passed through verbatim (reasoning effort, thinking budget...)
pub type ProviderOptions = HashMap<ProviderId, serde_json::Value>;

/// One unit of work for one provider
///
/// Immutable once dispatched: the coordinator only hands out shared references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Provider that should execute this request
    pub provider_id: ProviderId,
    /// Opaque request payload
    pub payload: serde_json::Value,
    /// Provider-specific options, if any were configured for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    /// Human-readable label used in progress events (defaults to the provider id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ProviderRequest {
    /// Create a request without options
    pub fn new(provider_id: impl Into<ProviderId>, payload: serde_json::Value) -> Self {
        Self {
            provider_id: provider_id.into(),
            payload,
            options: None,
            label: None,
        }
    }

    /// Set explicit options for this request
    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Pick this provider's entry out of a shared options map
    #[must_use]
    pub fn with_options_from(mut self, options: &ProviderOptions) -> Self {
        self.options = options.get(&self.provider_id).cloned();
        self
    }

    /// Set the progress label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label shown in progress events
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(self.provider_id.as_str())
    }

    /// Build one request per provider sharing the same payload
    pub fn broadcast<I, P>(
        providers: I,
        payload: &serde_json::Value,
        options: &ProviderOptions,
    ) -> Vec<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<ProviderId>,
    {
        providers
            .into_iter()
            .map(|p| Self::new(p, payload.clone()).with_options_from(options))
            .collect()
    }
}

/// Settled outcome of one provider invocation
///
/// Exactly one of payload/error is present; the constructors are the only way
/// to build a result, so the invariant holds by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResult {
    provider_id: ProviderId,
    outcome: Result<serde_json::Value, ProviderError>,
    elapsed: Duration,
}

impl ProviderResult {
    /// A successful invocation
    pub fn success(provider_id: ProviderId, payload: serde_json::Value, elapsed: Duration) -> Self {
        Self {
            provider_id,
            outcome: Ok(payload),
            elapsed,
        }
    }

    /// A failed invocation
    pub fn failure(provider_id: ProviderId, error: ProviderError, elapsed: Duration) -> Self {
        let error = error.for_provider(&provider_id);
        Self {
            provider_id,
            outcome: Err(error),
            elapsed,
        }
    }

    /// Provider this result belongs to
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    /// Whether the invocation succeeded
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Success payload (present iff succeeded)
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.outcome.as_ref().ok()
    }

    /// Failure (present iff not succeeded)
    pub fn error(&self) -> Option<&ProviderError> {
        self.outcome.as_ref().err()
    }

    /// Time from just before the call to just after it settled
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Consume the result into its outcome
    pub fn into_outcome(self) -> Result<serde_json::Value, ProviderError> {
        self.outcome
    }
}

/// Wire shape of a [`ProviderResult`]
#[derive(Serialize, Deserialize)]
struct ProviderResultRepr {
    provider_id: ProviderId,
    succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ProviderError>,
    elapsed_ms: u64,
}

impl Serialize for ProviderResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ProviderResultRepr {
            provider_id: self.provider_id.clone(),
            succeeded: self.succeeded(),
            payload: self.payload().cloned(),
            error: self.error().cloned(),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProviderResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ProviderResultRepr::deserialize(deserializer)?;
        let elapsed = Duration::from_millis(repr.elapsed_ms);
        match (repr.succeeded, repr.payload, repr.error) {
            (true, Some(payload), None) => {
                Ok(ProviderResult::success(repr.provider_id, payload, elapsed))
            }
            (false, None, Some(error)) => {
                Ok(ProviderResult::failure(repr.provider_id, error, elapsed))
            }
            _ => Err(serde::de::Error::custom(
                "exactly one of payload/error must be set, matching `succeeded`",
            )),
        }
    }
}

/// Opaque handle returned by a remote submit call
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a remote job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submit call returned a job id
    Submitted,
    /// Waiting for the remote job to finish
    Polling,
    /// Remote job finished successfully
    Completed,
    /// Remote job reported failure or was cancelled remotely
    Failed,
    /// Wall-clock budget exceeded
    TimedOut,
    /// Local wait cancelled
    Cancelled,
}

impl JobStatus {
    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Polling => "polling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Classification of a vendor status string
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteState {
    /// `completed`, `done`
    Completed,
    /// `failed`, `error`, `canceled`, `cancelled`
    Failed,
    /// Anything else, including `queued`, `processing` and unknown strings
    Pending,
}

impl RemoteState {
    /// Classify a vendor status string (case-insensitive, surrounding whitespace ignored)
    pub fn classify(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "done" => RemoteState::Completed,
            "failed" | "error" | "canceled" | "cancelled" => RemoteState::Failed,
            _ => RemoteState::Pending,
        }
    }
}

/// Response of a status query
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Vendor status string
    pub status: String,
    /// Progress percentage (0-100), if the vendor reports one
    #[serde(
        default,
        alias = "progress",
        deserialize_with = "lenient_percentage",
        skip_serializing_if = "Option::is_none"
    )]
    pub percentage: Option<u8>,
    /// Vendor-reported failure message, if any
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Vendors report progress as integers, floats or strings; anything unreadable is dropped
fn lenient_percentage<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(percentage_from_value))
}

fn percentage_from_value(value: &serde_json::Value) -> Option<u8> {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    // Truncates, so 99.5 never reads as done
    Some(raw.clamp(0.0, 100.0) as u8)
}

impl StatusReport {
    /// Report with only a status string
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            percentage: None,
            message: None,
        }
    }

    /// Attach a percentage (clamped to 100)
    #[must_use]
    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = Some(percentage.min(100));
        self
    }

    /// Attach a vendor message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Classified state of this report
    pub fn state(&self) -> RemoteState {
        RemoteState::classify(&self.status)
    }
}

/// Artifact retrieved from a completed job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobArtifact {
    /// Raw bytes of the result
    Bytes(Vec<u8>),
    /// URLs where the result can be fetched
    Urls(Vec<url::Url>),
}

/// A remote asynchronous job tracked by the poller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Handle returned by submit
    pub id: JobId,
    /// Current state
    pub status: JobStatus,
    /// When submit returned
    pub created_at: DateTime<Utc>,
    /// When the last status query returned
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Last reported progress (0-100)
    pub percentage: Option<u8>,
    /// Reference to the result (set only when Completed)
    pub result_ref: Option<String>,
}

impl Job {
    /// A freshly submitted job
    pub fn submitted(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Submitted,
            created_at: Utc::now(),
            last_polled_at: None,
            percentage: None,
            result_ref: None,
        }
    }

    /// Move to `next`; refused once a terminal state has been reached
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() {
            tracing::warn!(
                job_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring transition out of terminal job state"
            );
            return false;
        }
        self.status = next;
        true
    }

    /// Record a status report
    pub fn record_poll(&mut self, report: &StatusReport) {
        self.last_polled_at = Some(Utc::now());
        if let Some(p) = report.percentage {
            self.percentage = Some(p.min(100));
        }
    }
}

/// Completed job plus its downloaded artifact
#[derive(Clone, Debug, PartialEq)]
pub struct JobOutcome {
    /// Final job snapshot (status is always Completed)
    pub job: Job,
    /// Retrieved artifact, owned by the caller
    pub artifact: JobArtifact,
}

/// Progress notification
///
/// `completed` never decreases within one fan-out and never exceeds `total`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonically increasing sequence number
    pub sequence: u64,
    /// Units settled so far
    pub completed: usize,
    /// Units in total
    pub total: usize,
    /// Human-readable label of the unit that just settled
    pub label: String,
}

/// Events broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A unit of work settled
    Progress(ProgressEvent),

    /// A provider invocation failed (dropped from the useful output)
    ProviderFailed {
        /// Provider that failed
        provider: ProviderId,
        /// Error text
        error: String,
    },

    /// A fan-out finished
    FanOutComplete {
        /// Requests dispatched
        total: usize,
        /// Successful invocations
        succeeded: usize,
        /// Failed invocations
        failed: usize,
    },

    /// A job was accepted by the remote service
    JobSubmitted {
        /// Job handle
        job_id: JobId,
    },

    /// A job reported progress
    JobProgress {
        /// Job handle
        job_id: JobId,
        /// Percentage (0-100)
        percentage: u8,
    },

    /// A job reached a terminal state
    JobFinished {
        /// Job handle
        job_id: JobId,
        /// Terminal state
        status: JobStatus,
    },
}
