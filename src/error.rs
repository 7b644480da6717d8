//! Error types for provider-fanout
//!
//! This module provides the error taxonomy for the engine:
//! - [`ProviderError`] - one provider's call failed (recovered locally by the fan-out)
//! - [`JobError`] - a remote job could not be submitted, polled, finished or downloaded
//! - [`Error`] - crate-wide error wrapping both plus configuration and transport failures
//!
//! Every error carries a machine-readable code (see [`Error::code`]) for log fields.

use crate::types::{JobId, ProviderId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for provider-fanout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for provider-fanout
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "polling.max_wait")
        key: Option<String>,
    },

    /// A single provider invocation failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// An asynchronous job did not produce an artifact
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Provider(e) => e.kind.code(),
            Error::Job(e) => e.code(),
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidUrl(_) => "invalid_url",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Category of a provider failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Connection, DNS, TLS or other transport-level failure
    Transport,
    /// The vendor answered with an error status or error payload
    Vendor,
    /// The vendor answered successfully but the body could not be understood
    Malformed,
    /// The per-call timeout elapsed
    Timeout,
    /// The fan-out was cancelled before this call settled
    Cancelled,
    /// No invoker is registered for the provider id
    UnknownProvider,
    /// The invoker panicked
    Panicked,
}

impl ProviderErrorKind {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ProviderErrorKind::Transport => "provider_transport_error",
            ProviderErrorKind::Vendor => "provider_vendor_error",
            ProviderErrorKind::Malformed => "provider_malformed_response",
            ProviderErrorKind::Timeout => "provider_timeout",
            ProviderErrorKind::Cancelled => "provider_cancelled",
            ProviderErrorKind::UnknownProvider => "unknown_provider",
            ProviderErrorKind::Panicked => "provider_panicked",
        }
    }
}

/// Failure of one provider invocation
///
/// Carries enough detail (status code, vendor message) to be logged without
/// the original response. The `Display` output of a timeout is exactly `timeout`.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ProviderError {
    /// Provider the failure belongs to (empty until the coordinator attaches it)
    #[serde(default)]
    pub provider: Option<ProviderId>,
    /// Failure category
    pub kind: ProviderErrorKind,
    /// HTTP status code reported by the vendor, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Error message reported by the vendor, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_message: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl ProviderError {
    fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: None,
            kind,
            status_code: None,
            vendor_message: None,
            message: message.into(),
        }
    }

    /// Transport-level failure (connection refused, reset, DNS...)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message)
    }

    /// Vendor-reported failure with HTTP status and optional vendor message
    pub fn vendor(status_code: u16, vendor_message: Option<String>) -> Self {
        let message = match &vendor_message {
            Some(m) => format!("vendor returned status {status_code}: {m}"),
            None => format!("vendor returned status {status_code}"),
        };
        Self {
            status_code: Some(status_code),
            vendor_message,
            ..Self::new(ProviderErrorKind::Vendor, message)
        }
    }

    /// Response body could not be interpreted
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Malformed, message)
    }

    /// The per-call timeout elapsed
    pub fn timeout() -> Self {
        Self::new(ProviderErrorKind::Timeout, "timeout")
    }

    /// The call was abandoned because the fan-out was cancelled
    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "cancelled")
    }

    /// No invoker registered under this id
    pub fn unknown_provider(provider: &ProviderId) -> Self {
        Self {
            provider: Some(provider.clone()),
            ..Self::new(
                ProviderErrorKind::UnknownProvider,
                format!("no invoker registered for provider {provider}"),
            )
        }
    }

    /// The invoker panicked instead of returning
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Panicked, message)
    }

    /// Attach the provider id (keeps an id that is already set)
    pub fn for_provider(mut self, provider: &ProviderId) -> Self {
        if self.provider.is_none() {
            self.provider = Some(provider.clone());
        }
        self
    }

    /// Whether the per-call timeout caused this failure
    pub fn is_timeout(&self) -> bool {
        self.kind == ProviderErrorKind::Timeout
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::timeout();
        }
        if e.is_decode() {
            return Self::malformed(e.to_string());
        }
        match e.status() {
            Some(status) => Self::vendor(status.as_u16(), None),
            None => Self::transport(e.to_string()),
        }
    }
}

/// Failures of a job-style operation
///
/// A job that never finished ([`JobError::TimedOut`]) is not a job that
/// finished badly ([`JobError::Failed`]); a job that was never accepted is
/// [`JobError::Submission`].
#[derive(Debug, Error)]
pub enum JobError {
    /// The initial submit call failed; no polling took place
    #[error("job submission failed: {reason}")]
    Submission {
        /// Why the submit call failed
        reason: String,
    },

    /// A status query failed at the transport level
    #[error("status query for job {job_id} failed after {attempts} attempt(s): {reason}")]
    PollingTransport {
        /// The job being polled
        job_id: JobId,
        /// Transport error text from the last attempt
        reason: String,
        /// Number of status calls attempted for this tick
        attempts: u32,
    },

    /// The remote job reached a failure or cancelled status
    #[error("job {job_id} failed: {reason}")]
    Failed {
        /// The failed job
        job_id: JobId,
        /// Failure reason exactly as reported by the vendor
        reason: String,
    },

    /// The wall-clock budget elapsed while the job was still running
    #[error("job {job_id} did not finish within {waited:?}")]
    TimedOut {
        /// The job that was abandoned
        job_id: JobId,
        /// How long the poller waited
        waited: Duration,
    },

    /// The local wait was cancelled
    #[error("waiting for job {job_id} was cancelled")]
    Cancelled {
        /// The job whose wait was cancelled
        job_id: JobId,
    },

    /// The job completed but its artifact could not be retrieved
    #[error("job {job_id} completed but download failed: {reason}")]
    Download {
        /// The completed job
        job_id: JobId,
        /// Why the download failed
        reason: String,
    },
}

impl JobError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Submission { .. } => "job_submission_failed",
            JobError::PollingTransport { .. } => "job_polling_failed",
            JobError::Failed { .. } => "job_failed",
            JobError::TimedOut { .. } => "job_timed_out",
            JobError::Cancelled { .. } => "job_cancelled",
            JobError::Download { .. } => "job_download_failed",
        }
    }

    /// The job this error refers to, if one was ever created
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobError::Submission { .. } => None,
            JobError::PollingTransport { job_id, .. }
            | JobError::Failed { job_id, .. }
            | JobError::TimedOut { job_id, .. }
            | JobError::Cancelled { job_id }
            | JobError::Download { job_id, .. } => Some(job_id),
        }
    }
}
