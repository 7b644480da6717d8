//! # provider-fanout
//!
//! Concurrent fan-out of one request to many providers, plus a submit-then-poll
//! driver for asynchronous remote jobs.
//!
//! ## Design Philosophy
//!
//! provider-fanout is designed to be:
//! - **Failure-isolated** - One provider's error, panic or timeout never affects its siblings
//! - **Bounded** - Wall time is capped by the slowest call (or the per-call timeout)
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to progress and lifecycle events
//!
//! ## Quick Start
//!
//! ```no_run
//! use provider_fanout::{Config, Orchestrator, ProviderRegistry, ProviderRequest};
//! use provider_fanout::invoker::FnInvoker;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ProviderRegistry::builder()
//!         .register("echo", FnInvoker::new(|request, _cancel| async move {
//!             Ok(request.payload)
//!         }))
//!         .build();
//!
//!     let orchestrator = Orchestrator::new(Config::default(), registry)?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let results = orchestrator
//!         .fan_out(
//!             vec![ProviderRequest::new("echo", json!({ "prompt": "hello" }))],
//!             &CancellationToken::new(),
//!         )
//!         .await;
//!     println!("{} useful result(s)", results.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Outcome classification and aggregation
pub mod aggregator;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Concurrent provider fan-out
pub mod fanout;
/// HTTP-backed invokers and job clients
pub mod http;
/// Provider invocation boundary and registry
pub mod invoker;
/// High-level entry point
pub mod orchestrator;
/// Asynchronous job polling
pub mod poller;
/// Progress reporting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, FanOutConfig, PollingConfig, RetryConfig};
pub use error::{Error, JobError, ProviderError, ProviderErrorKind, Result};
pub use fanout::FanOutCoordinator;
pub use invoker::{ProviderInvoker, ProviderRegistry};
pub use orchestrator::Orchestrator;
pub use poller::{JobClient, JobPoller};
pub use progress::{ProgressSink, TokenRelay};
pub use types::{
    Event, Job, JobArtifact, JobId, JobOutcome, JobStatus, ProgressEvent, ProviderId, ProviderOptions,
    ProviderRequest, ProviderResult, StatusReport,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives SIGTERM or SIGINT
///
/// Spawns a background task and returns immediately. Every fan-out and job
/// wait driven by `token` (or one of its children) unwinds on the signal.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let shutdown = CancellationToken::new();
/// provider_fanout::cancel_on_shutdown_signal(shutdown.clone());
/// shutdown.cancelled().await;
/// # }
/// ```
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Shutdown signal received, cancelling outstanding work");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
