//! Concurrent fan-out of one logical request to many providers.
//!
//! Every request is dispatched at once (or as soon as a permit is free when a
//! concurrency cap is configured). Each invocation runs inside its own failure
//! boundary: errors, panics and per-call timeouts become a failed
//! [`ProviderResult`] for that provider and never touch its siblings.
//!
//! Progress events are emitted in completion order; the returned list keeps
//! submission order.

use crate::aggregator::{self, FanOutSummary};
use crate::config::FanOutConfig;
use crate::error::ProviderError;
use crate::invoker::ProviderInvoker;
use crate::progress::{ProgressReporter, ProgressSink, SequenceCounter};
use crate::types::{Event, ProviderRequest, ProviderResult};
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Runs provider invocations concurrently and collects their results
#[derive(Clone, Debug)]
pub struct FanOutCoordinator {
    config: FanOutConfig,
    /// Counting semaphore capping simultaneous calls (shared when cloned)
    limiter: Option<Arc<Semaphore>>,
    sequence: SequenceCounter,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl FanOutCoordinator {
    /// Create a coordinator; a configured `max_concurrency` creates its own limiter
    pub fn new(config: FanOutConfig) -> Self {
        let limiter = config
            .max_concurrency
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));
        Self {
            config,
            limiter,
            sequence: SequenceCounter::new(),
            event_tx: None,
        }
    }

    /// Share a limiter with other components hitting the same downstream resource
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Draw progress sequence numbers from a shared counter
    #[must_use]
    pub fn with_sequence(mut self, sequence: SequenceCounter) -> Self {
        self.sequence = sequence;
        self
    }

    /// Publish failure and summary events on a broadcast channel
    #[must_use]
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Fan out and return the results the next stage should see
    ///
    /// Failed results are dropped unless `include_failures` is configured;
    /// either way the order is submission order.
    pub async fn execute<I>(
        &self,
        requests: Vec<ProviderRequest>,
        invoker: &I,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult>
    where
        I: ProviderInvoker + ?Sized,
    {
        let results = self.execute_all(requests, invoker, sink, cancel).await;
        aggregator::surface(results, self.config.include_failures)
    }

    /// Fan out and return one result per request, in submission order
    ///
    /// Requests still outstanding when `cancel` fires are abandoned and reported
    /// as cancelled failures.
    pub async fn execute_all<I>(
        &self,
        requests: Vec<ProviderRequest>,
        invoker: &I,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult>
    where
        I: ProviderInvoker + ?Sized,
    {
        let total = requests.len();
        if total == 0 {
            return Vec::new();
        }

        tracing::debug!(
            total,
            per_call_timeout_ms = self.config.per_call_timeout.as_millis() as u64,
            max_concurrency = ?self.config.max_concurrency,
            "Starting fan-out"
        );

        let reporter = ProgressReporter::new(sink, self.sequence.clone(), total);
        let mut slots: Vec<Option<ProviderResult>> = vec![None; total];

        {
            let mut pending: FuturesUnordered<_> = requests
                .iter()
                .enumerate()
                .map(|(index, request)| self.invoke_one(index, request, invoker, cancel))
                .collect();

            // Single consumer: completions are recorded one at a time in the order they finish
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::warn!(
                            settled = reporter.completed(),
                            total,
                            "Fan-out cancelled, abandoning outstanding provider calls"
                        );
                        break;
                    }
                    next = pending.next() => {
                        let Some((index, result)) = next else { break };
                        self.record_settled(&requests[index], &result);
                        reporter.settle(requests[index].label());
                        slots[index] = Some(result);
                    }
                }
            }
        }

        let results: Vec<ProviderResult> = slots
            .into_iter()
            .zip(&requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    ProviderResult::failure(
                        request.provider_id.clone(),
                        ProviderError::cancelled(),
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        let summary = aggregator::summarize(&results);
        self.record_summary(summary);
        results
    }

    /// One invocation inside its failure boundary
    async fn invoke_one<I>(
        &self,
        index: usize,
        request: &ProviderRequest,
        invoker: &I,
        cancel: &CancellationToken,
    ) -> (usize, ProviderResult)
    where
        I: ProviderInvoker + ?Sized,
    {
        let provider_id = request.provider_id.clone();

        // Held until this unit settles, whatever the outcome
        let _permit = match &self.limiter {
            Some(limiter) => {
                tokio::select! {
                    permit = Arc::clone(limiter).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            let error = ProviderError::transport("concurrency limiter closed");
                            return (index, ProviderResult::failure(provider_id, error, Duration::ZERO));
                        }
                    },
                    _ = cancel.cancelled() => {
                        return (
                            index,
                            ProviderResult::failure(provider_id, ProviderError::cancelled(), Duration::ZERO),
                        );
                    }
                }
            }
            None => None,
        };

        tracing::debug!(provider = %provider_id, "Dispatching provider call");

        let call_cancel = cancel.child_token();
        let per_call_timeout = self.config.per_call_timeout;
        let invocation = async {
            let call = AssertUnwindSafe(invoker.invoke(request, &call_cancel)).catch_unwind();
            match tokio::time::timeout(per_call_timeout, call).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => Err(ProviderError::panicked(panic_message(&*panic))),
                Err(_) => {
                    // Let a cooperative invoker stop its I/O
                    call_cancel.cancel();
                    Err(ProviderError::timeout())
                }
            }
        };

        (index, aggregator::measure(provider_id, invocation).await)
    }

    fn record_settled(&self, request: &ProviderRequest, result: &ProviderResult) {
        let elapsed_ms = result.elapsed().as_millis() as u64;
        match result.error() {
            None => {
                tracing::debug!(provider = %request.provider_id, elapsed_ms, "Provider call succeeded");
            }
            Some(error) => {
                tracing::warn!(
                    provider = %request.provider_id,
                    elapsed_ms,
                    code = error.kind.code(),
                    status_code = ?error.status_code,
                    vendor_message = ?error.vendor_message,
                    error = %error,
                    "Provider call failed"
                );
                if let Some(tx) = &self.event_tx {
                    tx.send(Event::ProviderFailed {
                        provider: request.provider_id.clone(),
                        error: error.to_string(),
                    })
                    .ok();
                }
            }
        }
    }

    fn record_summary(&self, summary: FanOutSummary) {
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Fan-out complete"
        );
        if let Some(tx) = &self.event_tx {
            tx.send(Event::FanOutComplete {
                total: summary.total,
                succeeded: summary.succeeded,
                failed: summary.failed,
            })
            .ok();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("provider invocation panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("provider invocation panicked: {s}")
    } else {
        "provider invocation panicked".to_string()
    }
}
