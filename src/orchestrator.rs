//! Entry point tying the fan-out and the job poller to one configuration
//!
//! An [`Orchestrator`] owns the provider registry, the event channel and the
//! shared progress sequence. Progress from every operation it runs is published
//! as [`Event::Progress`] to all subscribers.

use crate::config::Config;
use crate::error::{JobError, Result};
use crate::fanout::FanOutCoordinator;
use crate::invoker::ProviderRegistry;
use crate::poller::{JobClient, JobPoller};
use crate::progress::{BroadcastProgressSink, ProgressSink, SequenceCounter};
use crate::types::{Event, JobOutcome, ProviderOptions, ProviderRequest, ProviderResult};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Runs fan-outs and remote jobs against a fixed set of providers
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    fan_out: FanOutCoordinator,
    poller: JobPoller,
    sequence: SequenceCounter,
    event_tx: broadcast::Sender<Event>,
}

impl Orchestrator {
    /// Validate `config` and wire up the shared channel and counters
    pub fn new(config: Config, registry: ProviderRegistry) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sequence = SequenceCounter::new();

        let fan_out = FanOutCoordinator::new(config.fan_out.clone())
            .with_sequence(sequence.clone())
            .with_events(event_tx.clone());
        let poller = JobPoller::new(config.polling.clone())?
            .with_sequence(sequence.clone())
            .with_events(event_tx.clone());

        tracing::info!(
            providers = registry.len(),
            per_call_timeout_ms = config.fan_out.per_call_timeout.as_millis() as u64,
            max_concurrency = ?config.fan_out.max_concurrency,
            "Orchestrator ready"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            fan_out,
            poller,
            sequence,
            event_tx,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registered providers
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Progress sequence numbers handed out so far
    pub fn progress_sequence(&self) -> u64 {
        self.sequence.issued()
    }

    /// Fan out `requests`, returning what the next stage should see
    pub async fn fan_out(
        &self,
        requests: Vec<ProviderRequest>,
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult> {
        self.fan_out
            .execute(requests, self.registry.as_ref(), self.progress_sink(), cancel)
            .await
    }

    /// Fan out `requests`, returning one result per request including failures
    pub async fn fan_out_all(
        &self,
        requests: Vec<ProviderRequest>,
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult> {
        self.fan_out
            .execute_all(requests, self.registry.as_ref(), self.progress_sink(), cancel)
            .await
    }

    /// Fan out with a caller-supplied progress sink instead of the event channel
    pub async fn fan_out_with_sink(
        &self,
        requests: Vec<ProviderRequest>,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult> {
        self.fan_out
            .execute(requests, self.registry.as_ref(), sink, cancel)
            .await
    }

    /// Send the same payload to every registered provider
    pub async fn broadcast(
        &self,
        payload: &serde_json::Value,
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult> {
        let requests = ProviderRequest::broadcast(self.registry.providers(), payload, options);
        self.fan_out(requests, cancel).await
    }

    /// Submit a job through `client` and wait for its artifact
    pub async fn run_job<C>(
        &self,
        client: &C,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobOutcome, JobError>
    where
        C: JobClient + ?Sized,
    {
        self.poller
            .run(client, payload, self.progress_sink(), cancel)
            .await
    }

    /// Subscribe to progress and lifecycle events
    ///
    /// Subscribers that fall more than the channel capacity behind receive a
    /// `Lagged` error and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a stream; lagged gaps are skipped
    pub fn subscribe_stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "Event subscriber lagged");
                    None
                }
            }
        })
    }

    fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        Arc::new(BroadcastProgressSink::new(self.event_tx.clone()))
    }
}
