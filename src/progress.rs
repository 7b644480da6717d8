//! Progress reporting
//!
//! Progress flows from the engine into a [`ProgressSink`]. Counters live in a
//! [`ProgressReporter`] and are only ever advanced with atomic operations, so
//! concurrent completions can never lose an update.
//!
//! Observers that require a server-side ordering token (each notification
//! returns the token for the next one) are driven through a [`TokenRelay`]:
//! one background task owns the token and serializes every notification.

use crate::error::Result;
use crate::types::{Event, ProgressEvent};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};

/// Receives ordered progress events
///
/// `emit` must not block; sinks that do I/O hand the event to a task.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: ProgressEvent);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Publishes events as [`Event::Progress`] on a broadcast channel
#[derive(Clone, Debug)]
pub struct BroadcastProgressSink {
    event_tx: broadcast::Sender<Event>,
}

impl BroadcastProgressSink {
    /// Wrap an existing broadcast sender
    pub fn new(event_tx: broadcast::Sender<Event>) -> Self {
        Self { event_tx }
    }
}

impl ProgressSink for BroadcastProgressSink {
    fn emit(&self, event: ProgressEvent) {
        // No subscribers is not an error
        self.event_tx.send(Event::Progress(event)).ok();
    }
}

/// Forwards events to a single consumer
#[derive(Clone, Debug)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    /// Create the sink and its receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Progress receiver dropped, discarding event");
        }
    }
}

/// Shared, monotonically increasing sequence source
#[derive(Clone, Debug, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Start a new counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next sequence number
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// Sequence numbers handed out so far
    pub fn issued(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds progress events for one operation
///
/// `completed` only moves forward and saturates at `total`.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    sequence: SequenceCounter,
    completed: AtomicUsize,
    total: usize,
}

impl ProgressReporter {
    /// Reporter for an operation with `total` units
    pub fn new(sink: Arc<dyn ProgressSink>, sequence: SequenceCounter, total: usize) -> Self {
        Self {
            sink,
            sequence,
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// One unit settled: bump the counter and emit
    pub fn settle(&self, label: &str) -> ProgressEvent {
        let total = self.total;
        let previous = self
            .completed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some((c + 1).min(total))
            })
            .unwrap_or(total);
        let completed = (previous + 1).min(total);
        self.emit(completed, label)
    }

    /// Absolute progress (e.g. a job percentage); never moves backwards
    pub fn advance_to(&self, completed: usize, label: &str) -> ProgressEvent {
        let target = completed.min(self.total);
        let previous = self.completed.fetch_max(target, Ordering::SeqCst);
        self.emit(previous.max(target), label)
    }

    /// Units settled so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Units in total
    pub fn total(&self) -> usize {
        self.total
    }

    fn emit(&self, completed: usize, label: &str) -> ProgressEvent {
        let event = ProgressEvent {
            sequence: self.sequence.next(),
            completed,
            total: self.total,
            label: label.to_string(),
        };
        self.sink.emit(event.clone());
        event
    }
}

/// Observer that threads an ordering token through notifications
///
/// Each call receives the token returned by the previous call (`None` for the
/// first one) and returns the token for the next.
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    /// Deliver one notification
    async fn notify(
        &self,
        token: Option<u64>,
        label: &str,
        completed: usize,
        total: usize,
    ) -> Result<u64>;
}

/// Single-writer bridge from a [`ProgressSink`] to a [`ProgressNotifier`]
///
/// Events are queued in emission order and delivered one at a time by a
/// background task, which is the only place the token is read or written.
pub struct TokenRelay {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    task: tokio::task::JoinHandle<Option<u64>>,
}

impl TokenRelay {
    /// Spawn the delivery task
    pub fn spawn(notifier: Arc<dyn ProgressNotifier>, initial_token: Option<u64>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();

        let task = tokio::spawn(async move {
            let mut token = initial_token;
            while let Some(event) = rx.recv().await {
                match notifier
                    .notify(token, &event.label, event.completed, event.total)
                    .await
                {
                    Ok(next) => token = Some(next),
                    Err(e) => {
                        // Keep the previous token so the next notification stays in order
                        tracing::warn!(
                            error = %e,
                            sequence = event.sequence,
                            "Progress notification failed"
                        );
                    }
                }
            }
            token
        });

        Self { tx, task }
    }

    /// Stop accepting events, deliver the queued ones, and return the last token
    pub async fn finish(self) -> Option<u64> {
        drop(self.tx);
        match self.task.await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "Progress relay task panicked");
                None
            }
        }
    }
}

impl ProgressSink for TokenRelay {
    fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Progress relay stopped, discarding event");
        }
    }
}
