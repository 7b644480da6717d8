//! Custom assertions over progress and events

use provider_fanout::{Event, JobId, JobStatus, ProgressEvent};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Everything currently queued on a progress channel
pub fn drain_progress(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// `completed` never decreases, never exceeds `total`, and ends at `total`
pub fn assert_progress_converges(events: &[ProgressEvent], total: usize) {
    assert!(!events.is_empty(), "no progress events were emitted");
    for pair in events.windows(2) {
        assert!(
            pair[0].completed <= pair[1].completed,
            "progress went backwards: {pair:?}"
        );
        assert!(pair[0].sequence < pair[1].sequence, "sequence not increasing: {pair:?}");
    }
    assert!(events.iter().all(|e| e.total == total && e.completed <= total));
    assert_eq!(events.last().map(|e| e.completed), Some(total));
}

/// Wait for the terminal event of `job_id`
pub async fn wait_for_job_finished(
    events: &mut broadcast::Receiver<Event>,
    job_id: &JobId,
    timeout: Duration,
) -> Option<JobStatus> {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::JobFinished { job_id: id, status }) if &id == job_id => return Some(status),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
