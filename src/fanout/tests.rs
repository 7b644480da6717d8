use super::*;
use crate::error::ProviderErrorKind;
use crate::invoker::{FnInvoker, ProviderRegistry};
use crate::progress::{ChannelProgressSink, NoopProgressSink};
use crate::types::{ProgressEvent, ProviderId};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Scripted behavior for one provider
#[derive(Clone)]
struct Script {
    delay: Duration,
    outcome: Result<serde_json::Value, ProviderError>,
    honors_cancel: bool,
}

fn succeeds_after(ms: u64) -> Script {
    Script {
        delay: Duration::from_millis(ms),
        outcome: Ok(json!({ "after_ms": ms })),
        honors_cancel: true,
    }
}

fn fails_after(ms: u64, error: ProviderError) -> Script {
    Script {
        delay: Duration::from_millis(ms),
        outcome: Err(error),
        honors_cancel: true,
    }
}

/// Invoker that replays scripted outcomes and tracks how many calls overlap
#[derive(Default)]
struct ScriptedInvoker {
    scripts: HashMap<ProviderId, Script>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedInvoker {
    fn new(scripts: Vec<(&str, Script)>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(id, s)| (ProviderId::from(id), s))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ProviderInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        let script = self
            .scripts
            .get(&request.provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::unknown_provider(&request.provider_id))?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let outcome = if script.honors_cancel {
            tokio::select! {
                _ = tokio::time::sleep(script.delay) => script.outcome,
                _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            }
        } else {
            tokio::time::sleep(script.delay).await;
            script.outcome
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn requests(ids: &[&str]) -> Vec<ProviderRequest> {
    ids.iter()
        .map(|id| ProviderRequest::new(*id, json!({ "prompt": "compare" })))
        .collect()
}

fn coordinator(per_call_timeout: Duration) -> FanOutCoordinator {
    FanOutCoordinator::new(FanOutConfig {
        per_call_timeout,
        ..Default::default()
    })
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn ids(results: &[ProviderResult]) -> Vec<&str> {
    results.iter().map(|r| r.provider_id().as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn four_providers_one_failing_immediately() {
    let invoker = ScriptedInvoker::new(vec![
        ("A", fails_after(0, ProviderError::vendor(500, Some("boom".into())))),
        ("B", succeeds_after(10)),
        ("C", succeeds_after(50)),
        ("D", succeeds_after(100)),
    ]);
    let (sink, mut rx) = ChannelProgressSink::new();

    let results = coordinator(Duration::from_secs(5))
        .execute(
            requests(&["A", "B", "C", "D"]),
            &invoker,
            Arc::new(sink),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(ids(&results), ["B", "C", "D"]);
    assert!(results.iter().all(|r| r.succeeded()));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 4);
    assert_eq!(
        events.iter().map(|e| e.completed).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        events.iter().map(|e| e.label.as_str()).collect::<Vec<_>>(),
        vec!["A", "B", "C", "D"]
    );
    assert!(events.iter().all(|e| e.total == 4));
}

#[tokio::test(start_paused = true)]
async fn results_keep_submission_order_while_progress_follows_completion() {
    let invoker = ScriptedInvoker::new(vec![
        ("slow", succeeds_after(90)),
        ("medium", succeeds_after(40)),
        ("fast", succeeds_after(5)),
    ]);
    let (sink, mut rx) = ChannelProgressSink::new();

    let results = coordinator(Duration::from_secs(5))
        .execute(
            requests(&["slow", "medium", "fast"]),
            &invoker,
            Arc::new(sink),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(ids(&results), ["slow", "medium", "fast"]);
    let labels: Vec<_> = drain(&mut rx).into_iter().map(|e| e.label).collect();
    assert_eq!(labels, ["fast", "medium", "slow"]);
}

#[tokio::test(start_paused = true)]
async fn include_failures_surfaces_every_slot() {
    let invoker = ScriptedInvoker::new(vec![
        ("A", fails_after(0, ProviderError::transport("connection reset"))),
        ("B", succeeds_after(10)),
    ]);
    let coordinator = FanOutCoordinator::new(FanOutConfig {
        include_failures: true,
        ..Default::default()
    });

    let results = coordinator
        .execute(
            requests(&["A", "B"]),
            &invoker,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(ids(&results), ["A", "B"]);
    let failure = results[0].error().unwrap();
    assert_eq!(failure.kind, ProviderErrorKind::Transport);
    assert_eq!(failure.provider, Some(ProviderId::from("A")));
    assert!(results[0].payload().is_none());
    assert!(results[1].succeeded());
}

#[tokio::test(start_paused = true)]
async fn per_call_timeout_only_affects_the_slow_provider() {
    let invoker = ScriptedInvoker::new(vec![
        ("stuck", succeeds_after(60_000)),
        ("quick", succeeds_after(20)),
    ]);
    let started = Instant::now();

    let results = coordinator(Duration::from_secs(1))
        .execute_all(
            requests(&["stuck", "quick"]),
            &invoker,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1100), "took {elapsed:?}");

    let stuck = results[0].error().unwrap();
    assert!(stuck.is_timeout());
    assert_eq!(stuck.to_string(), "timeout");
    assert!(results[1].succeeded());
}

#[tokio::test(start_paused = true)]
async fn wall_time_is_bounded_by_the_slowest_call_not_the_count() {
    let scripts: Vec<_> = (0..50)
        .map(|i| {
            let script = if i % 3 == 0 {
                fails_after(100, ProviderError::vendor(502, None))
            } else {
                succeeds_after(100)
            };
            (format!("p{i}"), script)
        })
        .collect();
    let invoker = ScriptedInvoker::new(scripts.iter().map(|(id, s)| (id.as_str(), s.clone())).collect());
    let ids: Vec<_> = scripts.iter().map(|(id, _)| id.as_str()).collect();
    let started = Instant::now();

    let results = coordinator(Duration::from_secs(5))
        .execute(
            requests(&ids),
            &invoker,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;

    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(results.len(), 33);
    assert_eq!(invoker.max_in_flight.load(Ordering::SeqCst), 50);
}

#[tokio::test(start_paused = true)]
async fn limiter_caps_overlap_and_is_released_on_failure() {
    let invoker = ScriptedInvoker::new(vec![
        ("a", fails_after(100, ProviderError::transport("reset"))),
        ("b", fails_after(100, ProviderError::vendor(400, None))),
        ("c", succeeds_after(100)),
        ("d", succeeds_after(100)),
        ("e", succeeds_after(100)),
        ("f", succeeds_after(100)),
    ]);
    let coordinator = FanOutCoordinator::new(FanOutConfig {
        max_concurrency: Some(2),
        ..Default::default()
    });
    let started = Instant::now();

    let results = coordinator
        .execute_all(
            requests(&["a", "b", "c", "d", "e", "f"]),
            &invoker,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(results.len(), 6);
    assert_eq!(invoker.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 6);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn shared_limiter_spans_coordinators() {
    let limiter = Arc::new(Semaphore::new(1));
    let invoker = Arc::new(ScriptedInvoker::new(vec![
        ("x", succeeds_after(100)),
        ("y", succeeds_after(100)),
    ]));
    let first = coordinator(Duration::from_secs(5)).with_limiter(Arc::clone(&limiter));
    let second = coordinator(Duration::from_secs(5)).with_limiter(limiter);
    let started = Instant::now();

    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(
        first.execute(requests(&["x"]), invoker.as_ref(), Arc::new(NoopProgressSink), &cancel),
        second.execute(requests(&["y"]), invoker.as_ref(), Arc::new(NoopProgressSink), &cancel),
    );

    assert_eq!(a.len() + b.len(), 2);
    assert_eq!(invoker.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_without_waiting_for_outstanding_calls() {
    let invoker = ScriptedInvoker::new(vec![
        ("done", succeeds_after(10)),
        (
            "ignores-cancel",
            Script {
                honors_cancel: false,
                ..succeeds_after(60_000)
            },
        ),
        ("cooperative", succeeds_after(60_000)),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let (sink, mut rx) = ChannelProgressSink::new();
    let started = Instant::now();

    let results = coordinator(Duration::from_secs(120))
        .execute_all(
            requests(&["done", "ignores-cancel", "cooperative"]),
            &invoker,
            Arc::new(sink),
            &cancel,
        )
        .await;

    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(results[0].succeeded());
    assert_eq!(
        results[1].error().unwrap().kind,
        ProviderErrorKind::Cancelled
    );
    assert_eq!(
        results[2].error().unwrap().kind,
        ProviderErrorKind::Cancelled
    );
    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.completed <= e.total));
    assert_eq!(events.first().map(|e| e.label.as_str()), Some("done"));
}

#[tokio::test]
async fn already_cancelled_token_dispatches_nothing_useful() {
    let invoker = ScriptedInvoker::new(vec![("a", succeeds_after(10))]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = coordinator(Duration::from_secs(1))
        .execute(requests(&["a"]), &invoker, Arc::new(NoopProgressSink), &cancel)
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn panicking_invoker_fails_only_its_branch() {
    let registry = ProviderRegistry::builder()
        .register(
            "panics",
            FnInvoker::new(|_req, _cancel| async {
                if true {
                    panic!("vendor SDK bug");
                }
                Ok(json!(null))
            }),
        )
        .register(
            "fine",
            FnInvoker::new(|req, _cancel| async move { Ok(req.payload) }),
        )
        .build();

    let results = coordinator(Duration::from_secs(1))
        .execute_all(
            requests(&["panics", "fine"]),
            &registry,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;

    let err = results[0].error().unwrap();
    assert_eq!(err.kind, ProviderErrorKind::Panicked);
    assert!(err.message.contains("vendor SDK bug"));
    assert!(results[1].succeeded());
}

#[tokio::test]
async fn unknown_provider_is_dropped_from_useful_output() {
    let registry = ProviderRegistry::builder()
        .register(
            "known",
            FnInvoker::new(|req, _cancel| async move { Ok(req.payload) }),
        )
        .build();

    let results = coordinator(Duration::from_secs(1))
        .execute(
            requests(&["known", "unknown"]),
            &registry,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(ids(&results), ["known"]);
}

#[tokio::test]
async fn empty_request_list_emits_nothing() {
    let (sink, mut rx) = ChannelProgressSink::new();
    let results = coordinator(Duration::from_secs(1))
        .execute(
            Vec::new(),
            &ScriptedInvoker::default(),
            Arc::new(sink),
            &CancellationToken::new(),
        )
        .await;
    assert!(results.is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn events_report_failures_and_summary() {
    let (event_tx, mut event_rx) = broadcast::channel(16);
    let invoker = ScriptedInvoker::new(vec![
        ("bad", fails_after(1, ProviderError::vendor(401, Some("invalid key".into())))),
        ("good", succeeds_after(2)),
    ]);

    coordinator(Duration::from_secs(1))
        .with_events(event_tx)
        .execute(
            requests(&["bad", "good"]),
            &invoker,
            Arc::new(NoopProgressSink),
            &CancellationToken::new(),
        )
        .await;

    match event_rx.recv().await.unwrap() {
        Event::ProviderFailed { provider, error } => {
            assert_eq!(provider.as_str(), "bad");
            assert!(error.contains("invalid key"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        event_rx.recv().await.unwrap(),
        Event::FanOutComplete {
            total: 2,
            succeeded: 1,
            failed: 1
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn shared_sequence_keeps_increasing_across_calls() {
    let sequence = SequenceCounter::new();
    let coordinator = coordinator(Duration::from_secs(1)).with_sequence(sequence.clone());
    let invoker = ScriptedInvoker::new(vec![("a", succeeds_after(1)), ("b", succeeds_after(2))]);
    let (sink, mut rx) = ChannelProgressSink::new();
    let sink: Arc<dyn ProgressSink> = Arc::new(sink);

    for _ in 0..2 {
        coordinator
            .execute(
                requests(&["a", "b"]),
                &invoker,
                Arc::clone(&sink),
                &CancellationToken::new(),
            )
            .await;
    }

    let sequences: Vec<_> = drain(&mut rx).into_iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert_eq!(sequence.issued(), 4);
}
