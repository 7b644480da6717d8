//! Fan-out and job polling walkthrough
//!
//! Four simulated providers answer the same prompt; one of them fails right
//! away. A simulated OCR vendor then runs as a submit-then-poll job.
//! Progress is printed by an independent event subscriber.
//!
//! Run with `cargo run --example fan_out` (set `RUST_LOG=debug` for engine logs).

use async_trait::async_trait;
use provider_fanout::invoker::FnInvoker;
use provider_fanout::{
    Config, Event, JobArtifact, JobClient, JobId, Orchestrator, PollingConfig, ProviderError,
    ProviderInvoker, ProviderRegistry, ProviderRequest, StatusReport,
};
use serde_json::json;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Provider that answers after `delay`
fn simulated(name: &'static str, delay: Duration) -> impl ProviderInvoker + 'static {
    FnInvoker::new(move |request: ProviderRequest, cancel: CancellationToken| async move {
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            _ = tokio::time::sleep(delay) => Ok(json!({
                "provider": name,
                "answer": format!("{name} says hello to {}", request.payload["prompt"]),
            })),
        }
    })
}

/// OCR vendor whose job finishes after a few polls
struct SimulatedOcr {
    progress: AtomicU8,
}

#[async_trait]
impl JobClient for SimulatedOcr {
    async fn submit(
        &self,
        _payload: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<JobId, ProviderError> {
        Ok(JobId::from("ocr-1"))
    }

    async fn get_status(&self, _job_id: &JobId) -> Result<StatusReport, ProviderError> {
        let pct = self.progress.fetch_add(35, Ordering::SeqCst).min(100);
        let status = if pct >= 100 { "completed" } else { "processing" };
        Ok(StatusReport::new(status).with_percentage(pct))
    }

    async fn download(&self, _job_id: &JobId) -> Result<JobArtifact, ProviderError> {
        Ok(JobArtifact::Bytes(b"Recognized text".to_vec()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = ProviderRegistry::builder()
        .register(
            "A",
            FnInvoker::new(|_request: ProviderRequest, _cancel: CancellationToken| async {
                Err(ProviderError::vendor(401, Some("invalid API key".into())))
            }),
        )
        .register("B", simulated("B", Duration::from_millis(10)))
        .register("C", simulated("C", Duration::from_millis(50)))
        .register("D", simulated("D", Duration::from_millis(100)))
        .build();

    let config = Config {
        polling: PollingConfig {
            poll_interval: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(config, registry)?;

    let shutdown = CancellationToken::new();
    provider_fanout::cancel_on_shutdown_signal(shutdown.clone());

    let mut events = orchestrator.subscribe();
    let printer_shutdown = shutdown.clone();
    let printer = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = printer_shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            };
            match event {
                Event::Progress(p) => {
                    println!("[progress #{}] {}/{} {}", p.sequence, p.completed, p.total, p.label)
                }
                Event::ProviderFailed { provider, error } => {
                    println!("[failed] {provider}: {error}")
                }
                Event::FanOutComplete {
                    total,
                    succeeded,
                    failed,
                } => println!("[fan-out] {succeeded}/{total} succeeded, {failed} failed"),
                Event::JobFinished { job_id, status } => {
                    println!("[job] {job_id} finished as {status}");
                    break;
                }
                _ => {}
            }
        }
    });

    let requests = ["A", "B", "C", "D"]
        .into_iter()
        .map(|id| ProviderRequest::new(id, json!({ "prompt": "world" })))
        .collect();
    for result in orchestrator.fan_out(requests, &shutdown).await {
        println!(
            "{} ({:?}): {}",
            result.provider_id(),
            result.elapsed(),
            result.payload().map(|p| p.to_string()).unwrap_or_default()
        );
    }

    let ocr = SimulatedOcr {
        progress: AtomicU8::new(0),
    };
    match orchestrator
        .run_job(&ocr, &json!({ "document": "scan.pdf" }), &shutdown)
        .await
    {
        Ok(outcome) => println!("OCR result stored as {:?}", outcome.job.result_ref),
        Err(e) => println!("OCR job failed ({}): {e}", e.code()),
    }

    printer.await?;
    Ok(())
}
