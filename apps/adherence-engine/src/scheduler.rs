use crate::service::AdherenceService;
use crate::source::LogSource;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MIN_BATCH_INTERVAL_SECONDS: u64 = 60;

/// Periodically runs batch detection over every trained patient.
#[derive(Clone)]
pub struct BatchDetectionService {
    service: Arc<AdherenceService>,
    source: Arc<dyn LogSource>,
    interval: Duration,
}

impl BatchDetectionService {
    pub fn new(service: Arc<AdherenceService>, source: Arc<dyn LogSource>, interval: Duration) -> Self {
        Self {
            service,
            source,
            interval,
        }
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = self.run_once().await {
                            tracing::error!(error = %err, "scheduled batch detection failed");
                        }
                    }
                }
            }
            tracing::info!("batch detection service stopped");
        })
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let service = self.service.clone();
        let source = self.source.clone();
        let report = tokio::task::spawn_blocking(move || {
            service.batch_detect(source.as_ref(), Utc::now().naive_utc())
        })
        .await??;
        tracing::info!(
            scanned = report.scanned,
            anomalies = report.anomalies.len(),
            failures = report.failures.len(),
            "scheduled batch detection tick"
        );
        Ok(())
    }
}
