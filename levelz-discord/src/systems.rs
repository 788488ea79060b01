//! Background systems driven by the tokio runtime.
//!
//! | System        | Frequency               | Work                               |
//! |---------------|-------------------------|------------------------------------|
//! | Flush         | `flush.interval_seconds` | purge expired entries, batch flush |
//! | Final flush   | On shutdown             | batch flush                        |
//!
//! Flushes run on the blocking pool because they hold the SQLite connection.

use std::sync::Arc;

use levelz_core::ExperienceService;
use levelz_core::config::FlushConfig;
use levelz_core::flush::FlushReport;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Totals reported by a finished flush task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushTaskSummary {
    /// Flushes that committed.
    pub flushes: u64,
    /// Flushes that rolled back.
    pub failures: u64,
    /// Queue entries persisted.
    pub entries: u64,
}

impl FlushTaskSummary {
    fn record(&mut self, result: Option<FlushReport>) {
        match result {
            Some(report) => {
                if !report.is_empty() {
                    self.flushes += 1;
                    self.entries += report.entries as u64;
                }
            }
            None => self.failures += 1,
        }
    }
}

async fn flush_once(service: &Arc<ExperienceService>, purge: bool) -> Option<FlushReport> {
    let service = Arc::clone(service);
    let joined = tokio::task::spawn_blocking(move || {
        if purge {
            service.purge_expired();
        }
        service.flush()
    })
    .await;

    match joined {
        Ok(Ok(report)) => Some(report),
        // The flusher already logged the rollback.
        Ok(Err(_)) => None,
        Err(e) => {
            error!(error = %e, "Flush task panicked");
            None
        }
    }
}

/// Spawn the periodic flush loop.
///
/// The loop ticks every `config.interval()` until `shutdown` flips to `true`
/// or its sender is dropped, then flushes once more if
/// `config.flush_on_shutdown` is set.
#[must_use]
pub fn spawn_flush_task(
    service: Arc<ExperienceService>,
    config: &FlushConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<FlushTaskSummary> {
    let period = config.interval();
    let final_flush = config.flush_on_shutdown;

    tokio::spawn(async move {
        let mut summary = FlushTaskSummary::default();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Flush task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = flush_once(&service, true).await;
                    summary.record(result);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    debug!("Shutdown signal changed but not set");
                }
            }
        }

        if final_flush {
            let result = flush_once(&service, false).await;
            summary.record(result);
        }
        info!(
            flushes = summary.flushes,
            failures = summary.failures,
            entries = summary.entries,
            "Flush task stopped"
        );
        summary
    })
}
