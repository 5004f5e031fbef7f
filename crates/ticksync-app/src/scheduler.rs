//! Periodic background passes.

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::document::DocumentStore;
use crate::engine::{SyncEngine, SyncError};
use crate::notify::Notifier;
use crate::remote::RemoteTaskClient;

/// Run [`SyncEngine::scheduled_sync`] every configured interval until
/// `shutdown` flips to true or its sender is dropped.
///
/// The first pass runs one interval after start. Ticks missed while a pass
/// runs are skipped, and a pass rejected as busy counts as skipped. Returns
/// the number of passes that completed.
pub async fn run_periodic<R, D, N>(
    engine: &SyncEngine<R, D, N>,
    mut shutdown: watch::Receiver<bool>,
) -> usize
where
    R: RemoteTaskClient,
    D: DocumentStore,
    N: Notifier,
{
    let period = engine.config().interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = period.as_secs(), "periodic sync started");

    let mut passes = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        match engine.scheduled_sync().await {
            Ok(changed) => {
                passes += 1;
                debug!(changed, "periodic pass finished");
            }
            Err(SyncError::Busy) => debug!("pass already running, skipping tick"),
            Err(err) => warn!(error = %err, "periodic pass failed"),
        }
    }
    info!(passes, "periodic sync stopped");
    passes
}
