//! Event poller: one timer per authenticated session.
//!
//! Each tick awaits `GamificationStore::fetch_events` inline, so ticks never
//! overlap; a tick that comes due while the previous one is still running is
//! skipped. The task holds only a weak reference to the store and exits when
//! the store is gone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::{FetchOutcome, GamificationStore};

/// Handle to a running poller. Dropping it without `stop` leaves the task
/// running until the store is dropped.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    ticks: Arc<AtomicU64>,
}

impl PollerHandle {
    /// Signal shutdown and cancel any tick in progress.
    pub fn stop(self) {
        let _ = self.shutdown_tx.try_send(());
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Spawn the polling task. The first tick fires immediately.
pub fn start(store: &Arc<GamificationStore>, every: Duration) -> PollerHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let ticks = Arc::new(AtomicU64::new(0));
    let ticks_clone = ticks.clone();
    let weak: Weak<GamificationStore> = Arc::downgrade(store);

    let task = tokio::spawn(async move {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(target: "poller", interval_secs = every.as_secs(), "Event poller started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(target: "poller", "Event poller received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    let Some(store) = weak.upgrade() else {
                        debug!(target: "poller", "Store dropped; poller exiting");
                        break;
                    };
                    match store.fetch_events().await {
                        FetchOutcome::Failed(e) => warn!(target: "poller", error = %e, "Poll tick failed"),
                        outcome => debug!(target: "poller", ?outcome, "Poll tick done"),
                    }
                    ticks_clone.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    PollerHandle { shutdown_tx, task, ticks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::store::StoreOptions;

    fn store(gw: &Arc<MockGateway>) -> Arc<GamificationStore> {
        Arc::new(GamificationStore::new(gw.clone(), StoreOptions::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_each_interval() {
        let gw = Arc::new(MockGateway::new());
        let store = store(&gw);
        let handle = start(&store, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(gw.calls("events"), 3);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tick_is_skipped_not_overlapped() {
        let gw = Arc::new(MockGateway::new());
        gw.set_delay("events", Duration::from_secs(45));
        let store = store(&gw);
        let handle = start(&store, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(100)).await;
        // Ticks run 0..45, 45..90 and 90..135: one at a time, the rest skipped.
        assert_eq!(gw.calls("events"), 3);
        assert_eq!(handle.ticks(), 2);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn no_polls_after_stop() {
        let gw = Arc::new(MockGateway::new());
        let store = store(&gw);
        let handle = start(&store, Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(gw.calls("events"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_store_dropped() {
        let gw = Arc::new(MockGateway::new());
        let store = store(&gw);
        let handle = start(&store, Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(store);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
        assert_eq!(gw.calls("events"), 1);
    }
}
