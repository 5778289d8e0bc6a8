//! Cancellable periodic background task

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// A background loop that runs a tick function on a fixed interval until stopped.
///
/// The stop signal is checked between ticks, so a running tick always
/// completes and the loop exits before the next one starts.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn the loop. The first tick fires one `period` after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = stop_rx.changed() => break,
                }
            }
        });

        info!(task = name, interval_ms = period.as_millis() as u64, "Started background task");

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    /// Signal the loop to stop and wait up to `grace` for it to finish.
    /// The task is aborted if it does not exit in time.
    pub async fn stop(self, grace: Duration) {
        let _ = self.stop_tx.send(true);

        let mut handle = self.handle;
        match time::timeout(grace, &mut handle).await {
            Ok(_) => info!(task = self.name, "Stopped background task"),
            Err(_) => {
                handle.abort();
                warn!(task = self.name, "Background task did not stop in time, aborted");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
