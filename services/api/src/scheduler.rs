//! Periodic auto-approval sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tradematch::workflows::dispatch::{DispatchNotifier, DispatchRepository, DispatchService};

/// Runs the sweep on a fixed cadence until stopped. A sweep that overruns its slot delays
/// the next one rather than stacking up.
pub(crate) struct SweepScheduler<S, N> {
    service: Arc<DispatchService<S, N>>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl<S, N> SweepScheduler<S, N>
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    pub(crate) fn new(service: Arc<DispatchService<S, N>>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            interval,
            shutdown,
        }
    }

    pub(crate) fn start(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
            info!(interval_secs = interval.as_secs(), "auto-approval scheduler started");

            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                let sweeper = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || sweeper.run_auto_approval_sweep()).await {
                    Ok(Ok(report)) => info!(
                        run_id = %report.run_id,
                        assigned = report.assigned.len(),
                        "scheduled sweep finished"
                    ),
                    Ok(Err(err)) => warn!(error = %err, "scheduled sweep failed"),
                    Err(err) => warn!(error = %err, "scheduled sweep task panicked"),
                }
            }

            info!("auto-approval scheduler stopped");
        })
    }

    pub(crate) fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}
