//! Periodic cleanup tasks, one per resource class.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotvault_core::Clock;
use tokio::time::interval;

/// A resource class that can be cleaned up on a schedule.
///
/// `sweep` must tolerate resources already removed elsewhere.
#[async_trait]
pub trait Sweeper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remove whatever is stale as of `now`. Returns the number of items removed.
    async fn sweep(&self, now: DateTime<Utc>) -> usize;
}

/// Run `sweeper` every `period` on a background task until the handle is aborted.
pub fn spawn_sweep(
    sweeper: Arc<dyn Sweeper>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let removed = sweeper.sweep(clock.now()).await;
            if removed > 0 {
                tracing::info!(sweeper = sweeper.name(), removed, "Sweep removed stale entries");
            } else {
                tracing::trace!(sweeper = sweeper.name(), "Sweep found nothing to remove");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotvault_core::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Sweeper for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn sweep(&self, _now: DateTime<Utc>) -> usize {
            self.runs.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_once_per_period() {
        let sweeper = Arc::new(Counting::default());
        let handle = spawn_sweep(
            sweeper.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(181)).await;
        handle.abort();

        assert_eq!(sweeper.runs.load(Ordering::SeqCst), 3);
    }
}
