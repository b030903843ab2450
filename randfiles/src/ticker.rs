//! Drives tick advancement of the [`Store`].

use std::{sync::Arc, time::Duration};

use randfiles_store::Store;
use tokio::time::{self, Instant};
use tracing::{info, trace};

use crate::signals::Watcher;

/// Real-clock length of one tick. Per-tick samples read as per-second rates.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
/// Closes one tick of the [`Store`] every period.
pub struct Ticker {
    store: Arc<Store>,
    period: Duration,
    shutdown: Watcher,
}

impl Ticker {
    /// Create a new [`Ticker`] with the default [`TICK_PERIOD`].
    #[must_use]
    pub fn new(store: Arc<Store>, shutdown: Watcher) -> Self {
        Self::with_period(store, TICK_PERIOD, shutdown)
    }

    /// Create a new [`Ticker`] with an explicit period.
    #[must_use]
    pub fn with_period(store: Arc<Store>, period: Duration, shutdown: Watcher) -> Self {
        Self {
            store,
            period,
            shutdown,
        }
    }

    /// Run [`Ticker`] until a shutdown signal is received.
    ///
    /// Missed periods are caught up in a burst so that every sample still
    /// stands for one period of wall-clock time.
    pub async fn spin(self) {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        let shutdown_wait = self.shutdown.recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let ticks = self.store.tick();
                    trace!(ticks, "tick closed");
                },
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return;
                },
            }
        }
    }
}
