//! Rolling summary of recent writer throughput.
//!
//! Every [`PERIOD`] the aggregator reads the COUNT and SUM sequences of
//! [`DATA_METRIC`], sums the most recent [`WINDOW`] samples of each and
//! publishes the result as the [`SUMMARY_NOTE`] label and a log line. With one
//! second ticks the window covers the last minute.
//!
//! While fewer than [`WINDOW`] ticks exist the window is everything recorded
//! so far.

use std::{fmt, sync::Arc, time::Duration};

use randfiles_store::{Dimension, Store, snapshot};
use tokio::{
    runtime::Handle,
    time::{self, Instant},
};
use tracing::info;

use crate::{generator::DATA_METRIC, signals::Watcher};

/// How often the summary is recomputed.
pub const PERIOD: Duration = Duration::from_secs(10);
/// Number of most recent ticks summarized.
pub const WINDOW: usize = 60;
/// Label the summary is published under.
pub const SUMMARY_NOTE: &str = "Last One Minute";
/// Label the live task count is published under.
pub const TASKS_NOTE: &str = "Tasks";

/// Totals over a window of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    /// Files written in the window
    pub files: f64,
    /// Bytes written in the window
    pub bytes: f64,
    /// `bytes / files`, zero when no files were written
    pub average: f64,
}

impl Summary {
    /// Summarize the last `window` samples of `count` and `sum`.
    ///
    /// The sequences are expected to be equal length. If a tick closed
    /// between the two reads one may be a sample longer; both start at tick
    /// zero, so the shorter length is used and the samples stay aligned.
    #[must_use]
    pub fn over(count: &[f64], sum: &[f64], window: usize) -> Self {
        let len = count.len().min(sum.len());
        let files: f64 = snapshot::tail(&count[..len], window).iter().sum();
        let bytes: f64 = snapshot::tail(&sum[..len], window).iter().sum();
        let average = if files > 0.0 { bytes / files } else { 0.0 };
        Self {
            files,
            bytes,
            average,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} Files, {:.0} Average Size, {:.0} Bytes",
            self.files, self.average, self.bytes
        )
    }
}

#[derive(Debug)]
/// Periodically publishes a [`Summary`] of [`DATA_METRIC`].
pub struct Aggregator {
    store: Arc<Store>,
    period: Duration,
    window: usize,
    shutdown: Watcher,
}

impl Aggregator {
    /// Create a new [`Aggregator`] with the default [`PERIOD`] and [`WINDOW`].
    #[must_use]
    pub fn new(store: Arc<Store>, shutdown: Watcher) -> Self {
        Self {
            store,
            period: PERIOD,
            window: WINDOW,
            shutdown,
        }
    }

    /// Override the publication period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Compute the current [`Summary`] and publish it.
    #[must_use]
    pub fn summarize(&self) -> Summary {
        let summary = {
            let count = self.store.get_metrics(DATA_METRIC, Dimension::Count);
            let sum = self.store.get_metrics(DATA_METRIC, Dimension::Sum);
            Summary::over(&count, &sum, self.window)
        };
        self.store.note(SUMMARY_NOTE, summary.to_string());
        info!("Last one minute: {summary}");
        summary
    }

    /// Run [`Aggregator`] until a shutdown signal is received.
    pub async fn spin(self) {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        let shutdown_wait = self.shutdown.clone().recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Ok(handle) = Handle::try_current() {
                        let tasks = handle.metrics().num_alive_tasks();
                        self.store.note(TASKS_NOTE, tasks.to_string());
                    }
                    let _ = self.summarize();
                },
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals;

    #[test]
    fn average_is_total_over_count() {
        let summary = Summary::over(&[2.0, 2.0], &[100.0, 300.0], WINDOW);
        assert_eq!(
            summary,
            Summary {
                files: 4.0,
                bytes: 400.0,
                average: 100.0,
            }
        );
    }

    #[test]
    fn no_files_means_zero_average() {
        let summary = Summary::over(&[0.0; 5], &[0.0; 5], WINDOW);
        assert_eq!(summary, Summary::default());
        assert_eq!(summary.to_string(), "0 Files, 0 Average Size, 0 Bytes");
    }

    #[test]
    fn short_history_is_clamped() {
        for len in 0..WINDOW {
            let count = vec![1.0; len];
            let sum = vec![10.0; len];
            let summary = Summary::over(&count, &sum, WINDOW);
            assert!((summary.files - len as f64).abs() < f64::EPSILON);
            assert!((summary.bytes - 10.0 * len as f64).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn only_last_window_counts() {
        let count: Vec<f64> = (0..100).map(f64::from).collect();
        let sum: Vec<f64> = count.iter().map(|c| c * 2.0).collect();
        let summary = Summary::over(&count, &sum, WINDOW);
        // 40 + 41 + ... + 99
        let expected: f64 = (40..100).map(f64::from).sum();
        assert!((summary.files - expected).abs() < f64::EPSILON);
        assert!((summary.bytes - 2.0 * expected).abs() < f64::EPSILON);
        assert!((summary.average - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn uneven_lengths_use_shorter() {
        let summary = Summary::over(&[1.0, 1.0, 5.0], &[8.0, 8.0], WINDOW);
        assert!((summary.files - 2.0).abs() < f64::EPSILON);
        assert!((summary.bytes - 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn display_rounds_to_whole_numbers() {
        let summary = Summary::over(&[3.0], &[1000.0], WINDOW);
        assert_eq!(
            summary.to_string(),
            "3 Files, 333 Average Size, 1000 Bytes"
        );
    }

    #[tokio::test]
    async fn summarize_publishes_note() {
        let store = Arc::new(Store::new("test"));
        crate::generator::define_metrics(&store);
        store.metric(DATA_METRIC, 2, 2048.0);
        store.tick();
        store.tick();

        let (watcher, _broadcaster) = signals::signal();
        let aggregator = Aggregator::new(Arc::clone(&store), watcher);
        let summary = aggregator.summarize();

        assert!((summary.average - 1024.0).abs() < f64::EPSILON);
        assert_eq!(
            store.get_note(SUMMARY_NOTE).as_deref(),
            Some("2 Files, 1024 Average Size, 2048 Bytes")
        );
        // Both snapshots were handed back.
        assert_eq!(store.pooled_buffers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spin_publishes_each_period() {
        let store = Arc::new(Store::new("test"));
        let (watcher, broadcaster) = signals::signal();
        let aggregator =
            Aggregator::new(Arc::clone(&store), watcher).with_period(Duration::from_secs(10));
        let handle = tokio::spawn(aggregator.spin());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get_note(SUMMARY_NOTE), None);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            store.get_note(SUMMARY_NOTE).as_deref(),
            Some("0 Files, 0 Average Size, 0 Bytes")
        );
        assert!(store.get_note(TASKS_NOTE).is_some());

        broadcaster.signal();
        handle.await.expect("aggregator panicked");
    }
}
