//! Time-bucketed counter store for randfiles.
//!
//! The [`Store`] holds, per metric name, two sequences of samples: one for the
//! [`Dimension::Count`] of events and one for the [`Dimension::Sum`] of their
//! magnitudes. Writers call [`Store::metric`] to add into the in-progress
//! accumulators. Calling code is responsible for defining the real-clock
//! duration of a 'tick' and calling [`Store::tick`] on that period. Every tick
//! the accumulators are appended to their sequences and reset to zero, so
//! each sample is the total observed during one tick.
//!
//! # Semantics
//!
//! * Sequences are append-only. Nothing is compacted or deleted.
//! * Every sequence has exactly [`Store::ticks`] samples. A metric first
//!   written after startup is back-filled with zero samples, so index `i` of
//!   any sequence refers to the same tick.
//! * COUNT and SUM of one metric are always the same length, whether or not
//!   anything was recorded during a tick.
//!
//! Readers take a [`Snapshot`] with [`Store::get_metrics`]. A snapshot is a
//! point-in-time copy in a pooled buffer and gives the buffer back to the
//! store when dropped.
//!
//! Besides numbers the store keeps 'notes', free-form labels meant only for
//! display.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

pub mod snapshot;

pub use snapshot::Snapshot;
use snapshot::Pool;

/// The two accumulation modes of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Number of events.
    Count,
    /// Total magnitude of events.
    Sum,
}

impl Dimension {
    /// Both dimensions, in storage order.
    pub const ALL: [Dimension; 2] = [Dimension::Count, Dimension::Sum];

    #[inline]
    fn index(self) -> usize {
        match self {
            Dimension::Count => 0,
            Dimension::Sum => 1,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Count => write!(f, "count"),
            Dimension::Sum => write!(f, "sum"),
        }
    }
}

/// The most recently completed sample of one defined metric dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rate {
    /// Metric name
    pub metric: String,
    /// Which dimension of the metric
    pub dimension: Dimension,
    /// Unit label given at definition
    pub unit: String,
    /// Value of the last completed tick, zero before the first tick
    pub last: f64,
}

#[derive(Debug)]
struct Series {
    units: [Option<String>; 2],
    pending: [f64; 2],
    samples: [Vec<f64>; 2],
}

impl Series {
    fn new(ticks: usize) -> Self {
        Self {
            units: [None, None],
            pending: [0.0; 2],
            samples: [vec![0.0; ticks], vec![0.0; ticks]],
        }
    }

    fn roll(&mut self) {
        for (samples, pending) in self.samples.iter_mut().zip(self.pending.iter_mut()) {
            samples.push(*pending);
            *pending = 0.0;
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    ticks: usize,
    series: FxHashMap<String, Series>,
}

impl Inner {
    fn series_mut(&mut self, metric: &str) -> &mut Series {
        let ticks = self.ticks;
        self.series
            .entry(metric.to_string())
            .or_insert_with(|| Series::new(ticks))
    }
}

/// Process-wide metric store.
///
/// Construct one and share it by [`Arc`]. All operations take `&self` and are
/// safe to call from any number of threads.
#[derive(Debug)]
pub struct Store {
    title: String,
    inner: Mutex<Inner>,
    notes: Mutex<FxHashMap<String, String>>,
    pool: Arc<Pool>,
}

impl Store {
    /// Create a new, empty [`Store`] with a display title.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            inner: Mutex::new(Inner::default()),
            notes: Mutex::new(FxHashMap::default()),
            pool: Arc::new(Pool::default()),
        }
    }

    /// The display title given at construction.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notes_guard(&self) -> MutexGuard<'_, FxHashMap<String, String>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `dimension` of `metric` with a unit label for display.
    ///
    /// Defining the same pair again replaces the unit label and leaves any
    /// recorded samples untouched.
    pub fn define(&self, metric: &str, dimension: Dimension, unit: &str) {
        let mut inner = self.inner();
        let series = inner.series_mut(metric);
        series.units[dimension.index()] = Some(unit.to_string());
        debug!(metric, %dimension, unit, "metric defined");
    }

    /// Set the display label `key` to `value`, replacing any previous value.
    pub fn note(&self, key: &str, value: impl Into<String>) {
        self.notes_guard().insert(key.to_string(), value.into());
    }

    /// Add `count` and `sum` to the in-progress tick of `metric`.
    ///
    /// Both accumulators are updated under one lock, so concurrent callers
    /// never lose an update and never observe one delta without the other.
    pub fn metric(&self, metric: &str, count: u64, sum: f64) {
        let mut inner = self.inner();
        let series = inner.series_mut(metric);
        series.pending[Dimension::Count.index()] += count as f64;
        series.pending[Dimension::Sum.index()] += sum;
    }

    /// Close the in-progress tick, returning the number of completed ticks.
    ///
    /// Every accumulator is appended to its sequence and reset to zero.
    pub fn tick(&self) -> usize {
        let mut inner = self.inner();
        for series in inner.series.values_mut() {
            series.roll();
        }
        inner.ticks += 1;
        inner.ticks
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> usize {
        self.inner().ticks
    }

    /// Take a point-in-time copy of every completed sample of `dimension` of
    /// `metric`, oldest first.
    ///
    /// An unknown metric produces an empty snapshot. The snapshot holds a
    /// pooled buffer which is handed back when it is dropped or passed to
    /// [`Store::release_metrics`].
    #[must_use]
    pub fn get_metrics(&self, metric: &str, dimension: Dimension) -> Snapshot {
        let mut buffer = self.pool.take();
        {
            let inner = self.inner();
            if let Some(series) = inner.series.get(metric) {
                buffer.extend_from_slice(&series.samples[dimension.index()]);
            }
        }
        Snapshot::new(buffer, Arc::clone(&self.pool))
    }

    /// Release a snapshot taken by [`Store::get_metrics`].
    ///
    /// Equivalent to dropping it.
    pub fn release_metrics(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// All notes, sorted by key.
    #[must_use]
    pub fn notes(&self) -> Vec<(String, String)> {
        let mut notes: Vec<(String, String)> = self
            .notes_guard()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        notes.sort();
        notes
    }

    /// The value of a single note, if set.
    #[must_use]
    pub fn get_note(&self, key: &str) -> Option<String> {
        self.notes_guard().get(key).cloned()
    }

    /// The last completed sample of every defined metric dimension, sorted by
    /// metric name and then dimension.
    #[must_use]
    pub fn rates(&self) -> Vec<Rate> {
        let inner = self.inner();
        let mut rates = Vec::new();
        for (metric, series) in &inner.series {
            for dimension in Dimension::ALL {
                let idx = dimension.index();
                if let Some(unit) = &series.units[idx] {
                    rates.push(Rate {
                        metric: metric.clone(),
                        dimension,
                        unit: unit.clone(),
                        last: series.samples[idx].last().copied().unwrap_or(0.0),
                    });
                }
            }
        }
        rates.sort_by(|a, b| {
            a.metric
                .cmp(&b.metric)
                .then(a.dimension.index().cmp(&b.dimension.index()))
        });
        rates
    }

    /// Number of snapshot buffers currently parked for reuse.
    #[must_use]
    pub fn pooled_buffers(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn unknown_metric_is_empty() {
        let store = Store::new("test");
        store.tick();
        let snap = store.get_metrics("missing", Dimension::Count);
        assert!(snap.is_empty());
    }

    #[test]
    fn tick_flushes_and_resets() {
        let store = Store::new("test");
        store.define("Data", Dimension::Count, "Files/second");
        store.define("Data", Dimension::Sum, "Bytes/second");

        store.metric("Data", 1, 10.0);
        store.metric("Data", 1, 20.0);
        store.tick();
        store.tick();
        store.metric("Data", 1, 5.0);
        store.tick();

        let count = store.get_metrics("Data", Dimension::Count);
        let sum = store.get_metrics("Data", Dimension::Sum);
        assert_eq!(&count[..], &[2.0, 0.0, 1.0]);
        assert_eq!(&sum[..], &[30.0, 0.0, 5.0]);
    }

    #[test]
    fn in_progress_tick_is_not_visible() {
        let store = Store::new("test");
        store.metric("Data", 3, 3.0);
        assert!(store.get_metrics("Data", Dimension::Count).is_empty());
        store.tick();
        assert_eq!(&store.get_metrics("Data", Dimension::Count)[..], &[3.0]);
    }

    #[test]
    fn late_metric_is_backfilled() {
        let store = Store::new("test");
        store.define("Data", Dimension::Count, "Files/second");
        store.tick();
        store.tick();
        store.metric("Late", 1, 1.0);
        store.tick();

        let late = store.get_metrics("Late", Dimension::Sum);
        assert_eq!(&late[..], &[0.0, 0.0, 1.0]);
        assert_eq!(store.get_metrics("Data", Dimension::Count).len(), 3);
    }

    #[test]
    fn define_is_idempotent() {
        let store = Store::new("test");
        store.define("Data", Dimension::Count, "Files/second");
        store.metric("Data", 4, 0.0);
        store.tick();
        store.define("Data", Dimension::Count, "files/s");

        assert_eq!(&store.get_metrics("Data", Dimension::Count)[..], &[4.0]);
        let rates = store.rates();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].unit, "files/s");
        assert!((rates[0].last - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn notes_are_last_write_wins() {
        let store = Store::new("test");
        store.note("Delay", "100ms");
        store.note("CPUs", "1 of 4");
        store.note("Delay", "1s");

        assert_eq!(store.get_note("Delay").as_deref(), Some("1s"));
        assert_eq!(
            store.notes(),
            vec![
                ("CPUs".to_string(), "1 of 4".to_string()),
                ("Delay".to_string(), "1s".to_string()),
            ]
        );
    }

    #[test]
    fn rates_are_sorted() {
        let store = Store::new("test");
        store.define("Data", Dimension::Sum, "Bytes/second");
        store.define("Data", Dimension::Count, "Files/second");
        store.define("Alpha", Dimension::Count, "Things/second");
        store.metric("Data", 2, 64.0);
        store.tick();

        let rates: Vec<(String, Dimension, f64)> = store
            .rates()
            .into_iter()
            .map(|r| (r.metric, r.dimension, r.last))
            .collect();
        assert_eq!(
            rates,
            vec![
                ("Alpha".to_string(), Dimension::Count, 0.0),
                ("Data".to_string(), Dimension::Count, 2.0),
                ("Data".to_string(), Dimension::Sum, 64.0),
            ]
        );
    }

    #[test]
    fn dimension_display() {
        assert_eq!(Dimension::Count.to_string(), "count");
        assert_eq!(Dimension::Sum.to_string(), "sum");
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let store = Store::new("test");
        let writers = 8;
        let per_writer = 5_000;

        thread::scope(|s| {
            for _ in 0..writers {
                s.spawn(|| {
                    for _ in 0..per_writer {
                        store.metric("Data", 1, 3.0);
                    }
                });
            }
            // Ticks race with the writers; totals must still add up.
            s.spawn(|| {
                for _ in 0..50 {
                    store.tick();
                    thread::yield_now();
                }
            });
        });
        store.tick();

        let count: f64 = store.get_metrics("Data", Dimension::Count).iter().sum();
        let sum: f64 = store.get_metrics("Data", Dimension::Sum).iter().sum();
        let expected = f64::from(writers * per_writer);
        assert!((count - expected).abs() < f64::EPSILON);
        assert!((sum - expected * 3.0).abs() < f64::EPSILON);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Metric(u8, u16),
        Tick,
    }

    impl Arbitrary for Op {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                (any::<u8>(), any::<u16>()).prop_map(|(c, s)| Op::Metric(c, s)),
                Just(Op::Tick),
            ]
            .boxed()
        }
    }

    proptest! {
        #[test]
        fn sequences_track_ticks_and_totals(ops in prop::collection::vec(any::<Op>(), 0..200)) {
            let store = Store::new("test");
            store.define("Data", Dimension::Count, "Files/second");
            store.define("Data", Dimension::Sum, "Bytes/second");

            let mut ticks = 0;
            let mut count_total = 0u64;
            let mut sum_total = 0u64;
            for op in ops {
                match op {
                    Op::Metric(c, s) => {
                        store.metric("Data", u64::from(c), f64::from(s));
                        count_total += u64::from(c);
                        sum_total += u64::from(s);
                    }
                    Op::Tick => {
                        ticks += 1;
                        prop_assert_eq!(store.tick(), ticks);
                        let count = store.get_metrics("Data", Dimension::Count);
                        let sum = store.get_metrics("Data", Dimension::Sum);
                        prop_assert_eq!(count.len(), ticks);
                        prop_assert_eq!(sum.len(), ticks);
                    }
                }
            }
            store.tick();

            let count: f64 = store.get_metrics("Data", Dimension::Count).iter().sum();
            let sum: f64 = store.get_metrics("Data", Dimension::Sum).iter().sum();
            prop_assert_eq!(count, count_total as f64);
            prop_assert_eq!(sum, sum_total as f64);
        }
    }
}
