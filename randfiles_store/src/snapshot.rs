//! Point-in-time copies of a metric sequence.
//!
//! Snapshot buffers are recycled. Taking a [`Snapshot`] borrows a buffer from
//! the store's pool and dropping it returns the buffer, so a reader that
//! bails out early through `?` or a panic still gives the buffer back.

use std::{ops::Deref, sync::Arc};

use crossbeam_channel::{Receiver, Sender, bounded};

/// Upper bound on parked buffers. Anything beyond this is freed on release.
const MAX_POOLED: usize = 16;

#[derive(Debug)]
pub(crate) struct Pool {
    recycler: Sender<Vec<f64>>,
    receiver: Receiver<Vec<f64>>,
}

impl Default for Pool {
    fn default() -> Self {
        let (recycler, receiver) = bounded(MAX_POOLED);
        Self { recycler, receiver }
    }
}

impl Pool {
    pub(crate) fn take(&self) -> Vec<f64> {
        self.receiver.try_recv().unwrap_or_default()
    }

    fn give(&self, mut buffer: Vec<f64>) {
        buffer.clear();
        // A full pool hands the buffer back inside the error, which drops it.
        let _ = self.recycler.try_send(buffer);
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// The last `window` elements of `values`, or all of them when fewer exist.
#[must_use]
pub fn tail(values: &[f64], window: usize) -> &[f64] {
    let start = values.len().saturating_sub(window);
    &values[start..]
}

/// An immutable, ordered copy of one metric dimension, oldest sample first.
///
/// Dereferences to `[f64]`.
#[derive(Debug)]
pub struct Snapshot {
    values: Vec<f64>,
    pool: Arc<Pool>,
}

impl Snapshot {
    pub(crate) fn new(values: Vec<f64>, pool: Arc<Pool>) -> Self {
        Self { values, pool }
    }

    /// The last `window` samples, or all of them when fewer exist.
    #[must_use]
    pub fn tail(&self, window: usize) -> &[f64] {
        tail(&self.values, window)
    }
}

impl Deref for Snapshot {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.pool.give(std::mem::take(&mut self.values));
    }
}

#[cfg(test)]
mod tests {
    use crate::{Dimension, Store};

    #[test]
    fn release_returns_buffer() {
        let store = Store::new("test");
        store.metric("Data", 1, 1.0);
        store.tick();

        assert_eq!(store.pooled_buffers(), 0);
        let snap = store.get_metrics("Data", Dimension::Count);
        store.release_metrics(snap);
        assert_eq!(store.pooled_buffers(), 1);

        // The parked buffer is reused and comes back again.
        let snap = store.get_metrics("Data", Dimension::Sum);
        assert_eq!(store.pooled_buffers(), 0);
        assert_eq!(&snap[..], &[1.0]);
        drop(snap);
        assert_eq!(store.pooled_buffers(), 1);
    }

    #[test]
    fn release_on_early_return() {
        fn first_positive(store: &Store) -> Option<f64> {
            let snap = store.get_metrics("Data", Dimension::Count);
            let v = snap.iter().copied().find(|v| *v > 0.0)?;
            Some(v)
        }

        let store = Store::new("test");
        store.tick();
        assert_eq!(first_positive(&store), None);
        assert_eq!(store.pooled_buffers(), 1);
    }

    #[test]
    fn tail_clamps_to_available() {
        let store = Store::new("test");
        for i in 0..5 {
            store.metric("Data", i, 0.0);
            store.tick();
        }
        let snap = store.get_metrics("Data", Dimension::Count);
        assert_eq!(snap.tail(60), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(snap.tail(2), &[3.0, 4.0]);
        assert!(snap.tail(0).is_empty());
    }

    #[test]
    fn pool_is_bounded() {
        let store = Store::new("test");
        let snaps: Vec<_> = (0..40)
            .map(|_| store.get_metrics("Data", Dimension::Count))
            .collect();
        drop(snaps);
        assert_eq!(store.pooled_buffers(), super::MAX_POOLED);
    }
}
