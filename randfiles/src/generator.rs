//! The file generator.
//!
//! The generator does not "connect" however loosely to anything but instead,
//! without coordination, writes files into a single directory. A configurable
//! number of writers run in parallel, each independently producing one file
//! of random name, size and content per iteration and pausing between
//! iterations.
//!
//! ## Metrics
//!
//! Successful writes are recorded in the [`Store`] under [`DATA_METRIC`]: one
//! count and the file size in bytes per file. The same events are mirrored to
//! the `metrics` facade:
//!
//! `files_written`: Total files written
//! `bytes_written`: Total bytes written
//! `file_write_failures`: Files that could not be created or written
//!

pub mod writer;

use std::{num::NonZeroU32, sync::Arc};

use metrics::gauge;
use randfiles_store::{Dimension, Store};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use crate::{config::WorkerConfig, entropy::OsSource, signals::Watcher};

pub use writer::{Outcome, Writer};

/// Name of the metric every writer records into.
pub const DATA_METRIC: &str = "Data";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Pool`].
pub enum Error {
    /// Wrapper around [`writer::Error`].
    #[error(transparent)]
    Writer(#[from] writer::Error),
    /// Child sub-task error.
    #[error("Child join error: {0}")]
    Child(#[from] JoinError),
}

/// Register the writers' metric dimensions with `store`.
pub fn define_metrics(store: &Store) {
    store.define(DATA_METRIC, Dimension::Count, "Files/second");
    store.define(DATA_METRIC, Dimension::Sum, "Bytes/second");
}

#[derive(Debug)]
/// A pool of independent [`Writer`] tasks.
///
/// Writers share nothing but the [`Store`] and the read-only
/// [`WorkerConfig`].
pub struct Pool {
    workers: JoinSet<Result<(), writer::Error>>,
}

impl Pool {
    /// Create a new [`Pool`], spawning `threads` writers onto the current
    /// runtime.
    ///
    /// # Errors
    ///
    /// Creation fails if a writer's size generator cannot be seeded from the
    /// operating system or its content buffer cannot be allocated.
    ///
    /// # Panics
    ///
    /// Function will panic if called outside of a tokio runtime.
    pub fn new(
        config: Arc<WorkerConfig>,
        threads: NonZeroU32,
        store: &Arc<Store>,
        shutdown: &Watcher,
    ) -> Result<Self, Error> {
        let mut workers = JoinSet::new();
        for id in 0..threads.get() {
            let writer = Writer::new(id, Arc::clone(&config), Arc::clone(store), OsSource)?;
            workers.spawn(writer.spin(shutdown.clone()));
        }
        gauge!("writers").set(f64::from(threads.get()));
        info!(
            threads = threads.get(),
            directory = %config.directory.display(),
            "file writers started"
        );
        Ok(Self { workers })
    }

    /// Run the [`Pool`] until every writer has stopped.
    ///
    /// Writers stop when the shutdown signal is received. A writer that fails
    /// fatally ends the pool immediately with that writer's error; the
    /// remaining writers are aborted.
    ///
    /// # Errors
    ///
    /// Returns the first fatal writer error, or a join error if a writer
    /// panicked.
    pub async fn spin(mut self) -> Result<(), Error> {
        while let Some(res) = self.workers.join_next().await {
            match res {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => {
                    error!("file writer failed: {err}");
                    return Err(Error::Writer(err));
                }
                Err(err) => return Err(Error::Child(err)),
            }
        }
        info!("all file writers stopped");
        Ok(())
    }
}
