//! A single file writer.
//!
//! Each iteration draws a random name, a size uniformly from
//! `[min_size, max_size)` and that many random content bytes, then creates the
//! file and writes it out. A file that cannot be created or written is logged
//! and skipped: no metric is recorded, nothing is retried and any partial file
//! is left where it is. A failure of the random source is fatal.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use metrics::counter;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use randfiles_store::Store;
use tokio::{fs, io::AsyncWriteExt, time};
use tracing::{debug, info, warn};

use crate::{
    config::WorkerConfig,
    entropy::{self, RandomSource},
    signals::Watcher,
};

use super::DATA_METRIC;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Fatal errors produced by [`Writer`].
pub enum Error {
    /// The random source failed while producing a name or content.
    #[error("Writer {id} lost its random source: {source}")]
    Entropy {
        /// Writer that failed
        id: u32,
        /// Underlying failure
        #[source]
        source: entropy::Error,
    },
    /// The content buffer could not be allocated.
    #[error("Writer {id} could not allocate a {size} byte content buffer")]
    Buffer {
        /// Writer that failed
        id: u32,
        /// Requested buffer size, bytes
        size: usize,
    },
    /// The size generator could not be seeded.
    #[error("Writer {id} could not seed its size generator: {reason}")]
    Seed {
        /// Writer that failed
        id: u32,
        /// Description of the failure
        reason: String,
    },
}

#[derive(thiserror::Error, Debug)]
enum Failure {
    #[error("could not create file: {0}")]
    Create(io::Error),
    #[error("could not write file: {0}")]
    Write(io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of one non-fatal iteration.
pub enum Outcome {
    /// The file was written in full and recorded.
    Written {
        /// Where the file was written
        path: PathBuf,
        /// Size of the file in bytes
        size: usize,
    },
    /// The file could not be created or written and was not recorded.
    Skipped {
        /// The file that was attempted
        path: PathBuf,
    },
}

#[derive(Debug)]
/// One perpetually looping file writer.
pub struct Writer<R> {
    id: u32,
    config: Arc<WorkerConfig>,
    store: Arc<Store>,
    source: R,
    sizes: SmallRng,
    buffer: Vec<u8>,
}

impl<R> Writer<R>
where
    R: RandomSource,
{
    /// Create a new [`Writer`], seeding its size generator from the operating
    /// system.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system cannot seed the size
    /// generator or the content buffer cannot be allocated.
    pub fn new(
        id: u32,
        config: Arc<WorkerConfig>,
        store: Arc<Store>,
        source: R,
    ) -> Result<Self, Error> {
        let sizes = SmallRng::try_from_os_rng().map_err(|err| Error::Seed {
            id,
            reason: err.to_string(),
        })?;
        Self::with_sizes(id, config, store, source, sizes)
    }

    /// Create a new [`Writer`] with an explicit size generator.
    ///
    /// # Errors
    ///
    /// Returns an error if a content buffer of `max_size` bytes cannot be
    /// allocated.
    pub fn with_sizes(
        id: u32,
        config: Arc<WorkerConfig>,
        store: Arc<Store>,
        source: R,
        sizes: SmallRng,
    ) -> Result<Self, Error> {
        let size = config.max_size;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| Error::Buffer { id, size })?;
        buffer.resize(size, 0);
        Ok(Self {
            id,
            config,
            store,
            source,
            sizes,
            buffer,
        })
    }

    /// Draw a file size uniformly from `[min_size, max_size)`.
    pub fn draw_size(&mut self) -> usize {
        self.sizes
            .random_range(self.config.min_size..self.config.max_size)
    }

    /// Produce a single file.
    ///
    /// # Errors
    ///
    /// Returns an error only if the random source fails. File system failures
    /// are reported as [`Outcome::Skipped`].
    pub async fn write_one(&mut self) -> Result<Outcome, Error> {
        let id = self.id;
        let name = entropy::random_name(&mut self.source)
            .map_err(|source| Error::Entropy { id, source })?;
        let size = self.draw_size();
        let content = &mut self.buffer[..size];
        self.source
            .fill(content)
            .map_err(|source| Error::Entropy { id, source })?;

        let path = self
            .config
            .directory
            .join(format!("{name}{}", self.config.extension));

        let res = persist(&path, content).await;
        Ok(self.record(path, size, res))
    }

    /// Record the result of persisting one file. Only complete files reach
    /// the [`Store`].
    fn record(&self, path: PathBuf, size: usize, res: Result<(), Failure>) -> Outcome {
        match res {
            Ok(()) => {
                self.store.metric(DATA_METRIC, 1, size as f64);
                counter!("files_written").increment(1);
                counter!("bytes_written").increment(size as u64);
                debug!(writer = self.id, path = %path.display(), size, "file written");
                Outcome::Written { path, size }
            }
            Err(err) => {
                counter!("file_write_failures").increment(1);
                warn!(writer = self.id, path = %path.display(), "{err}");
                Outcome::Skipped { path }
            }
        }
    }

    /// Run [`Writer`] until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the random source fails. The writer does not
    /// continue after that.
    pub async fn spin(mut self, shutdown: Watcher) -> Result<(), Error> {
        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);
        loop {
            self.write_one().await?;

            tokio::select! {
                () = time::sleep(self.config.delay) => {},
                () = &mut shutdown_wait => {
                    info!(writer = self.id, "shutdown signal received");
                    return Ok(());
                },
            }
        }
    }
}

async fn persist(path: &Path, content: &[u8]) -> Result<(), Failure> {
    let mut fp = fs::File::create(path).await.map_err(Failure::Create)?;
    fp.write_all(content).await.map_err(Failure::Write)?;
    // tokio defers the write to a blocking thread; flush surfaces its error.
    fp.flush().await.map_err(Failure::Write)?;
    Ok(())
}
