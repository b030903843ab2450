//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
//!
//! Configuration arrives as YAML, every field optional. Command-line flags
//! are applied over the top by the binary, after which [`Config::resolve`]
//! produces the immutable [`WorkerConfig`] shared by every writer.

use std::{
    env, io,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    time::Duration,
};

use byte_unit::Byte;
use serde::{Deserialize, Serialize};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// The minimum file size is not strictly below the maximum.
    #[error("Minimum file size {min} must be less than maximum file size {max}")]
    SizeRange {
        /// Configured minimum, bytes
        min: u64,
        /// Configured maximum, bytes
        max: u64,
    },
    /// A file size exceeds [`MAX_FILE_SIZE`].
    #[error("File size {0} bytes exceeds the limit of {max} bytes", max = MAX_FILE_SIZE)]
    SizeTooLarge(u64),
    /// The working directory could not be resolved.
    #[error("Working directory {path:?} is not usable: {source}")]
    WorkingDirectory {
        /// Configured path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// The configured working directory is not a directory.
    #[error("Working directory {0:?} is not a directory")]
    NotADirectory(PathBuf),
}

/// Largest accepted `max_size`. Every writer holds a buffer of this size.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn default_cpus() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_threads() -> NonZeroU32 {
    NonZeroU32::MIN
}

fn default_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_min_size() -> Byte {
    Byte::from_u64(1024)
}

fn default_max_size() -> Byte {
    Byte::from_u64(8192)
}

fn default_extension() -> String {
    ".bin".to_string()
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the status page listens on.
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// Address to bind a Prometheus exporter to, if any.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
    /// Number of runtime worker threads.
    #[serde(default = "default_cpus")]
    pub cpus: NonZeroUsize,
    /// Directory files are written into. Defaults to the current directory.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Number of concurrent file writers.
    #[serde(default = "default_threads")]
    pub threads: NonZeroU32,
    /// Approximate pause between writes of a single writer.
    /// Accepts human-readable durations (e.g., "1s", "100ms").
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,
    /// Smallest file size, inclusive.
    #[serde(default = "default_min_size")]
    pub min_size: Byte,
    /// Largest file size, exclusive.
    #[serde(default = "default_max_size")]
    pub max_size: Byte,
    /// Suffix appended to every generated file name.
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            prometheus_addr: None,
            cpus: default_cpus(),
            working_directory: None,
            threads: default_threads(),
            delay: default_delay(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            extension: default_extension(),
        }
    }
}

impl Config {
    /// Parse a YAML document. Absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML or contains unknown
    /// fields.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        // An empty document is null to serde_yaml, not an empty map.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Validate and resolve into the configuration shared by writers.
    ///
    /// # Errors
    ///
    /// Returns an error if the size range is empty or too large, or if the
    /// working directory does not exist.
    pub fn resolve(&self) -> Result<WorkerConfig, Error> {
        let directory = match &self.working_directory {
            Some(path) => path.clone(),
            None => env::current_dir().map_err(|source| Error::WorkingDirectory {
                path: PathBuf::from("."),
                source,
            })?,
        };
        WorkerConfig::new(
            self.min_size.as_u64(),
            self.max_size.as_u64(),
            self.delay,
            self.extension.clone(),
            directory,
        )
    }
}

/// Immutable per-run writer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Smallest file size, inclusive
    pub min_size: usize,
    /// Largest file size, exclusive
    pub max_size: usize,
    /// Pause between iterations
    pub delay: Duration,
    /// Suffix appended to generated names
    pub extension: String,
    /// Absolute directory files are written into
    pub directory: PathBuf,
}

impl WorkerConfig {
    /// Construct a validated [`WorkerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `min_size >= max_size`, if `max_size` exceeds
    /// [`MAX_FILE_SIZE`] or does not fit in `usize`, or if `directory` cannot
    /// be canonicalized into an existing directory.
    pub fn new(
        min_size: u64,
        max_size: u64,
        delay: Duration,
        extension: String,
        directory: PathBuf,
    ) -> Result<Self, Error> {
        if min_size >= max_size {
            return Err(Error::SizeRange {
                min: min_size,
                max: max_size,
            });
        }
        if max_size > MAX_FILE_SIZE {
            return Err(Error::SizeTooLarge(max_size));
        }
        let min = usize::try_from(min_size).map_err(|_| Error::SizeTooLarge(min_size))?;
        let max = usize::try_from(max_size).map_err(|_| Error::SizeTooLarge(max_size))?;

        let directory = directory
            .canonicalize()
            .map_err(|source| Error::WorkingDirectory {
                path: directory.clone(),
                source,
            })?;
        if !directory.is_dir() {
            return Err(Error::NotADirectory(directory));
        }

        Ok(Self {
            min_size: min,
            max_size: max,
            delay,
            extension,
            directory,
        })
    }
}
