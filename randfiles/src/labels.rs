//! Descriptive labels published once at startup.

use randfiles_store::Store;

use crate::config::{Config, WorkerConfig};

/// Facts about the host, gathered by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Host name, or a placeholder if unavailable
    pub name: String,
    /// Runtime worker threads in use
    pub cpus_used: usize,
    /// Logical CPUs on the machine
    pub cpus_available: usize,
}

impl Host {
    /// Gather facts about the running machine.
    #[must_use]
    pub fn current(cpus_used: usize) -> Self {
        let name = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            name,
            cpus_used,
            cpus_available: num_cpus::get(),
        }
    }
}

/// Publish host and configuration labels to `store`.
pub fn publish(store: &Store, host: &Host, config: &Config, worker: &WorkerConfig) {
    store.note("Host Name", host.name.clone());
    store.note(
        "CPUs",
        format!("{} of {}", host.cpus_used, host.cpus_available),
    );
    store.note("Delay", format!("{:?}", worker.delay));
    store.note("Writer threads", config.threads.to_string());
    store.note(
        "File size",
        format!("{} to {} bytes", worker.min_size, worker.max_size),
    );
    store.note("File extension", worker.extension.clone());
    store.note(
        "Working Directory",
        worker.directory.display().to_string(),
    );
}
