//! One-shot phase signalling.
//!
//! randfiles runs a handful of long-lived tasks -- the writers, the metrics
//! ticker, the aggregator, the status server -- none of which stop on their
//! own. They stop when the process decides to shut down, which is signalled
//! through the pair here: a single [`Broadcaster`] and any number of
//! [`Watcher`] instances.
//!
//! Signalling is a one-time event. Once sent, every present and future
//! [`Watcher::recv`] returns immediately.

use tokio::sync::watch;
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// Sending half. There is exactly one per signal.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal. Does not wait for watchers to react.
    pub fn signal(self) {
        self.sender.send_replace(true);
    }

    /// Send the signal and wait until every [`Watcher`] has been dropped.
    ///
    /// Any watcher held by the caller must be dropped first or this will not
    /// return.
    pub async fn signal_and_wait(self) {
        self.sender.send_replace(true);
        let peers = self.sender.receiver_count();
        if peers > 0 {
            info!("Waiting for {peers} peers");
        }
        self.sender.closed().await;
    }
}

#[derive(Debug, Clone)]
/// Receiving half, cloned into every task that participates in shutdown.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// Wait for the signal. Consumes the watcher, so the broadcaster stops
    /// counting it once this returns.
    pub async fn recv(mut self) {
        // An error means the broadcaster was dropped without signalling.
        // Treat that as the signal too: nobody is left to send it.
        let _ = self.receiver.wait_for(|signalled| *signalled).await;
    }
}
