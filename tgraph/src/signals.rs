//! Stop signalling
//!
//! Every long-running task in tgraph (viewer loops, the HTTP accept loop,
//! SSE streams, the monitor) must end when the user quits. A single
//! [`Broadcaster`] flips the stop flag, any number of [`Watcher`] clones
//! observe it. Stopping is a one-time event: a watcher created or polled after
//! the signal sees it immediately.

use tokio::sync::watch;
use tracing::debug;

/// Construct a linked [`Watcher`] and [`Broadcaster`] pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// The sending half of the stop signal. There is one per program.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Signal every [`Watcher`] to stop.
    pub fn signal(&self) {
        debug!("broadcasting stop to {count} watchers", count = self.sender.receiver_count());
        self.sender.send_replace(true);
    }

    /// A new [`Watcher`] linked to this broadcaster.
    #[must_use]
    pub fn watcher(&self) -> Watcher {
        Watcher {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
/// The receiving half of the stop signal.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// `true` if the stop signal has been sent.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the stop signal. Returns immediately if it was already sent.
    /// A dropped [`Broadcaster`] counts as a stop.
    pub async fn recv(&mut self) {
        // Err means the broadcaster is gone, which is a stop as well.
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn every_watcher_sees_the_signal() {
        let (mut watcher, broadcaster) = signal();
        let mut clone = watcher.clone();
        assert!(!watcher.is_signaled());

        let waiting = tokio::spawn(async move {
            clone.recv().await;
        });
        broadcaster.signal();
        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .expect("watcher woke")
            .expect("task joined");

        watcher.recv().await;
        assert!(watcher.is_signaled());
        assert!(broadcaster.watcher().is_signaled());
    }

    #[tokio::test]
    async fn dropped_broadcaster_stops() {
        let (mut watcher, broadcaster) = signal();
        drop(broadcaster);
        tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .expect("watcher woke");
    }
}
