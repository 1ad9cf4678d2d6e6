use std::sync::Arc;

use tokio::sync::watch;

/// Outcome of an operation that can be interrupted by a shutdown request.
///
/// `Shutdown` carries whatever the operation did not consume, so the caller decides what happens
/// to it instead of losing it silently.
#[derive(Debug, PartialEq, Eq)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    /// Returns `true` when the operation was interrupted.
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }

    /// Returns the completed value, discarding the interrupted one.
    pub fn ok(self) -> Option<T> {
        match self {
            ShutdownResult::Ok(value) => Some(value),
            ShutdownResult::Shutdown(_) => None,
        }
    }
}

/// Sending half of a shutdown signal.
///
/// Cloning is cheap and every clone signals the same receivers.
#[derive(Debug, Clone)]
pub struct ShutdownTx(Arc<watch::Sender<bool>>);

impl ShutdownTx {
    /// Requests shutdown. Requesting more than once has no further effect.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Returns `true` once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates a new receiver observing this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving half of a shutdown signal, passed into every wait that must be interruptible.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes when shutdown is requested.
    ///
    /// A dropped [`ShutdownTx`] can never lift the request anymore, so it counts as shutdown too.
    pub async fn shutdown_requested(&mut self) {
        let _ = self.0.wait_for(|requested| *requested).await;
    }
}

/// Creates a connected shutdown sender and receiver.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(Arc::new(tx)), ShutdownRx(rx))
}
