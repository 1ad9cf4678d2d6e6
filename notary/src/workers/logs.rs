use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// One status line emitted by a worker.
pub type LogLine = Arc<str>;

type Subscriber = Arc<dyn Fn(&LogLine) + Send + Sync>;

/// Broadcasts the status lines of a worker to any number of subscribers.
///
/// Subscribers are called synchronously on the emitting task, in subscription order, so each
/// of them sees every line in emission order. Subscribing while the worker runs is allowed but
/// lines emitted concurrently with the subscription may be missed.
#[derive(Clone, Default)]
pub struct LogBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for every line emitted from now on.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(subscriber));
    }

    /// Delivers `line` to every subscriber.
    pub fn emit(&self, line: impl Into<String>) {
        let line: LogLine = Arc::from(line.into());

        // The list is cloned so a subscriber can subscribe again without deadlocking.
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for subscriber in subscribers {
            subscriber(&line);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for LogBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
