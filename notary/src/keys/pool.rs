use std::collections::VecDeque;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::debug;

use crate::bail;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, NotaryResult};
use crate::keys::key::Key;

struct KeyPoolInner {
    available: Mutex<VecDeque<Key>>,
    returned: Notify,
    total_keys: usize,
}

impl KeyPoolInner {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Key>> {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: Key) {
        debug!(public_key = %key.public_key(), "returning signing key to the pool");

        self.lock().push_back(key);
        self.returned.notify_waiters();
    }
}

/// Fixed set of signing keys lent out to one borrower at a time.
///
/// Keys are generated once and the pool never grows or shrinks, at every instant the available
/// keys plus the keys held by [`KeyHandle`]s add up to [`KeyPool::total_keys`]. Acquiring from an
/// empty pool waits until a handle is dropped.
#[derive(Clone)]
pub struct KeyPool {
    inner: Arc<KeyPoolInner>,
}

impl KeyPool {
    /// Creates a pool of `count` freshly generated keys.
    pub fn generate(count: usize) -> NotaryResult<Self> {
        Self::from_keys((0..count).map(|_| Key::generate()).collect())
    }

    /// Creates a pool holding `keys`.
    pub fn from_keys(keys: Vec<Key>) -> NotaryResult<Self> {
        if keys.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Key pool must contain at least one key"
            );
        }

        let total_keys = keys.len();
        Ok(Self {
            inner: Arc::new(KeyPoolInner {
                available: Mutex::new(keys.into()),
                returned: Notify::new(),
                total_keys,
            }),
        })
    }

    pub fn total_keys(&self) -> usize {
        self.inner.total_keys
    }

    /// Number of keys currently in the pool.
    pub fn available(&self) -> usize {
        self.inner.lock().len()
    }

    /// Number of keys currently lent out.
    pub fn borrowed(&self) -> usize {
        self.inner.total_keys - self.available()
    }

    /// Takes a key if one is available right now.
    pub fn try_acquire(&self) -> Option<KeyHandle> {
        self.attempt_acquire().ok()
    }

    /// Takes a key, waiting for one to be returned if the pool is empty.
    pub async fn acquire(&self) -> KeyHandle {
        loop {
            match self.attempt_acquire() {
                Ok(handle) => return handle,
                Err(returned) => returned.await,
            }
        }
    }

    /// Takes a key like [`KeyPool::acquire`], giving up when shutdown is requested.
    pub async fn acquire_until_shutdown(
        &self,
        shutdown_rx: &mut ShutdownRx,
    ) -> ShutdownResult<KeyHandle, ()> {
        loop {
            if shutdown_rx.is_shutdown() {
                return ShutdownResult::Shutdown(());
            }

            match self.attempt_acquire() {
                Ok(handle) => return ShutdownResult::Ok(handle),
                Err(returned) => {
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.shutdown_requested() => return ShutdownResult::Shutdown(()),
                        _ = returned => {}
                    }
                }
            }
        }
    }

    fn attempt_acquire(&self) -> Result<KeyHandle, Notified<'_>> {
        let mut available = self.inner.lock();
        match available.pop_front() {
            Some(key) => {
                drop(available);
                debug!(public_key = %key.public_key(), "lent signing key");

                Ok(KeyHandle {
                    key: ManuallyDrop::new(key),
                    pool: self.inner.clone(),
                })
            }
            None => Err(self.inner.returned.notified()),
        }
    }
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("total_keys", &self.inner.total_keys)
            .field("available", &self.available())
            .finish()
    }
}

/// Exclusive loan of one key from a [`KeyPool`].
///
/// Dropping the handle returns the key to the pool, whether the borrower finished, failed or was
/// cancelled. The key can only be returned once since the handle owns it.
pub struct KeyHandle {
    key: ManuallyDrop<Key>,
    pool: Arc<KeyPoolInner>,
}

impl KeyHandle {
    pub fn public_key(&self) -> &str {
        self.key.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> String {
        self.key.sign(message)
    }

    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        self.key.verify(message, signature)
    }
}

impl Drop for KeyHandle {
    fn drop(&mut self) {
        // SAFETY: the key is taken only here and the handle is never used again.
        let key = unsafe { ManuallyDrop::take(&mut self.key) };
        self.pool.release(key);
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("key", &*self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn empty_pool_is_rejected() {
        let err = KeyPool::generate(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn dropping_a_handle_returns_its_key() {
        let pool = KeyPool::generate(2).unwrap();

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert_ne!(first.public_key(), second.public_key());
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.borrowed(), 2);
        assert!(pool.try_acquire().is_none());

        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn each_handle_returns_exactly_its_own_key() {
        let pool = KeyPool::generate(3).unwrap();

        for _ in 0..10 {
            let handles: Vec<_> = std::iter::from_fn(|| pool.try_acquire()).collect();
            let lent: HashSet<_> = handles.iter().map(|h| h.public_key().to_owned()).collect();
            assert_eq!(lent.len(), 3);

            drop(handles);
            assert_eq!(pool.available(), 3);

            let again: Vec<_> = std::iter::from_fn(|| pool.try_acquire()).collect();
            let returned: HashSet<_> = again.iter().map(|h| h.public_key().to_owned()).collect();
            assert_eq!(returned, lent);
        }
    }

    #[test]
    fn key_is_returned_when_the_borrower_panics() {
        let pool = KeyPool::generate(1).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _handle = pool.try_acquire().unwrap();
            panic!("signer failed");
        }));

        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_waits_for_a_returned_key() {
        let pool = KeyPool::generate(1).unwrap();
        let held = pool.acquire().await;
        let held_public_key = held.public_key().to_owned();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire().await.public_key().to_owned() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let public_key = timeout(WAIT, waiter).await.unwrap().unwrap();
        assert_eq!(public_key, held_public_key);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_acquire_takes_no_key() {
        let pool = KeyPool::generate(1).unwrap();
        let held = pool.acquire().await;
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            let mut shutdown_rx = shutdown_rx;
            async move {
                pool.acquire_until_shutdown(&mut shutdown_rx)
                    .await
                    .should_shutdown()
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.shutdown();

        assert!(timeout(WAIT, waiter).await.unwrap().unwrap());
        drop(held);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn keys_are_never_lent_twice() {
        const KEYS: usize = 3;
        const BORROWERS: usize = 16;
        const ROUNDS: usize = 50;

        let pool = KeyPool::generate(KEYS).unwrap();
        let in_use = Arc::new(Mutex::new(HashSet::new()));

        let mut borrowers = Vec::new();
        for _ in 0..BORROWERS {
            let pool = pool.clone();
            let in_use = in_use.clone();
            borrowers.push(tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    let handle = pool.acquire().await;
                    let public_key = handle.public_key().to_owned();

                    assert!(in_use.lock().unwrap().insert(public_key.clone()));
                    assert!(pool.borrowed() >= 1 && pool.available() < KEYS);
                    tokio::task::yield_now().await;
                    assert!(in_use.lock().unwrap().remove(&public_key));

                    drop(handle);
                }
            }));
        }

        for borrower in borrowers {
            timeout(WAIT, borrower).await.unwrap().unwrap();
        }

        assert_eq!(pool.available(), KEYS);
        assert_eq!(pool.borrowed(), 0);
    }
}
