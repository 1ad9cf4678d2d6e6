use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::bail;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, NotaryResult};

/// Behavior of [`BoundedQueue::push`] when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Waits until a pop frees a slot.
    WaitUntilCapacityAvailable,
    /// Drops the new item and reports success.
    DiscardOnNoCapacity,
    /// Fails with [`ErrorKind::OutOfCapacity`].
    ThrowOnNoCapacity,
}

enum PushAttempt<'a, T> {
    Done,
    Full(T, Notified<'a>),
}

enum PopAttempt<'a, T> {
    Item(T),
    Empty(Notified<'a>),
}

/// FIFO queue with a fixed capacity shared between a producer and a consumer stage.
///
/// Items live in a mutex guarded [`VecDeque`]. Every push and every pop wakes all waiters, since
/// both can unblock a waiting producer as well as a waiting consumer. The [`Notified`] future a
/// waiter sleeps on is created while the lock is still held, so a change made between releasing
/// the lock and starting to wait is never missed.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    changed: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue. A zero capacity is rejected.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> NotaryResult<Self> {
        if capacity == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Queue capacity must be greater than zero"
            );
        }

        Ok(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            changed: Notify::new(),
            capacity,
            policy,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of queued items at the time of the call.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends `item`, applying the overflow policy when the queue is full.
    ///
    /// Under [`OverflowPolicy::WaitUntilCapacityAvailable`] this waits without any way to be
    /// interrupted, prefer [`BoundedQueue::push_until_shutdown`] inside workers.
    pub async fn push(&self, item: T) -> NotaryResult<()> {
        let mut item = item;
        loop {
            match self.attempt_push(item)? {
                PushAttempt::Done => return Ok(()),
                PushAttempt::Full(returned, notified) => {
                    item = returned;
                    notified.await;
                }
            }
        }
    }

    /// Appends `item` like [`BoundedQueue::push`], giving up when shutdown is requested.
    ///
    /// When interrupted the item was not enqueued and is handed back in
    /// [`ShutdownResult::Shutdown`].
    pub async fn push_until_shutdown(
        &self,
        shutdown_rx: &mut ShutdownRx,
        item: T,
    ) -> NotaryResult<ShutdownResult<(), T>> {
        let mut item = item;
        loop {
            if shutdown_rx.is_shutdown() {
                return Ok(ShutdownResult::Shutdown(item));
            }

            match self.attempt_push(item)? {
                PushAttempt::Done => return Ok(ShutdownResult::Ok(())),
                PushAttempt::Full(returned, notified) => {
                    item = returned;
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.shutdown_requested() => {
                            return Ok(ShutdownResult::Shutdown(item));
                        }
                        _ = notified => {}
                    }
                }
            }
        }
    }

    /// Appends `item` without ever waiting, applying the overflow policy when the queue is full.
    ///
    /// Discarded items count as pushed and a full queue under
    /// [`OverflowPolicy::ThrowOnNoCapacity`] fails, as with [`BoundedQueue::push`]. Under
    /// [`OverflowPolicy::WaitUntilCapacityAvailable`] the item is handed back instead of waiting.
    pub fn offer(&self, item: T) -> NotaryResult<Result<(), T>> {
        match self.attempt_push(item)? {
            PushAttempt::Done => Ok(Ok(())),
            PushAttempt::Full(item, _) => Ok(Err(item)),
        }
    }

    /// Appends `item` if there is room right now, otherwise hands it back.
    ///
    /// The overflow policy is not consulted.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }

        self.changed.notify_waiters();

        Ok(())
    }

    /// Removes the head item, waiting until one is available.
    pub async fn pop(&self) -> T {
        loop {
            match self.attempt_pop() {
                PopAttempt::Item(item) => return item,
                PopAttempt::Empty(notified) => notified.await,
            }
        }
    }

    /// Removes the head item like [`BoundedQueue::pop`], giving up when shutdown is requested.
    ///
    /// Shutdown is checked before looking at the queue, so a stopping consumer does not take any
    /// further item even when some are queued.
    pub async fn pop_until_shutdown(&self, shutdown_rx: &mut ShutdownRx) -> ShutdownResult<T, ()> {
        loop {
            if shutdown_rx.is_shutdown() {
                return ShutdownResult::Shutdown(());
            }

            match self.attempt_pop() {
                PopAttempt::Item(item) => return ShutdownResult::Ok(item),
                PopAttempt::Empty(notified) => {
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.shutdown_requested() => return ShutdownResult::Shutdown(()),
                        _ = notified => {}
                    }
                }
            }
        }
    }

    /// Removes the head item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.changed.notify_waiters();
        }

        item
    }

    fn attempt_push(&self, item: T) -> NotaryResult<PushAttempt<'_, T>> {
        let mut items = self.lock();
        if items.len() < self.capacity {
            items.push_back(item);
            drop(items);
            self.changed.notify_waiters();

            return Ok(PushAttempt::Done);
        }

        match self.policy {
            OverflowPolicy::WaitUntilCapacityAvailable => {
                Ok(PushAttempt::Full(item, self.changed.notified()))
            }
            OverflowPolicy::DiscardOnNoCapacity => Ok(PushAttempt::Done),
            OverflowPolicy::ThrowOnNoCapacity => {
                bail!(
                    ErrorKind::OutOfCapacity,
                    "Queue is full",
                    format!("capacity is {}", self.capacity)
                )
            }
        }
    }

    fn attempt_pop(&self) -> PopAttempt<'_, T> {
        let mut items = self.lock();
        match items.pop_front() {
            Some(item) => {
                drop(items);
                self.changed.notify_waiters();

                PopAttempt::Item(item)
            }
            None => PopAttempt::Empty(self.changed.notified()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // Every critical section leaves the deque consistent, a panic elsewhere does not matter.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    const WAIT: Duration = Duration::from_secs(5);

    fn queue(capacity: usize, policy: OverflowPolicy) -> Arc<BoundedQueue<u32>> {
        Arc::new(BoundedQueue::new(capacity, policy).unwrap())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = BoundedQueue::<u32>::new(0, OverflowPolicy::ThrowOnNoCapacity).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn items_leave_in_insertion_order() {
        let queue = queue(4, OverflowPolicy::WaitUntilCapacityAvailable);
        for item in 1..=4 {
            queue.push(item).await.unwrap();
        }

        assert_eq!(queue.len(), 4);
        for expected in 1..=4 {
            assert_eq!(queue.pop().await, expected);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn throw_policy_fails_immediately_when_full() {
        let queue = queue(1, OverflowPolicy::ThrowOnNoCapacity);
        queue.push(1).await.unwrap();

        let err = queue.push(2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfCapacity);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn discard_policy_drops_new_items() {
        let queue = queue(2, OverflowPolicy::DiscardOnNoCapacity);
        for item in 1..=5 {
            queue.push(item).await.unwrap();
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_policy_blocks_until_a_slot_frees() {
        let queue = queue(1, OverflowPolicy::WaitUntilCapacityAvailable);
        queue.push(1).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push(2).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().await, 1);
        timeout(WAIT, producer).await.unwrap().unwrap().unwrap();
        assert_eq!(queue.pop().await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn length_never_exceeds_capacity_under_contention() {
        const CAPACITY: usize = 3;
        const ITEMS: u32 = 500;

        let queue = queue(CAPACITY, OverflowPolicy::WaitUntilCapacityAvailable);

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move {
                for item in 0..ITEMS {
                    queue.push(item).await.unwrap();
                    assert!(queue.len() <= CAPACITY);
                }
            }
        });

        let mut received = Vec::with_capacity(ITEMS as usize);
        while received.len() < ITEMS as usize {
            let item = timeout(WAIT, queue.pop()).await.unwrap();
            assert!(queue.len() <= CAPACITY);
            received.push(item);
        }

        timeout(WAIT, producer).await.unwrap().unwrap();
        assert_eq!(received, (0..ITEMS).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_pop_returns_without_removing() {
        let queue = queue(2, OverflowPolicy::WaitUntilCapacityAvailable);
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let consumer = tokio::spawn({
            let queue = queue.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            async move { queue.pop_until_shutdown(&mut shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.shutdown();

        let result = timeout(WAIT, consumer).await.unwrap().unwrap();
        assert_eq!(result, ShutdownResult::Shutdown(()));

        queue.push(7).await.unwrap();
        let mut shutdown_rx = shutdown_rx;
        assert_eq!(
            queue.pop_until_shutdown(&mut shutdown_rx).await,
            ShutdownResult::Shutdown(())
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_push_hands_the_item_back() {
        let queue = queue(1, OverflowPolicy::WaitUntilCapacityAvailable);
        queue.push(1).await.unwrap();
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let producer = tokio::spawn({
            let queue = queue.clone();
            let mut shutdown_rx = shutdown_rx;
            async move { queue.push_until_shutdown(&mut shutdown_rx, 2).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.shutdown();

        let result = timeout(WAIT, producer).await.unwrap().unwrap().unwrap();
        assert_eq!(result, ShutdownResult::Shutdown(2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop(), Some(1));
    }

    #[test]
    fn offer_applies_the_policy_without_waiting() {
        let discard = queue(1, OverflowPolicy::DiscardOnNoCapacity);
        assert_eq!(discard.offer(1).unwrap(), Ok(()));
        assert_eq!(discard.offer(2).unwrap(), Ok(()));
        assert_eq!(discard.len(), 1);
        assert_eq!(discard.try_pop(), Some(1));

        let throw = queue(1, OverflowPolicy::ThrowOnNoCapacity);
        assert_eq!(throw.offer(1).unwrap(), Ok(()));
        assert_eq!(
            throw.offer(2).unwrap_err().kind(),
            ErrorKind::OutOfCapacity
        );

        let wait = queue(1, OverflowPolicy::WaitUntilCapacityAvailable);
        assert_eq!(wait.offer(1).unwrap(), Ok(()));
        assert_eq!(wait.offer(2).unwrap(), Err(2));
        assert_eq!(wait.len(), 1);
    }

    #[tokio::test]
    async fn try_push_ignores_the_policy() {
        let queue = queue(1, OverflowPolicy::WaitUntilCapacityAvailable);
        assert_eq!(queue.try_push(1), Ok(()));
        assert_eq!(queue.try_push(2), Err(2));
    }
}
