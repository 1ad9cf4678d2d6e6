use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, NotaryResult};
use crate::keys::pool::{KeyHandle, KeyPool};
use crate::notary_error;
use crate::types::{Record, SignedBatch, SignedRecord};
use crate::workers::base::{CancellableWorker, Worker};
use crate::workers::logs::LogBus;

const WORKER_NAME: &str = "BatchStage";

/// Progress counters published by the [`BatchStage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    /// Records popped from the record queue, including those of a batch still being filled.
    pub records_taken: u64,
    /// Complete batches pushed onto the signed batch queue.
    pub batches_forwarded: u64,
}

/// Groups records into batches, signs each batch with one key and forwards it.
///
/// For every batch the stage pops `batch_size` records, borrows a single key from the
/// [`KeyPool`], signs all records in order and returns the key before pushing the batch. A batch
/// interrupted by a stop request, while filling or while signing, is dropped as a whole.
#[derive(Debug)]
pub struct BatchStage {
    worker: CancellableWorker,
    pending: Option<BatchLoop>,
    progress: watch::Receiver<BatchProgress>,
}

#[derive(Debug)]
struct BatchLoop {
    inbound: Arc<BoundedQueue<Record>>,
    outbound: Arc<BoundedQueue<SignedBatch>>,
    keys: KeyPool,
    batch_size: usize,
    log_frequency: u64,
    progress: watch::Sender<BatchProgress>,
}

impl BatchStage {
    /// Creates the stage.
    ///
    /// A status line is emitted every `log_frequency` forwarded batches. Zero values for
    /// `batch_size` or `log_frequency` are rejected.
    pub fn new(
        inbound: Arc<BoundedQueue<Record>>,
        outbound: Arc<BoundedQueue<SignedBatch>>,
        keys: KeyPool,
        batch_size: usize,
        log_frequency: u64,
    ) -> NotaryResult<Self> {
        if batch_size == 0 {
            return Err(notary_error!(
                ErrorKind::ConfigError,
                "Batch size must be greater than zero"
            ));
        }

        if log_frequency == 0 {
            return Err(notary_error!(
                ErrorKind::ConfigError,
                "Batch log frequency must be greater than zero"
            ));
        }

        let (progress_tx, progress_rx) = watch::channel(BatchProgress::default());

        Ok(Self {
            worker: CancellableWorker::new(WORKER_NAME),
            pending: Some(BatchLoop {
                inbound,
                outbound,
                keys,
                batch_size,
                log_frequency,
                progress: progress_tx,
            }),
            progress: progress_rx,
        })
    }

    pub fn progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress.clone()
    }
}

impl Worker for BatchStage {
    fn worker(&self) -> &CancellableWorker {
        &self.worker
    }

    fn worker_mut(&mut self) -> &mut CancellableWorker {
        &mut self.worker
    }

    fn start(&mut self) -> NotaryResult<()> {
        let Some(batch_loop) = self.pending.take() else {
            return Err(notary_error!(
                ErrorKind::WorkerAlreadyStarted,
                "Worker was already started",
                WORKER_NAME
            ));
        };

        info!(
            batch_size = batch_loop.batch_size,
            keys = batch_loop.keys.total_keys(),
            "starting batch stage"
        );

        self.worker
            .start(move |shutdown_rx, logs| batch_loop.run(shutdown_rx, logs))
    }
}

impl BatchLoop {
    async fn run(self, mut shutdown_rx: ShutdownRx, logs: LogBus) -> NotaryResult<()> {
        logs.emit(format!("{WORKER_NAME}: work loop started"));

        let mut progress = BatchProgress::default();
        'work: loop {
            let mut batch = Vec::with_capacity(self.batch_size);
            while batch.len() < self.batch_size {
                match self.inbound.pop_until_shutdown(&mut shutdown_rx).await {
                    ShutdownResult::Ok(record) => {
                        batch.push(record);
                        progress.records_taken += 1;
                        self.progress.send_replace(progress);
                    }
                    ShutdownResult::Shutdown(()) => {
                        if !batch.is_empty() {
                            debug!(records = batch.len(), "discarding partially filled batch");
                        }
                        break 'work;
                    }
                }
            }

            // The key is borrowed right before signing and returned by the signing task.
            let key = match self.keys.acquire_until_shutdown(&mut shutdown_rx).await {
                ShutdownResult::Ok(key) => key,
                ShutdownResult::Shutdown(()) => break,
            };

            let signed_batch = match sign_batch_blocking(key, batch, shutdown_rx.clone()).await? {
                ShutdownResult::Ok(signed_batch) => signed_batch,
                ShutdownResult::Shutdown(signed) => {
                    debug!(signed, "discarding batch interrupted while signing");
                    break;
                }
            };

            match self
                .outbound
                .push_until_shutdown(&mut shutdown_rx, signed_batch)
                .await?
            {
                ShutdownResult::Ok(()) => {}
                ShutdownResult::Shutdown(signed_batch) => {
                    debug!(
                        records = signed_batch.len(),
                        "signed batch not forwarded, stop requested"
                    );
                    break;
                }
            }

            progress.batches_forwarded += 1;
            self.progress.send_replace(progress);

            if progress.batches_forwarded % self.log_frequency == 0 {
                logs.emit(format!(
                    "{WORKER_NAME}: signed {} batches",
                    progress.batches_forwarded
                ));
            }
        }

        logs.emit(format!("{WORKER_NAME}: work loop ended"));

        Ok(())
    }
}

/// Signs `batch` on the blocking thread pool and returns `key` to its pool once done.
async fn sign_batch_blocking(
    key: KeyHandle,
    batch: Vec<Record>,
    shutdown_rx: ShutdownRx,
) -> NotaryResult<ShutdownResult<SignedBatch, usize>> {
    tokio::task::spawn_blocking(move || {
        let result = sign_batch(&key, &batch, || shutdown_rx.is_shutdown());
        drop(key);

        result
    })
    .await
    .map_err(|err| {
        notary_error!(
            ErrorKind::SignerPanic,
            "Signing task failed",
            err.to_string(),
            source: err
        )
    })
}

/// Signs every record of `batch` with `key`, in order.
///
/// `is_cancelled` is checked before each record. Once it returns `true` signing stops and the
/// number of records signed so far is returned in [`ShutdownResult::Shutdown`], the partial
/// result is dropped.
pub fn sign_batch<C>(
    key: &KeyHandle,
    batch: &[Record],
    mut is_cancelled: C,
) -> ShutdownResult<SignedBatch, usize>
where
    C: FnMut() -> bool,
{
    let signer = key.public_key().to_owned();

    let mut signed_batch = Vec::with_capacity(batch.len());
    for record in batch {
        if is_cancelled() {
            return ShutdownResult::Shutdown(signed_batch.len());
        }

        signed_batch.push(SignedRecord {
            id: record.id,
            signature: key.sign(&record.message),
            signer: signer.clone(),
        });
    }

    ShutdownResult::Ok(signed_batch)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::concurrency::queue::OverflowPolicy;
    use crate::keys::key::verify;

    const WAIT: Duration = Duration::from_secs(5);

    fn records(count: i64) -> Vec<Record> {
        (1..=count)
            .map(|id| Record::new(id, format!("message {id}")))
            .collect()
    }

    #[test]
    fn signed_batch_matches_its_records() {
        let pool = KeyPool::generate(1).unwrap();
        let key = pool.try_acquire().unwrap();
        let batch = records(100);

        let ShutdownResult::Ok(signed_batch) = sign_batch(&key, &batch, || false) else {
            panic!("signing was not cancelled");
        };

        assert_eq!(signed_batch.len(), batch.len());
        for (record, signed) in batch.iter().zip(&signed_batch) {
            assert_eq!(signed.id, record.id);
            assert_eq!(signed.signer, key.public_key());
            assert!(verify(&record.message, &signed.signature, key.public_key()));
        }
    }

    #[test]
    fn cancellation_mid_batch_discards_it_and_returns_the_key() {
        let pool = KeyPool::generate(1).unwrap();
        let key = pool.try_acquire().unwrap();
        let batch = records(100);

        let mut checks = 0;
        let result = sign_batch(&key, &batch, || {
            checks += 1;
            checks > 40
        });
        drop(key);

        assert_eq!(result, ShutdownResult::Shutdown(40));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let inbound = Arc::new(
            BoundedQueue::new(1, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let outbound = Arc::new(
            BoundedQueue::new(1, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let keys = KeyPool::generate(1).unwrap();

        let err = BatchStage::new(inbound, outbound, keys, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_batches_are_forwarded_and_partial_ones_dropped() {
        let inbound = Arc::new(
            BoundedQueue::new(32, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let outbound = Arc::new(
            BoundedQueue::new(4, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let keys = KeyPool::generate(2).unwrap();

        for record in records(25) {
            inbound.push(record).await.unwrap();
        }

        let mut stage =
            BatchStage::new(inbound.clone(), outbound.clone(), keys.clone(), 10, 1).unwrap();
        let mut progress = stage.progress();
        stage.start().unwrap();

        timeout(
            WAIT,
            progress.wait_for(|p| p.records_taken == 25 && p.batches_forwarded == 2),
        )
        .await
        .unwrap()
        .unwrap();
        timeout(WAIT, stage.blocking_stop()).await.unwrap().unwrap();

        assert!(inbound.is_empty());
        assert_eq!(outbound.len(), 2);
        assert_eq!(keys.available(), 2);

        let first = outbound.try_pop().unwrap();
        let second = outbound.try_pop().unwrap();
        assert_eq!(
            first.iter().map(|r| r.id).collect::<Vec<_>>(),
            (1..=10).collect::<Vec<_>>()
        );
        assert_eq!(
            second.iter().map(|r| r.id).collect::<Vec<_>>(),
            (11..=20).collect::<Vec<_>>()
        );
        for batch in [&first, &second] {
            assert!(batch.iter().all(|r| r.signer == batch[0].signer));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_while_waiting_for_a_key_forwards_nothing() {
        let inbound = Arc::new(
            BoundedQueue::new(8, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let outbound = Arc::new(
            BoundedQueue::new(4, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let keys = KeyPool::generate(1).unwrap();
        let held = keys.try_acquire().unwrap();

        for record in records(4) {
            inbound.push(record).await.unwrap();
        }

        let mut stage =
            BatchStage::new(inbound.clone(), outbound.clone(), keys.clone(), 4, 1).unwrap();
        let mut progress = stage.progress();
        stage.start().unwrap();

        timeout(WAIT, progress.wait_for(|p| p.records_taken == 4))
            .await
            .unwrap()
            .unwrap();
        timeout(WAIT, stage.blocking_stop()).await.unwrap().unwrap();

        assert!(outbound.is_empty());
        assert_eq!(progress.borrow().batches_forwarded, 0);
        drop(held);
        assert_eq!(keys.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_while_signing_forwards_nothing_and_returns_the_key() {
        const BATCH_SIZE: usize = 10_000;

        let inbound = Arc::new(
            BoundedQueue::new(BATCH_SIZE, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let outbound = Arc::new(
            BoundedQueue::new(4, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let keys = KeyPool::generate(2).unwrap();

        // Large messages keep the single batch in the signer well past the stop request.
        let message = "x".repeat(1024);
        for id in 1..=BATCH_SIZE as i64 {
            inbound.push(Record::new(id, message.clone())).await.unwrap();
        }

        let mut stage =
            BatchStage::new(inbound.clone(), outbound.clone(), keys.clone(), BATCH_SIZE, 1)
                .unwrap();
        let mut progress = stage.progress();
        stage.start().unwrap();

        timeout(WAIT, progress.wait_for(|p| p.records_taken == BATCH_SIZE as u64))
            .await
            .unwrap()
            .unwrap();
        timeout(WAIT * 12, stage.blocking_stop()).await.unwrap().unwrap();

        assert!(inbound.is_empty());
        assert!(outbound.is_empty());
        assert_eq!(progress.borrow().batches_forwarded, 0);
        assert_eq!(keys.available(), keys.total_keys());
        assert_eq!(keys.borrowed(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_lines_follow_the_log_frequency() {
        let inbound = Arc::new(
            BoundedQueue::new(8, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let outbound = Arc::new(
            BoundedQueue::new(8, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let keys = KeyPool::generate(1).unwrap();

        for record in records(8) {
            inbound.push(record).await.unwrap();
        }

        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut stage = BatchStage::new(inbound, outbound, keys, 2, 2).unwrap();
        stage.subscribe_logs({
            let lines = lines.clone();
            move |line| lines.lock().unwrap().push(line.to_string())
        });
        let mut progress = stage.progress();
        stage.start().unwrap();

        timeout(WAIT, progress.wait_for(|p| p.batches_forwarded == 4))
            .await
            .unwrap()
            .unwrap();
        timeout(WAIT, stage.blocking_stop()).await.unwrap().unwrap();

        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "BatchStage: work loop started",
                "BatchStage: signed 2 batches",
                "BatchStage: signed 4 batches",
                "BatchStage: work loop ended",
            ]
        );
    }
}
