use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, NotaryResult};
use crate::notary_error;
use crate::sink::RecordSink;
use crate::types::SignedBatch;
use crate::workers::base::{CancellableWorker, Worker};
use crate::workers::logs::LogBus;

const WORKER_NAME: &str = "SinkStage";

/// Progress counters published by the [`SinkStage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkProgress {
    pub batches_written: u64,
    pub records_written: u64,
}

/// Pops signed batches and commits each one to a [`RecordSink`] as a unit.
///
/// A failed write ends the stage with the error, the batch is not retried or skipped.
#[derive(Debug)]
pub struct SinkStage<K> {
    worker: CancellableWorker,
    pending: Option<SinkLoop<K>>,
    progress: watch::Receiver<SinkProgress>,
}

#[derive(Debug)]
struct SinkLoop<K> {
    sink: K,
    inbound: Arc<BoundedQueue<SignedBatch>>,
    log_frequency: u64,
    progress: watch::Sender<SinkProgress>,
}

impl<K> SinkStage<K>
where
    K: RecordSink + Send + Sync + 'static,
{
    /// Creates the stage. A status line is emitted every `log_frequency` written batches.
    pub fn new(
        sink: K,
        inbound: Arc<BoundedQueue<SignedBatch>>,
        log_frequency: u64,
    ) -> NotaryResult<Self> {
        if log_frequency == 0 {
            return Err(notary_error!(
                ErrorKind::ConfigError,
                "Sink log frequency must be greater than zero"
            ));
        }

        let (progress_tx, progress_rx) = watch::channel(SinkProgress::default());

        Ok(Self {
            worker: CancellableWorker::new(WORKER_NAME),
            pending: Some(SinkLoop {
                sink,
                inbound,
                log_frequency,
                progress: progress_tx,
            }),
            progress: progress_rx,
        })
    }

    pub fn progress(&self) -> watch::Receiver<SinkProgress> {
        self.progress.clone()
    }
}

impl<K> Worker for SinkStage<K>
where
    K: RecordSink + Send + Sync + 'static,
{
    fn worker(&self) -> &CancellableWorker {
        &self.worker
    }

    fn worker_mut(&mut self) -> &mut CancellableWorker {
        &mut self.worker
    }

    fn start(&mut self) -> NotaryResult<()> {
        let Some(sink_loop) = self.pending.take() else {
            return Err(notary_error!(
                ErrorKind::WorkerAlreadyStarted,
                "Worker was already started",
                WORKER_NAME
            ));
        };

        info!(sink = K::name(), "starting sink stage");

        self.worker
            .start(move |shutdown_rx, logs| sink_loop.run(shutdown_rx, logs))
    }
}

impl<K> SinkLoop<K>
where
    K: RecordSink + Send + Sync + 'static,
{
    async fn run(self, mut shutdown_rx: ShutdownRx, logs: LogBus) -> NotaryResult<()> {
        logs.emit(format!("{WORKER_NAME}: work loop started"));

        let mut progress = SinkProgress::default();
        while let ShutdownResult::Ok(batch) =
            self.inbound.pop_until_shutdown(&mut shutdown_rx).await
        {
            let records = batch.len() as u64;
            if let Err(err) = self.sink.write_signed_batch(batch).await {
                error!(error = %err, "failed to write signed batch");
                logs.emit(format!(
                    "{WORKER_NAME}: write failed after {} batches",
                    progress.batches_written
                ));

                return Err(err);
            }

            progress.batches_written += 1;
            progress.records_written += records;
            self.progress.send_replace(progress);

            if progress.batches_written % self.log_frequency == 0 {
                logs.emit(format!(
                    "{WORKER_NAME}: wrote {} batches",
                    progress.batches_written
                ));
            }
        }

        logs.emit(format!("{WORKER_NAME}: work loop ended"));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::concurrency::queue::OverflowPolicy;
    use crate::sink::memory::MemorySink;
    use crate::types::SignedRecord;

    const WAIT: Duration = Duration::from_secs(5);

    fn signed_batch(ids: std::ops::RangeInclusive<i64>) -> SignedBatch {
        ids.map(|id| SignedRecord {
            id,
            signature: format!("{id:0128X}"),
            signer: "AB".repeat(44),
        })
        .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_batches_in_queue_order() {
        let queue = Arc::new(
            BoundedQueue::new(4, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let sink = MemorySink::new();
        let mut stage = SinkStage::new(sink.clone(), queue.clone(), 1).unwrap();
        let mut progress = stage.progress();

        queue.push(signed_batch(1..=3)).await.unwrap();
        queue.push(signed_batch(4..=6)).await.unwrap();
        stage.start().unwrap();

        timeout(WAIT, progress.wait_for(|p| p.batches_written == 2))
            .await
            .unwrap()
            .unwrap();
        timeout(WAIT, stage.blocking_stop()).await.unwrap().unwrap();

        let ids: Vec<i64> = sink.records().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=6).collect::<Vec<_>>());
        assert_eq!(progress.borrow().records_written, 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_write_ends_the_stage_with_the_error() {
        let queue = Arc::new(
            BoundedQueue::new(4, OverflowPolicy::WaitUntilCapacityAvailable).unwrap(),
        );
        let sink = MemorySink::new();
        let mut stage = SinkStage::new(sink.clone(), queue.clone(), 1).unwrap();

        // The memory sink rejects ids it already holds.
        queue.push(signed_batch(1..=2)).await.unwrap();
        queue.push(signed_batch(2..=3)).await.unwrap();
        stage.start().unwrap();

        let mut completion = stage.completion().unwrap();
        timeout(WAIT, completion.finished()).await.unwrap();

        let err = timeout(WAIT, stage.join()).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
        assert_eq!(sink.batches().await.len(), 1);
    }
}
