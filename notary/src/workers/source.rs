use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, NotaryResult};
use crate::notary_error;
use crate::source::RecordSource;
use crate::types::Record;
use crate::workers::base::{CancellableWorker, Worker};
use crate::workers::logs::LogBus;

const WORKER_NAME: &str = "SourceStage";

/// Reads records from a [`RecordSource`] and pushes them one by one onto the record queue.
///
/// The stage returns once the source is exhausted or a stop is requested.
#[derive(Debug)]
pub struct SourceStage<S> {
    worker: CancellableWorker,
    pending: Option<SourceLoop<S>>,
    records_read: watch::Receiver<u64>,
}

#[derive(Debug)]
struct SourceLoop<S> {
    source: S,
    outbound: Arc<BoundedQueue<Record>>,
    log_every: u64,
    records_read: watch::Sender<u64>,
}

impl<S> SourceStage<S>
where
    S: RecordSource + Send + 'static,
{
    /// Creates the stage. A status line is emitted every `log_every` records.
    pub fn new(
        source: S,
        outbound: Arc<BoundedQueue<Record>>,
        log_every: u64,
    ) -> NotaryResult<Self> {
        if log_every == 0 {
            return Err(notary_error!(
                ErrorKind::ConfigError,
                "Source log interval must be greater than zero"
            ));
        }

        let (records_read_tx, records_read_rx) = watch::channel(0);

        Ok(Self {
            worker: CancellableWorker::new(WORKER_NAME),
            pending: Some(SourceLoop {
                source,
                outbound,
                log_every,
                records_read: records_read_tx,
            }),
            records_read: records_read_rx,
        })
    }

    /// Observes the number of records pushed onto the record queue so far.
    pub fn records_read(&self) -> watch::Receiver<u64> {
        self.records_read.clone()
    }
}

impl<S> Worker for SourceStage<S>
where
    S: RecordSource + Send + 'static,
{
    fn worker(&self) -> &CancellableWorker {
        &self.worker
    }

    fn worker_mut(&mut self) -> &mut CancellableWorker {
        &mut self.worker
    }

    fn start(&mut self) -> NotaryResult<()> {
        let Some(source_loop) = self.pending.take() else {
            return Err(notary_error!(
                ErrorKind::WorkerAlreadyStarted,
                "Worker was already started",
                WORKER_NAME
            ));
        };

        info!(source = S::name(), "starting source stage");

        self.worker
            .start(move |shutdown_rx, logs| source_loop.run(shutdown_rx, logs))
    }
}

impl<S> SourceLoop<S>
where
    S: RecordSource + Send + 'static,
{
    async fn run(mut self, mut shutdown_rx: ShutdownRx, logs: LogBus) -> NotaryResult<()> {
        logs.emit(format!("{WORKER_NAME}: work loop started"));

        let mut records_read = 0u64;
        while !shutdown_rx.is_shutdown() {
            let Some(record) = self.source.next_record().await? else {
                debug!(records_read, "source exhausted");
                break;
            };

            match self
                .outbound
                .push_until_shutdown(&mut shutdown_rx, record)
                .await?
            {
                ShutdownResult::Ok(()) => {}
                ShutdownResult::Shutdown(record) => {
                    debug!(record_id = record.id, "record not enqueued, stop requested");
                    break;
                }
            }

            records_read += 1;
            self.records_read.send_replace(records_read);

            if records_read % self.log_every == 0 {
                logs.emit(format!("{WORKER_NAME}: read {records_read} messages"));
            }
        }

        logs.emit(format!("{WORKER_NAME}: work loop ended"));

        Ok(())
    }
}
