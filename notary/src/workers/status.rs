use std::sync::Arc;

use tracing::{debug, info};

use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, NotaryResult};
use crate::notary_error;
use crate::workers::base::{CancellableWorker, Worker};
use crate::workers::logs::{LogBus, LogLine};

const WORKER_NAME: &str = "StatusLog";

/// Writes the status lines collected from every stage through `tracing`.
///
/// Stages only ever try to enqueue a line, so a full status queue drops lines instead of slowing
/// a stage down. On stop the lines still queued are written before the worker returns.
#[derive(Debug)]
pub struct StatusLogWorker {
    worker: CancellableWorker,
    pending: Option<Arc<BoundedQueue<LogLine>>>,
}

impl StatusLogWorker {
    pub fn new(lines: Arc<BoundedQueue<LogLine>>) -> Self {
        Self {
            worker: CancellableWorker::new(WORKER_NAME),
            pending: Some(lines),
        }
    }

    /// Returns a subscriber forwarding status lines into `lines`.
    ///
    /// The subscriber never waits, a full queue is handled by its overflow policy.
    pub fn forwarder(
        lines: Arc<BoundedQueue<LogLine>>,
    ) -> impl Fn(&LogLine) + Send + Sync + 'static {
        move |line| match lines.offer(line.clone()) {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!("status queue is full, dropping line"),
            Err(err) => debug!(error = %err, "status line rejected"),
        }
    }
}

impl Worker for StatusLogWorker {
    fn worker(&self) -> &CancellableWorker {
        &self.worker
    }

    fn worker_mut(&mut self) -> &mut CancellableWorker {
        &mut self.worker
    }

    fn start(&mut self) -> NotaryResult<()> {
        let Some(lines) = self.pending.take() else {
            return Err(notary_error!(
                ErrorKind::WorkerAlreadyStarted,
                "Worker was already started",
                WORKER_NAME
            ));
        };

        self.worker
            .start(move |shutdown_rx, _logs: LogBus| write_lines(lines, shutdown_rx))
    }
}

async fn write_lines(
    lines: Arc<BoundedQueue<LogLine>>,
    mut shutdown_rx: ShutdownRx,
) -> NotaryResult<()> {
    while let ShutdownResult::Ok(line) = lines.pop_until_shutdown(&mut shutdown_rx).await {
        info!(target: "notary::status", "{line}");
    }

    while let Some(line) = lines.try_pop() {
        info!(target: "notary::status", "{line}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::concurrency::queue::OverflowPolicy;

    #[tokio::test]
    async fn queued_lines_are_drained_on_stop() {
        let lines = Arc::new(BoundedQueue::new(4, OverflowPolicy::DiscardOnNoCapacity).unwrap());
        let forward = StatusLogWorker::forwarder(lines.clone());
        for i in 0..6 {
            forward(&LogLine::from(format!("line {i}")));
        }
        assert_eq!(lines.len(), 4);

        let mut worker = StatusLogWorker::new(lines.clone());
        worker.start().unwrap();
        timeout(Duration::from_secs(5), worker.blocking_stop())
            .await
            .unwrap()
            .unwrap();

        assert!(lines.is_empty());
    }

    #[test]
    fn forwarding_never_blocks_on_a_full_queue() {
        for policy in [
            OverflowPolicy::WaitUntilCapacityAvailable,
            OverflowPolicy::ThrowOnNoCapacity,
        ] {
            let lines = Arc::new(BoundedQueue::new(2, policy).unwrap());
            let forward = StatusLogWorker::forwarder(lines.clone());
            for i in 0..5 {
                forward(&LogLine::from(format!("line {i}")));
            }

            assert_eq!(lines.len(), 2);
            assert_eq!(lines.try_pop().map(|l| l.to_string()), Some("line 0".into()));
        }
    }
}
