use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, NotaryResult};
use crate::notary_error;
use crate::workers::logs::{LogBus, LogLine};

/// Lifecycle state of a [`CancellableWorker`].
///
/// Transitions only move forward: `Idle -> Running -> StopRequested -> Stopped`. A worker whose
/// task returns on its own goes from `Running` straight to `Stopped` when joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

/// Observes whether a worker task has returned, without joining it.
#[derive(Debug, Clone)]
pub struct WorkerCompletion(watch::Receiver<bool>);

impl WorkerCompletion {
    pub fn is_finished(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once the task has returned or panicked.
    pub async fn finished(&mut self) {
        // The sender is dropped when the task unwinds, which also ends the wait.
        let _ = self.0.wait_for(|finished| *finished).await;
    }
}

/// Runs one background task with start-once semantics and cooperative stop.
///
/// The task receives a [`ShutdownRx`] it must pass to every wait, and the worker's [`LogBus`]
/// to publish status lines on. Dropping a running worker requests it to stop.
#[derive(Debug)]
pub struct CancellableWorker {
    name: &'static str,
    state: WorkerState,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
    completion: Option<WorkerCompletion>,
    handle: Option<JoinHandle<NotaryResult<()>>>,
    logs: LogBus,
}

impl CancellableWorker {
    pub fn new(name: &'static str) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        Self {
            name,
            state: WorkerState::Idle,
            shutdown_tx,
            shutdown_rx,
            completion: None,
            handle: None,
            logs: LogBus::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn logs(&self) -> &LogBus {
        &self.logs
    }

    /// Registers a subscriber for the worker's status lines.
    ///
    /// Should be called before [`CancellableWorker::start`], lines emitted while subscribing may
    /// be missed otherwise.
    pub fn subscribe_logs<F>(&self, subscriber: F)
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        self.logs.subscribe(subscriber);
    }

    /// Returns a handle observing the task's completion, once started.
    pub fn completion(&self) -> Option<WorkerCompletion> {
        self.completion.clone()
    }

    /// Spawns `body` on the current tokio runtime.
    ///
    /// Fails with [`ErrorKind::WorkerAlreadyStarted`] unless the worker is idle.
    pub fn start<F, Fut>(&mut self, body: F) -> NotaryResult<()>
    where
        F: FnOnce(ShutdownRx, LogBus) -> Fut,
        Fut: Future<Output = NotaryResult<()>> + Send + 'static,
    {
        if self.state != WorkerState::Idle {
            bail!(
                ErrorKind::WorkerAlreadyStarted,
                "Worker was already started",
                self.name
            );
        }

        let (finished_tx, finished_rx) = watch::channel(false);
        let task = body(self.shutdown_rx.clone(), self.logs.clone());
        let span = info_span!("worker", name = self.name);
        let handle = tokio::spawn(
            async move {
                let result = task.await;
                let _ = finished_tx.send(true);

                result
            }
            .instrument(span),
        );

        debug!(worker = self.name, "worker started");

        self.completion = Some(WorkerCompletion(finished_rx));
        self.handle = Some(handle);
        self.state = WorkerState::Running;

        Ok(())
    }

    /// Signals the task to stop without waiting for it.
    ///
    /// Fails with [`ErrorKind::WorkerNotStarted`] on an idle worker, requesting stop again is a
    /// no-op.
    pub fn request_stop(&mut self) -> NotaryResult<()> {
        match self.state {
            WorkerState::Idle => bail!(
                ErrorKind::WorkerNotStarted,
                "Cannot stop a worker that was never started",
                self.name
            ),
            WorkerState::Running => {
                debug!(worker = self.name, "stop requested");

                self.shutdown_tx.shutdown();
                self.state = WorkerState::StopRequested;
            }
            WorkerState::StopRequested | WorkerState::Stopped => {}
        }

        Ok(())
    }

    /// Waits for the task to return and yields its result.
    ///
    /// Fails with [`ErrorKind::WorkerNotStarted`] on an idle worker. A panic of the task is
    /// reported as [`ErrorKind::WorkerPanic`]. Joining again after the task was joined returns
    /// `Ok(())`.
    pub async fn join(&mut self) -> NotaryResult<()> {
        if self.state == WorkerState::Idle {
            bail!(
                ErrorKind::WorkerNotStarted,
                "Cannot join a worker that was never started",
                self.name
            );
        }

        // The handle stays in place while awaited, so a dropped join can be retried.
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };

        let result = handle.await;
        self.handle = None;
        self.state = WorkerState::Stopped;

        debug!(worker = self.name, "worker joined");

        result.map_err(|err| {
            if err.is_panic() {
                notary_error!(
                    ErrorKind::WorkerPanic,
                    "Worker panicked",
                    format!("{}: {err}", self.name)
                )
            } else {
                notary_error!(
                    ErrorKind::Unknown,
                    "Worker was cancelled",
                    format!("{}: {err}", self.name)
                )
            }
        })?
    }

    /// Requests stop and waits for the task to return.
    pub async fn blocking_stop(&mut self) -> NotaryResult<()> {
        self.request_stop()?;
        self.join().await
    }
}

impl Drop for CancellableWorker {
    fn drop(&mut self) {
        if self.state == WorkerState::Running {
            self.shutdown_tx.shutdown();
        }
    }
}

/// Lifecycle shared by the pipeline stages.
///
/// Implementors provide [`Worker::start`] and expose the [`CancellableWorker`] they compose, the
/// remaining operations are forwarded to it.
pub trait Worker {
    fn worker(&self) -> &CancellableWorker;

    fn worker_mut(&mut self) -> &mut CancellableWorker;

    /// Starts the stage's task.
    fn start(&mut self) -> NotaryResult<()>;

    fn state(&self) -> WorkerState {
        self.worker().state()
    }

    fn request_stop(&mut self) -> NotaryResult<()> {
        self.worker_mut().request_stop()
    }

    fn join(&mut self) -> impl Future<Output = NotaryResult<()>> + Send {
        self.worker_mut().join()
    }

    fn blocking_stop(&mut self) -> impl Future<Output = NotaryResult<()>> + Send {
        self.worker_mut().blocking_stop()
    }

    fn subscribe_logs<F>(&self, subscriber: F)
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        self.worker().subscribe_logs(subscriber);
    }

    fn completion(&self) -> Option<WorkerCompletion> {
        self.worker().completion()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_for_stop(name: &'static str) -> CancellableWorker {
        let mut worker = CancellableWorker::new(name);
        worker
            .start(|mut shutdown_rx, logs| async move {
                logs.emit("started");
                shutdown_rx.shutdown_requested().await;
                logs.emit("stopping");
                Ok(())
            })
            .unwrap();

        worker
    }

    #[tokio::test]
    async fn second_start_fails() {
        let mut worker = wait_for_stop("second-start");

        let err = worker.start(|_, _| async { Ok(()) }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkerAlreadyStarted);

        timeout(WAIT, worker.blocking_stop()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_and_join_require_a_started_worker() {
        let mut worker = CancellableWorker::new("idle");

        assert_eq!(
            worker.request_stop().unwrap_err().kind(),
            ErrorKind::WorkerNotStarted
        );
        assert_eq!(
            worker.join().await.unwrap_err().kind(),
            ErrorKind::WorkerNotStarted
        );
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn blocking_stop_walks_through_every_state() {
        let mut worker = wait_for_stop("states");
        assert_eq!(worker.state(), WorkerState::Running);

        worker.request_stop().unwrap();
        assert_eq!(worker.state(), WorkerState::StopRequested);
        worker.request_stop().unwrap();

        timeout(WAIT, worker.join()).await.unwrap().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.completion().unwrap().is_finished());

        timeout(WAIT, worker.blocking_stop()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn subscribers_receive_lines_in_order() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut worker = CancellableWorker::new("logs");
        worker.subscribe_logs({
            let lines = lines.clone();
            move |line| lines.lock().unwrap().push(line.to_string())
        });

        worker
            .start(|_, logs| async move {
                for i in 0..3 {
                    logs.emit(format!("line {i}"));
                }
                Ok(())
            })
            .unwrap();

        timeout(WAIT, worker.join()).await.unwrap().unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["line 0", "line 1", "line 2"]);
    }

    #[tokio::test]
    async fn task_errors_surface_on_join() {
        let mut worker = CancellableWorker::new("failing");
        worker
            .start(|_, _| async { Err(notary_error!(ErrorKind::SinkWriteFailed, "Write failed")) })
            .unwrap();

        let mut completion = worker.completion().unwrap();
        timeout(WAIT, completion.finished()).await.unwrap();

        let err = timeout(WAIT, worker.join()).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandoned_join_keeps_the_task_result() {
        let mut worker = CancellableWorker::new("slow-stop");
        worker
            .start(|mut shutdown_rx, _| async move {
                shutdown_rx.shutdown_requested().await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                Err(notary_error!(ErrorKind::SinkWriteFailed, "Write failed"))
            })
            .unwrap();

        assert!(
            timeout(Duration::from_millis(20), worker.join())
                .await
                .is_err()
        );
        assert_eq!(worker.state(), WorkerState::Running);

        worker.request_stop().unwrap();
        let err = timeout(WAIT, worker.join()).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
        assert!(worker.completion().unwrap().is_finished());
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn panics_are_reported_as_worker_panic() {
        let mut worker = CancellableWorker::new("panicking");
        worker
            .start(|_, _| async {
                let broken = true;
                if broken {
                    panic!("stage bug");
                }
                Ok(())
            })
            .unwrap();

        let mut completion = worker.completion().unwrap();
        timeout(WAIT, completion.finished()).await.unwrap();

        let err = timeout(WAIT, worker.join()).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkerPanic);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
