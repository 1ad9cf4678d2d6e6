use std::sync::Arc;

use notary_config::shared::PipelineConfig;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::concurrency::queue::{BoundedQueue, OverflowPolicy};
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, NotaryError, NotaryResult};
use crate::keys::KeyPool;
use crate::sink::RecordSink;
use crate::source::RecordSource;
use crate::workers::base::{Worker, WorkerCompletion, WorkerState};
use crate::workers::batch::{BatchProgress, BatchStage};
use crate::workers::logs::LogLine;
use crate::workers::sink::{SinkProgress, SinkStage};
use crate::workers::source::SourceStage;
use crate::workers::status::StatusLogWorker;
use crate::{bail, notary_error};

/// Completion handles of the three stages, taken when the pipeline starts.
#[derive(Debug)]
struct StageCompletions {
    source: WorkerCompletion,
    batch: WorkerCompletion,
    sink: WorkerCompletion,
}

/// Signing pipeline wiring a source, the batch signer and a sink through bounded queues.
///
/// ```text
/// source -> [record queue] -> batch -> [signed batch queue] -> sink
/// ```
///
/// Every stage also forwards its status lines to a status log worker. The pipeline runs until the
/// source is exhausted and everything read has been committed, or until a shutdown is requested
/// through [`Pipeline::shutdown_tx`].
#[derive(Debug)]
pub struct Pipeline<S, K> {
    config: Arc<PipelineConfig>,
    keys: KeyPool,
    source: SourceStage<S>,
    batch: BatchStage,
    sink: SinkStage<K>,
    status: StatusLogWorker,
    completions: Option<StageCompletions>,
    shutdown_tx: ShutdownTx,
}

impl<S, K> Pipeline<S, K>
where
    S: RecordSource + Send + 'static,
    K: RecordSink + Send + Sync + 'static,
{
    /// Builds a pipeline with a freshly generated pool of `config.key_count` keys.
    pub fn new(config: PipelineConfig, source: S, sink: K) -> NotaryResult<Self> {
        validate_config(&config)?;
        let keys = KeyPool::generate(config.key_count)?;

        Self::with_key_pool(config, keys, source, sink)
    }

    /// Builds a pipeline signing with the keys of an existing pool.
    pub fn with_key_pool(
        config: PipelineConfig,
        keys: KeyPool,
        source: S,
        sink: K,
    ) -> NotaryResult<Self> {
        validate_config(&config)?;

        let records = Arc::new(BoundedQueue::new(
            config.record_queue_capacity(),
            OverflowPolicy::WaitUntilCapacityAvailable,
        )?);
        let signed_batches = Arc::new(BoundedQueue::new(
            config.batch_queue_capacity,
            OverflowPolicy::WaitUntilCapacityAvailable,
        )?);
        let log_lines = Arc::new(BoundedQueue::new(
            config.log_queue_capacity,
            OverflowPolicy::DiscardOnNoCapacity,
        )?);

        let source_log_every = (config.batch_size as u64).saturating_mul(config.log_frequency);
        let source = SourceStage::new(source, records.clone(), source_log_every)?;
        let batch = BatchStage::new(
            records,
            signed_batches.clone(),
            keys.clone(),
            config.batch_size,
            config.log_frequency,
        )?;
        let sink = SinkStage::new(sink, signed_batches, config.log_frequency)?;

        source.subscribe_logs(StatusLogWorker::forwarder(log_lines.clone()));
        batch.subscribe_logs(StatusLogWorker::forwarder(log_lines.clone()));
        sink.subscribe_logs(StatusLogWorker::forwarder(log_lines.clone()));

        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            config: Arc::new(config),
            keys,
            source,
            batch,
            sink,
            status: StatusLogWorker::new(log_lines),
            completions: None,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn key_pool(&self) -> &KeyPool {
        &self.keys
    }

    /// Returns the sender used to request an early shutdown of the pipeline.
    ///
    /// The request takes effect in [`Pipeline::wait`].
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    pub fn records_read(&self) -> watch::Receiver<u64> {
        self.source.records_read()
    }

    pub fn batch_progress(&self) -> watch::Receiver<BatchProgress> {
        self.batch.progress()
    }

    pub fn sink_progress(&self) -> watch::Receiver<SinkProgress> {
        self.sink.progress()
    }

    /// Registers `subscriber` on the status lines of the source, batch and sink stages.
    ///
    /// Must be called before [`Pipeline::start`] to observe every line.
    pub fn subscribe_logs<F>(&self, subscriber: F)
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(subscriber);

        let forward = subscriber.clone();
        self.source.subscribe_logs(move |line| forward(line));
        let forward = subscriber.clone();
        self.batch.subscribe_logs(move |line| forward(line));
        self.sink.subscribe_logs(move |line| subscriber(line));
    }

    /// Starts every worker, downstream first.
    ///
    /// If a worker fails to start, the workers already started are stopped and joined before the
    /// error is returned.
    pub async fn start(&mut self) -> NotaryResult<()> {
        if self.completions.is_some() {
            bail!(
                ErrorKind::WorkerAlreadyStarted,
                "Pipeline was already started"
            );
        }

        info!(
            source = S::name(),
            sink = K::name(),
            batch_size = self.config.batch_size,
            keys = self.keys.total_keys(),
            "starting pipeline"
        );

        if let Err(err) = self.start_workers() {
            warn!(error = %err, "failed to start pipeline, stopping started workers");

            let mut errors = vec![err];
            self.stop_stages(&mut errors).await;
            if self.status.state() != WorkerState::Idle
                && let Err(err) = self.status.blocking_stop().await
            {
                errors.push(err);
            }

            return Err(errors.into());
        }

        self.completions = Some(self.stage_completions()?);

        Ok(())
    }

    fn start_workers(&mut self) -> NotaryResult<()> {
        self.status.start()?;
        self.sink.start()?;
        self.batch.start()?;
        self.source.start()
    }

    fn stage_completions(&self) -> NotaryResult<StageCompletions> {
        match (
            self.source.completion(),
            self.batch.completion(),
            self.sink.completion(),
        ) {
            (Some(source), Some(batch), Some(sink)) => Ok(StageCompletions {
                source,
                batch,
                sink,
            }),
            _ => Err(notary_error!(
                ErrorKind::WorkerNotStarted,
                "Pipeline stage did not start"
            )),
        }
    }

    /// Waits for the pipeline to finish and stops every worker.
    ///
    /// Once the source is exhausted, the stages are drained in order: every complete batch is
    /// signed and committed before the batch and sink stages are stopped, and a trailing partial
    /// batch is discarded. A shutdown request or a stage exiting early stops all stages, upstream
    /// first. Errors of every worker are returned together.
    pub async fn wait(mut self) -> NotaryResult<()> {
        let Some(mut completions) = self.completions.take() else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut errors = vec![];

        if self
            .drain(&mut completions, &mut shutdown_rx, &mut errors)
            .await
        {
            info!("pipeline drained");
        } else {
            info!("stopping pipeline stages");

            self.stop_stages(&mut errors).await;
        }

        if let Err(err) = self.status.blocking_stop().await {
            errors.push(err);
        }

        info!(
            available_keys = self.keys.available(),
            borrowed_keys = self.keys.borrowed(),
            "pipeline stopped"
        );

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    /// Requests a shutdown and waits for the pipeline to stop.
    pub async fn shutdown_and_wait(self) -> NotaryResult<()> {
        self.shutdown_tx.shutdown();
        self.wait().await
    }

    /// Drives the ordered shutdown. Returns `false` when interrupted before every stage stopped.
    async fn drain(
        &mut self,
        completions: &mut StageCompletions,
        shutdown_rx: &mut ShutdownRx,
        errors: &mut Vec<NotaryError>,
    ) -> bool {
        info!("waiting for the source to be exhausted");

        tokio::select! {
            biased;

            _ = shutdown_rx.shutdown_requested() => {
                info!("shutdown requested");
                return false;
            }
            _ = completions.batch.finished() => {
                warn!("batch stage exited before the source was exhausted");
                return false;
            }
            _ = completions.sink.finished() => {
                warn!("sink stage exited before the source was exhausted");
                return false;
            }
            _ = completions.source.finished() => {}
        }

        if let Err(err) = self.source.join().await {
            errors.push(err);
            return false;
        }

        let records_read = *self.source.records_read().borrow();
        let complete_batches = records_read / self.config.batch_size as u64;
        info!(records_read, complete_batches, "source exhausted, draining batch stage");

        let mut batch_progress = self.batch.progress();
        tokio::select! {
            biased;

            _ = shutdown_rx.shutdown_requested() => {
                info!("shutdown requested");
                return false;
            }
            _ = completions.batch.finished() => {
                warn!("batch stage exited while draining");
                return false;
            }
            _ = completions.sink.finished() => {
                warn!("sink stage exited while draining");
                return false;
            }
            result = batch_progress.wait_for(|progress| {
                progress.records_taken == records_read
                    && progress.batches_forwarded == complete_batches
            }) => {
                if result.is_err() {
                    return false;
                }
            }
        }

        if let Err(err) = self.batch.blocking_stop().await {
            errors.push(err);
            return false;
        }

        let batches_forwarded = self.batch.progress().borrow().batches_forwarded;
        info!(batches_forwarded, "batch stage stopped, draining sink stage");

        let mut sink_progress = self.sink.progress();
        tokio::select! {
            biased;

            _ = shutdown_rx.shutdown_requested() => {
                info!("shutdown requested");
                return false;
            }
            _ = completions.sink.finished() => {
                warn!("sink stage exited while draining");
                return false;
            }
            result = sink_progress.wait_for(|p| p.batches_written == batches_forwarded) => {
                if result.is_err() {
                    return false;
                }
            }
        }

        if let Err(err) = self.sink.blocking_stop().await {
            errors.push(err);
            return false;
        }

        true
    }

    /// Stops the source, batch and sink stages in this order and joins each of them.
    ///
    /// Stages never started are skipped, stages already joined join again as a no-op.
    async fn stop_stages(&mut self, errors: &mut Vec<NotaryError>) {
        if self.source.state() != WorkerState::Idle
            && let Err(err) = self.source.blocking_stop().await
        {
            errors.push(err);
        }

        if self.batch.state() != WorkerState::Idle
            && let Err(err) = self.batch.blocking_stop().await
        {
            errors.push(err);
        }

        if self.sink.state() != WorkerState::Idle
            && let Err(err) = self.sink.blocking_stop().await
        {
            errors.push(err);
        }
    }
}

fn validate_config(config: &PipelineConfig) -> NotaryResult<()> {
    config.validate().map_err(|err| {
        notary_error!(
            ErrorKind::ConfigError,
            "Invalid pipeline configuration",
            err.to_string(),
            source: err
        )
    })
}
