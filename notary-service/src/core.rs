use notary::pipeline::Pipeline;
use notary::sink::sqlite::SqliteSink;
use notary::source::sqlite::SqliteSource;
use notary_config::shared::{PipelineConfig, ServiceConfig, StoreConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

/// Runs the notary service with the provided configuration.
///
/// An empty source database is filled with synthetic messages and the service exits, so that the
/// next run signs them. Otherwise the pipeline runs until the source is exhausted or a shutdown
/// signal is received.
pub async fn start_service_with_config(config: ServiceConfig) -> anyhow::Result<()> {
    info!("starting notary service");

    log_config(&config);

    let source =
        SqliteSource::connect(&config.store.source_path, config.store.read_page_size).await?;
    if source.is_empty().await? {
        source
            .populate(config.store.populate_count, config.store.max_message_bytes)
            .await?;

        info!(
            count = config.store.populate_count,
            path = %config.store.source_path,
            "source was empty, populated it with synthetic messages"
        );

        return Ok(());
    }

    let sink = SqliteSink::connect(&config.store.sink_path).await?;
    if config.store.reset_sink {
        sink.reset().await?;
    }

    let pipeline = Pipeline::new(config.pipeline, source, sink.clone())?;
    start_pipeline(pipeline).await?;

    info!(signed_records = sink.count().await?, "notary service completed");

    Ok(())
}

/// Starts the pipeline and shuts it down on SIGINT or SIGTERM.
async fn start_pipeline(mut pipeline: Pipeline<SqliteSource, SqliteSink>) -> anyhow::Result<()> {
    pipeline.start().await?;

    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler, only ctrl+c is handled");
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down pipeline");
            }
            Some(_) = async {
                match sigterm.as_mut() {
                    Some(sigterm) => sigterm.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("sigterm received, shutting down pipeline");
            }
        }

        shutdown_tx.shutdown();
    });

    let result = pipeline.wait().await;

    // The signal task is still waiting when the pipeline finished on its own.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    if let Err(err) = &result {
        error!("{err}");
    }

    result?;

    Ok(())
}

fn log_config(config: &ServiceConfig) {
    log_pipeline_config(&config.pipeline);
    log_store_config(&config.store);
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        batch_size = config.batch_size,
        key_count = config.key_count,
        signing_threads = config.signing_threads,
        record_queue_capacity = config.record_queue_capacity(),
        batch_queue_capacity = config.batch_queue_capacity,
        log_queue_capacity = config.log_queue_capacity,
        log_frequency = config.log_frequency,
        "pipeline config"
    );
}

fn log_store_config(config: &StoreConfig) {
    debug!(
        source_path = %config.source_path,
        sink_path = %config.sink_path,
        reset_sink = config.reset_sink,
        populate_count = config.populate_count,
        max_message_bytes = config.max_message_bytes,
        read_page_size = config.read_page_size,
        "store config"
    );
}
