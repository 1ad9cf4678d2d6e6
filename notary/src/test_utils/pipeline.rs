use notary_config::shared::PipelineConfig;

use crate::types::Record;

/// Returns a pipeline configuration with the given batch size and key count.
///
/// Queues are sized so that a handful of batches fit in flight, and a status line is emitted for
/// every batch.
pub fn test_pipeline_config(batch_size: usize, key_count: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        key_count,
        signing_threads: 1,
        record_queue_capacity: None,
        batch_queue_capacity: 4,
        log_queue_capacity: 256,
        log_frequency: 1,
    }
}

/// Returns `count` records with ids `1..=count` and distinct messages.
pub fn test_records(count: i64) -> Vec<Record> {
    (1..=count)
        .map(|id| Record::new(id, format!("test message {id}")))
        .collect()
}
