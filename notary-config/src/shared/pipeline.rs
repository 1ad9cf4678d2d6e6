use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration of the signing pipeline runtime.
///
/// Controls batch assembly, the size of the signing key pool and the capacity of the bounded
/// queues connecting the stages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Number of records signed together with a single key.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of signing keys generated at startup.
    ///
    /// Should exceed the number of concurrent signers, otherwise signers wait for keys.
    #[serde(default = "default_key_count")]
    pub key_count: usize,
    /// Number of signing workers. Only a single signer is currently supported.
    #[serde(default = "default_signing_threads")]
    pub signing_threads: usize,
    /// Capacity of the queue between the source and batch stages.
    ///
    /// Defaults to `batch_size * signing_threads` when unset.
    #[serde(default)]
    pub record_queue_capacity: Option<usize>,
    /// Capacity of the queue between the batch and sink stages, in batches.
    #[serde(default = "default_batch_queue_capacity")]
    pub batch_queue_capacity: usize,
    /// Capacity of the status log queue. Lines are dropped when it is full.
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,
    /// Number of batches between two status lines.
    #[serde(default = "default_log_frequency")]
    pub log_frequency: u64,
}

impl PipelineConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_KEY_COUNT: usize = 10;
    pub const DEFAULT_SIGNING_THREADS: usize = 1;
    pub const DEFAULT_BATCH_QUEUE_CAPACITY: usize = 10;
    pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 1000;
    pub const DEFAULT_LOG_FREQUENCY: u64 = 1;

    /// Returns the effective capacity of the record queue.
    pub fn record_queue_capacity(&self) -> usize {
        self.record_queue_capacity
            .unwrap_or_else(|| self.batch_size.saturating_mul(self.signing_threads))
    }

    /// Validates the pipeline configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::ZeroValue("pipeline.batch_size"));
        }

        if self.key_count == 0 {
            return Err(ValidationError::ZeroValue("pipeline.key_count"));
        }

        if self.signing_threads != 1 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.signing_threads",
                constraint: format!(
                    "only 1 signing thread is supported, got {}",
                    self.signing_threads
                ),
            });
        }

        if self.record_queue_capacity() == 0 {
            return Err(ValidationError::ZeroValue("pipeline.record_queue_capacity"));
        }

        if self.batch_queue_capacity == 0 {
            return Err(ValidationError::ZeroValue("pipeline.batch_queue_capacity"));
        }

        if self.log_queue_capacity == 0 {
            return Err(ValidationError::ZeroValue("pipeline.log_queue_capacity"));
        }

        if self.log_frequency == 0 {
            return Err(ValidationError::ZeroValue("pipeline.log_frequency"));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            key_count: default_key_count(),
            signing_threads: default_signing_threads(),
            record_queue_capacity: None,
            batch_queue_capacity: default_batch_queue_capacity(),
            log_queue_capacity: default_log_queue_capacity(),
            log_frequency: default_log_frequency(),
        }
    }
}

fn default_batch_size() -> usize {
    PipelineConfig::DEFAULT_BATCH_SIZE
}

fn default_key_count() -> usize {
    PipelineConfig::DEFAULT_KEY_COUNT
}

fn default_signing_threads() -> usize {
    PipelineConfig::DEFAULT_SIGNING_THREADS
}

fn default_batch_queue_capacity() -> usize {
    PipelineConfig::DEFAULT_BATCH_QUEUE_CAPACITY
}

fn default_log_queue_capacity() -> usize {
    PipelineConfig::DEFAULT_LOG_QUEUE_CAPACITY
}

fn default_log_frequency() -> u64 {
    PipelineConfig::DEFAULT_LOG_FREQUENCY
}
