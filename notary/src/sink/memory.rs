use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, NotaryResult};
use crate::sink::base::RecordSink;
use crate::types::{SignedBatch, SignedRecord};

#[derive(Debug, Default)]
struct Inner {
    batches: Vec<SignedBatch>,
    ids: HashSet<i64>,
}

/// In-memory sink keeping every committed batch for inspection.
///
/// Like a table keyed by record id, a batch containing an id that was already written is rejected
/// as a whole.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the committed batches in commit order.
    pub async fn batches(&self) -> Vec<SignedBatch> {
        self.inner.lock().await.batches.clone()
    }

    /// Returns every committed record in commit order.
    pub async fn records(&self) -> Vec<SignedRecord> {
        let inner = self.inner.lock().await;
        inner.batches.iter().flatten().cloned().collect()
    }
}

impl RecordSink for MemorySink {
    fn name() -> &'static str {
        "memory"
    }

    async fn write_signed_batch(&self, batch: SignedBatch) -> NotaryResult<()> {
        let mut inner = self.inner.lock().await;

        let mut batch_ids = HashSet::with_capacity(batch.len());
        for record in &batch {
            if inner.ids.contains(&record.id) || !batch_ids.insert(record.id) {
                bail!(
                    ErrorKind::SinkWriteFailed,
                    "Signed record was already written",
                    format!("duplicate record id {}", record.id)
                );
            }
        }

        debug!(records = batch.len(), "writing signed batch to memory");

        inner.ids.extend(batch_ids);
        inner.batches.push(batch);

        Ok(())
    }
}
