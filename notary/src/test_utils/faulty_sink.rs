use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bail;
use crate::error::{ErrorKind, NotaryResult};
use crate::sink::RecordSink;
use crate::types::SignedBatch;

/// Sink wrapper failing one chosen write and forwarding every other one to the wrapped sink.
///
/// Write attempts are counted from 1. The failing batch is not forwarded.
#[derive(Debug, Clone)]
pub struct FaultySink<K> {
    inner: K,
    fail_on_write: u64,
    attempts: Arc<AtomicU64>,
}

impl<K> FaultySink<K> {
    pub fn new(inner: K, fail_on_write: u64) -> Self {
        Self {
            inner,
            fail_on_write,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of writes attempted so far, the failed one included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<K> RecordSink for FaultySink<K>
where
    K: RecordSink + Send + Sync,
{
    fn name() -> &'static str {
        "faulty"
    }

    async fn write_signed_batch(&self, batch: SignedBatch) -> NotaryResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on_write {
            bail!(
                ErrorKind::SinkWriteFailed,
                "Injected sink failure",
                format!("write attempt {attempt}")
            );
        }

        self.inner.write_signed_batch(batch).await
    }
}
