use std::future::Future;

use crate::error::NotaryResult;
use crate::types::SignedBatch;

/// Destination for signed batches.
///
/// A batch is committed as a unit: either every record of it is stored or the call fails and
/// none is.
pub trait RecordSink {
    /// Returns the name of the sink.
    fn name() -> &'static str;

    /// Commits every record of `batch` atomically.
    fn write_signed_batch(
        &self,
        batch: SignedBatch,
    ) -> impl Future<Output = NotaryResult<()>> + Send;
}
