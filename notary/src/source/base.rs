use std::future::Future;

use crate::error::NotaryResult;
use crate::types::Record;

/// Ordered pull source of records to sign.
///
/// Records are read from the start every time the process starts, the source keeps no
/// position of its own across restarts.
pub trait RecordSource {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Returns the next record, or `None` once the input is exhausted.
    fn next_record(&mut self) -> impl Future<Output = NotaryResult<Option<Record>>> + Send;
}
