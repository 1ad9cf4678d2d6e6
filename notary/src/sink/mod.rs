//! Destinations committing signed batches.

mod base;
pub mod memory;
pub mod sqlite;

pub use base::RecordSink;
