//! Concurrent signing pipeline.
//!
//! Records are read from a [`source::RecordSource`], grouped into fixed-size batches, signed with
//! a key borrowed from a [`keys::KeyPool`] and committed batch by batch to a
//! [`sink::RecordSink`]. The stages run as cancellable workers connected by bounded queues, see
//! [`pipeline::Pipeline`].

pub mod concurrency;
mod db;
pub mod error;
pub mod keys;
mod macros;
pub mod pipeline;
pub mod sink;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
