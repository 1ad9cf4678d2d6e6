//! Record sources feeding the pipeline.

mod base;
pub mod generate;
pub mod memory;
pub mod sqlite;

pub use base::RecordSource;
