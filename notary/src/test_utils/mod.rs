//! Helpers shared by unit and integration tests.
//!
//! - [`pipeline`] builds pipeline configurations and input records.
//! - [`faulty_sink`] wraps a sink to fail on a chosen batch.
//! - [`database`] hands out temporary SQLite database files.

pub mod database;
pub mod faulty_sink;
pub mod pipeline;
