//! Background workers.
//!
//! Every pipeline stage composes a [`base::CancellableWorker`] and implements the
//! [`base::Worker`] lifecycle. Stages publish status lines on their [`logs::LogBus`] and progress
//! counters on `watch` channels.

pub mod base;
pub mod batch;
pub mod logs;
pub mod sink;
pub mod source;
pub mod status;
