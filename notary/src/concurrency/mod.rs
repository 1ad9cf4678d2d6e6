//! Concurrency primitives shared by the pipeline stages.
//!
//! Stages run as independent tasks that only communicate through [`queue::BoundedQueue`]s and
//! the key pool. Every wait a stage performs takes a [`shutdown::ShutdownRx`], so a stop request
//! reaches a stage no matter where it is blocked.

pub mod queue;
pub mod shutdown;
