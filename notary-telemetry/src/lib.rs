//! Tracing setup shared by the notary binaries and tests.

pub mod tracing;
