//! Notary service binary.
//!
//! Reads messages from a SQLite source database, signs them in batches with a pool of Ed25519
//! keys and commits the signatures to a SQLite sink database.

use anyhow::Context;
use notary_config::load_config;
use notary_config::shared::ServiceConfig;
use notary_telemetry::tracing::init_tracing;

use crate::core::start_service_with_config;

mod core;

fn main() -> anyhow::Result<()> {
    let config = load_config::<ServiceConfig>().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_service_with_config(config))?;

    Ok(())
}
