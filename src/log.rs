//! Tracing setup for embedders of the ledger.

use std::fs::File;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::error::LedgerError;

/// Sets up the global tracing subscriber: pretty output filtered to this
/// crate's info level in debug builds, errors to a log file in release.
pub fn setup_tracing() -> Result<(), LedgerError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse().map_err(anyhow::Error::from)?)
            .add_directive("arena_ledger=info".parse().map_err(anyhow::Error::from)?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("ledger.log").map_err(anyhow::Error::from)?;

    // Only errors are worth a log line in production.
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}
