//! Logging setup and configuration

use crate::error::{Error, Result};
use log::LevelFilter;
use std::str::FromStr;

/// Install the process-wide logger at `level`.
///
/// `RUST_LOG`, when set, may refine the level per module.
pub fn setup_logging(level: &str) -> Result<()> {
    let filter = LevelFilter::from_str(level)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", level, e)))?;

    env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .format_timestamp_micros()
        .try_init()
        .map_err(|e| Error::Config(format!("Logger already installed: {}", e)))?;

    Ok(())
}
