pub mod config;
pub mod quote;
pub mod simulate;

use anyhow::Context;
use claimfee_core::config::Config;
use std::path::Path;

/// Load the config at `path`, or the built-in defaults when none is given.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}
