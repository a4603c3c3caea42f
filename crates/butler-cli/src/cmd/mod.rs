pub mod config;
pub mod detect;
pub mod devices;
pub mod run;
pub mod status;

use anyhow::Context as _;
use butler_core::config::{Config, WarnLevel};
use butler_core::host::{self, SystemProbe};
use butler_core::{ButlerError, Context};
use std::path::Path;

/// Load and validate config, then detect the host. Config errors abort;
/// warnings are logged.
pub fn load_context(root: &Path) -> anyhow::Result<Context> {
    let config = Config::load(root).context("failed to load config")?;
    let mut errors = Vec::new();
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!(ButlerError::InvalidConfig(errors.join("; ")));
    }

    let facts = host::detect(&SystemProbe::new(&config.host));
    let home = home::home_dir().ok_or(ButlerError::HomeNotFound)?;
    Ok(Context::new(root, home, config, facts))
}
