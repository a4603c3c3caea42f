use std::path::PathBuf;

use crate::config::Config;
use crate::host::HostFacts;
use crate::paths;

/// Inputs shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct Context {
    /// Project root: where `venv/`, `data/`, `models/` and `.env` live.
    pub root: PathBuf,
    /// Home directory of the user the audio configuration is written for.
    pub home: PathBuf,
    pub config: Config,
    pub host: HostFacts,
}

impl Context {
    pub fn new(root: impl Into<PathBuf>, home: impl Into<PathBuf>, config: Config, host: HostFacts) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
            config,
            host,
        }
    }

    pub fn resolve(&self, p: &str) -> PathBuf {
        paths::resolve(&self.root, p)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.resolve(&self.config.runtime.venv_dir)
    }

    pub fn venv_python(&self) -> PathBuf {
        paths::venv_bin(&self.venv_dir(), "python")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join(paths::MODELS_DIR)
    }

    /// Environment that "activates" the runtime for a child process.
    pub fn venv_env(&self) -> Vec<(String, String)> {
        let venv = self.venv_dir();
        let bin = venv.join("bin");
        let path = match std::env::var("PATH") {
            Ok(existing) if !existing.is_empty() => format!("{}:{existing}", bin.display()),
            _ => bin.display().to_string(),
        };
        vec![
            ("VIRTUAL_ENV".to_string(), venv.display().to_string()),
            ("PATH".to_string(), path),
        ]
    }
}
