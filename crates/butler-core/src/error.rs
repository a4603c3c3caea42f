use thiserror::Error;

#[derive(Debug, Error)]
pub enum ButlerError {
    #[error("deployment requires an embedded host (device-tree marker {marker} not found)")]
    WrongHost { marker: String },

    #[error("deployment requires elevated privilege: re-run with sudo")]
    NotElevated,

    #[error("package manager failed: {0}")]
    PackageManager(String),

    #[error("audio tool not available: {0}")]
    AudioToolMissing(String),

    #[error("model fetch failed: {0}")]
    ModelFetch(String),

    #[error("classifier training failed: {0}")]
    Training(String),

    #[error("'{program}' exited with {code}: {hint}")]
    CommandFailed {
        program: String,
        code: String,
        hint: String,
    },

    #[error("{what} incomplete in {dir}: missing {missing}")]
    Incomplete {
        what: String,
        dir: String,
        missing: String,
    },

    #[error("failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("stage '{stage}' depends on '{dependency}', which is not part of this run")]
    MissingDependency { stage: String, dependency: String },

    #[error("stage dependency cycle involving: {0}")]
    PipelineCycle(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ButlerError>;
