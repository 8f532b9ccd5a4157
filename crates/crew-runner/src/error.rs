use crew_core::CoreError;
use crew_runtime::RuntimeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Setting up one item's environment failed; only that item is affected.
    #[error("provisioning_error: {0}")]
    Provisioning(String),

    #[error("port_exhaustion_error: no free 4-port block in {base}-{max}")]
    PortExhaustion { base: u16, max: u16 },

    #[error("vcs_error: `git {args}` failed: {message}")]
    Vcs { args: String, message: String },

    #[error("config_error: {0}")]
    Config(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
