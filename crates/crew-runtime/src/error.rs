use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime {0} is not available")]
    NotAvailable(String),

    #[error("no container runtime found (tried {0})")]
    NoRuntimeFound(String),

    #[error("`{program} {args}` failed: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        stderr: String,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("container not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub(crate) fn parse(what: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Parse {
            what,
            message: message.into(),
        }
    }
}
