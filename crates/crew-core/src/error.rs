use crate::model::TaskState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Decomposition output was malformed, empty, or reused an id.
    #[error("plan_parse_error: {0}")]
    PlanParse(String),

    #[error("invalid transition for work item {item}: {from} -> {to}")]
    InvalidTransition {
        item: i64,
        from: TaskState,
        to: TaskState,
    },

    #[error("unknown work item id: {0}")]
    UnknownItem(i64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
