mod error;
pub mod fsutil;
pub mod model;
pub mod plan;
pub mod repo;
pub mod snapshot;
pub mod waves;

pub use error::{CoreError, Result};
pub use fsutil::{atomic_write_bytes, atomic_write_json_pretty, ensure_dir, sha256_hex};
pub use model::{Plan, Session, SessionStatus, SessionSummary, TaskState, TaskStatus, WorkItem};
pub use plan::{build_decomposition_prompt, parse_plan};
pub use snapshot::{snapshot_name, snapshot_name_with_tag, SNAPSHOT_PREFIX};
pub use waves::{execution_waves, Wave};
