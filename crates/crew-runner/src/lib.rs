//! Wave-by-wave dispatch of decomposed plans into isolated container environments.

pub mod config;
pub mod dispatch;
mod error;
pub mod executor;
pub mod ports;
pub mod profile;
pub mod provision;
pub mod session;
pub mod vcs;
pub mod worktree;

pub use config::CrewConfig;
pub use dispatch::Dispatcher;
pub use error::{Result, RunnerError};
pub use executor::{ContainerAgent, TaskExecutor};
pub use ports::PortAllocator;
pub use profile::{Profile, ProfileSet};
pub use provision::{Environment, EnvironmentProvisioner, LocalProvisioner, ProvisionRequest};
pub use session::SessionStore;
pub use vcs::{GitCli, Vcs, WorktreeInfo};
pub use worktree::WorktreeManager;
