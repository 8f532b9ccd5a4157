//! Container runtime abstraction.
//!
//! Every backend exposes the same [`ContainerRuntime`] capability set; callers
//! pick one with [`detect_runtime`] and never branch on the concrete type.

mod backend;
mod cli;
mod detect;
mod error;
mod orbstack;
mod parse;
mod types;

pub use backend::{ContainerRuntime, LogStream};
pub use cli::{CliRuntime, Dialect};
pub use detect::{detect_runtime, select_available};
pub use error::{Result, RuntimeError};
pub use orbstack::OrbStackRuntime;
pub use types::{
    BuildOptions, Container, ContainerFilter, ContainerOptions, ExecOptions, ExecOutput,
    LogOptions, PortMapping, VolumeMount,
};
