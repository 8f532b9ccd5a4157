//! Seam to the external agent that carries out a work item.

use crate::provision::Environment;
use crate::Result;
use crew_core::{atomic_write_bytes, ensure_dir, WorkItem};
use crew_runtime::{ContainerRuntime, ExecOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub trait TaskExecutor: Send + Sync {
    fn execute(&self, env: &Environment, item: &WorkItem) -> Result<i32>;
}

pub struct ContainerAgent {
    runtime: Arc<dyn ContainerRuntime>,
    command: Vec<String>,
    workdir: Option<String>,
    transcript_dir: Option<PathBuf>,
}

impl ContainerAgent {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, command: Vec<String>) -> Self {
        Self {
            runtime,
            command,
            workdir: None,
            transcript_dir: None,
        }
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Output lands in `<dir>/<session>/item-<id>.log`.
    pub fn transcripts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcript_dir = Some(dir.into());
        self
    }

    fn argv(&self, item: &WorkItem) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.push(item.prompt.clone());
        argv
    }
}

impl TaskExecutor for ContainerAgent {
    fn execute(&self, env: &Environment, item: &WorkItem) -> Result<i32> {
        let opts = ExecOptions {
            workdir: self.workdir.clone(),
            ..ExecOptions::default()
        };
        info!(environment = %env.name, item = item.id, title = %item.title, "agent started");
        let out = self.runtime.exec(&env.handle, &self.argv(item), &opts)?;

        if let Some(dir) = &self.transcript_dir {
            let session_dir = dir.join(&env.session_id);
            ensure_dir(&session_dir)?;
            let path = session_dir.join(format!("item-{}.log", item.id));
            let mut body = out.stdout.clone();
            if !out.stderr.is_empty() {
                body.push_str("\n--- stderr ---\n");
                body.push_str(&out.stderr);
            }
            atomic_write_bytes(&path, body.as_bytes())?;
            debug!(path = %path.display(), "transcript written");
        }

        info!(environment = %env.name, item = item.id, exit_code = out.exit_code, "agent finished");
        Ok(out.exit_code)
    }
}
