//! Environment = worktree + port block + running container, one per dispatched item.

use crate::config::ContainerSection;
use crate::ports::{PortAllocator, BLOCK_SIZE};
use crate::profile::Profile;
use crate::worktree::WorktreeManager;
use crate::{Result, RunnerError};
use crew_core::{snapshot_name, WorkItem};
use crew_runtime::{ContainerOptions, ContainerRuntime, PortMapping, VolumeMount};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LABEL_SESSION: &str = "crew.session";
pub const LABEL_ITEM: &str = "crew.item";
pub const LABEL_PROFILE: &str = "crew.profile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// Container name; also keys the worktree and the port block.
    pub name: String,
    pub session_id: String,
    pub worktree: PathBuf,
    pub base_port: u16,
    pub handle: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    pub session_id: &'a str,
    pub profile: &'a Profile,
    pub item: &'a WorkItem,
}

pub fn environment_name(session_id: &str, item_id: i64) -> String {
    format!("crew-{}-{}", session_id, item_id)
}

pub trait EnvironmentProvisioner: Send + Sync {
    fn provision(&self, req: &ProvisionRequest<'_>) -> Result<Environment>;
    /// Best effort: keeps going past individual failures and reports the first one.
    fn teardown(&self, env: &Environment) -> Result<()>;
}

pub struct LocalProvisioner {
    ports: Arc<PortAllocator>,
    worktrees: Arc<WorktreeManager>,
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerSection,
    use_snapshots: bool,
    stop_timeout: Duration,
}

impl LocalProvisioner {
    pub fn new(
        ports: Arc<PortAllocator>,
        worktrees: Arc<WorktreeManager>,
        runtime: Arc<dyn ContainerRuntime>,
        container: ContainerSection,
    ) -> Self {
        Self {
            ports,
            worktrees,
            runtime,
            container,
            use_snapshots: true,
            stop_timeout: Duration::from_secs(10),
        }
    }

    pub fn use_snapshots(mut self, on: bool) -> Self {
        self.use_snapshots = on;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn image_for(&self, profile: &Profile) -> String {
        if self.use_snapshots {
            let snapshot = snapshot_name(&profile.repo);
            match self.runtime.image_exists(&snapshot) {
                Ok(true) => {
                    debug!(image = %snapshot, "using repository snapshot");
                    return snapshot;
                }
                Ok(false) => {}
                Err(e) => warn!(image = %snapshot, error = %e, "snapshot lookup failed"),
            }
        }
        self.container.image.clone()
    }

    fn container_options(
        &self,
        name: &str,
        req: &ProvisionRequest<'_>,
        worktree: &Path,
        base_port: u16,
    ) -> ContainerOptions {
        let ports = self
            .container
            .service_ports
            .as_array()
            .iter()
            .zip(0..BLOCK_SIZE)
            .map(|(inner, offset)| PortMapping::tcp(base_port + offset, *inner))
            .collect();

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_SESSION.to_string(), req.session_id.to_string());
        labels.insert(LABEL_ITEM.to_string(), req.item.id.to_string());
        labels.insert(LABEL_PROFILE.to_string(), req.profile.name.clone());

        ContainerOptions {
            name: name.to_string(),
            image: self.image_for(req.profile),
            ports,
            env: self.container.env.clone(),
            volumes: vec![VolumeMount {
                host_path: worktree.to_string_lossy().to_string(),
                container_path: self.container.workspace_mount.clone(),
                read_only: false,
            }],
            workdir: Some(self.container.workspace_mount.clone()),
            cmd: self.container.keepalive_command.clone(),
            labels,
            ..ContainerOptions::default()
        }
    }

    fn start_container(&self, opts: &ContainerOptions) -> Result<String> {
        let id = self
            .runtime
            .create(opts)
            .map_err(|e| RunnerError::Provisioning(format!("create {}: {}", opts.name, e)))?;
        if let Err(e) = self.runtime.start(&id) {
            if let Err(rm) = self.runtime.remove(&id, true) {
                warn!(container = %opts.name, error = %rm, "rollback remove failed");
            }
            return Err(RunnerError::Provisioning(format!(
                "start {}: {}",
                opts.name, e
            )));
        }
        Ok(id)
    }
}

impl EnvironmentProvisioner for LocalProvisioner {
    fn provision(&self, req: &ProvisionRequest<'_>) -> Result<Environment> {
        let name = environment_name(req.session_id, req.item.id);
        let base_port = self.ports.allocate(&name)?;

        let worktree = match self.worktrees.create(
            &name,
            &req.profile.repo,
            Some(req.profile.branch_or_default()),
        ) {
            Ok(path) => path,
            Err(e) => {
                self.ports.release(&name);
                return Err(match e {
                    already @ RunnerError::Provisioning(_) => already,
                    other => RunnerError::Provisioning(format!("worktree {}: {}", name, other)),
                });
            }
        };

        let opts = self.container_options(&name, req, &worktree, base_port);
        let handle = match self.start_container(&opts) {
            Ok(id) => id,
            Err(e) => {
                if let Err(wt) = self.worktrees.remove(&name) {
                    warn!(environment = %name, error = %wt, "rollback worktree remove failed");
                }
                self.ports.release(&name);
                return Err(e);
            }
        };

        info!(
            environment = %name,
            image = %opts.image,
            base_port,
            handle = %handle,
            "environment provisioned"
        );
        Ok(Environment {
            name,
            session_id: req.session_id.to_string(),
            worktree,
            base_port,
            handle,
        })
    }

    fn teardown(&self, env: &Environment) -> Result<()> {
        let mut first: Option<RunnerError> = None;
        if let Err(e) = self.runtime.stop(&env.handle, self.stop_timeout) {
            warn!(environment = %env.name, error = %e, "stop failed");
        }
        if let Err(e) = self.runtime.remove(&env.handle, true) {
            warn!(environment = %env.name, error = %e, "container remove failed");
            first = Some(e.into());
        }
        if let Err(e) = self.worktrees.remove(&env.name) {
            warn!(environment = %env.name, error = %e, "worktree remove failed");
            if first.is_none() {
                first = Some(e);
            }
        }
        self.ports.release(&env.name);
        debug!(environment = %env.name, "environment torn down");
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
