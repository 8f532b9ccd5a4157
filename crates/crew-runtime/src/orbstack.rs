use crate::backend::{ContainerRuntime, LogStream};
use crate::cli::CliRuntime;
use crate::types::{
    BuildOptions, Container, ContainerFilter, ContainerOptions, ExecOptions, ExecOutput,
    LogOptions,
};
use crate::Result;
use std::process::{Command, Stdio};
use std::time::Duration;

/// OrbStack speaks the docker protocol; only detection differs.
#[derive(Debug, Clone)]
pub struct OrbStackRuntime {
    docker: CliRuntime,
}

impl OrbStackRuntime {
    pub fn new() -> Self {
        Self {
            docker: CliRuntime::docker(),
        }
    }

    fn orbctl_running() -> bool {
        Command::new("orbctl")
            .arg("status")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for OrbStackRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for OrbStackRuntime {
    fn name(&self) -> &'static str {
        "orbstack"
    }

    fn is_available(&self) -> bool {
        if Self::orbctl_running() {
            return true;
        }
        self.docker
            .version_field("{{.Server.Platform.Name}}")
            .map(|p| p.to_lowercase().contains("orbstack"))
            .unwrap_or(false)
    }

    fn create(&self, opts: &ContainerOptions) -> Result<String> {
        self.docker.create(opts)
    }

    fn start(&self, id: &str) -> Result<()> {
        self.docker.start(id)
    }

    fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        self.docker.stop(id, timeout)
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.docker.remove(id, force)
    }

    fn list(&self, filter: &ContainerFilter) -> Result<Vec<Container>> {
        self.docker.list(filter)
    }

    fn inspect(&self, id_or_name: &str) -> Result<Container> {
        self.docker.inspect(id_or_name)
    }

    fn logs(&self, id: &str, opts: &LogOptions) -> Result<LogStream> {
        self.docker.logs(id, opts)
    }

    fn exec(&self, id: &str, cmd: &[String], opts: &ExecOptions) -> Result<ExecOutput> {
        self.docker.exec(id, cmd, opts)
    }

    fn commit(&self, id: &str, image: &str) -> Result<()> {
        self.docker.commit(id, image)
    }

    fn build_image(&self, tag: &str, opts: &BuildOptions) -> Result<()> {
        self.docker.build_image(tag, opts)
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        self.docker.pull_image(image)
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        self.docker.image_exists(image)
    }

    fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        self.docker.tag_image(source, target)
    }

    fn list_images(&self, prefix: &str) -> Result<Vec<String>> {
        self.docker.list_images(prefix)
    }
}
