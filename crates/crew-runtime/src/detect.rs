use crate::backend::ContainerRuntime;
use crate::cli::CliRuntime;
use crate::orbstack::OrbStackRuntime;
use crate::{Result, RuntimeError};
use tracing::{debug, info, warn};

/// Binds the first candidate whose availability probe succeeds.
pub fn select_available(
    candidates: Vec<Box<dyn ContainerRuntime>>,
) -> Result<Box<dyn ContainerRuntime>> {
    let tried: Vec<&'static str> = candidates.iter().map(|c| c.name()).collect();
    for candidate in candidates {
        if candidate.is_available() {
            info!(runtime = candidate.name(), "container runtime selected");
            return Ok(candidate);
        }
        debug!(runtime = candidate.name(), "container runtime unavailable");
    }
    Err(RuntimeError::NoRuntimeFound(tried.join(", ")))
}

fn auto_candidates() -> Vec<Box<dyn ContainerRuntime>> {
    let mut out: Vec<Box<dyn ContainerRuntime>> = Vec::new();
    if cfg!(target_os = "macos") {
        out.push(Box::new(OrbStackRuntime::new()));
    }
    out.push(Box::new(CliRuntime::docker()));
    out.push(Box::new(CliRuntime::podman()));
    if !cfg!(target_os = "macos") {
        out.push(Box::new(OrbStackRuntime::new()));
    }
    out
}

/// Resolves `preferred` (`auto`, `docker`, `podman`, `orbstack`) to a usable backend.
pub fn detect_runtime(preferred: &str) -> Result<Box<dyn ContainerRuntime>> {
    let pinned: Option<Box<dyn ContainerRuntime>> = match preferred {
        "docker" => Some(Box::new(CliRuntime::docker())),
        "podman" => Some(Box::new(CliRuntime::podman())),
        "orbstack" => Some(Box::new(OrbStackRuntime::new())),
        "" | "auto" => None,
        other => {
            warn!(preferred = other, "unknown runtime preference, auto-detecting");
            None
        }
    };
    match pinned {
        Some(runtime) if runtime.is_available() => {
            info!(runtime = runtime.name(), "pinned container runtime available");
            Ok(runtime)
        }
        Some(runtime) => Err(RuntimeError::NotAvailable(runtime.name().to_string())),
        None => select_available(auto_candidates()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LogStream;
    use crate::types::*;
    use std::time::Duration;

    struct Probe {
        name: &'static str,
        up: bool,
    }

    impl ContainerRuntime for Probe {
        fn name(&self) -> &'static str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.up
        }
        fn create(&self, _: &ContainerOptions) -> Result<String> {
            unimplemented!()
        }
        fn start(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn stop(&self, _: &str, _: Duration) -> Result<()> {
            unimplemented!()
        }
        fn remove(&self, _: &str, _: bool) -> Result<()> {
            unimplemented!()
        }
        fn list(&self, _: &ContainerFilter) -> Result<Vec<Container>> {
            unimplemented!()
        }
        fn inspect(&self, _: &str) -> Result<Container> {
            unimplemented!()
        }
        fn logs(&self, _: &str, _: &LogOptions) -> Result<LogStream> {
            unimplemented!()
        }
        fn exec(&self, _: &str, _: &[String], _: &ExecOptions) -> Result<ExecOutput> {
            unimplemented!()
        }
        fn commit(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn build_image(&self, _: &str, _: &BuildOptions) -> Result<()> {
            unimplemented!()
        }
        fn pull_image(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn image_exists(&self, _: &str) -> Result<bool> {
            unimplemented!()
        }
        fn tag_image(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn list_images(&self, _: &str) -> Result<Vec<String>> {
            unimplemented!()
        }
    }

    fn probe(name: &'static str, up: bool) -> Box<dyn ContainerRuntime> {
        Box::new(Probe { name, up })
    }

    #[test]
    fn first_available_candidate_wins() {
        let chosen = select_available(vec![
            probe("orbstack", false),
            probe("docker", true),
            probe("podman", true),
        ])
        .expect("runtime");
        assert_eq!(chosen.name(), "docker");
    }

    #[test]
    fn no_candidate_reports_everything_tried() {
        let err = select_available(vec![probe("docker", false), probe("podman", false)])
            .err()
            .expect("none available");
        assert_eq!(err.to_string(), "no container runtime found (tried docker, podman)");
    }
}
