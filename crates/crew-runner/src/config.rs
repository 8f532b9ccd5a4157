use crate::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "crew";

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// `$XDG_CONFIG_HOME/crew`, falling back to `~/.config/crew`.
pub fn config_dir() -> PathBuf {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join(APP_DIR),
        _ => home_dir().join(".config").join(APP_DIR),
    }
}

/// `$CREW_CONFIG`, falling back to `config.yaml` inside [`config_dir`].
pub fn default_config_path() -> PathBuf {
    match std::env::var_os("CREW_CONFIG") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => config_dir().join("config.yaml"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub preferred: String,
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            preferred: "auto".to_string(),
            stop_timeout_secs: 10,
        }
    }
}

/// In-container ports that a host port block maps onto, in block order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePorts {
    pub service: u16,
    pub shell: u16,
    pub control: u16,
    pub status: u16,
}

impl ServicePorts {
    pub fn as_array(&self) -> [u16; 4] {
        [self.service, self.shell, self.control, self.status]
    }
}

impl Default for ServicePorts {
    fn default() -> Self {
        Self {
            service: 3000,
            shell: 7681,
            control: 7682,
            status: 7683,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    pub image: String,
    pub base_port: u16,
    pub max_port: u16,
    pub workspace_mount: String,
    pub service_ports: ServicePorts,
    pub keepalive_command: Vec<String>,
    pub env: Vec<String>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            image: "crew-dev:latest".to_string(),
            base_port: 8080,
            max_port: 8180,
            workspace_mount: "/workspace".to_string(),
            service_ports: ServicePorts::default(),
            keepalive_command: vec!["sleep".to_string(), "infinity".to_string()],
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSection {
    pub worktree_base: PathBuf,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            worktree_base: home_dir().join(".crew").join("worktrees"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub base_dir: PathBuf,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            base_dir: home_dir().join(".crew").join("sessions"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub keep_environments: bool,
    pub use_snapshots: bool,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            keep_environments: false,
            use_snapshots: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// argv prefix; the work item prompt is appended as the final argument.
    pub command: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrewConfig {
    pub runtime: RuntimeSection,
    pub container: ContainerSection,
    pub git: GitSection,
    pub sessions: SessionsSection,
    pub dispatch: DispatchSection,
    pub agent: AgentSection,
    pub logging: LoggingSection,
}

impl CrewConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        let mut cfg = match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading config");
                Self::from_yaml_str(&text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = get("CREW_IMAGE") {
            self.container.image = v;
        }
        if let Some(v) = get("CREW_RUNTIME") {
            self.runtime.preferred = v;
        }
        if let Some(v) = get("CREW_WORKTREE_BASE") {
            self.git.worktree_base = PathBuf::from(v);
        }
        if let Some(v) = get("CREW_SESSIONS_DIR") {
            self.sessions.base_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.container;
        if u32::from(c.base_port) + 3 > u32::from(c.max_port) {
            return Err(RunnerError::Config(format!(
                "container port range {}-{} cannot hold a 4-port block",
                c.base_port, c.max_port
            )));
        }
        if self.agent.command.is_empty() {
            return Err(RunnerError::Config("agent.command must not be empty".into()));
        }
        if c.image.trim().is_empty() {
            return Err(RunnerError::Config("container.image must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = CrewConfig::from_yaml_str("").expect("defaults");
        assert_eq!(cfg.container.base_port, 8080);
        assert_eq!(cfg.container.max_port, 8180);
        assert_eq!(cfg.runtime.preferred, "auto");
        assert!(cfg.dispatch.use_snapshots);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let cfg = CrewConfig::from_yaml_str(
            "container:\n  image: my-agent:1\n  base_port: 9000\ndispatch:\n  keep_environments: true\n",
        )
        .expect("parse");
        assert_eq!(cfg.container.image, "my-agent:1");
        assert_eq!(cfg.container.base_port, 9000);
        assert_eq!(cfg.container.max_port, 8180);
        assert_eq!(cfg.container.workspace_mount, "/workspace");
        assert!(cfg.dispatch.keep_environments);
        assert_eq!(cfg.agent.command[0], "claude");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = CrewConfig::default();
        cfg.apply_env_overrides(|key| match key {
            "CREW_IMAGE" => Some("override:latest".to_string()),
            "CREW_RUNTIME" => Some("podman".to_string()),
            "CREW_SESSIONS_DIR" => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.container.image, "override:latest");
        assert_eq!(cfg.runtime.preferred, "podman");
        assert_eq!(cfg.sessions.base_dir, SessionsSection::default().base_dir);
    }

    #[test]
    fn narrow_port_range_is_rejected() {
        let mut cfg = CrewConfig::default();
        cfg.container.base_port = 9000;
        cfg.container.max_port = 9002;
        let err = cfg.validate().expect_err("range too small");
        assert!(err.to_string().contains("9000-9002"));
    }

    #[test]
    fn load_of_missing_file_is_default() {
        let path = std::env::temp_dir().join(format!(
            "crew_missing_config_{}.yaml",
            std::process::id()
        ));
        let cfg = CrewConfig::load(Some(&path)).expect("missing file is fine");
        assert_eq!(cfg.container.service_ports.as_array(), [3000, 7681, 7682, 7683]);
    }
}
