use crate::backend::{ContainerRuntime, LogStream};
use crate::parse::{parse_docker_ps, parse_inspect, parse_podman_ps};
use crate::types::{
    BuildOptions, Container, ContainerFilter, ContainerOptions, ExecOptions, ExecOutput,
    LogOptions,
};
use crate::{Result, RuntimeError};
use std::io::{Cursor, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Docker,
    Podman,
}

#[derive(Debug, Clone)]
pub struct CliRuntime {
    name: &'static str,
    program: String,
    dialect: Dialect,
}

impl CliRuntime {
    pub fn docker() -> Self {
        Self {
            name: "docker",
            program: "docker".to_string(),
            dialect: Dialect::Docker,
        }
    }

    pub fn podman() -> Self {
        Self {
            name: "podman",
            program: "podman".to_string(),
            dialect: Dialect::Podman,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn failure(&self, args: &[String], output: &Output) -> RuntimeError {
        RuntimeError::CommandFailed {
            program: self.program.clone(),
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        debug!(program = %self.program, args = %args.join(" "), "runtime command");
        let output = self.command(args).stdin(Stdio::null()).output()?;
        if !output.status.success() {
            return Err(self.failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn probe(&self, args: &[&str]) -> bool {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub(crate) fn server_reachable(&self) -> bool {
        match self.dialect {
            Dialect::Docker => self.probe(&["version", "--format", "{{.Server.Version}}"]),
            Dialect::Podman => self.probe(&["version"]),
        }
    }

    pub(crate) fn version_field(&self, template: &str) -> Option<String> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            template.to_string(),
        ];
        self.run(&args).ok().map(|s| s.trim().to_string())
    }
}

fn s(v: &str) -> String {
    v.to_string()
}

pub(crate) fn create_args(opts: &ContainerOptions) -> Vec<String> {
    let mut args = vec![s("create"), s("--name"), opts.name.clone()];
    for p in &opts.ports {
        let proto = if p.protocol.is_empty() {
            "tcp"
        } else {
            p.protocol.as_str()
        };
        args.push(s("-p"));
        args.push(format!("{}:{}/{}", p.host_port, p.container_port, proto));
    }
    for e in &opts.env {
        args.push(s("-e"));
        args.push(e.clone());
    }
    for v in &opts.volumes {
        let mut spec = format!("{}:{}", v.host_path, v.container_path);
        if v.read_only {
            spec.push_str(":ro");
        }
        args.push(s("-v"));
        args.push(spec);
    }
    if let Some(dir) = &opts.workdir {
        args.push(s("-w"));
        args.push(dir.clone());
    }
    for (k, v) in &opts.labels {
        args.push(s("--label"));
        args.push(format!("{}={}", k, v));
    }
    if opts.tty {
        args.push(s("-t"));
    }
    if opts.open_stdin {
        args.push(s("-i"));
    }
    if opts.auto_remove {
        args.push(s("--rm"));
    }
    // --entrypoint takes a single executable; the rest of it leads the command.
    let mut cmd = Vec::new();
    if let Some((exe, rest)) = opts.entrypoint.split_first() {
        args.push(s("--entrypoint"));
        args.push(exe.clone());
        cmd.extend(rest.iter().cloned());
    }
    args.push(opts.image.clone());
    cmd.extend(opts.cmd.iter().cloned());
    args.extend(cmd);
    args
}

pub(crate) fn list_args(dialect: Dialect, filter: &ContainerFilter) -> Vec<String> {
    let format = match dialect {
        Dialect::Docker => "{{json .}}",
        Dialect::Podman => "json",
    };
    let mut args = vec![s("ps"), s("--format"), s(format)];
    if filter.all {
        args.push(s("-a"));
    }
    if let Some(prefix) = &filter.name_prefix {
        args.push(s("--filter"));
        args.push(format!("name={}", prefix));
    }
    for (k, v) in &filter.labels {
        args.push(s("--filter"));
        args.push(format!("label={}={}", k, v));
    }
    args
}

pub(crate) fn log_args(id: &str, opts: &LogOptions) -> Vec<String> {
    let mut args = vec![s("logs")];
    if opts.follow {
        args.push(s("-f"));
    }
    if let Some(tail) = &opts.tail {
        args.push(s("--tail"));
        args.push(tail.clone());
    }
    if opts.timestamps {
        args.push(s("-t"));
    }
    if let Some(since) = &opts.since {
        args.push(s("--since"));
        args.push(since.to_rfc3339());
    }
    args.push(id.to_string());
    args
}

pub(crate) fn exec_args(id: &str, cmd: &[String], opts: &ExecOptions) -> Vec<String> {
    let mut args = vec![s("exec")];
    if opts.interactive {
        args.push(s("-i"));
    }
    if opts.tty {
        args.push(s("-t"));
    }
    if let Some(user) = &opts.user {
        args.push(s("-u"));
        args.push(user.clone());
    }
    if let Some(dir) = &opts.workdir {
        args.push(s("-w"));
        args.push(dir.clone());
    }
    for e in &opts.env {
        args.push(s("-e"));
        args.push(e.clone());
    }
    args.push(id.to_string());
    args.extend(cmd.iter().cloned());
    args
}

pub(crate) fn build_args(tag: &str, opts: &BuildOptions) -> Vec<String> {
    let mut args = vec![s("build"), s("-t"), tag.to_string()];
    if opts.no_cache {
        args.push(s("--no-cache"));
    }
    if let Some(file) = &opts.dockerfile {
        args.push(s("-f"));
        args.push(file.clone());
    }
    for (k, v) in &opts.build_args {
        args.push(s("--build-arg"));
        args.push(format!("{}={}", k, v));
    }
    args.push(opts.context.clone().unwrap_or_else(|| s(".")));
    args
}

/// Streams a `logs` child process: stdout first, then stderr.
/// The child is reaped when the reader is dropped.
struct ChildLogs {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    tail: Cursor<Vec<u8>>,
}

impl ChildLogs {
    fn new(child: Child, stdout: ChildStdout, mut stderr: ChildStderr) -> Self {
        // neither pipe may fill up while the other is being read
        let drain = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf)?;
            Ok(buf)
        });
        Self {
            child,
            stdout: Some(stdout),
            stderr: Some(drain),
            tail: Cursor::new(Vec::new()),
        }
    }
}

impl Read for ChildLogs {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(stdout) = self.stdout.as_mut() {
            let n = stdout.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            self.stdout = None;
        }
        if let Some(drain) = self.stderr.take() {
            let bytes = drain
                .join()
                .map_err(|_| std::io::Error::other("stderr reader panicked"))??;
            self.tail = Cursor::new(bytes);
        }
        self.tail.read(buf)
    }
}

impl Drop for ChildLogs {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.server_reachable()
    }

    fn create(&self, opts: &ContainerOptions) -> Result<String> {
        let out = self.run(&create_args(opts))?;
        Ok(out.trim().to_string())
    }

    fn start(&self, id: &str) -> Result<()> {
        self.run(&[s("start"), s(id)]).map(|_| ())
    }

    fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        self.run(&[s("stop"), s("-t"), timeout.as_secs().to_string(), s(id)])
            .map(|_| ())
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec![s("rm")];
        if force {
            args.push(s("-f"));
        }
        args.push(s(id));
        self.run(&args).map(|_| ())
    }

    fn list(&self, filter: &ContainerFilter) -> Result<Vec<Container>> {
        let out = self.run(&list_args(self.dialect, filter))?;
        let mut containers = match self.dialect {
            Dialect::Docker => parse_docker_ps(&out)?,
            Dialect::Podman => parse_podman_ps(&out)?,
        };
        // the CLI name filter matches substrings
        if let Some(prefix) = &filter.name_prefix {
            containers.retain(|c| c.name.starts_with(prefix.as_str()));
        }
        Ok(containers)
    }

    fn inspect(&self, id_or_name: &str) -> Result<Container> {
        let args = [s("inspect"), s(id_or_name)];
        let output = self.command(&args).stdin(Stdio::null()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
            if stderr.contains("no such") || stderr.contains("not found") {
                return Err(RuntimeError::NotFound(id_or_name.to_string()));
            }
            return Err(self.failure(&args, &output));
        }
        parse_inspect(&String::from_utf8_lossy(&output.stdout), id_or_name)
    }

    fn logs(&self, id: &str, opts: &LogOptions) -> Result<LogStream> {
        let mut child = self
            .command(&log_args(id, opts))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Io(std::io::Error::other(
                "log process has no output pipes",
            )));
        };
        Ok(Box::new(ChildLogs::new(child, stdout, stderr)))
    }

    fn exec(&self, id: &str, cmd: &[String], opts: &ExecOptions) -> Result<ExecOutput> {
        let mut command = self.command(&exec_args(id, cmd, opts));
        if opts.interactive {
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()?;
            return Ok(ExecOutput {
                exit_code: status.code().unwrap_or(-1),
                ..ExecOutput::default()
            });
        }
        let output = command.stdin(Stdio::null()).output()?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn commit(&self, id: &str, image: &str) -> Result<()> {
        self.run(&[s("commit"), s(id), s(image)]).map(|_| ())
    }

    fn build_image(&self, tag: &str, opts: &BuildOptions) -> Result<()> {
        self.run(&build_args(tag, opts)).map(|_| ())
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        self.run(&[s("pull"), s(image)]).map(|_| ())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let args = match self.dialect {
            Dialect::Docker => vec![s("image"), s("inspect"), s(image)],
            Dialect::Podman => vec![s("image"), s("exists"), s(image)],
        };
        let output = self.command(&args).stdin(Stdio::null()).output()?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.failure(&args, &output)),
        }
    }

    fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        self.run(&[s("tag"), s(source), s(target)]).map(|_| ())
    }

    fn list_images(&self, prefix: &str) -> Result<Vec<String>> {
        let out = self.run(&[s("images"), s("--format"), s("{{.Repository}}:{{.Tag}}")])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && l.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PortMapping, VolumeMount};
    use std::collections::BTreeMap;

    #[test]
    fn create_args_cover_every_option() {
        let mut labels = BTreeMap::new();
        labels.insert("crew.session".to_string(), "s1".to_string());
        let opts = ContainerOptions {
            name: "crew-s1-1".into(),
            image: "crew-dev:latest".into(),
            ports: vec![PortMapping::tcp(8080, 3000)],
            env: vec!["A=1".into()],
            volumes: vec![VolumeMount {
                host_path: "/wt/crew-s1-1".into(),
                container_path: "/workspace".into(),
                read_only: false,
            }],
            workdir: Some("/workspace".into()),
            cmd: vec!["infinity".into()],
            entrypoint: vec!["sleep".into()],
            labels,
            auto_remove: false,
            tty: true,
            open_stdin: true,
        };
        let args = create_args(&opts);
        assert_eq!(
            args,
            vec![
                "create", "--name", "crew-s1-1", "-p", "8080:3000/tcp", "-e", "A=1", "-v",
                "/wt/crew-s1-1:/workspace", "-w", "/workspace", "--label", "crew.session=s1",
                "-t", "-i", "--entrypoint", "sleep", "crew-dev:latest", "infinity",
            ]
        );
    }

    #[test]
    fn list_args_follow_dialect() {
        let mut filter = ContainerFilter {
            all: true,
            name_prefix: Some("crew-".into()),
            labels: BTreeMap::new(),
        };
        filter.labels.insert("crew.session".into(), "s1".into());
        let docker = list_args(Dialect::Docker, &filter);
        assert_eq!(&docker[..3], &["ps", "--format", "{{json .}}"]);
        assert!(docker.contains(&"label=crew.session=s1".to_string()));
        assert!(docker.contains(&"-a".to_string()));
        let podman = list_args(Dialect::Podman, &ContainerFilter::default());
        assert_eq!(podman, vec!["ps", "--format", "json"]);
    }

    #[test]
    fn exec_and_log_args() {
        let opts = ExecOptions {
            interactive: false,
            tty: false,
            user: Some("dev".into()),
            workdir: Some("/workspace".into()),
            env: vec!["X=y".into()],
        };
        let args = exec_args("abc", &["ls".to_string(), "-la".to_string()], &opts);
        assert_eq!(
            args,
            vec!["exec", "-u", "dev", "-w", "/workspace", "-e", "X=y", "abc", "ls", "-la"]
        );
        let logs = log_args(
            "abc",
            &LogOptions {
                follow: true,
                tail: Some("100".into()),
                timestamps: false,
                since: None,
            },
        );
        assert_eq!(logs, vec!["logs", "-f", "--tail", "100", "abc"]);
    }

    #[test]
    fn build_args_default_context() {
        let args = build_args("img:1", &BuildOptions::default());
        assert_eq!(args, vec!["build", "-t", "img:1", "."]);
    }

    #[cfg(unix)]
    #[test]
    fn logs_with_a_large_stderr_are_read_to_the_end() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!(
            "crew_runtime_logs_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("scratch dir");
        let script = dir.join("docker");
        std::fs::write(
            &script,
            "#!/bin/sh\nhead -c 300000 /dev/zero | tr '\\0' 'e' 1>&2\nprintf out\n",
        )
        .expect("write fake cli");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let runtime = CliRuntime {
            name: "docker",
            program: script.to_string_lossy().into_owned(),
            dialect: Dialect::Docker,
        };
        let mut stream = runtime
            .logs("x", &LogOptions::default())
            .expect("spawn logs");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("read logs");
        drop(stream);

        assert_eq!(out.len(), 300_003);
        assert!(out.starts_with(b"out"));
        assert!(out[3..].iter().all(|b| *b == b'e'));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
