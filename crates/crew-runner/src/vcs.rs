//! Version-control capability used by the worktree manager.

use crate::{Result, RunnerError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

pub trait Vcs: Send + Sync {
    fn clone_bare(&self, url: &str, dest: &Path) -> Result<()>;
    fn fetch_all(&self, repo: &Path) -> Result<()>;
    fn prune_worktrees(&self, repo: &Path) -> Result<()>;
    fn has_revision(&self, repo: &Path, rev: &str) -> bool;
    /// Checks out `branch` at `path`, resetting it to `start` first.
    fn add_worktree(&self, repo: &Path, path: &Path, start: &str, branch: &str) -> Result<()>;
    fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()>;
    fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeInfo>>;
    fn clone_local(&self, source: &Path, dest: &Path, branch: &str) -> Result<()>;
    fn remote_url(&self, repo: &Path, remote: &str) -> Option<String>;
    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(args = %args.join(" "), "git");
        let out = cmd.output().map_err(|e| RunnerError::Vcs {
            args: args.join(" "),
            message: e.to_string(),
        })?;
        if !out.status.success() {
            return Err(RunnerError::Vcs {
                args: args.join(" "),
                message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl Vcs for GitCli {
    fn clone_bare(&self, url: &str, dest: &Path) -> Result<()> {
        let dest = path_arg(dest);
        self.run(None, &["clone", "--bare", url, &dest])?;
        // fetches refresh refs/remotes/origin/*; worktrees start from there
        self.run(
            Some(Path::new(&dest)),
            &[
                "config",
                "remote.origin.fetch",
                "+refs/heads/*:refs/remotes/origin/*",
            ],
        )?;
        self.run(Some(Path::new(&dest)), &["fetch", "origin"])?;
        Ok(())
    }

    fn fetch_all(&self, repo: &Path) -> Result<()> {
        self.run(Some(repo), &["fetch", "--all", "--prune"])?;
        Ok(())
    }

    fn prune_worktrees(&self, repo: &Path) -> Result<()> {
        self.run(Some(repo), &["worktree", "prune"])?;
        Ok(())
    }

    fn has_revision(&self, repo: &Path, rev: &str) -> bool {
        let spec = format!("{}^{{commit}}", rev);
        self.run(Some(repo), &["rev-parse", "--verify", "--quiet", &spec])
            .is_ok()
    }

    fn add_worktree(&self, repo: &Path, path: &Path, start: &str, branch: &str) -> Result<()> {
        let path = path_arg(path);
        self.run(Some(repo), &["worktree", "add", "-B", branch, &path, start])?;
        Ok(())
    }

    fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()> {
        let path = path_arg(path);
        self.run(Some(repo), &["worktree", "remove", "--force", &path])?;
        Ok(())
    }

    fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeInfo>> {
        let out = self.run(Some(repo), &["worktree", "list", "--porcelain"])?;
        Ok(parse_porcelain(&out))
    }

    fn clone_local(&self, source: &Path, dest: &Path, branch: &str) -> Result<()> {
        let source = path_arg(source);
        let dest = path_arg(dest);
        self.run(None, &["clone", "--no-hardlinks", "--branch", branch, &source, &dest])?;
        Ok(())
    }

    fn remote_url(&self, repo: &Path, remote: &str) -> Option<String> {
        self.run(Some(repo), &["remote", "get-url", remote])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<()> {
        self.run(Some(repo), &["remote", "set-url", remote, url])?;
        Ok(())
    }
}

/// Bare entries (the mirror itself) are skipped.
pub fn parse_porcelain(text: &str) -> Vec<WorktreeInfo> {
    let mut out = Vec::new();
    for block in text.split("\n\n") {
        let mut path: Option<PathBuf> = None;
        let mut head = None;
        let mut branch = None;
        let mut bare = false;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(h) = line.strip_prefix("HEAD ") {
                head = Some(h.to_string());
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.trim_start_matches("refs/heads/").to_string());
            } else if line == "bare" {
                bare = true;
            }
        }
        let Some(path) = path else { continue };
        if bare {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        out.push(WorktreeInfo {
            name,
            path,
            branch,
            head,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_skips_bare_mirror_and_detached_branch() {
        let text = "worktree /w/.main-repo\nbare\n\nworktree /w/crew-s1-1\nHEAD 1111111111111111111111111111111111111111\nbranch refs/heads/main\n\nworktree /w/crew-s1-2\nHEAD 2222222222222222222222222222222222222222\ndetached\n";
        let list = parse_porcelain(text);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "crew-s1-1");
        assert_eq!(list[0].branch.as_deref(), Some("main"));
        assert_eq!(list[1].path, PathBuf::from("/w/crew-s1-2"));
        assert!(list[1].branch.is_none());
        assert!(list[1].head.as_deref().unwrap_or("").starts_with("2222"));
    }

    #[test]
    fn empty_porcelain_is_empty() {
        assert!(parse_porcelain("").is_empty());
    }
}
