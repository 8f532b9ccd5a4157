//! Per-environment isolated copies of a source repository.
//!
//! Remote repositories share one bare mirror per base directory and get linked
//! worktrees from it. Local repositories get a standalone clone instead, since a
//! linked worktree records host-absolute paths that break once the directory is
//! mounted into a container.

use crate::vcs::{GitCli, Vcs, WorktreeInfo};
use crate::{Result, RunnerError};
use crew_core::repo::{is_remote_url, looks_like_local_path};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const MIRROR_DIR: &str = ".main-repo";
const FALLBACK_BRANCH: &str = "master";

pub struct WorktreeManager {
    base_dir: PathBuf,
    vcs: Arc<dyn Vcs>,
    mirror_lock: Mutex<()>,
}

fn is_local_repo(repo: &str) -> bool {
    !is_remote_url(repo) && (Path::new(repo).exists() || looks_like_local_path(repo))
}

impl WorktreeManager {
    pub fn new(base_dir: impl Into<PathBuf>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            base_dir: base_dir.into(),
            vcs,
            mirror_lock: Mutex::new(()),
        }
    }

    pub fn with_git(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(base_dir, Arc::new(GitCli))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.base_dir.join(MIRROR_DIR)
    }

    pub fn create(&self, name: &str, repo: &str, branch: Option<&str>) -> Result<PathBuf> {
        let path = self.path_for(name);
        if path.exists() {
            debug!(environment = name, path = %path.display(), "worktree already present");
            return Ok(path);
        }
        fs::create_dir_all(&self.base_dir)?;

        let branch = branch.filter(|b| !b.is_empty());
        if is_local_repo(repo) {
            self.clone_local(name, repo, branch.unwrap_or("main"), &path)?;
        } else {
            self.add_linked(name, repo, branch, &path)?;
        }
        info!(environment = name, repo, path = %path.display(), "worktree created");
        Ok(path)
    }

    fn sync_mirror(&self, repo: &str) -> Result<PathBuf> {
        let mirror = self.mirror_path();
        if mirror.exists() {
            if let Err(e) = self.vcs.prune_worktrees(&mirror) {
                warn!(error = %e, "worktree prune failed");
            }
            if let Err(e) = self.vcs.fetch_all(&mirror) {
                warn!(error = %e, "mirror fetch failed; using cached refs");
            }
        } else {
            info!(repo, mirror = %mirror.display(), "cloning bare mirror");
            self.vcs.clone_bare(repo, &mirror)?;
        }
        Ok(mirror)
    }

    fn add_linked(
        &self,
        name: &str,
        repo: &str,
        branch: Option<&str>,
        path: &Path,
    ) -> Result<()> {
        let _guard = self.mirror_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mirror = self.sync_mirror(repo)?;

        let mut branch = branch.unwrap_or("main").to_string();
        let start = match self.start_point(&mirror, &branch) {
            Some(start) => start,
            None => match self.start_point(&mirror, FALLBACK_BRANCH) {
                Some(start) => {
                    warn!(requested = %branch, "branch missing; using master");
                    branch = FALLBACK_BRANCH.to_string();
                    start
                }
                None => {
                    return Err(RunnerError::Provisioning(format!(
                        "branch '{}' not found in {}",
                        branch, repo
                    )))
                }
            },
        };

        if let Err(e) = self.vcs.add_worktree(&mirror, path, &start, &branch) {
            // a branch can only be checked out once across linked worktrees
            let derived = format!("{}-{}", branch, name);
            debug!(error = %e, derived = %derived, "retrying worktree on derived branch");
            self.vcs.add_worktree(&mirror, path, &start, &derived)?;
        }
        Ok(())
    }

    /// Prefers the fetched remote-tracking ref over the mirror's own branch.
    fn start_point(&self, mirror: &Path, branch: &str) -> Option<String> {
        let tracking = format!("origin/{}", branch);
        if self.vcs.has_revision(mirror, &tracking) {
            Some(tracking)
        } else if self.vcs.has_revision(mirror, branch) {
            Some(branch.to_string())
        } else {
            None
        }
    }

    fn clone_local(&self, name: &str, repo: &str, branch: &str, path: &Path) -> Result<()> {
        let source = fs::canonicalize(repo).map_err(|e| {
            RunnerError::Provisioning(format!("local repository {}: {}", repo, e))
        })?;
        let branch = if !self.vcs.has_revision(&source, branch)
            && self.vcs.has_revision(&source, FALLBACK_BRANCH)
        {
            warn!(requested = %branch, "branch missing; using master");
            FALLBACK_BRANCH
        } else {
            branch
        };
        self.vcs.clone_local(&source, path, branch)?;

        match self.vcs.remote_url(&source, "origin") {
            Some(upstream) if !looks_like_local_path(&upstream) => {
                self.vcs.set_remote_url(path, "origin", &upstream)?;
                debug!(environment = name, upstream = %upstream, "origin repointed to upstream");
            }
            _ => {
                debug!(environment = name, "source has no remote upstream; origin left local");
            }
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(());
        }
        let mirror = self.mirror_path();
        let via_vcs = mirror.exists() && {
            let _guard = self.mirror_lock.lock().unwrap_or_else(|e| e.into_inner());
            match self.vcs.remove_worktree(&mirror, &path) {
                Ok(()) => true,
                Err(e) => {
                    debug!(environment = name, error = %e, "worktree remove failed; deleting directory");
                    false
                }
            }
        };
        if !via_vcs || path.exists() {
            fs::remove_dir_all(&path)?;
            if mirror.exists() {
                let _guard = self.mirror_lock.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = self.vcs.prune_worktrees(&mirror) {
                    warn!(error = %e, "worktree prune failed");
                }
            }
        }
        info!(environment = name, "worktree removed");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<WorktreeInfo>> {
        let mirror = self.mirror_path();
        if !mirror.exists() {
            return Ok(Vec::new());
        }
        self.vcs.list_worktrees(&mirror)
    }
}
