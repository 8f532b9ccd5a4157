//! Wave-by-wave dispatch of a plan, with every task transition persisted.

use crate::config::CrewConfig;
use crate::executor::{ContainerAgent, TaskExecutor};
use crate::ports::PortAllocator;
use crate::profile::Profile;
use crate::provision::{Environment, EnvironmentProvisioner, LocalProvisioner, ProvisionRequest};
use crate::session::SessionStore;
use crate::worktree::WorktreeManager;
use crate::Result;
use chrono::Utc;
use crew_core::{execution_waves, Plan, Session, SessionStatus, TaskState, TaskStatus, WorkItem};
use crew_runtime::ContainerRuntime;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Sole owner of a live session. Persists after every mutation; if dropped
/// before [`SessionTracker::seal`], the record is closed out as failed.
struct SessionTracker<'a> {
    store: &'a SessionStore,
    session: Mutex<Session>,
    sealed: bool,
}

impl<'a> SessionTracker<'a> {
    fn new(store: &'a SessionStore, session: Session) -> Self {
        Self {
            store,
            session: Mutex::new(session),
            sealed: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn id(&self) -> String {
        self.lock().id.clone()
    }

    fn state_of(&self, item: i64) -> Option<TaskState> {
        self.lock().task(item).map(|t| t.status)
    }

    fn update(
        &self,
        item: i64,
        f: impl FnOnce(&mut TaskStatus) -> crew_core::Result<()>,
    ) -> Result<()> {
        let mut session = self.lock();
        f(session.task_mut(item)?)?;
        self.store.save(&session)
    }

    fn cascade_cancellations(&self) -> Result<Vec<i64>> {
        let mut cancelled = Vec::new();
        let mut session = self.lock();
        loop {
            let blocked: Vec<(i64, i64)> = session
                .tasks
                .iter()
                .filter(|t| t.status == TaskState::Queued)
                .filter_map(|t| {
                    t.work_item
                        .depends_on
                        .iter()
                        .find(|dep| {
                            matches!(
                                session.task(**dep).map(|d| d.status),
                                Some(TaskState::Failed | TaskState::Cancelled)
                            )
                        })
                        .map(|dep| (t.id(), *dep))
                })
                .collect();
            if blocked.is_empty() {
                break;
            }
            for (item, dep) in blocked {
                session
                    .task_mut(item)?
                    .mark_cancelled(format!("dependency {} did not succeed", dep), Utc::now())?;
                self.store.save(&session)?;
                cancelled.push(item);
            }
        }
        Ok(cancelled)
    }

    fn seal(mut self) -> Result<Session> {
        let sealed = {
            let mut session = self.lock();
            session.complete(Utc::now());
            self.store.save(&session)?;
            session.clone()
        };
        self.sealed = true;
        Ok(sealed)
    }
}

impl Drop for SessionTracker<'_> {
    fn drop(&mut self) {
        if self.sealed {
            return;
        }
        let mut session = self.lock();
        if session.completed_at.is_none() {
            session.status = SessionStatus::Failed;
            session.completed_at = Some(Utc::now());
        }
        let _ = self.store.save(&session);
    }
}

/// A provisioned environment that is torn down when dropped, unless kept.
struct Provisioned<'a> {
    provisioner: &'a dyn EnvironmentProvisioner,
    env: Environment,
    keep: bool,
}

impl Drop for Provisioned<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = self.provisioner.teardown(&self.env) {
            warn!(session_id = %self.env.session_id, environment = %self.env.name, error = %e, "teardown incomplete");
        }
    }
}

pub struct Dispatcher {
    store: SessionStore,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    executor: Arc<dyn TaskExecutor>,
    keep_environments: bool,
}

impl Dispatcher {
    pub fn new(
        store: SessionStore,
        provisioner: Arc<dyn EnvironmentProvisioner>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            store,
            provisioner,
            executor,
            keep_environments: false,
        }
    }

    pub fn keep_environments(mut self, keep: bool) -> Self {
        self.keep_environments = keep;
        self
    }

    pub fn from_config(cfg: &CrewConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let ports = Arc::new(PortAllocator::new(
            cfg.container.base_port,
            cfg.container.max_port,
        ));
        let worktrees = Arc::new(WorktreeManager::with_git(&cfg.git.worktree_base));
        let provisioner = LocalProvisioner::new(
            ports,
            worktrees,
            Arc::clone(&runtime),
            cfg.container.clone(),
        )
        .use_snapshots(cfg.dispatch.use_snapshots)
        .stop_timeout(Duration::from_secs(cfg.runtime.stop_timeout_secs));
        let executor = ContainerAgent::new(runtime, cfg.agent.command.clone())
            .workdir(&cfg.container.workspace_mount)
            .transcripts(&cfg.sessions.base_dir);
        Self::new(
            SessionStore::new(&cfg.sessions.base_dir),
            Arc::new(provisioner),
            Arc::new(executor),
        )
        .keep_environments(cfg.dispatch.keep_environments)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn run(&self, profile: &Profile, plan: Plan) -> Result<Session> {
        let session = self.store.create(&profile.name, plan)?;
        self.drive(profile, session)
    }

    pub fn drive(&self, profile: &Profile, session: Session) -> Result<Session> {
        let plan = session.plan.clone();
        let tracker = SessionTracker::new(&self.store, session);
        let session_id = tracker.id();

        for (item, dep) in plan.dangling_dependencies() {
            warn!(session_id = %session_id, item, dependency = dep, "dependency names no work item; treating it as satisfied");
        }

        let waves = execution_waves(&plan.work_items);
        info!(session_id = %session_id, items = plan.work_items.len(), waves = waves.len(), "session started");

        for (index, wave) in waves.iter().enumerate() {
            let eligible: Vec<&WorkItem> = wave
                .iter()
                .filter(|item| tracker.state_of(item.id) == Some(TaskState::Queued))
                .collect();
            if eligible.len() < wave.len() {
                info!(
                    session_id = %session_id,
                    wave = index,
                    skipped = wave.len() - eligible.len(),
                    "skipping cancelled items"
                );
            }
            if eligible.is_empty() {
                continue;
            }
            info!(session_id = %session_id, wave = index, items = eligible.len(), "wave started");
            self.run_wave(&tracker, profile, &session_id, &eligible)?;

            let cancelled = tracker.cascade_cancellations()?;
            if !cancelled.is_empty() {
                warn!(session_id = %session_id, wave = index, cancelled = ?cancelled, "dependents cancelled");
            }
        }

        let session = tracker.seal()?;
        let summary = session.summary();
        info!(
            session_id = %session.id,
            status = %session.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "session finished"
        );
        Ok(session)
    }

    fn run_wave(
        &self,
        tracker: &SessionTracker<'_>,
        profile: &Profile,
        session_id: &str,
        items: &[&WorkItem],
    ) -> Result<()> {
        let outcomes: Vec<(i64, thread::Result<Result<()>>)> = thread::scope(|scope| {
            let handles: Vec<_> = items
                .iter()
                .map(|item| {
                    let item: &WorkItem = item;
                    let handle =
                        scope.spawn(move || self.run_item(tracker, profile, session_id, item));
                    (item.id, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(id, handle)| (id, handle.join()))
                .collect()
        });

        let mut first_err = None;
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(session_id, item = id, error = %e, "could not record item outcome");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(_) => {
                    error!(session_id, item = id, "item worker panicked");
                    let still_open = tracker.state_of(id).is_some_and(|s| !s.is_terminal());
                    if still_open {
                        tracker.update(id, |t| t.mark_failed("worker panicked", Utc::now()))?;
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Errors returned here are persistence failures; item failures are recorded, not returned.
    fn run_item(
        &self,
        tracker: &SessionTracker<'_>,
        profile: &Profile,
        session_id: &str,
        item: &WorkItem,
    ) -> Result<()> {
        let req = ProvisionRequest {
            session_id,
            profile,
            item,
        };
        let env = match self.provisioner.provision(&req) {
            Ok(env) => env,
            Err(e) => {
                warn!(session_id, item = item.id, error = %e, "provisioning failed");
                return tracker.update(item.id, |t| t.mark_failed(e.to_string(), Utc::now()));
            }
        };
        let provisioned = Provisioned {
            provisioner: self.provisioner.as_ref(),
            env,
            keep: self.keep_environments,
        };
        let env = &provisioned.env;

        tracker.update(item.id, |t| {
            t.mark_running(&env.name, Some(env.handle.clone()), Utc::now())
        })?;

        match self.executor.execute(env, item) {
            Ok(code) => tracker.update(item.id, |t| t.mark_exited(code, Utc::now())),
            Err(e) => {
                warn!(session_id, item = item.id, error = %e, "execution failed");
                tracker.update(item.id, |t| t.mark_failed(e.to_string(), Utc::now()))
            }
        }
    }
}
