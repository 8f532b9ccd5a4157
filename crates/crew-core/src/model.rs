use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<i64>,
}

/// A decomposed goal. Item order is authoring order, not execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
    #[serde(default)]
    pub summary: String,
}

impl Plan {
    pub fn item(&self, id: i64) -> Option<&WorkItem> {
        self.work_items.iter().find(|w| w.id == id)
    }

    /// `(item id, missing dependency id)` pairs for dependencies that name no item in this plan.
    pub fn dangling_dependencies(&self) -> Vec<(i64, i64)> {
        let known: BTreeSet<i64> = self.work_items.iter().map(|w| w.id).collect();
        let mut out = Vec::new();
        for item in &self.work_items {
            for dep in &item.depends_on {
                if !known.contains(dep) {
                    out.push((item.id, *dep));
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    fn can_move_to(self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Queued, TaskState::Running) => true,
            // provisioning failures and dependency cancellations never reach Running
            (TaskState::Queued, TaskState::Failed) => true,
            (TaskState::Queued, TaskState::Cancelled) => true,
            (TaskState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub work_item: WorkItem,
    #[serde(default)]
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn queued(work_item: WorkItem) -> Self {
        Self {
            work_item,
            container_name: String::new(),
            handle: None,
            status: TaskState::Queued,
            exit_code: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.work_item.id
    }

    fn advance(&mut self, next: TaskState) -> Result<()> {
        if !self.status.can_move_to(next) {
            return Err(CoreError::InvalidTransition {
                item: self.id(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(
        &mut self,
        container_name: &str,
        handle: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.advance(TaskState::Running)?;
        self.container_name = container_name.to_string();
        self.handle = handle;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_exited(&mut self, exit_code: i32, now: DateTime<Utc>) -> Result<()> {
        let next = if exit_code == 0 {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        self.advance(next)?;
        self.exit_code = Some(exit_code);
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.advance(TaskState::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.advance(TaskState::Cancelled)?;
        self.error = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Succeeded,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one orchestration run. Read-only once `completed_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub profile: String,
    pub goal: String,
    pub plan: Plan,
    pub tasks: Vec<TaskStatus>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Session {
    pub fn new(id: String, profile: &str, plan: Plan, now: DateTime<Utc>) -> Self {
        let tasks = plan
            .work_items
            .iter()
            .cloned()
            .map(TaskStatus::queued)
            .collect();
        Self {
            id,
            profile: profile.to_string(),
            goal: plan.goal.clone(),
            plan,
            tasks,
            created_at: now,
            completed_at: None,
            status: SessionStatus::Running,
        }
    }

    pub fn task(&self, id: i64) -> Option<&TaskStatus> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn task_mut(&mut self, id: i64) -> Result<&mut TaskStatus> {
        self.tasks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(CoreError::UnknownItem(id))
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Seals the session. Succeeded iff nothing failed or was cancelled.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        let clean = self
            .tasks
            .iter()
            .all(|t| t.status == TaskState::Succeeded);
        self.status = if clean {
            SessionStatus::Succeeded
        } else {
            SessionStatus::Failed
        };
        self.completed_at = Some(now);
    }

    pub fn summary(&self) -> SessionSummary {
        let mut s = SessionSummary::default();
        for t in &self.tasks {
            match t.status {
                TaskState::Queued => s.queued += 1,
                TaskState::Running => s.running += 1,
                TaskState::Succeeded => s.succeeded += 1,
                TaskState::Failed => s.failed += 1,
                TaskState::Cancelled => s.cancelled += 1,
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, deps: &[i64]) -> WorkItem {
        WorkItem {
            id,
            title: format!("item {}", id),
            prompt: format!("do {}", id),
            files: Vec::new(),
            depends_on: deps.to_vec(),
        }
    }

    #[test]
    fn task_state_machine_rejects_leaving_terminal_states() {
        let now = Utc::now();
        let mut t = TaskStatus::queued(item(1, &[]));
        t.mark_running("crew-s-1", Some("abc".into()), now)
            .expect("queued -> running");
        t.mark_exited(0, now).expect("running -> succeeded");
        assert_eq!(t.status, TaskState::Succeeded);
        let err = t.mark_running("again", None, now).expect_err("terminal");
        assert!(matches!(err, CoreError::InvalidTransition { item: 1, .. }));
    }

    #[test]
    fn nonzero_exit_fails_the_item() {
        let now = Utc::now();
        let mut t = TaskStatus::queued(item(2, &[]));
        t.mark_running("c", None, now).expect("running");
        t.mark_exited(3, now).expect("exited");
        assert_eq!(t.status, TaskState::Failed);
        assert_eq!(t.exit_code, Some(3));
    }

    #[test]
    fn session_completes_as_failed_when_anything_was_cancelled() {
        let now = Utc::now();
        let plan = Plan {
            goal: "g".into(),
            work_items: vec![item(1, &[]), item(2, &[1])],
            summary: String::new(),
        };
        let mut session = Session::new("20260101-000000".into(), "p", plan, now);
        session
            .task_mut(1)
            .expect("task 1")
            .mark_cancelled("test", now)
            .expect("cancel");
        session
            .task_mut(2)
            .expect("task 2")
            .mark_cancelled("test", now)
            .expect("cancel");
        assert!(session.all_terminal());
        session.complete(now);
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.summary().cancelled, 2);
    }

    #[test]
    fn session_serializes_with_stable_field_names() {
        let now = Utc::now();
        let plan = Plan {
            goal: "ship it".into(),
            work_items: vec![item(1, &[])],
            summary: "one step".into(),
        };
        let session = Session::new("20260101-000000".into(), "web", plan, now);
        let value = serde_json::to_value(&session).expect("serialize");
        for key in ["id", "profile", "goal", "plan", "tasks", "created_at", "status"] {
            assert!(value.get(key).is_some(), "missing field {}", key);
        }
        assert_eq!(value["status"], "running");
        assert_eq!(value["tasks"][0]["status"], "queued");
    }

    #[test]
    fn dangling_dependencies_are_reported() {
        let plan = Plan {
            goal: String::new(),
            work_items: vec![item(1, &[]), item(2, &[1, 9])],
            summary: String::new(),
        };
        assert_eq!(plan.dangling_dependencies(), vec![(2, 9)]);
    }
}
