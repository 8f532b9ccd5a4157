//! Durable session records: `<base>/<session id>/session.json`.

use crate::{Result, RunnerError};
use chrono::{DateTime, Utc};
use crew_core::{atomic_write_json_pretty, ensure_dir, Plan, Session};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SESSION_FILE: &str = "session.json";
const ID_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn new_session_id(now: DateTime<Utc>) -> String {
    now.format(ID_FORMAT).to_string()
}

/// Orders `<stem>` and `<stem>-<n>` ids by time, then by collision suffix.
fn order_key(id: &str) -> (&str, u64) {
    match id.rsplit_once('-') {
        Some((stem, n)) if stem.contains('-') => match n.parse() {
            Ok(n) => (stem, n),
            Err(_) => (id, 1),
        },
        _ => (id, 1),
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(SESSION_FILE)
    }

    /// Starts a session and persists it. Two sessions created in the same second
    /// get `-2`, `-3`, ... suffixes.
    pub fn create(&self, profile: &str, plan: Plan) -> Result<Session> {
        self.create_at(profile, plan, Utc::now())
    }

    pub fn create_at(&self, profile: &str, plan: Plan, now: DateTime<Utc>) -> Result<Session> {
        ensure_dir(&self.base_dir)?;
        let stem = new_session_id(now);
        let mut id = stem.clone();
        let mut n = 2;
        while self.session_dir(&id).exists() {
            id = format!("{}-{}", stem, n);
            n += 1;
        }
        let session = Session::new(id, profile, plan, now);
        self.save(&session)?;
        Ok(session)
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let path = self.record_path(&session.id);
        if let Some(dir) = path.parent() {
            ensure_dir(dir)?;
        }
        atomic_write_json_pretty(&path, session)?;
        debug!(session_id = %session.id, status = %session.status, "session saved");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Session> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RunnerError::SessionNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(SESSION_FILE).is_file() {
                continue;
            }
            ids.push(entry.file_name().to_string_lossy().to_string());
        }
        ids.sort_by(|a, b| order_key(b).cmp(&order_key(a)));
        Ok(ids)
    }

    pub fn latest(&self) -> Result<Option<Session>> {
        match self.list()?.first() {
            Some(id) => self.load(id).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worktree::tests::scratch_dir;
    use chrono::TimeZone;
    use crew_core::{SessionStatus, WorkItem};

    fn plan() -> Plan {
        Plan {
            goal: "ship".into(),
            work_items: vec![WorkItem {
                id: 1,
                title: "one".into(),
                prompt: "do one".into(),
                files: Vec::new(),
                depends_on: Vec::new(),
            }],
            summary: String::new(),
        }
    }

    #[test]
    fn ids_are_sortable_timestamps() {
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).single().expect("time");
        assert_eq!(new_session_id(t), "20260304-050607");
    }

    #[test]
    fn create_save_load_round_trip() {
        let dir = scratch_dir("store_rt");
        let store = SessionStore::new(&dir);
        let mut session = store.create("web", plan()).expect("create");
        assert!(dir.join(&session.id).join("session.json").is_file());

        session.complete(Utc::now());
        store.save(&session).expect("save");
        let loaded = store.load(&session.id).expect("load");
        assert_eq!(loaded, session);
        assert_eq!(loaded.status, SessionStatus::Succeeded);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_second_sessions_get_distinct_ids() {
        let dir = scratch_dir("store_collide");
        let store = SessionStore::new(&dir);
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("time");
        let a = store.create_at("p", plan(), t).expect("a");
        let b = store.create_at("p", plan(), t).expect("b");
        assert_eq!(a.id, "20260101-000000");
        assert_eq!(b.id, "20260101-000000-2");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_is_most_recent_first_and_skips_stray_dirs() {
        let dir = scratch_dir("store_list");
        let store = SessionStore::new(&dir);
        for (h, m) in [(1, 0), (3, 0), (2, 30)] {
            let t = Utc.with_ymd_and_hms(2026, 1, 1, h, m, 0).single().expect("time");
            store.create_at("p", plan(), t).expect("create");
        }
        fs::create_dir_all(dir.join("99999999-999999")).expect("stray dir");

        let ids = store.list().expect("list");
        assert_eq!(
            ids,
            vec!["20260101-030000", "20260101-023000", "20260101-010000"]
        );
        let latest = store.latest().expect("latest").expect("some session");
        assert_eq!(latest.id, "20260101-030000");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_session_is_reported_by_id() {
        let dir = scratch_dir("store_missing");
        let store = SessionStore::new(&dir);
        let err = store.load("nope").expect_err("missing");
        assert!(matches!(err, RunnerError::SessionNotFound(ref id) if id == "nope"));
        assert!(store.latest().expect("latest").is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_second_suffixes_sort_numerically() {
        let dir = scratch_dir("store_suffix");
        let store = SessionStore::new(&dir);
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("time");
        for _ in 0..11 {
            store.create_at("p", plan(), t).expect("create");
        }
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).single().expect("time");
        store.create_at("p", plan(), later).expect("later");

        let ids = store.list().expect("list");
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], "20260101-000001");
        assert_eq!(ids[1], "20260101-000000-11");
        assert_eq!(ids[2], "20260101-000000-10");
        assert_eq!(ids[3], "20260101-000000-9");
        assert_eq!(ids[11], "20260101-000000");

        let _ = fs::remove_dir_all(&dir);
    }
}
