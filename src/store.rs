//! Durable client state shared between the daemon and the one-shot poll
//! process. Everything that must survive a restart lives here; writes are
//! atomic whole-file replacements so the other process never reads a torn
//! JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tokio::sync::Mutex;

use crate::{persist_json_to_path, quarantine_corrupt_file};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub(crate) struct PersistedState {
    pub(crate) device_id: Option<String>,
    pub(crate) push_token: Option<String>,
    pub(crate) badge_count: u32,
    /// Watermark: creation date of the newest item already accounted for.
    /// Monotonically non-decreasing; `StateStore::update` enforces it.
    pub(crate) last_news_date: Option<DateTime<Utc>>,
    /// Last SSE cursor observed, echoed back as `Last-Event-ID`.
    pub(crate) last_news_id: Option<String>,
    pub(crate) authenticated: bool,
    pub(crate) away_reminder_count: u32,
    pub(crate) last_closed_at: Option<DateTime<Utc>>,
}

pub(crate) struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Load existing state or start fresh. An unparseable file is moved to a
    /// `corrupt-*` backup and replaced with defaults rather than failing.
    pub(crate) fn open(data_dir: &std::path::Path) -> Result<Self, String> {
        crate::ensure_data_dir(data_dir)?;
        let path = crate::state_file(data_dir);
        let state = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|error| format!("Failed to read state file: {error}"))?;
            match serde_json::from_str::<PersistedState>(&content) {
                Ok(state) => state,
                Err(error) => {
                    tracing::warn!("state parse failed, starting fresh: {error}");
                    quarantine_corrupt_file(&path);
                    PersistedState::default()
                }
            }
        } else {
            PersistedState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub(crate) async fn read(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    /// Apply `mutate` and persist the result. The in-memory state always
    /// takes the mutation; a failed write is reported but does not roll it
    /// back, so callers keep a best-effort view when the disk misbehaves.
    /// The watermark is clamped so no mutation can ever rewind it.
    pub(crate) async fn update<F>(&self, mutate: F) -> Result<(), String>
    where
        F: FnOnce(&mut PersistedState),
    {
        let mut state = self.state.lock().await;
        let watermark_before = state.last_news_date;
        mutate(&mut state);
        if state.last_news_date < watermark_before {
            state.last_news_date = watermark_before;
        }
        persist_json_to_path(&self.path, &*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_has_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path()).expect("open");
        let state = store.read().await;
        assert_eq!(state.badge_count, 0);
        assert!(state.last_news_date.is_none());
        assert!(!state.authenticated);
    }

    #[tokio::test]
    async fn updates_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = StateStore::open(dir.path()).expect("open");
            store
                .update(|state| {
                    state.badge_count = 4;
                    state.device_id = Some("dev-1".to_string());
                    state.authenticated = true;
                })
                .await
                .expect("update");
        }
        let store = StateStore::open(dir.path()).expect("reopen");
        let state = store.read().await;
        assert_eq!(state.badge_count, 4);
        assert_eq!(state.device_id.as_deref(), Some("dev-1"));
        assert!(state.authenticated);
    }

    #[tokio::test]
    async fn watermark_never_rewinds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path()).expect("open");
        let newer = "2024-02-01T00:00:00Z".parse::<DateTime<Utc>>().expect("date");
        let older = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().expect("date");

        store
            .update(|state| state.last_news_date = Some(newer))
            .await
            .expect("set");
        store
            .update(|state| state.last_news_date = Some(older))
            .await
            .expect("attempt rewind");
        assert_eq!(store.read().await.last_news_date, Some(newer));

        store
            .update(|state| state.last_news_date = None)
            .await
            .expect("attempt clear");
        assert_eq!(store.read().await.last_news_date, Some(newer));
    }

    #[tokio::test]
    async fn corrupt_state_file_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(crate::state_file(dir.path()), "not json").expect("write corrupt");
        let store = StateStore::open(dir.path()).expect("open");
        assert_eq!(store.read().await.badge_count, 0);
    }
}
