use serde::Serialize;

use crate::{unix_now_secs, NewsStreamClient};

#[derive(Debug, Serialize, Clone)]
pub(crate) struct StreamDiagnostics {
    pub(crate) connection_state: String,
    pub(crate) last_connected_at: Option<u64>,
    pub(crate) last_event_at: Option<u64>,
    pub(crate) stale_for_seconds: Option<u64>,
    pub(crate) last_error: Option<String>,
    pub(crate) backoff_seconds: u64,
    pub(crate) reconnect_attempts: u32,
}

pub(crate) fn snapshot_runtime(client: &NewsStreamClient) -> Result<StreamDiagnostics, String> {
    let runtime = client
        .runtime
        .lock()
        .map_err(|_| "Runtime lock poisoned".to_string())?;

    let now = unix_now_secs();
    let stale_for_seconds = runtime.last_event_at.map(|last| now.saturating_sub(last));

    Ok(StreamDiagnostics {
        connection_state: runtime.state.to_string(),
        last_connected_at: runtime.last_connected_at,
        last_event_at: runtime.last_event_at,
        stale_for_seconds,
        last_error: runtime.last_error.clone(),
        backoff_seconds: runtime.backoff_seconds,
        reconnect_attempts: runtime.reconnect_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::{MemoryBadge, RecordingNotifier};
    use crate::{NotificationDispatcher, StateStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn fresh_client_reports_disconnected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(StateStore::open(dir.path()).expect("open store"));
        let notifier: &'static RecordingNotifier =
            Box::leak(Box::new(RecordingNotifier::default()));
        let badge: &'static MemoryBadge = Box::leak(Box::new(MemoryBadge::default()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            Box::new(notifier),
            Box::new(badge),
        ));
        let client = NewsStreamClient::new(
            "http://127.0.0.1:9".to_string(),
            None,
            store,
            dispatcher,
            None,
        );

        let diagnostics = snapshot_runtime(&client).expect("snapshot");
        assert_eq!(diagnostics.connection_state, "Disconnected");
        assert!(diagnostics.last_connected_at.is_none());
        assert!(diagnostics.stale_for_seconds.is_none());
        assert_eq!(diagnostics.reconnect_attempts, 0);
    }
}
