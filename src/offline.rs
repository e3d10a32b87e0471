//! "We missed you" reminder for installs that have been closed for a while.
//!
//! Runs once at daemon startup, entirely off persisted state; the live news
//! accounting is untouched by it.

use chrono::Utc;

use crate::{NotificationDispatcher, StateStore, AWAY_REMINDER_AFTER_SECS};

/// Stamp the shutdown time so the next start can tell how long we were gone.
pub(crate) async fn record_shutdown(store: &StateStore) {
    let now = Utc::now();
    if let Err(error) = store.update(|state| state.last_closed_at = Some(now)).await {
        tracing::warn!("failed to persist shutdown time: {error}");
    }
}

/// Emit at most one reminder if the previous session ended long ago; reset
/// the escalation counter when the user is back within the threshold.
pub(crate) async fn check_away_reminder(store: &StateStore, dispatcher: &NotificationDispatcher) {
    let state = store.read().await;
    let Some(last_closed) = state.last_closed_at else {
        return;
    };

    let away_secs = Utc::now()
        .signed_duration_since(last_closed)
        .num_seconds()
        .max(0) as u64;

    if away_secs < AWAY_REMINDER_AFTER_SECS {
        if state.away_reminder_count != 0 {
            if let Err(error) = store.update(|s| s.away_reminder_count = 0).await {
                tracing::warn!("failed to reset away-reminder counter: {error}");
            }
        }
        return;
    }

    let days_away = away_secs / (24 * 60 * 60);
    let body = reminder_body(state.away_reminder_count, days_away);
    if let Err(error) = dispatcher.notify_raw("We missed you", &body) {
        tracing::warn!("failed to deliver away reminder: {error}");
    }
    if let Err(error) = store
        .update(|s| s.away_reminder_count = s.away_reminder_count.saturating_add(1))
        .await
    {
        tracing::warn!("failed to persist away-reminder counter: {error}");
    }
}

fn reminder_body(reminder_count: u32, days_away: u64) -> String {
    match reminder_count {
        0 => format!("It's been {days_away} days. Campus news kept moving without you."),
        1 => format!("Still away after {days_away} days? Your news feed is piling up."),
        _ => format!("{days_away} days offline. Open the app to catch up on campus news."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::{MemoryBadge, RecordingNotifier};
    use chrono::Duration;
    use std::sync::Arc;

    fn build(
        dir: &std::path::Path,
    ) -> (
        Arc<StateStore>,
        &'static RecordingNotifier,
        NotificationDispatcher,
    ) {
        let store = Arc::new(StateStore::open(dir).expect("open store"));
        let notifier: &'static RecordingNotifier =
            Box::leak(Box::new(RecordingNotifier::default()));
        let badge: &'static MemoryBadge = Box::leak(Box::new(MemoryBadge::default()));
        let dispatcher =
            NotificationDispatcher::new(Arc::clone(&store), Box::new(notifier), Box::new(badge));
        (store, notifier, dispatcher)
    }

    #[tokio::test]
    async fn first_run_sends_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_store, notifier, dispatcher) = build(dir.path());
        check_away_reminder(&_store, &dispatcher).await;
        assert!(notifier.titles().is_empty());
    }

    #[tokio::test]
    async fn recent_closure_resets_counter_silently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, dispatcher) = build(dir.path());

        store
            .update(|state| {
                state.last_closed_at = Some(Utc::now() - Duration::hours(2));
                state.away_reminder_count = 3;
            })
            .await
            .expect("seed");

        check_away_reminder(&store, &dispatcher).await;
        assert!(notifier.titles().is_empty());
        assert_eq!(store.read().await.away_reminder_count, 0);
    }

    #[tokio::test]
    async fn long_absence_notifies_and_escalates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, dispatcher) = build(dir.path());

        store
            .update(|state| state.last_closed_at = Some(Utc::now() - Duration::days(4)))
            .await
            .expect("seed");

        check_away_reminder(&store, &dispatcher).await;
        assert_eq!(notifier.titles(), vec!["We missed you".to_string()]);
        assert_eq!(store.read().await.away_reminder_count, 1);
    }

    #[test]
    fn reminder_wording_escalates() {
        let first = reminder_body(0, 3);
        let second = reminder_body(1, 5);
        let later = reminder_body(5, 9);
        assert_ne!(first, second);
        assert_ne!(second, later);
        assert!(later.contains("9 days"));
    }
}
