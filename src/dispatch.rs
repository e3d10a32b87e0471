//! Turns snapshot deltas into at-most-one local notification per genuinely
//! new item, and keeps the badge counter honest across restarts and across
//! the daemon/poll process split.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use crate::{BadgeSurface, LocalNotifier, NewsItem, StateStore};

pub(crate) struct NotificationDispatcher {
    store: Arc<StateStore>,
    notifier: Box<dyn LocalNotifier>,
    badge: Box<dyn BadgeSurface>,
    /// Ids already notified in this process lifetime. Deliberately not
    /// persisted: cold starts fall back to the date watermark alone.
    seen_ids: Mutex<HashSet<String>>,
    /// Serializes the stream path and any in-process poll path so badge and
    /// watermark writes never interleave.
    apply_lock: tokio::sync::Mutex<()>,
}

impl NotificationDispatcher {
    pub(crate) fn new(
        store: Arc<StateStore>,
        notifier: Box<dyn LocalNotifier>,
        badge: Box<dyn BadgeSurface>,
    ) -> Self {
        Self {
            store,
            notifier,
            badge,
            seen_ids: Mutex::new(HashSet::new()),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Account for a full snapshot: notify items newer than the watermark and
    /// not yet seen this session, then advance the watermark to the newest
    /// date in the snapshot. Returns how many notifications went out. Never
    /// fails; storage and delivery hiccups are logged and absorbed.
    pub(crate) async fn check_for_new_news(&self, snapshot: &[NewsItem]) -> usize {
        let _guard = self.apply_lock.lock().await;

        let Some(max_date) = snapshot.iter().map(|item| item.date_of_creation).max() else {
            return 0;
        };

        let Some(watermark) = self.store.read().await.last_news_date else {
            // First snapshot ever: adopt its newest date silently. Notifying
            // here would replay the entire current list onto a fresh install.
            if let Err(error) = self
                .store
                .update(|state| state.last_news_date = Some(max_date))
                .await
            {
                tracing::warn!("failed to persist bootstrap watermark: {error}");
            }
            tracing::info!("news watermark bootstrapped at {max_date}");
            return 0;
        };

        let mut notified = 0usize;
        for item in snapshot {
            if item.date_of_creation <= watermark {
                continue;
            }
            if !self.mark_seen(&item.id) {
                continue;
            }

            if let Err(error) = self.increment_badge().await {
                tracing::warn!("badge increment failed for news {}: {error}", item.id);
            }
            let title = if item.title.trim().is_empty() {
                "Campus news"
            } else {
                item.title.as_str()
            };
            if let Err(error) = self.notifier.notify(title, &item.content) {
                tracing::warn!("failed to deliver notification for news {}: {error}", item.id);
            } else {
                tracing::debug!("notified news id={} title={}", item.id, title);
            }
            notified += 1;
        }

        // The watermark follows the whole snapshot, not just the notified
        // subset, so id-deduped items cannot hold it back.
        if max_date > watermark {
            if let Err(error) = self
                .store
                .update(|state| state.last_news_date = Some(max_date))
                .await
            {
                tracing::warn!("failed to persist news watermark: {error}");
            }
        }

        notified
    }

    /// Current badge value, reconciled: the surface is the source of truth on
    /// read, tolerating the user clearing it behind our back.
    pub(crate) async fn badge_count(&self) -> Result<u32, String> {
        let surface_count = self.badge.read()?;
        let stored = self.store.read().await.badge_count;
        if surface_count != stored {
            tracing::debug!("badge drifted: surface={surface_count} stored={stored}");
            if let Err(error) = self
                .store
                .update(|state| state.badge_count = surface_count)
                .await
            {
                tracing::warn!("failed to persist reconciled badge count: {error}");
            }
        }
        Ok(surface_count)
    }

    /// Bump the counter, surface first, then storage. Either write failing
    /// fails the call; the caller may retry.
    pub(crate) async fn increment_badge(&self) -> Result<u32, String> {
        let next = self.store.read().await.badge_count.saturating_add(1);
        self.badge.write(next)?;
        self.store
            .update(|state| state.badge_count = next)
            .await?;
        Ok(next)
    }

    /// Zero the counter everywhere, e.g. when the user has viewed the list.
    pub(crate) async fn reset_badge(&self) -> Result<(), String> {
        self.badge.write(0)?;
        self.store.update(|state| state.badge_count = 0).await
    }

    /// Deliver a notification outside the news accounting path (reminders).
    pub(crate) fn notify_raw(&self, title: &str, body: &str) -> Result<(), String> {
        self.notifier.notify(title, body)
    }

    fn mark_seen(&self, id: &str) -> bool {
        let Ok(mut seen) = self.seen_ids.lock() else {
            return false;
        };
        seen.insert(id.to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub(crate) fn titles(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("notifier lock")
                .iter()
                .map(|(title, _)| title.clone())
                .collect()
        }
    }

    impl LocalNotifier for &'static RecordingNotifier {
        fn notify(&self, title: &str, body: &str) -> Result<(), String> {
            self.sent
                .lock()
                .expect("notifier lock")
                .push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemoryBadge {
        pub(crate) count: Mutex<u32>,
    }

    impl BadgeSurface for &'static MemoryBadge {
        fn read(&self) -> Result<u32, String> {
            Ok(*self.count.lock().expect("badge lock"))
        }

        fn write(&self, count: u32) -> Result<(), String> {
            *self.count.lock().expect("badge lock") = count;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{MemoryBadge, RecordingNotifier};
    use super::*;
    use chrono::{DateTime, Utc};

    fn item(id: &str, title: &str, date: &str) -> NewsItem {
        NewsItem {
            id: id.to_string(),
            title: title.to_string(),
            content: format!("content of {id}"),
            coordinates: None,
            date_of_creation: date.parse::<DateTime<Utc>>().expect("date"),
        }
    }

    fn dispatcher(
        dir: &std::path::Path,
    ) -> (
        Arc<StateStore>,
        &'static RecordingNotifier,
        &'static MemoryBadge,
        NotificationDispatcher,
    ) {
        let store = Arc::new(StateStore::open(dir).expect("open store"));
        let notifier: &'static RecordingNotifier =
            Box::leak(Box::new(RecordingNotifier::default()));
        let badge: &'static MemoryBadge = Box::leak(Box::new(MemoryBadge::default()));
        let dispatcher =
            NotificationDispatcher::new(Arc::clone(&store), Box::new(notifier), Box::new(badge));
        (store, notifier, badge, dispatcher)
    }

    #[tokio::test]
    async fn bootstrap_persists_watermark_without_notifying() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, _badge, dispatcher) = dispatcher(dir.path());

        let snapshot = vec![item("1", "First", "2024-01-01T00:00:00Z")];
        assert_eq!(dispatcher.check_for_new_news(&snapshot).await, 0);

        assert!(notifier.titles().is_empty());
        assert_eq!(
            store.read().await.last_news_date,
            Some("2024-01-01T00:00:00Z".parse().expect("date"))
        );
    }

    #[tokio::test]
    async fn empty_snapshot_does_not_bootstrap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _notifier, _badge, dispatcher) = dispatcher(dir.path());

        assert_eq!(dispatcher.check_for_new_news(&[]).await, 0);
        assert!(store.read().await.last_news_date.is_none());
    }

    #[tokio::test]
    async fn exactly_one_notification_per_new_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, badge, dispatcher) = dispatcher(dir.path());

        store
            .update(|state| {
                state.last_news_date = Some("2024-01-01T00:00:00Z".parse().expect("date"))
            })
            .await
            .expect("seed watermark");

        let snapshot = vec![
            item("41", "Old", "2024-01-01T00:00:00Z"),
            item("42", "Fresh", "2024-01-01T00:00:01Z"),
        ];
        assert_eq!(dispatcher.check_for_new_news(&snapshot).await, 1);

        assert_eq!(notifier.titles(), vec!["Fresh".to_string()]);
        assert_eq!(*badge.count.lock().expect("badge lock"), 1);
        assert_eq!(store.read().await.badge_count, 1);
    }

    #[tokio::test]
    async fn repeated_snapshot_notifies_only_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, _badge, dispatcher) = dispatcher(dir.path());

        store
            .update(|state| {
                state.last_news_date = Some("2024-01-01T00:00:00Z".parse().expect("date"))
            })
            .await
            .expect("seed watermark");

        // Replaying the identical snapshot must not notify again: the
        // advanced watermark filters the item the second time through.
        let snapshot = vec![item("42", "Fresh", "2024-01-02T00:00:00Z")];
        assert_eq!(dispatcher.check_for_new_news(&snapshot).await, 1);
        assert_eq!(dispatcher.check_for_new_news(&snapshot).await, 0);
        assert_eq!(notifier.titles().len(), 1);
    }

    #[tokio::test]
    async fn watermark_advances_past_id_deduped_items() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _notifier, _badge, dispatcher) = dispatcher(dir.path());

        store
            .update(|state| {
                state.last_news_date = Some("2024-01-01T00:00:00Z".parse().expect("date"))
            })
            .await
            .expect("seed watermark");

        let first = vec![item("a", "A", "2024-01-02T00:00:00Z")];
        dispatcher.check_for_new_news(&first).await;

        // Redelivery with a later date: id-dedup holds the notification back
        // but the watermark still follows the snapshot maximum.
        let redelivered = vec![item("a", "A", "2024-01-03T00:00:00Z")];
        assert_eq!(dispatcher.check_for_new_news(&redelivered).await, 0);
        assert_eq!(
            store.read().await.last_news_date,
            Some("2024-01-03T00:00:00Z".parse().expect("date"))
        );
    }

    #[tokio::test]
    async fn notifications_follow_snapshot_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, badge, dispatcher) = dispatcher(dir.path());

        store
            .update(|state| {
                state.last_news_date = Some("2024-01-01T00:00:00Z".parse().expect("date"))
            })
            .await
            .expect("seed watermark");

        let snapshot = vec![
            item("later", "Second by date", "2024-01-03T00:00:00Z"),
            item("earlier", "First by date", "2024-01-02T00:00:00Z"),
        ];
        assert_eq!(dispatcher.check_for_new_news(&snapshot).await, 2);
        assert_eq!(
            notifier.titles(),
            vec!["Second by date".to_string(), "First by date".to_string()]
        );
        assert_eq!(*badge.count.lock().expect("badge lock"), 2);
    }

    #[tokio::test]
    async fn badge_reconciles_from_surface() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _notifier, badge, dispatcher) = dispatcher(dir.path());

        store
            .update(|state| state.badge_count = 3)
            .await
            .expect("seed badge");
        *badge.count.lock().expect("badge lock") = 7;

        assert_eq!(dispatcher.badge_count().await.expect("badge"), 7);
        assert_eq!(store.read().await.badge_count, 7);
    }

    #[tokio::test]
    async fn reset_zeroes_surface_and_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _notifier, badge, dispatcher) = dispatcher(dir.path());

        dispatcher.increment_badge().await.expect("increment");
        dispatcher.increment_badge().await.expect("increment");
        dispatcher.reset_badge().await.expect("reset");

        assert_eq!(*badge.count.lock().expect("badge lock"), 0);
        assert_eq!(store.read().await.badge_count, 0);
    }

    #[tokio::test]
    async fn full_two_snapshot_scenario() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, notifier, badge, dispatcher) = dispatcher(dir.path());

        let first = vec![item("a", "X", "2024-01-01T00:00:00Z")];
        assert_eq!(dispatcher.check_for_new_news(&first).await, 0);
        assert!(notifier.titles().is_empty());

        let second = vec![
            item("a", "X", "2024-01-01T00:00:00Z"),
            item("b", "Y", "2024-01-02T00:00:00Z"),
        ];
        assert!(crate::has_updates(&first, &second));
        assert_eq!(dispatcher.check_for_new_news(&second).await, 1);

        assert_eq!(notifier.titles(), vec!["Y".to_string()]);
        assert_eq!(*badge.count.lock().expect("badge lock"), 1);
        assert_eq!(
            store.read().await.last_news_date,
            Some("2024-01-02T00:00:00Z".parse().expect("date"))
        );
    }
}
