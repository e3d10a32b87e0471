//! One-shot news fetch for the OS-scheduled fallback path.
//!
//! Runs as its own process (`uninews-desktop poll`), so everything it shares
//! with the daemon goes through the persisted state. It must always look
//! successful to the scheduler: repeated failures would get the job
//! deprioritized, so errors are logged and swallowed here.

use std::time::Duration;

use crate::{
    build_endpoint_url, NewsItemWire, NewsSnapshot, NotificationDispatcher, StateStore,
    StoredSettings, LATEST_NEWS_PATH, POLL_REQUEST_TIMEOUT_SECS,
};

/// Fallback poll: guard on the persisted authenticated flag, fetch once,
/// feed the shared dedup path. Never returns an error.
pub(crate) async fn run_once(
    settings: &StoredSettings,
    store: &StateStore,
    dispatcher: &NotificationDispatcher,
) {
    if !store.read().await.authenticated {
        // Not signed in: no network traffic at all from the background path.
        tracing::debug!("background poll skipped: not authenticated");
        return;
    }

    match fetch_latest(settings).await {
        Ok(snapshot) => {
            let notified = dispatcher.check_for_new_news(&snapshot).await;
            tracing::info!(
                "background poll processed {} items, {} notified",
                snapshot.len(),
                notified
            );
        }
        Err(error) => {
            tracing::warn!("background poll failed: {error}");
        }
    }
}

async fn fetch_latest(settings: &StoredSettings) -> Result<NewsSnapshot, String> {
    let endpoint = build_endpoint_url(&settings.base_url, LATEST_NEWS_PATH)?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(POLL_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|error| format!("Failed to build HTTP client: {error}"))?;

    let mut request = client.get(endpoint);
    if let Some(token) = settings.token_trimmed() {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|error| format!("News request failed: {error}"))?;

    if !response.status().is_success() {
        return Err(format!(
            "News request failed with HTTP {}",
            response.status().as_u16()
        ));
    }

    let wire = response
        .json::<Vec<NewsItemWire>>()
        .await
        .map_err(|error| format!("Failed to decode news list: {error}"))?;
    Ok(wire.into_iter().filter_map(NewsItemWire::into_item).collect())
}
