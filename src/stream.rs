//! Long-lived subscription to the server's news event stream.
//!
//! One logical subscription per client instance: `connect()` is a no-op while
//! a stream task is alive, `close()` tears it down and cancels any pending
//! retry. Transport failures are never fatal; the loop backs off and
//! reconnects for as long as the owner keeps the client open.

use futures_util::StreamExt;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;

use crate::{
    build_endpoint_url, has_updates, parse_snapshot, truncate_message, unix_now_secs,
    ConnectionState, NewsItem, NewsSnapshot, NotificationDispatcher, SseDecoder, SseEvent,
    StateStore, NEWS_LIST_EVENT, RECONNECT_BASE_DELAY_SECS, RECONNECT_MAX_DELAY_SECS,
    RECONNECT_MAX_EXPONENT, STREAM_CONNECT_TIMEOUT_SECS, STREAM_IDLE_CHECK_INTERVAL_SECS,
    STREAM_IDLE_TIMEOUT_SECS, STREAM_PATH,
};

pub(crate) type ListenerToken = u64;

type SnapshotListener = Arc<dyn Fn(&[NewsItem]) + Send + Sync>;
type ConnectionListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_token: ListenerToken,
    snapshot: Vec<(ListenerToken, SnapshotListener)>,
    connection: Vec<(ListenerToken, ConnectionListener)>,
}

pub(crate) struct StreamRuntime {
    stop_tx: Option<watch::Sender<bool>>,
    /// Incremented per spawned stream task. A late-exiting superseded task
    /// only writes cleanup state if its epoch still matches, so it cannot
    /// clobber a freshly started replacement.
    stream_epoch: u64,
    pub(crate) state: ConnectionState,
    pub(crate) snapshot: Option<NewsSnapshot>,
    pub(crate) cursor: Option<String>,
    pub(crate) reconnect_attempts: u32,
    pub(crate) backoff_seconds: u64,
    pub(crate) last_connected_at: Option<u64>,
    pub(crate) last_event_at: Option<u64>,
    pub(crate) last_error: Option<String>,
}

impl Default for StreamRuntime {
    fn default() -> Self {
        Self {
            stop_tx: None,
            stream_epoch: 0,
            state: ConnectionState::Disconnected,
            snapshot: None,
            cursor: None,
            reconnect_attempts: 0,
            backoff_seconds: 0,
            last_connected_at: None,
            last_event_at: None,
            last_error: None,
        }
    }
}

/// Delay before retry number `attempt` (counting from zero): doubles per
/// consecutive failure, stops growing after `2^RECONNECT_MAX_EXPONENT`, and
/// is clamped to the maximum either way.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(RECONNECT_MAX_EXPONENT);
    let delay_secs = RECONNECT_BASE_DELAY_SECS.saturating_mul(1u64 << exponent);
    Duration::from_secs(delay_secs.min(RECONNECT_MAX_DELAY_SECS))
}

pub(crate) struct NewsStreamClient {
    base_url: String,
    token: Option<String>,
    store: Arc<StateStore>,
    dispatcher: Arc<NotificationDispatcher>,
    pub(crate) runtime: Mutex<StreamRuntime>,
    listeners: Mutex<ListenerSet>,
}

impl NewsStreamClient {
    pub(crate) fn new(
        base_url: String,
        token: Option<String>,
        store: Arc<StateStore>,
        dispatcher: Arc<NotificationDispatcher>,
        initial_cursor: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base_url,
            token,
            store,
            dispatcher,
            runtime: Mutex::new(StreamRuntime {
                cursor: initial_cursor,
                ..StreamRuntime::default()
            }),
            listeners: Mutex::new(ListenerSet::default()),
        })
    }

    /// Open the subscription. No-op while a stream task is already alive.
    pub(crate) fn connect(self: &Arc<Self>) -> Result<(), String> {
        let mut runtime = self
            .runtime
            .lock()
            .map_err(|_| "Runtime lock poisoned".to_string())?;

        if runtime.stop_tx.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        runtime.stop_tx = Some(stop_tx);
        runtime.stream_epoch = runtime.stream_epoch.wrapping_add(1);
        let task_epoch = runtime.stream_epoch;
        runtime.last_error = None;
        runtime.backoff_seconds = 0;
        drop(runtime);

        self.set_state(ConnectionState::Connecting);
        let client = Arc::clone(self);
        tracing::debug!("spawning stream task");
        tokio::spawn(async move {
            client.run_stream_loop(stop_rx, task_epoch).await;
        });
        Ok(())
    }

    /// Stop the stream task, cancel any pending retry, drop the cached
    /// snapshot. Safe to call when already closed; a later `connect()`
    /// starts clean.
    pub(crate) fn close(&self) {
        let Ok(mut runtime) = self.runtime.lock() else {
            return;
        };
        if let Some(stop_tx) = runtime.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        runtime.snapshot = None;
        runtime.backoff_seconds = 0;
        drop(runtime);

        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.runtime
            .lock()
            .map(|runtime| runtime.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Register a snapshot listener. A late subscriber is immediately
    /// replayed the last known snapshot so it does not sit stale until the
    /// server's next push.
    pub(crate) fn add_snapshot_listener(
        &self,
        listener: impl Fn(&[NewsItem]) + Send + Sync + 'static,
    ) -> ListenerToken {
        let listener: SnapshotListener = Arc::new(listener);
        let replay = self
            .runtime
            .lock()
            .ok()
            .and_then(|runtime| runtime.snapshot.clone());

        let token = {
            let Ok(mut listeners) = self.listeners.lock() else {
                return 0;
            };
            let token = listeners.next_token.wrapping_add(1);
            listeners.next_token = token;
            listeners.snapshot.push((token, Arc::clone(&listener)));
            token
        };

        if let Some(snapshot) = replay {
            listener(&snapshot);
        }
        token
    }

    pub(crate) fn remove_snapshot_listener(&self, token: ListenerToken) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.snapshot.retain(|(t, _)| *t != token);
        }
    }

    pub(crate) fn add_connection_listener(
        &self,
        listener: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ListenerToken {
        let Ok(mut listeners) = self.listeners.lock() else {
            return 0;
        };
        let token = listeners.next_token.wrapping_add(1);
        listeners.next_token = token;
        listeners.connection.push((token, Arc::new(listener)));
        token
    }

    pub(crate) fn remove_connection_listener(&self, token: ListenerToken) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.connection.retain(|(t, _)| *t != token);
        }
    }

    async fn run_stream_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>, task_epoch: u64) {
        tracing::debug!("stream task started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            match self.stream_once(&mut stop_rx).await {
                Ok(()) => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                Err(error) => {
                    if *stop_rx.borrow() {
                        break;
                    }

                    tracing::warn!("stream error: {error}");
                    self.set_state(ConnectionState::Error);
                    let delay = {
                        let Ok(mut runtime) = self.runtime.lock() else {
                            break;
                        };
                        let delay = backoff_delay(runtime.reconnect_attempts);
                        runtime.reconnect_attempts =
                            runtime.reconnect_attempts.saturating_add(1);
                        runtime.backoff_seconds = delay.as_secs();
                        runtime.last_error = Some(truncate_message(&error, 300));
                        delay
                    };
                    tracing::debug!("reconnecting in {}s", delay.as_secs());

                    // Single-shot retry timer; stop cancels the wait.
                    tokio::select! {
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        if let Ok(mut runtime) = self.runtime.lock() {
            if runtime.stream_epoch != task_epoch {
                return;
            }
            runtime.stop_tx = None;
            runtime.backoff_seconds = 0;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn stream_once(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<(), String> {
        let endpoint = build_endpoint_url(&self.base_url, STREAM_PATH)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|error| format!("Failed to build HTTP client: {error}"))?;

        let mut request = client
            .get(&endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let cursor = self
            .runtime
            .lock()
            .ok()
            .and_then(|runtime| runtime.cursor.clone());
        if let Some(cursor) = cursor {
            request = request.header("Last-Event-ID", cursor);
        }

        let response = tokio::time::timeout(
            Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
            request.send(),
        )
        .await
        .map_err(|_| {
            format!("Stream connection timed out after {STREAM_CONNECT_TIMEOUT_SECS} seconds")
        })?
        .map_err(|error| format!("Stream connection failed: {error}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "Stream request failed with HTTP {}",
                response.status().as_u16()
            ));
        }

        tracing::debug!("stream connected");
        let now = unix_now_secs();
        if let Ok(mut runtime) = self.runtime.lock() {
            runtime.last_connected_at = Some(now);
            runtime.last_event_at = Some(now);
            runtime.last_error = None;
            runtime.backoff_seconds = 0;
            // Successful open restarts the backoff schedule from the base.
            runtime.reconnect_attempts = 0;
        }
        self.set_state(ConnectionState::Connected);

        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut idle_interval =
            tokio::time::interval(Duration::from_secs(STREAM_IDLE_CHECK_INTERVAL_SECS));
        idle_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        idle_interval.tick().await;
        let mut last_activity_at = now;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
                incoming = byte_stream.next() => {
                    match incoming {
                        Some(Ok(chunk)) => {
                            let event_now = unix_now_secs();
                            last_activity_at = event_now;
                            if let Ok(mut runtime) = self.runtime.lock() {
                                runtime.last_event_at = Some(event_now);
                            }
                            for event in decoder.push(&chunk) {
                                self.handle_event(event).await;
                            }
                        }
                        Some(Err(error)) => return Err(format!("Stream read error: {error}")),
                        None => return Err("Stream ended unexpectedly".to_string()),
                    }
                }
                _ = idle_interval.tick() => {
                    let idle_for = unix_now_secs().saturating_sub(last_activity_at);
                    if idle_for >= STREAM_IDLE_TIMEOUT_SECS {
                        return Err(format!("Stream idle timeout after {idle_for}s"));
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: SseEvent) {
        if let Some(id) = &event.id {
            if let Ok(mut runtime) = self.runtime.lock() {
                runtime.cursor = Some(id.clone());
            }
            let id = id.clone();
            if let Err(error) = self
                .store
                .update(move |state| state.last_news_id = Some(id))
                .await
            {
                tracing::debug!("failed to persist stream cursor: {error}");
            }
        }

        if event.event != NEWS_LIST_EVENT {
            tracing::debug!("ignoring stream event {:?}", event.event);
            return;
        }

        let snapshot = match parse_snapshot(&event.data) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                // Bad payload drops this event only; the stream lives on.
                tracing::warn!("{error}");
                return;
            }
        };

        let changed = {
            let Ok(mut runtime) = self.runtime.lock() else {
                return;
            };
            let changed = has_updates(
                runtime.snapshot.as_deref().unwrap_or(&[]),
                &snapshot,
            );
            // The pushed list is authoritative, changed or not.
            runtime.snapshot = Some(snapshot.clone());
            changed
        };

        if changed {
            self.dispatcher.check_for_new_news(&snapshot).await;
        }
        self.notify_snapshot_listeners(&snapshot);
    }

    fn notify_snapshot_listeners(&self, snapshot: &[NewsItem]) {
        let listeners: Vec<SnapshotListener> = match self.listeners.lock() {
            Ok(set) => set.snapshot.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut runtime) = self.runtime.lock() {
            runtime.state = next;
        }
        tracing::debug!("connection state: {next}");

        let listeners: Vec<ConnectionListener> = match self.listeners.lock() {
            Ok(set) => set.connection.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(next);
        }
    }
}
