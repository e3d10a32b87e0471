mod consts;
mod core;
mod diagnostics;
mod diff;
mod dispatch;
mod model;
mod notify;
mod offline;
mod poll;
mod registration;
mod settings;
mod sse;
mod store;
mod stream;

pub(crate) use self::consts::*;
pub(crate) use self::core::*;
pub(crate) use self::diagnostics::snapshot_runtime;
pub(crate) use self::diff::has_updates;
pub(crate) use self::dispatch::NotificationDispatcher;
pub(crate) use self::model::{
    parse_snapshot, ConnectionState, NewsItem, NewsItemWire, NewsSnapshot,
};
pub(crate) use self::notify::{BadgeSurface, DesktopNotifier, FileBadge, LocalNotifier};
pub(crate) use self::registration::{DeviceRegistrar, SettingsPushGateway};
pub(crate) use self::settings::{
    build_endpoint_url, normalize_base_url, read_settings, save_settings, StoredSettings,
};
pub(crate) use self::sse::{SseDecoder, SseEvent};
pub(crate) use self::store::StateStore;
pub(crate) use self::stream::NewsStreamClient;

use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "uninews-desktop", about = "Live campus news notifier")]
struct CliArgs {
    /// Directory holding settings.json, state.json and the badge file.
    #[clap(long, default_value = ".uninews")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Keep the live stream open and notify on news (default).
    Run,
    /// One-shot fetch for OS schedulers; exits quietly on any failure.
    Poll,
    /// Reset the unread badge after the news list has been viewed.
    ClearBadge,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match args.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => run_daemon(&args.data_dir).await,
        CliCommand::Poll => {
            run_poll(&args.data_dir).await;
            Ok(())
        }
        CliCommand::ClearBadge => run_clear_badge(&args.data_dir).await,
    };

    if let Err(error) = result {
        tracing::error!("{error}");
        std::process::exit(1);
    }
}

async fn run_daemon(data_dir: &Path) -> Result<(), String> {
    let settings = read_settings(data_dir)?;
    if settings.base_url.trim().is_empty() && !settings_file(data_dir).exists() {
        // First run: drop a template for the operator to fill in.
        ensure_data_dir(data_dir)?;
        save_settings(data_dir, &settings)?;
    }
    let base_url = normalize_base_url(&settings.base_url).map_err(|error| {
        format!(
            "{error} (set base_url in {})",
            settings_file(data_dir).to_string_lossy()
        )
    })?;
    let store = Arc::new(StateStore::open(data_dir)?);

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&store),
        Box::new(DesktopNotifier),
        Box::new(FileBadge::new(data_dir)),
    ));
    match dispatcher.badge_count().await {
        Ok(count) => tracing::info!("unread badge at startup: {count}"),
        Err(error) => tracing::warn!("failed to read badge: {error}"),
    }

    offline::check_away_reminder(&store, &dispatcher).await;

    let registrar = Arc::new(DeviceRegistrar::new(
        base_url.clone(),
        settings.token_trimmed(),
        Arc::clone(&store),
        Box::new(SettingsPushGateway::new(settings.push_token.clone())),
    )?);
    match registrar.initialize().await {
        Ok(phase) => tracing::info!("push registration: {phase:?}"),
        Err(error) => tracing::warn!("push registration incomplete: {error}"),
    }

    // The desktop stand-in for an async token-refresh callback: notice a
    // rotated push token in settings and re-register without a restart.
    let refresh_registrar = Arc::clone(&registrar);
    let refresh_store = Arc::clone(&store);
    let refresh_dir = data_dir.to_path_buf();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(PUSH_TOKEN_RECHECK_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            let settings = match read_settings(&refresh_dir) {
                Ok(settings) => settings,
                Err(error) => {
                    tracing::debug!("push token recheck skipped: {error}");
                    continue;
                }
            };
            let Some(token) = settings.push_token else {
                continue;
            };
            if refresh_store.read().await.push_token.as_deref() == Some(token.as_str()) {
                continue;
            }
            if let Err(error) = refresh_registrar.handle_token_refresh(&token).await {
                tracing::warn!("push token refresh failed: {error}");
            }
        }
    });

    let initial_cursor = store.read().await.last_news_id;
    let client = NewsStreamClient::new(
        base_url,
        settings.token_trimmed(),
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        initial_cursor,
    );
    let connection_log_token =
        client.add_connection_listener(|state| tracing::info!("stream {state}"));
    let snapshot_log_token = client.add_snapshot_listener(|snapshot| {
        tracing::debug!("news list now has {} items", snapshot.len());
    });
    client.connect()?;

    let diagnostics_client = Arc::clone(&client);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(DIAGNOSTICS_LOG_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            match snapshot_runtime(&diagnostics_client) {
                Ok(diag) => {
                    let rendered = serde_json::to_string(&diag).unwrap_or_default();
                    tracing::debug!("stream diagnostics: {rendered}");
                }
                Err(error) => tracing::debug!("failed to snapshot stream runtime: {error}"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| format!("Failed to listen for shutdown signal: {error}"))?;
    tracing::info!("shutting down");
    // Stop logging transitions before teardown flips the state around.
    client.remove_connection_listener(connection_log_token);
    client.remove_snapshot_listener(snapshot_log_token);
    if client.connection_state() != ConnectionState::Disconnected {
        client.close();
    }
    offline::record_shutdown(&store).await;
    Ok(())
}

/// Scheduler entry point: must always look successful from the outside, so
/// even setup failures only get logged here.
async fn run_poll(data_dir: &Path) {
    let settings = match read_settings(data_dir) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!("background poll skipped: {error}");
            return;
        }
    };
    let store = match StateStore::open(data_dir) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            tracing::warn!("background poll skipped: {error}");
            return;
        }
    };

    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&store),
        Box::new(DesktopNotifier),
        Box::new(FileBadge::new(data_dir)),
    );
    poll::run_once(&settings, &store, &dispatcher).await;
}

async fn run_clear_badge(data_dir: &Path) -> Result<(), String> {
    let store = Arc::new(StateStore::open(data_dir)?);
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&store),
        Box::new(DesktopNotifier),
        Box::new(FileBadge::new(data_dir)),
    );
    dispatcher.reset_badge().await?;
    tracing::info!("badge cleared");
    Ok(())
}
