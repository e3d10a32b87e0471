use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Monotonic counter for generating unique temp/backup file suffixes.
static FILE_SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn ensure_data_dir(data_dir: &Path) -> Result<(), String> {
    fs::create_dir_all(data_dir)
        .map_err(|error| format!("Failed to create data directory {data_dir:?}: {error}"))
}

pub(crate) fn settings_file(data_dir: &Path) -> PathBuf {
    data_dir.join(crate::SETTINGS_FILE_NAME)
}

pub(crate) fn state_file(data_dir: &Path) -> PathBuf {
    data_dir.join(crate::STATE_FILE_NAME)
}

pub(crate) fn badge_file(data_dir: &Path) -> PathBuf {
    data_dir.join(crate::BADGE_FILE_NAME)
}

pub(crate) fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if path.exists() {
            if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                tracing::debug!("restrict_file_permissions: failed for {path:?}: {error}");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Serialize `value` and atomically replace `path` with it. Readers in other
/// processes (the poll task) never observe a torn file.
pub(crate) fn persist_json_to_path<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|error| format!("Failed to serialize {path:?}: {error}"))?;
    atomic_replace(path, content.as_bytes())
}

pub(crate) fn atomic_replace(path: &Path, content: &[u8]) -> Result<(), String> {
    let tmp_path = path.with_extension(format!("tmp-{}", unique_time_suffix()));
    fs::write(&tmp_path, content)
        .map_err(|error| format!("Failed to write temp file for {path:?}: {error}"))?;
    restrict_file_permissions(&tmp_path);
    fs::rename(&tmp_path, path)
        .map_err(|error| format!("Failed to atomically replace {path:?}: {error}"))
}

/// Move an unparseable file aside so the next write starts fresh while the
/// broken content stays available for inspection.
pub(crate) fn quarantine_corrupt_file(path: &Path) {
    let backup_path = path.with_extension(format!("corrupt-{}.json", unique_time_suffix()));
    if let Err(error) = fs::rename(path, &backup_path) {
        tracing::warn!("failed to back up corrupt file {path:?}: {error}");
    } else {
        tracing::warn!("moved corrupt file to {}", backup_path.to_string_lossy());
    }
}

pub(crate) fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn unique_time_suffix() -> u64 {
    FILE_SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed)
}
