use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{persist_json_to_path, quarantine_corrupt_file, restrict_file_permissions};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub(crate) struct StoredSettings {
    pub(crate) base_url: String,
    pub(crate) token: Option<String>,
    /// Push token handed out by the messaging gateway for this install.
    /// Absent until the gateway (or the operator) provides one.
    pub(crate) push_token: Option<String>,
}

impl StoredSettings {
    pub(crate) fn token_trimmed(&self) -> Option<String> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

pub(crate) fn read_settings(data_dir: &Path) -> Result<StoredSettings, String> {
    let path = crate::settings_file(data_dir);
    if !path.exists() {
        return Ok(StoredSettings::default());
    }

    let content =
        fs::read_to_string(&path).map_err(|error| format!("Failed to read settings: {error}"))?;
    match serde_json::from_str::<StoredSettings>(&content) {
        Ok(settings) => Ok(settings),
        Err(error) => {
            tracing::warn!("settings parse failed, starting fresh: {error}");
            quarantine_corrupt_file(&path);
            Ok(StoredSettings::default())
        }
    }
}

pub(crate) fn save_settings(data_dir: &Path, settings: &StoredSettings) -> Result<(), String> {
    let path = crate::settings_file(data_dir);
    persist_json_to_path(&path, settings)?;
    restrict_file_permissions(&path);
    Ok(())
}

pub(crate) fn normalize_base_url(input: &str) -> Result<String, String> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("Server URL is required".to_string());
    }

    let url =
        reqwest::Url::parse(trimmed).map_err(|error| format!("Invalid server URL: {error}"))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err("Server URL must start with http:// or https://".to_string());
    }

    Ok(trimmed.to_string())
}

/// Join an endpoint path onto the normalized base URL.
pub(crate) fn build_endpoint_url(base_url: &str, endpoint_path: &str) -> Result<String, String> {
    let mut url =
        reqwest::Url::parse(base_url).map_err(|error| format!("Invalid server URL: {error}"))?;

    let mut path = url.path().trim_end_matches('/').to_string();
    path.push_str(endpoint_path);
    url.set_path(&path);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = read_settings(dir.path()).expect("read");
        assert!(settings.base_url.is_empty());
        assert!(settings.token.is_none());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StoredSettings {
            base_url: "https://campus.example.edu".to_string(),
            token: Some("secret".to_string()),
            push_token: None,
        };
        save_settings(dir.path(), &settings).expect("save");
        let loaded = read_settings(dir.path()).expect("read");
        assert_eq!(loaded.base_url, settings.base_url);
        assert_eq!(loaded.token.as_deref(), Some("secret"));
    }

    #[test]
    fn corrupt_settings_are_quarantined() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = crate::settings_file(dir.path());
        fs::write(&path, "{{{{").expect("write corrupt");
        let settings = read_settings(dir.path()).expect("read");
        assert!(settings.base_url.is_empty());
        // Original file was moved aside, not deleted.
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|name| name.contains("corrupt")));
    }

    #[test]
    fn normalize_rejects_bad_urls() {
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("ftp://campus.example.edu").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://campus.example.edu/ ").expect("normalize"),
            "https://campus.example.edu"
        );
    }

    #[test]
    fn endpoint_urls_join_cleanly() {
        assert_eq!(
            build_endpoint_url("https://campus.example.edu", "/news/stream").expect("join"),
            "https://campus.example.edu/news/stream"
        );
        assert_eq!(
            build_endpoint_url("https://campus.example.edu/api/", "/news/latest").expect("join"),
            "https://campus.example.edu/api/news/latest"
        );
    }

    #[test]
    fn blank_token_reads_as_absent() {
        let settings = StoredSettings {
            base_url: String::new(),
            token: Some("   ".to_string()),
            push_token: None,
        };
        assert!(settings.token_trimmed().is_none());
    }
}
