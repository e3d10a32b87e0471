use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::truncate_message;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub(crate) struct Coordinates {
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
}

/// One news entry as held by the client. `id` is the stable identity across
/// snapshots; change detection compares `title`, `content` and
/// `date_of_creation` only.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct NewsItem {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) coordinates: Option<Coordinates>,
    pub(crate) date_of_creation: DateTime<Utc>,
}

pub(crate) type NewsSnapshot = Vec<NewsItem>;

/// Server-side item shape, decoded leniently: the stream must survive items
/// with missing or malformed fields, so everything is optional here and
/// validated in `into_item`.
#[derive(Debug, Deserialize)]
pub(crate) struct NewsItemWire {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) coordinates: Option<Coordinates>,
    #[serde(default)]
    pub(crate) date_of_creation: Option<String>,
}

impl NewsItemWire {
    /// Items without a usable `id` or `date_of_creation` are not news the
    /// dedup layer can account for; they are dropped, never notified.
    pub(crate) fn into_item(self) -> Option<NewsItem> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        let raw_date = self.date_of_creation?;
        let date_of_creation = DateTime::parse_from_rfc3339(raw_date.trim())
            .ok()?
            .with_timezone(&Utc);
        Some(NewsItem {
            id,
            title: self.title,
            content: self.content,
            coordinates: self.coordinates,
            date_of_creation,
        })
    }
}

/// Decode a `news-list` payload. The payload itself failing to parse is an
/// error (the whole event is dropped); individual malformed items are skipped.
pub(crate) fn parse_snapshot(payload: &str) -> Result<NewsSnapshot, String> {
    let wire: Vec<NewsItemWire> = serde_json::from_str(payload).map_err(|error| {
        format!(
            "Failed to decode news list: {error} payload={}",
            truncate_message(payload, 140)
        )
    })?;

    let total = wire.len();
    let items: NewsSnapshot = wire.into_iter().filter_map(NewsItemWire::into_item).collect();
    if items.len() < total {
        tracing::debug!("dropped {} malformed news items", total - items.len());
    }
    Ok(items)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Error => "Error",
        };
        f.write_str(label)
    }
}
