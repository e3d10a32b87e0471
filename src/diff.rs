//! Snapshot comparison for the live news feed.

use std::collections::HashMap;

use crate::NewsItem;

/// Whether `next` carries anything worth reacting to relative to `previous`:
/// a first non-empty snapshot, a length change, an unknown id, or an item
/// whose `title`/`content`/`date_of_creation` changed. Removals are only
/// visible through the length check; the notification layer cares about new
/// or changed content, not absence.
pub(crate) fn has_updates(previous: &[NewsItem], next: &[NewsItem]) -> bool {
    if previous.is_empty() {
        return !next.is_empty();
    }
    if previous.len() != next.len() {
        return true;
    }

    let by_id: HashMap<&str, &NewsItem> = previous
        .iter()
        .map(|item| (item.id.as_str(), item))
        .collect();

    next.iter().any(|item| match by_id.get(item.id.as_str()) {
        None => true,
        Some(prev) => {
            prev.title != item.title
                || prev.content != item.content
                || prev.date_of_creation != item.date_of_creation
        }
    })
}
