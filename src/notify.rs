use std::{fs, path::PathBuf};

use crate::{atomic_replace, truncate_message, NOTIFICATION_BODY_MAX_CHARS};

/// Delivery seam for local notifications. The dispatcher only formats
/// title/body; what "showing a notification" means belongs to the platform.
pub(crate) trait LocalNotifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<(), String>;
}

/// Surface holding the OS-visible unread counter. Reads reconcile the
/// dispatcher's own count (the surface wins), writes mirror it back out.
pub(crate) trait BadgeSurface: Send + Sync {
    fn read(&self) -> Result<u32, String>;
    fn write(&self, count: u32) -> Result<(), String>;
}

pub(crate) struct DesktopNotifier;

impl LocalNotifier for DesktopNotifier {
    #[cfg(target_os = "macos")]
    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        use mac_notification_sys::Notification;

        ensure_macos_notification_application();
        let title = title.to_string();
        let body = truncate_message(body, NOTIFICATION_BODY_MAX_CHARS);
        std::thread::spawn(move || {
            let mut notification = Notification::new();
            notification
                .title(&title)
                .message(&body)
                .default_sound()
                .asynchronous(true);
            if let Err(error) = notification.send() {
                tracing::warn!("failed to show macOS notification: {error}");
            }
        });
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        tracing::info!(
            "notification: {} — {}",
            title,
            truncate_message(body, NOTIFICATION_BODY_MAX_CHARS)
        );
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn ensure_macos_notification_application() {
    static INIT_NOTIFICATION_APP: std::sync::Once = std::sync::Once::new();
    INIT_NOTIFICATION_APP.call_once(|| {
        for bundle_id in ["edu.uninews.desktop", "com.apple.Terminal", "com.apple.Finder"] {
            match mac_notification_sys::set_application(bundle_id) {
                Ok(_) => return,
                Err(error) => {
                    tracing::debug!(
                        "failed to set macOS notification bundle id {bundle_id}: {error}"
                    );
                }
            }
        }
    });
}

/// Badge counter kept in a plain integer file so shells, tray widgets and the
/// poll process all see the same value. The user clearing it externally is
/// expected; reads reconcile against whatever is there.
pub(crate) struct FileBadge {
    path: PathBuf,
}

impl FileBadge {
    pub(crate) fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: crate::badge_file(data_dir),
        }
    }
}

impl BadgeSurface for FileBadge {
    fn read(&self) -> Result<u32, String> {
        if !self.path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|error| format!("Failed to read badge file: {error}"))?;
        // A mangled counter reads as cleared, not as an error.
        Ok(raw.trim().parse::<u32>().unwrap_or(0))
    }

    fn write(&self, count: u32) -> Result<(), String> {
        atomic_replace(&self.path, count.to_string().as_bytes())
    }
}
