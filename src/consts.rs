pub(crate) const STREAM_PATH: &str = "/news/stream";
pub(crate) const LATEST_NEWS_PATH: &str = "/news/latest";
pub(crate) const REGISTER_DEVICE_PATH: &str = "/notifications/register-device";

pub(crate) const NEWS_LIST_EVENT: &str = "news-list";

pub(crate) const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_IDLE_CHECK_INTERVAL_SECS: u64 = 15;
pub(crate) const STREAM_IDLE_TIMEOUT_SECS: u64 = 90;

pub(crate) const RECONNECT_BASE_DELAY_SECS: u64 = 5;
pub(crate) const RECONNECT_MAX_DELAY_SECS: u64 = 60;
/// Exponent clamp: delays stop doubling after `base * 2^4`.
pub(crate) const RECONNECT_MAX_EXPONENT: u32 = 4;

pub(crate) const POLL_REQUEST_TIMEOUT_SECS: u64 = 15;
pub(crate) const REGISTER_REQUEST_TIMEOUT_SECS: u64 = 15;

pub(crate) const DIAGNOSTICS_LOG_INTERVAL_SECS: u64 = 60;

/// How often the daemon re-reads settings to notice a rotated push token.
pub(crate) const PUSH_TOKEN_RECHECK_INTERVAL_SECS: u64 = 300;

pub(crate) const NOTIFICATION_BODY_MAX_CHARS: usize = 220;

/// Being away longer than this gets one reminder notification on the next start.
pub(crate) const AWAY_REMINDER_AFTER_SECS: u64 = 3 * 24 * 60 * 60;

pub(crate) const SETTINGS_FILE_NAME: &str = "settings.json";
pub(crate) const STATE_FILE_NAME: &str = "state.json";
pub(crate) const BADGE_FILE_NAME: &str = "badge";
