pub(crate) const DISPLAY_BODY_MAX_CHARS: usize = 80;
pub(crate) const MAX_SCAN_DEPTH: usize = 32;

pub(crate) const DOM_SCAN_INTERVAL_SECS: u64 = 3;
pub(crate) const TEXT_SCAN_SETTLE_MS: u64 = 1000;
pub(crate) const DEDUP_WINDOW_SECS: u64 = 10;

pub(crate) const TOAST_DURATION_SECS: u64 = 6;
pub(crate) const DESKTOP_NOTE_CLOSE_SECS: u64 = 5;
pub(crate) const AUDIO_ASSET_VOLUME: f32 = 0.7;

pub(crate) const TONE_FREQUENCY_HZ: f32 = 800.0;
pub(crate) const TONE_GAIN: f32 = 0.3;
pub(crate) const TONE_DECAY_MS: u64 = 500;

pub(crate) const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

pub(crate) const GENERATED_ID_PREFIX: &str = "generated-";
pub(crate) const DOM_ID_PREFIX: &str = "dom-";
pub(crate) const UNKNOWN_AUTHOR: &str = "Unknown";
pub(crate) const FALLBACK_BODY: &str = "New message";
pub(crate) const CHANNEL_MODEL: &str = "mail.channel";
pub(crate) const CHANNEL_THREAD_FALLBACK: &str = "General Channel";
pub(crate) const DIRECT_THREAD_FALLBACK: &str = "Private Chat";

pub(crate) const BODY_KEYS: [&str; 4] = ["body", "message", "preview", "content"];

pub(crate) const REQUEST_PATH_MARKERS: [&str; 4] =
    ["/mail/", "/web/dataset/", "/discuss/", "/message/"];
pub(crate) const STREAM_URL_MARKERS: [&str; 2] = ["websocket", "longpolling"];
pub(crate) const TEXT_MESSAGE_MARKERS: [&str; 3] =
    ["o_Message", "mail_message", "message_content"];

pub(crate) const PAUSE_FOREVER_SENTINEL: u64 = 0;
