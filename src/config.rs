use serde::{Deserialize, Serialize};

use crate::consts::{
    AUDIO_ASSET_VOLUME, DEDUP_WINDOW_SECS, DISPLAY_BODY_MAX_CHARS, DOM_SCAN_INTERVAL_SECS,
    REQUEST_PATH_MARKERS, STREAM_URL_MARKERS, TEXT_MESSAGE_MARKERS, TOAST_DURATION_SECS,
};

const MAX_DISPLAY_BODY_CHARS: usize = 400;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Display name of the signed-in user; messages whose author contains it
    /// are suppressed.
    pub current_user: Option<String>,
    /// Numeric partner/contact id of the signed-in user for exact
    /// own-message suppression.
    pub current_partner_id: Option<i64>,
    pub display_body_max_chars: usize,
    pub dom_scan_interval_secs: u64,
    pub dedup_window_secs: u64,
    pub toast_duration_secs: u64,
    pub audio_volume: f32,
    /// When set, synthesized `generated-` ids participate in dedup like any
    /// supplied id. Off by default: a message with no identifier is
    /// re-announced rather than silently dropped.
    pub dedup_generated_ids: bool,
    pub request_path_markers: Vec<String>,
    pub stream_url_markers: Vec<String>,
    pub text_message_markers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            current_user: None,
            current_partner_id: None,
            display_body_max_chars: DISPLAY_BODY_MAX_CHARS,
            dom_scan_interval_secs: DOM_SCAN_INTERVAL_SECS,
            dedup_window_secs: DEDUP_WINDOW_SECS,
            toast_duration_secs: TOAST_DURATION_SECS,
            audio_volume: AUDIO_ASSET_VOLUME,
            dedup_generated_ids: false,
            request_path_markers: REQUEST_PATH_MARKERS.iter().map(|m| m.to_string()).collect(),
            stream_url_markers: STREAM_URL_MARKERS.iter().map(|m| m.to_string()).collect(),
            text_message_markers: TEXT_MESSAGE_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    /// Clamp values a host could misconfigure into something unusable.
    pub(crate) fn normalized(mut self) -> Self {
        self.display_body_max_chars = self.display_body_max_chars.clamp(1, MAX_DISPLAY_BODY_CHARS);
        self.dom_scan_interval_secs = self.dom_scan_interval_secs.max(1);
        self.dedup_window_secs = self.dedup_window_secs.max(1);
        self.toast_duration_secs = self.toast_duration_secs.max(1);
        self.audio_volume = self.audio_volume.clamp(0.0, 1.0);
        self
    }

    pub(crate) fn request_url_matches(&self, url: &str) -> bool {
        self.request_path_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()))
    }

    pub(crate) fn stream_url_matches(&self, url: &str) -> bool {
        self.stream_url_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()))
    }

    pub(crate) fn text_mentions_messages(&self, text: &str) -> bool {
        self.text_message_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }
}
