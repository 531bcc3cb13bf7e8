use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::consts::{
    BODY_KEYS, CHANNEL_MODEL, CHANNEL_THREAD_FALLBACK, DIRECT_THREAD_FALLBACK, DOM_ID_PREFIX,
    FALLBACK_BODY, GENERATED_ID_PREFIX, MAX_SCAN_DEPTH, UNKNOWN_AUTHOR,
};
use crate::model::{NormalizedMessage, RenderedMessage};

/// Walks a freshly deserialized payload depth-first and returns every
/// plausible message it contains. A map node qualifies when any body-like key
/// holds a string; a qualifying node's subtree is not re-entered, but sibling
/// branches are still walked since batch responses carry several messages.
pub(crate) fn extract_all(payload: &Value, config: &EngineConfig) -> Vec<NormalizedMessage> {
    let mut found = Vec::new();
    walk(payload, 0, config, &mut found);
    found
}

fn walk(value: &Value, depth: usize, config: &EngineConfig, found: &mut Vec<NormalizedMessage>) {
    if depth >= MAX_SCAN_DEPTH {
        log::warn!("payload scan stopped at depth {depth}");
        return;
    }

    match value {
        Value::Object(map) => {
            if is_message_candidate(map) {
                if let Some(message) = extract_candidate(map, config) {
                    found.push(message);
                }
                return;
            }
            for child in map.values() {
                walk(child, depth.saturating_add(1), config, found);
            }
        }
        Value::Array(items) => {
            for child in items {
                walk(child, depth.saturating_add(1), config, found);
            }
        }
        _ => {}
    }
}

fn is_message_candidate(map: &Map<String, Value>) -> bool {
    BODY_KEYS
        .iter()
        .any(|key| matches!(map.get(*key), Some(Value::String(_))))
}

/// Resolves one candidate map into a normalized message. Yields `None` for
/// unattributable messages and for the session user's own messages; those are
/// hard filters, not a dedup concern.
fn extract_candidate(
    map: &Map<String, Value>,
    config: &EngineConfig,
) -> Option<NormalizedMessage> {
    let author = resolve_author(map);
    if author.trim().is_empty() || author == UNKNOWN_AUTHOR {
        return None;
    }

    let message = NormalizedMessage {
        id: resolve_id(map),
        author,
        body: clean_body(&resolve_body(map), config),
        thread: resolve_thread(map),
        author_ref: resolve_author_ref(map),
    };

    if is_own_message(&message, config) {
        log::debug!("skipping own message id={}", message.id);
        return None;
    }
    Some(message)
}

fn resolve_author(map: &Map<String, Value>) -> String {
    relation_pair_name(map.get("author_id"))
        .or_else(|| {
            map.get("author")
                .and_then(|author| author.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|name| !name.trim().is_empty())
        })
        .or_else(|| string_field(map, "author_name"))
        .or_else(|| relation_pair_name(map.get("partner_id")))
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
}

fn resolve_author_ref(map: &Map<String, Value>) -> Option<i64> {
    match map.get("author_id") {
        Some(Value::Array(pair)) => pair.first().and_then(Value::as_i64),
        Some(Value::Number(id)) => id.as_i64(),
        _ => None,
    }
}

fn resolve_body(map: &Map<String, Value>) -> String {
    BODY_KEYS
        .iter()
        .find_map(|key| string_field(map, key))
        .unwrap_or_else(|| FALLBACK_BODY.to_string())
}

fn resolve_thread(map: &Map<String, Value>) -> String {
    string_field(map, "record_name")
        .or_else(|| relation_pair_name(map.get("channel_id")))
        .or_else(|| string_field(map, "thread_name"))
        .unwrap_or_else(|| {
            if map.get("model").and_then(Value::as_str) == Some(CHANNEL_MODEL) {
                CHANNEL_THREAD_FALLBACK.to_string()
            } else {
                DIRECT_THREAD_FALLBACK.to_string()
            }
        })
}

fn resolve_id(map: &Map<String, Value>) -> String {
    match map.get("id") {
        Some(Value::Number(id)) => id.to_string(),
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        _ => generated_id(),
    }
}

fn generated_id() -> String {
    format!("{GENERATED_ID_PREFIX}{}", chrono::Utc::now().timestamp_millis())
}

pub(crate) fn is_generated_id(id: &str) -> bool {
    id.starts_with(GENERATED_ID_PREFIX)
}

/// A `[id, "Display Name"]` relation pair, as search-read payloads encode
/// many-to-one fields.
fn relation_pair_name(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Array(pair)) => pair
            .get(1)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty()),
        _ => None,
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|text| !text.is_empty())
}

pub(crate) fn is_own_message(message: &NormalizedMessage, config: &EngineConfig) -> bool {
    if let (Some(partner_id), Some(author_ref)) = (config.current_partner_id, message.author_ref) {
        if partner_id == author_ref {
            return true;
        }
    }
    match config.current_user.as_deref() {
        Some(user) if !user.is_empty() => message.author.contains(user),
        _ => false,
    }
}

/// Markup strip plus display truncation, in that order.
pub(crate) fn clean_body(raw: &str, config: &EngineConfig) -> String {
    truncate_display(&strip_markup(raw), config.display_body_max_chars)
}

pub(crate) fn strip_markup(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return input.to_string();
    }
    let fragment = scraper::Html::parse_fragment(input);
    fragment.root_element().text().collect::<String>()
}

pub(crate) fn truncate_display(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// The DOM fallback path: rendered text is already field-shaped, so this
/// applies the same cleaning and rejection rules without the payload walk.
pub(crate) fn normalize_rendered(
    rendered: &RenderedMessage,
    config: &EngineConfig,
) -> Option<NormalizedMessage> {
    let author = rendered.author.trim();
    if author.is_empty() || author == UNKNOWN_AUTHOR {
        return None;
    }

    let thread = rendered.thread.trim();
    let message = NormalizedMessage {
        id: format!("{DOM_ID_PREFIX}{}", rendered.element_id),
        author: author.to_string(),
        body: clean_body(&rendered.body, config),
        thread: if thread.is_empty() {
            CHANNEL_THREAD_FALLBACK.to_string()
        } else {
            thread.to_string()
        },
        author_ref: None,
    };

    if is_own_message(&message, config) {
        return None;
    }
    Some(message)
}
