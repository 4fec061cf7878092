use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKind {
    Video,
    Photo,
}

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub source_chat_id: i64,
    pub message_id: i64,
    pub album_id: Option<String>,
    pub kind: ParsedKind,
    pub file_handle: String,
    pub caption: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// channel_post variant first, then message variant, else reject.
fn extract_message(update: &Value) -> Option<&Value> {
    update
        .get("channel_post")
        .or_else(|| update.get("message"))
}

/// Parses a raw Telegram update into a typed record, or `None` to reject.
pub fn parse_update(update: &Value) -> Option<ParsedMessage> {
    let message = extract_message(update)?;
    parse_message(message)
}

fn parse_message(message: &Value) -> Option<ParsedMessage> {
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;

    let caption = safe_text(message.get("caption"));
    let text = safe_text(message.get("text"));
    let album_id = {
        let s = safe_text(message.get("media_group_id"));
        (!s.is_empty()).then_some(s)
    };
    let created_at = parse_created_at(message.get("date"));

    if let Some(video) = message.get("video").filter(|v| v.is_object()) {
        let file_id = safe_text(video.get("file_id"));
        if !file_id.is_empty() {
            return Some(ParsedMessage {
                source_chat_id: chat_id,
                message_id,
                album_id,
                kind: ParsedKind::Video,
                file_handle: file_id,
                caption,
                text,
                created_at,
            });
        }
    }

    if let Some(document) = message.get("document").filter(|v| v.is_object()) {
        let mime = safe_text(document.get("mime_type")).to_lowercase();
        let file_id = safe_text(document.get("file_id"));
        if !file_id.is_empty() && mime.starts_with("video/") {
            return Some(ParsedMessage {
                source_chat_id: chat_id,
                message_id,
                album_id,
                kind: ParsedKind::Video,
                file_handle: file_id,
                caption,
                text,
                created_at,
            });
        }
    }

    if let Some(Value::Array(sizes)) = message.get("photo") {
        if !sizes.is_empty() {
            if let Some(best) = pick_largest_photo(sizes) {
                let file_id = safe_text(best.get("file_id"));
                if !file_id.is_empty() {
                    return Some(ParsedMessage {
                        source_chat_id: chat_id,
                        message_id,
                        album_id,
                        kind: ParsedKind::Photo,
                        file_handle: file_id,
                        caption,
                        text,
                        created_at,
                    });
                }
            }
        }
    }

    None
}

fn pick_largest_photo(sizes: &[Value]) -> Option<&Value> {
    sizes.iter().max_by_key(|item| {
        let size = item.get("file_size").and_then(Value::as_i64).unwrap_or(0);
        let width = item.get("width").and_then(Value::as_i64).unwrap_or(0);
        let height = item.get("height").and_then(Value::as_i64).unwrap_or(0);
        (size, width * height)
    })
}

fn parse_created_at(raw: Option<&Value>) -> DateTime<Utc> {
    if let Some(v) = raw {
        if let Some(secs) = v.as_i64() {
            if let chrono::offset::LocalResult::Single(dt) = Utc.timestamp_opt(secs, 0) {
                return dt;
            }
        }
    }
    Utc::now()
}

fn safe_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_update_without_message_or_channel_post() {
        assert!(parse_update(&json!({"update_id": 1})).is_none());
    }

    #[test]
    fn prefers_channel_post_over_message() {
        let update = json!({
            "channel_post": {
                "chat": {"id": -100},
                "message_id": 1,
                "video": {"file_id": "v1"},
            },
            "message": {
                "chat": {"id": -200},
                "message_id": 2,
                "video": {"file_id": "v2"},
            },
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.source_chat_id, -100);
        assert_eq!(parsed.file_handle, "v1");
    }

    #[test]
    fn rejects_without_integer_chat_or_message_id() {
        let update = json!({"message": {"chat": {}, "video": {"file_id": "v1"}}});
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn detects_video_attachment() {
        let update = json!({
            "message": {
                "chat": {"id": -100}, "message_id": 5,
                "video": {"file_id": "v1"},
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.kind, ParsedKind::Video);
        assert_eq!(parsed.file_handle, "v1");
    }

    #[test]
    fn detects_video_mime_document_before_photo() {
        let update = json!({
            "message": {
                "chat": {"id": -100}, "message_id": 5,
                "document": {"file_id": "d1", "mime_type": "video/mp4"},
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.kind, ParsedKind::Video);
        assert_eq!(parsed.file_handle, "d1");
    }

    #[test]
    fn ignores_non_video_document() {
        let update = json!({
            "message": {
                "chat": {"id": -100}, "message_id": 5,
                "document": {"file_id": "d1", "mime_type": "application/pdf"},
            }
        });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn picks_largest_photo_by_size_then_area() {
        let update = json!({
            "message": {
                "chat": {"id": -100}, "message_id": 5,
                "photo": [
                    {"file_id": "small", "file_size": 100, "width": 10, "height": 10},
                    {"file_id": "big", "file_size": 500, "width": 20, "height": 20},
                    {"file_id": "tied_size_small_area", "file_size": 500, "width": 5, "height": 5},
                ],
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.kind, ParsedKind::Photo);
        assert_eq!(parsed.file_handle, "big");
    }

    #[test]
    fn carries_album_id_verbatim() {
        let update = json!({
            "message": {
                "chat": {"id": -100}, "message_id": 5,
                "media_group_id": "g1",
                "video": {"file_id": "v1"},
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.album_id.as_deref(), Some("g1"));
    }

    #[test]
    fn falls_back_to_now_on_missing_timestamp() {
        let update = json!({
            "message": {
                "chat": {"id": -100}, "message_id": 5,
                "video": {"file_id": "v1"},
            }
        });
        let before = Utc::now();
        let parsed = parse_update(&update).unwrap();
        assert!(parsed.created_at >= before);
    }
}
