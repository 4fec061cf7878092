use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content a ContentItem carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Photo,
    Album,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Photo => "photo",
            ContentKind::Album => "album",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "video" => Some(ContentKind::Video),
            "photo" => Some(ContentKind::Photo),
            "album" => Some(ContentKind::Album),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub label: String,
    pub open_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_scopes: Option<String>,
    pub posting_mode: String,
    pub needs_reauth: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthChallenge {
    pub id: i64,
    pub token: String,
    pub account_label: String,
    pub mode: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContentItemRow {
    pub id: i64,
    pub kind: String,
    pub source_chat_id: i64,
    pub source_message_id: Option<i64>,
    pub album_id: Option<String>,
    pub caption: String,
    pub source_text: String,
    pub file_handles_json: String,
    pub local_paths_json: String,
    pub raw_update_json: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ContentItemRow {
    pub fn file_handles(&self) -> Vec<String> {
        read_json_string_list(&self.file_handles_json)
    }

    pub fn local_paths(&self) -> Vec<String> {
        read_json_string_list(&self.local_paths_json)
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::from_str(&self.kind).unwrap_or(ContentKind::Video)
    }

    /// Deterministic identifier of the originating post, shared by every
    /// Delivery fanned out from this ContentItem.
    pub fn source_key(&self) -> String {
        source_key(
            self.source_chat_id,
            self.album_id.as_deref(),
            self.source_message_id,
            self.id,
        )
    }
}

/// `group:<chat>:<album>` if an album id is present, else
/// `msg:<chat>:<msg>` if a message id is present, else `content:<id>`.
pub fn source_key(chat_id: i64, album_id: Option<&str>, message_id: Option<i64>, content_id: i64) -> String {
    if let Some(album) = album_id {
        return format!("group:{chat_id}:{album}");
    }
    if let Some(msg) = message_id {
        return format!("msg:{chat_id}:{msg}");
    }
    format!("content:{content_id}")
}

fn read_json_string_list(raw: &str) -> Vec<String> {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => {
                let s = s.trim().to_string();
                (!s.is_empty()).then_some(s)
            }
            other => {
                let s = other.to_string();
                (!s.is_empty()).then_some(s)
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryRow {
    pub id: i64,
    pub content_item_id: i64,
    pub source_key: String,
    pub account_label: String,
    pub status: String,
    pub error_text: Option<String>,
    pub post_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRow {
    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_prefers_album() {
        assert_eq!(source_key(-100, Some("g1"), Some(5), 9), "group:-100:g1");
    }

    #[test]
    fn source_key_falls_back_to_message() {
        assert_eq!(source_key(-100, None, Some(5), 9), "msg:-100:5");
    }

    #[test]
    fn source_key_falls_back_to_content_id() {
        assert_eq!(source_key(-100, None, None, 9), "content:9");
    }
}
