use serde_json::Value;
use thiserror::Error;

const MARKERS: &[&str] = &[
    "unsupported",
    "not support",
    "permission",
    "scope",
    "forbidden",
    "insufficient",
    "not authorized",
    "not available",
];

/// Tagged classification of a TikTok API failure, built at construction
/// time from the HTTP status and payload rather than re-sniffed at every
/// call site.
#[derive(Debug, Error)]
pub enum TikTokApiError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TikTokApiError {
    /// Constructs the appropriately tagged variant from an HTTP status and
    /// decoded payload, following the precedence: explicit 403/404 status,
    /// then marker text in the message or payload.
    pub fn from_response(status: u16, message: impl Into<String>, payload: &Value) -> Self {
        let message = message.into();
        if matches!(status, 403 | 404) {
            return TikTokApiError::PermissionDenied(message);
        }
        let haystack = format!("{} {}", message.to_lowercase(), payload.to_string().to_lowercase());
        if MARKERS.iter().any(|m| haystack.contains(m)) {
            return TikTokApiError::Unsupported(message);
        }
        TikTokApiError::Http { status, message }
    }

    pub fn api_error(message: impl Into<String>, payload: &Value) -> Self {
        let message = message.into();
        let haystack = format!("{} {}", message.to_lowercase(), payload.to_string().to_lowercase());
        if MARKERS.iter().any(|m| haystack.contains(m)) {
            return TikTokApiError::Unsupported(message);
        }
        TikTokApiError::Http { status: 0, message }
    }

    /// True when a fallback path (mode downgrade, transcode) should trigger.
    pub fn is_permission_or_unsupported(&self) -> bool {
        matches!(
            self,
            TikTokApiError::PermissionDenied(_) | TikTokApiError::Unsupported(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_403_as_permission_denied() {
        let err = TikTokApiError::from_response(403, "nope", &json!({}));
        assert!(err.is_permission_or_unsupported());
        assert!(matches!(err, TikTokApiError::PermissionDenied(_)));
    }

    #[test]
    fn classifies_marker_text_as_unsupported() {
        let err = TikTokApiError::from_response(400, "scope insufficient", &json!({}));
        assert!(err.is_permission_or_unsupported());
    }

    #[test]
    fn classifies_marker_in_payload() {
        let err = TikTokApiError::from_response(400, "bad request", &json!({"error": "forbidden"}));
        assert!(err.is_permission_or_unsupported());
    }

    #[test]
    fn plain_http_error_is_not_fallback_eligible() {
        let err = TikTokApiError::from_response(500, "server error", &json!({}));
        assert!(!err.is_permission_or_unsupported());
    }
}
