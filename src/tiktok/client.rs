use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};

use crate::tiktok::error::TikTokApiError;

pub const TIKTOK_OPEN_API_BASE: &str = "https://open.tiktokapis.com";
pub const TIKTOK_AUTHORIZE_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";

const OAUTH_TOKEN_ENDPOINT: &str = "/v2/oauth/token/";
const USER_INFO_ENDPOINT: &str = "/v2/user/info/";
const VIDEO_INIT_ENDPOINT: &str = "/v2/post/publish/video/init/";
const VIDEO_FINALIZE_ENDPOINT: &str = "/v2/post/publish/video/publish/";
const PHOTO_INIT_ENDPOINT: &str = "/v2/post/publish/content/init/";
const PHOTO_FINALIZE_ENDPOINT: &str = "/v2/post/publish/content/publish/";

pub struct TikTokClient {
    http: Client,
}

impl TikTokClient {
    pub fn new(timeout: Duration) -> Result<Self, TikTokApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TikTokApiError::Network(e.to_string()))?;
        Ok(Self { http })
    }

    pub async fn exchange_code_for_token(
        &self,
        client_key: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Value, TikTokApiError> {
        let form = [
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        let payload = self.request_form(OAUTH_TOKEN_ENDPOINT, &form).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn refresh_access_token(
        &self,
        client_key: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<Value, TikTokApiError> {
        let form = [
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let payload = self.request_form(OAUTH_TOKEN_ENDPOINT, &form).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn get_user_info(&self, access_token: &str) -> Result<Value, TikTokApiError> {
        let body = json!({"fields": ["open_id", "union_id", "display_name"]});
        let payload = self.request_json(USER_INFO_ENDPOINT, Some(access_token), &body).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn init_video_upload(
        &self,
        access_token: &str,
        caption: &str,
        mode: &str,
        video_size_bytes: u64,
    ) -> Result<Value, TikTokApiError> {
        let body = json!({
            "post_mode": mode,
            "post_info": {"title": caption},
            "source_info": {"source": "FILE_UPLOAD", "video_size": video_size_bytes},
        });
        let payload = self.request_json(VIDEO_INIT_ENDPOINT, Some(access_token), &body).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn finalize_video(
        &self,
        access_token: &str,
        publish_id: Option<&str>,
        caption: &str,
        mode: &str,
    ) -> Result<Value, TikTokApiError> {
        let Some(publish_id) = publish_id else {
            return Ok(json!({}));
        };
        let body = json!({"publish_id": publish_id, "post_mode": mode, "post_info": {"title": caption}});
        let payload = self.request_json(VIDEO_FINALIZE_ENDPOINT, Some(access_token), &body).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn init_photo_upload(
        &self,
        access_token: &str,
        caption: &str,
        mode: &str,
        media_count: usize,
    ) -> Result<Value, TikTokApiError> {
        let body = json!({
            "post_mode": mode,
            "post_info": {"title": caption},
            "source_info": {"source": "FILE_UPLOAD", "media_count": media_count, "media_type": "PHOTO"},
        });
        let payload = self.request_json(PHOTO_INIT_ENDPOINT, Some(access_token), &body).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn finalize_photo_upload(
        &self,
        access_token: &str,
        publish_id: Option<&str>,
        caption: &str,
        mode: &str,
    ) -> Result<Value, TikTokApiError> {
        let Some(publish_id) = publish_id else {
            return Ok(json!({}));
        };
        let body = json!({"publish_id": publish_id, "post_mode": mode, "post_info": {"title": caption}});
        let payload = self.request_json(PHOTO_FINALIZE_ENDPOINT, Some(access_token), &body).await?;
        Ok(unwrap_data(payload))
    }

    pub async fn upload_binary(&self, upload_url: &str, path: &Path, content_type: &str) -> Result<(), TikTokApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TikTokApiError::Network(e.to_string()))?;
        let response = self
            .http
            .put(upload_url)
            .timeout(Duration::from_secs(300))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| TikTokApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        if status >= 400 {
            let payload = safe_json(response).await;
            return Err(TikTokApiError::from_response(status, format!("binary upload failed: HTTP {status}"), &payload));
        }
        Ok(())
    }

    async fn request_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, TikTokApiError> {
        let url = build_url(path);
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| TikTokApiError::Network(e.to_string()))?;
        self.finish(response).await
    }

    async fn request_json(&self, path: &str, access_token: Option<&str>, body: &Value) -> Result<Value, TikTokApiError> {
        let url = build_url(path);
        let mut req = self.http.post(url).json(body);
        if let Some(token) = access_token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await.map_err(|e| TikTokApiError::Network(e.to_string()))?;
        self.finish(response).await
    }

    async fn finish(&self, response: reqwest::Response) -> Result<Value, TikTokApiError> {
        let status = response.status().as_u16();
        let payload = safe_json(response).await;
        if status >= 400 {
            return Err(TikTokApiError::from_response(status, format!("TikTok API HTTP {status}"), &payload));
        }
        raise_if_api_error(&payload)?;
        Ok(payload)
    }
}

fn build_url(path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{TIKTOK_OPEN_API_BASE}{path}")
    }
}

fn unwrap_data(payload: Value) -> Value {
    match payload.get("data") {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => payload,
    }
}

fn raise_if_api_error(payload: &Value) -> Result<(), TikTokApiError> {
    if let Some(error) = payload.get("error") {
        if !error.is_null() {
            return Err(TikTokApiError::api_error(format!("TikTok API error: {error}"), payload));
        }
    }
    if let Some(code) = payload.get("error_code") {
        let is_zero = matches!(code, Value::Number(n) if n.as_i64() == Some(0))
            || matches!(code, Value::String(s) if s == "0");
        if !code.is_null() && !is_zero {
            return Err(TikTokApiError::api_error(format!("TikTok API error_code={code}"), payload));
        }
    }
    Ok(())
}

async fn safe_json(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or_else(|_| json!({"raw": text}))
}

/// Extracts `upload_url`: scalar, else first non-empty of `upload_urls`,
/// else recurse into nested `source_info`.
pub fn extract_upload_url(data: &Value) -> Option<String> {
    if let Some(s) = to_string_opt(data.get("upload_url")) {
        return Some(s);
    }
    if let Some(Value::Array(items)) = data.get("upload_urls") {
        for item in items {
            if let Some(s) = to_string_opt(Some(item)) {
                return Some(s);
            }
        }
    }
    if let Some(source_info) = data.get("source_info").filter(|v| v.is_object()) {
        return extract_upload_url(source_info);
    }
    None
}

/// All upload URLs in the same precedence order, used by the
/// photo/carousel path which needs one per image.
pub fn extract_upload_urls(data: &Value) -> Vec<String> {
    let mut values = Vec::new();
    if let Some(Value::Array(items)) = data.get("upload_urls") {
        for item in items {
            if let Some(s) = to_string_opt(Some(item)) {
                values.push(s);
            }
        }
    }
    if let Some(s) = to_string_opt(data.get("upload_url")) {
        values.push(s);
    }
    if let Some(source_info) = data.get("source_info").filter(|v| v.is_object()) {
        values.extend(extract_upload_urls(source_info));
    }
    values
}

pub fn extract_publish_id_video(data: &Value) -> Option<String> {
    to_string_opt(data.get("publish_id"))
        .or_else(|| to_string_opt(data.get("video_id")))
        .or_else(|| to_string_opt(data.get("creation_id")))
}

pub fn extract_publish_id_photo(data: &Value) -> Option<String> {
    to_string_opt(data.get("publish_id"))
        .or_else(|| to_string_opt(data.get("creation_id")))
        .or_else(|| to_string_opt(data.get("item_id")))
}

fn to_string_opt(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        }
        Some(other) if !other.is_null() => {
            let s = other.to_string().trim().to_string();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_scalar_upload_url() {
        let data = json!({"upload_url": "https://x/1"});
        assert_eq!(extract_upload_url(&data).as_deref(), Some("https://x/1"));
    }

    #[test]
    fn extracts_first_non_empty_from_upload_urls_list() {
        let data = json!({"upload_urls": ["", "https://x/2"]});
        assert_eq!(extract_upload_url(&data).as_deref(), Some("https://x/2"));
    }

    #[test]
    fn recurses_into_source_info() {
        let data = json!({"source_info": {"upload_url": "https://x/3"}});
        assert_eq!(extract_upload_url(&data).as_deref(), Some("https://x/3"));
    }

    #[test]
    fn publish_id_falls_back_to_video_id_then_creation_id() {
        let data = json!({"video_id": "v1"});
        assert_eq!(extract_publish_id_video(&data).as_deref(), Some("v1"));
    }
}
