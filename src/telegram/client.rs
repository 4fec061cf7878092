use std::time::Duration;

use anyhow::{Result, bail};
use reqwest::Client;
use serde_json::Value;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const GET_UPDATES_METHOD: &str = "getUpdates";
const GET_FILE_METHOD: &str = "getFile";
const SET_WEBHOOK_METHOD: &str = "setWebhook";

/// Thin client over the Telegram Bot API. Every call returns a typed API
/// error when the payload lacks `ok: true` or the HTTP status is >= 400.
pub struct TelegramClient {
    http: Client,
    base_url: String,
    file_base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{TELEGRAM_API_BASE}/bot{bot_token}"),
            file_base_url: format!("{TELEGRAM_API_BASE}/file/bot{bot_token}"),
        })
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32) -> Result<Vec<Value>> {
        let mut params = vec![("timeout", timeout_secs.to_string())];
        if let Some(offset) = offset {
            params.push(("offset", offset.to_string()));
        }
        let payload = self.call(GET_UPDATES_METHOD, &params).await?;
        Ok(payload
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Value> {
        let payload = self.call(GET_FILE_METHOD, &[("file_id", file_id.to_string())]).await?;
        match payload.get("result") {
            Some(result) if result.is_object() => Ok(result.clone()),
            _ => bail!("Telegram getFile returned malformed payload"),
        }
    }

    pub async fn download(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.file_base_url, file_path);
        let response = self.http.get(&url).send().await?;
        if response.status().as_u16() >= 400 {
            bail!("Telegram file download failed: HTTP {}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<Value> {
        let mut params = vec![("url", url.to_string())];
        if let Some(secret) = secret_token {
            params.push(("secret_token", secret.to_string()));
        }
        self.call(SET_WEBHOOK_METHOD, &params).await
    }

    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self.http.post(&url).query(params).send().await?;
        let status = response.status();
        let data = safe_json(response).await;
        if status.as_u16() >= 400 {
            bail!("Telegram API error HTTP {status}: {data}");
        }
        if !data.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            bail!("Telegram API returned ok=false: {data}");
        }
        Ok(data)
    }
}

async fn safe_json(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(v @ Value::Object(_)) => v,
        _ => serde_json::json!({"raw": text}),
    }
}
