use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;

use crate::config::Settings;
use crate::db::Db;
use crate::error::AppError;
use crate::models::{Account, AuthChallenge};
use crate::tiktok::client::{TIKTOK_AUTHORIZE_URL, TikTokClient};

const SINK_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// `draft` -> basic-user + video-upload; `direct` -> + video-publish.
pub fn scopes_for_mode(mode: &str) -> &'static str {
    match mode {
        "direct" => "user.info.basic,video.upload,video.publish",
        _ => "user.info.basic,video.upload",
    }
}

pub async fn ensure_tables(db: &Db) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS tg2tt;")
        .execute(db)
        .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tg2tt.accounts (
            id BIGSERIAL PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            open_id TEXT,
            access_token TEXT,
            refresh_token TEXT,
            expires_at TIMESTAMPTZ,
            granted_scopes TEXT,
            posting_mode TEXT NOT NULL DEFAULT 'draft',
            needs_reauth BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(db)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tg2tt.auth_challenges (
            id BIGSERIAL PRIMARY KEY,
            token TEXT NOT NULL UNIQUE,
            account_label TEXT NOT NULL,
            mode TEXT NOT NULL,
            used BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(db)
    .await?;
    Ok(())
}

fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Validates mode and client key, persists an AuthChallenge, and returns
/// the provider authorization URL with `state` set to its opaque token.
pub async fn build_authorization_url(
    db: &Db,
    settings: &Settings,
    account_label: &str,
    mode: &str,
) -> Result<String, AppError> {
    if mode != "draft" && mode != "direct" {
        return Err(AppError::Validation("mode must be draft or direct".into()));
    }
    let account_label = account_label.trim();
    if account_label.is_empty() {
        return Err(AppError::Validation("account_label is required".into()));
    }
    if settings.tiktok.client_key.is_empty() {
        return Err(AppError::Configuration("tiktok client key is not configured".into()));
    }

    let token = generate_token();
    sqlx::query(
        "INSERT INTO tg2tt.auth_challenges (token, account_label, mode, used) VALUES ($1, $2, $3, false)",
    )
    .bind(&token)
    .bind(account_label)
    .bind(mode)
    .execute(db)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_key", &settings.tiktok.client_key)
        .append_pair("response_type", "code")
        .append_pair("scope", scopes_for_mode(mode))
        .append_pair("redirect_uri", &settings.tiktok.redirect_uri)
        .append_pair("state", &token)
        .finish();

    Ok(format!("{TIKTOK_AUTHORIZE_URL}?{query}"))
}

/// Executes the OAuth callback: looks up the unused challenge by state,
/// exchanges the code, upserts the Account, and marks the challenge used.
/// Steps 4-5 of the token lifecycle commit atomically in one transaction.
pub async fn handle_callback(db: &Db, settings: &Settings, code: &str, state: &str) -> Result<Account, AppError> {
    let challenge = sqlx::query_as::<_, AuthChallenge>(
        "SELECT id, token, account_label, mode, used, created_at FROM tg2tt.auth_challenges
         WHERE token = $1 AND used = false",
    )
    .bind(state)
    .fetch_optional(db)
    .await
    .map_err(|e| AppError::Internal(e.into()))?
    .ok_or_else(|| AppError::Validation("invalid or already used OAuth state".into()))?;

    if settings.tiktok.client_secret.is_empty() {
        return Err(AppError::Configuration("tiktok client secret is not configured".into()));
    }

    let client = TikTokClient::new(SINK_HTTP_TIMEOUT).map_err(|e| AppError::Upstream(anyhow!(e.to_string())))?;
    let token_data = client
        .exchange_code_for_token(
            &settings.tiktok.client_key,
            &settings.tiktok.client_secret,
            code,
            &settings.tiktok.redirect_uri,
        )
        .await
        .map_err(|e| AppError::Upstream(anyhow!(e.to_string())))?;

    let access_token = token_data
        .get("access_token")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let refresh_token = token_data
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    if access_token.is_empty() || refresh_token.is_empty() {
        return Err(AppError::Upstream(anyhow!(
            "OAuth token response does not contain access_token/refresh_token"
        )));
    }

    let open_id = token_data
        .get("open_id")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let expires_in = token_data.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
    let granted_scopes = match token_data.get("scope").or_else(|| token_data.get("granted_scopes")) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(","),
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let expires_at = Utc::now() + ChronoDuration::seconds(expires_in.max(60));

    let mut tx = db.begin().await.map_err(|e| AppError::Internal(e.into()))?;

    let account = sqlx::query_as::<_, Account>(
        "INSERT INTO tg2tt.accounts (label, open_id, access_token, refresh_token, expires_at, granted_scopes, posting_mode, needs_reauth)
         VALUES ($1, $2, $3, $4, $5, $6, $7, false)
         ON CONFLICT (label) DO UPDATE SET
            open_id = EXCLUDED.open_id,
            access_token = EXCLUDED.access_token,
            refresh_token = EXCLUDED.refresh_token,
            expires_at = EXCLUDED.expires_at,
            granted_scopes = EXCLUDED.granted_scopes,
            posting_mode = EXCLUDED.posting_mode,
            needs_reauth = false,
            updated_at = now()
         RETURNING id, label, open_id, access_token, refresh_token, expires_at, granted_scopes, posting_mode, needs_reauth, created_at, updated_at",
    )
    .bind(&challenge.account_label)
    .bind(open_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .bind(granted_scopes)
    .bind(&challenge.mode)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    sqlx::query("UPDATE tg2tt.auth_challenges SET used = true WHERE id = $1")
        .bind(challenge.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    tx.commit().await.map_err(|e| AppError::Internal(e.into()))?;
    Ok(account)
}

/// Ensures a valid access credential, refreshing it if needed. Never
/// returns a credential whose expiry is within 90s of now.
pub async fn ensure_valid_token(db: &Db, settings: &Settings, account: &Account) -> Result<String> {
    if account.needs_reauth {
        bail!("account {} requires re-auth", account.label);
    }
    let Some(access_token) = account.access_token.clone() else {
        bail!("account {} has no access_token", account.label);
    };

    if let Some(expires_at) = account.expires_at {
        if expires_at > Utc::now() + ChronoDuration::seconds(90) {
            return Ok(access_token);
        }
    }

    let Some(refresh_token) = account.refresh_token.clone() else {
        mark_needs_reauth(db, &account.label).await?;
        bail!("account {} has no refresh_token", account.label);
    };

    let client = TikTokClient::new(SINK_HTTP_TIMEOUT)?;
    let refreshed = client
        .refresh_access_token(&settings.tiktok.client_key, &settings.tiktok.client_secret, &refresh_token)
        .await;

    let token_data = match refreshed {
        Ok(data) => data,
        Err(e) => {
            mark_needs_reauth(db, &account.label).await?;
            tracing::error!(account_label = %account.label, error = %e, "refresh_token_failed");
            bail!("refresh failed for account {}: {e}", account.label);
        }
    };

    let new_access = token_data
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(access_token);
    let new_refresh = token_data
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(refresh_token);
    let expires_in = token_data.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
    let new_expiry = Utc::now() + ChronoDuration::seconds(expires_in.max(60));

    sqlx::query(
        "UPDATE tg2tt.accounts SET access_token = $1, refresh_token = $2, expires_at = $3, needs_reauth = false, updated_at = now()
         WHERE label = $4",
    )
    .bind(&new_access)
    .bind(&new_refresh)
    .bind(new_expiry)
    .bind(&account.label)
    .execute(db)
    .await?;

    Ok(new_access)
}

async fn mark_needs_reauth(db: &Db, label: &str) -> Result<()> {
    sqlx::query("UPDATE tg2tt.accounts SET needs_reauth = true, updated_at = now() WHERE label = $1")
        .bind(label)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn get_account(db: &Db, label: &str) -> Result<Option<Account>> {
    let row = sqlx::query_as::<_, Account>(
        "SELECT id, label, open_id, access_token, refresh_token, expires_at, granted_scopes, posting_mode, needs_reauth, created_at, updated_at
         FROM tg2tt.accounts WHERE label = $1",
    )
    .bind(label)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn list_accounts(db: &Db) -> Result<Vec<Account>> {
    let rows = sqlx::query_as::<_, Account>(
        "SELECT id, label, open_id, access_token, refresh_token, expires_at, granted_scopes, posting_mode, needs_reauth, created_at, updated_at
         FROM tg2tt.accounts ORDER BY label ASC",
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_scope_excludes_publish() {
        assert_eq!(scopes_for_mode("draft"), "user.info.basic,video.upload");
    }

    #[test]
    fn direct_scope_includes_publish() {
        assert!(scopes_for_mode("direct").contains("video.publish"));
    }

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
