use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;

use crate::AppContext;
use crate::orchestrator;
use crate::tiktok::oauth;
use crate::error::AppError;

/// Ingress surface: webhook intake, OAuth start/callback, the account
/// admin listing, and a health probe. Plain
/// `Router::new().route(...).with_state(...)`, `TcpListener::bind` +
/// `axum::serve`.
pub async fn serve(addr: SocketAddr, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/tg/webhook/{secret}", post(telegram_webhook))
        .route("/tiktok/auth/start", get(tiktok_auth_start))
        .route("/tiktok/auth/callback", get(tiktok_auth_callback))
        .route("/admin/tiktok/accounts", get(list_tiktok_accounts))
        .with_state(ctx);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

/// Accepts a raw Telegram update; the path secret is compared in constant
/// time against the configured webhook secret.
async fn telegram_webhook(
    State(ctx): State<Arc<AppContext>>,
    Path(secret): Path<String>,
    Json(update): Json<Value>,
) -> impl IntoResponse {
    if !secret.as_bytes().ct_eq(ctx.settings.telegram.webhook_secret.as_bytes()).into() {
        return (StatusCode::FORBIDDEN, Json(json!({"ok": false}))).into_response();
    }

    match orchestrator::ingest_update(&ctx.db, &ctx.settings, &ctx.album_aggregator(), &update).await {
        Ok(Some(content_item_id)) => ctx.worker().enqueue(content_item_id).await,
        Ok(None) => {}
        Err(e) => tracing::error!(error = ?e, event = "webhook_ingest_failed"),
    }
    (StatusCode::OK, Json(json!({"ok": true}))).into_response()
}

#[derive(Debug, Deserialize)]
struct AuthStartQuery {
    account_label: String,
    mode: Option<String>,
}

async fn tiktok_auth_start(State(ctx): State<Arc<AppContext>>, Query(q): Query<AuthStartQuery>) -> impl IntoResponse {
    let mode = q.mode.unwrap_or_else(|| ctx.settings.publishing.posting_mode.clone());
    match oauth::build_authorization_url(&ctx.db, &ctx.settings, &q.account_label, &mode).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => app_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct AuthCallbackQuery {
    code: String,
    state: String,
}

#[derive(Debug, Serialize)]
struct AccountSummary {
    ok: bool,
    account_label: String,
    open_id: Option<String>,
    posting_mode: String,
    needs_reauth: bool,
    expires_at: Option<DateTime<Utc>>,
}

async fn tiktok_auth_callback(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<AuthCallbackQuery>,
) -> impl IntoResponse {
    match oauth::handle_callback(&ctx.db, &ctx.settings, &q.code, &q.state).await {
        Ok(account) => Json(AccountSummary {
            ok: true,
            account_label: account.label,
            open_id: account.open_id,
            posting_mode: account.posting_mode,
            needs_reauth: account.needs_reauth,
            expires_at: account.expires_at,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, event = "oauth_callback_error");
            app_error_response(e)
        }
    }
}

fn app_error_response(err: AppError) -> axum::response::Response {
    let status = err.status_code();
    (status, Json(json!({"ok": false, "error": err.to_string()}))).into_response()
}

#[derive(Debug, Serialize)]
struct AccountListItem {
    account_label: String,
    open_id: Option<String>,
    posting_mode: String,
    needs_reauth: bool,
    granted_scopes: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    token_present: bool,
}

async fn list_tiktok_accounts(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    match oauth::list_accounts(&ctx.db).await {
        Ok(accounts) => Json(
            accounts
                .into_iter()
                .map(|a| AccountListItem {
                    account_label: a.label,
                    open_id: a.open_id,
                    posting_mode: a.posting_mode,
                    needs_reauth: a.needs_reauth,
                    granted_scopes: a.granted_scopes,
                    expires_at: a.expires_at,
                    token_present: a.access_token.is_some(),
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => {
            tracing::error!(error = ?e, event = "list_accounts_failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Aggregator, App, Captions, Database, Logging, Publishing, RateLimit, Server, Settings,
        Storage, Telegram, TikTok,
    };
    use sqlx::postgres::PgPoolOptions;

    fn settings() -> Settings {
        Settings {
            env: "test".into(),
            app: App { name: "test".into(), base_url: "http://localhost".into() },
            telegram: Telegram {
                bot_token: "".into(),
                webhook_secret: "s3cr3t".into(),
                use_webhook: true,
                allowed_chat_ids: "".into(),
                to_tiktok_mapping_json: "".into(),
                polling_timeout_seconds: 30,
                polling_interval_seconds: 1.0,
            },
            tiktok: TikTok { client_key: "".into(), client_secret: "".into(), redirect_uri: "".into() },
            publishing: Publishing { posting_mode: "draft".into(), fallback_to_draft: true, enable_photo_api: false },
            captions: Captions { append_hashtags: "".into(), caption_template: "{text}".into(), caption_max_length: 2200 },
            storage: Storage { media_storage_path: "./data/media".into() },
            aggregator: Aggregator { media_group_flush_seconds: 3, slide_seconds: 2, slideshow_fps: 30 },
            rate_limit: RateLimit { per_minute: 6 },
            database: Database { url: "postgres://localhost:1/test?connect_timeout=1".into(), max_connections: Some(1) },
            logging: Logging { level: Some("error".into()) },
            server: Server { bind_addr: "127.0.0.1:0".into() },
        }
    }

    fn ctx() -> Arc<AppContext> {
        let db = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&settings().database.url)
            .unwrap();
        AppContext::new_testing(settings(), db)
    }

    #[tokio::test]
    async fn health_route_ok() {
        let ctx = ctx();
        let addr: SocketAddr = ([127, 0, 0, 1], 50451).into();
        let handle = tokio::spawn(serve(addr, ctx));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let res = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        handle.abort();
    }

    #[tokio::test]
    async fn webhook_rejects_wrong_secret() {
        let ctx = ctx();
        let addr: SocketAddr = ([127, 0, 0, 1], 50452).into();
        let handle = tokio::spawn(serve(addr, ctx));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let client = reqwest::Client::new();
        let res = client
            .post(format!("http://{addr}/tg/webhook/wrong"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        handle.abort();
    }
}
