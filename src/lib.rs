pub mod captions;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod materializer;
pub mod models;
pub mod orchestrator;
pub mod ratelimit;
pub mod store;
pub mod telegram;
pub mod tiktok;
pub mod transcode;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;

use config::Settings;
use db::Db;
use ratelimit::RateLimiter;
use telegram::aggregator::AlbumAggregator;
use worker::WorkerRuntime;

/// Process-wide context: DB pool, configuration, and the services that
/// hang off it (rate limiter, album aggregator, worker runtime). The
/// worker is the only piece behind a `OnceCell` — it needs an `Arc<Self>`
/// to construct, so it cannot be built in the same step as `Self`.
pub struct AppContext {
    pub settings: Settings,
    pub db: Db,
    rate_limiter: Arc<RateLimiter>,
    album_aggregator: Arc<AlbumAggregator>,
    worker: OnceCell<Arc<WorkerRuntime>>,
}

impl AppContext {
    /// Bootstraps the whole service: logging, DB connect + migrate, media
    /// directory, then constructs and starts the worker runtime.
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        logging::init(&settings);

        let db = db::connect(&settings.database.url, settings.database.max_connections).await?;
        db::migrate(&db).await?;
        // Belt-and-suspenders alongside the migration: each module also
        // knows how to create its own tables, so a DB reachable but never
        // migrated (e.g. a fresh local Postgres) still works.
        store::ensure_tables(&db).await?;
        tiktok::oauth::ensure_tables(&db).await?;
        AlbumAggregator::ensure_tables(&db).await?;
        tokio::fs::create_dir_all(&settings.storage.media_storage_path).await?;

        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.per_minute));
        let album_aggregator = Arc::new(AlbumAggregator::new(settings.aggregator.media_group_flush_seconds));

        if settings.telegram.use_webhook {
            register_webhook(&settings).await;
        }

        let ctx = Arc::new(Self {
            settings,
            db,
            rate_limiter,
            album_aggregator,
            worker: OnceCell::new(),
        });

        let worker = WorkerRuntime::new(ctx.clone());
        worker.start().await;
        let _ = ctx.worker.set(worker);

        Ok(ctx)
    }

    /// A context for tests: no DB connection attempt, no worker started.
    pub fn new_testing(settings: Settings, db: Db) -> Arc<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.per_minute));
        let album_aggregator = Arc::new(AlbumAggregator::new(settings.aggregator.media_group_flush_seconds));
        Arc::new(Self {
            settings,
            db,
            rate_limiter,
            album_aggregator,
            worker: OnceCell::new(),
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    pub fn album_aggregator(&self) -> Arc<AlbumAggregator> {
        self.album_aggregator.clone()
    }

    pub fn worker(&self) -> Arc<WorkerRuntime> {
        self.worker.get().expect("worker runtime not initialized").clone()
    }

    /// Starts the worker runtime on a context built with `new_testing`,
    /// for tests that need delivery processing against a real queue.
    pub fn with_worker(self: &Arc<Self>) -> Arc<WorkerRuntime> {
        let w = WorkerRuntime::new(self.clone());
        let _ = self.worker.set(w.clone());
        w
    }

    pub async fn shutdown(&self) {
        if let Some(worker) = self.worker.get() {
            worker.stop().await;
        }
    }
}

/// Runs the HTTP ingress surface (webhook + OAuth + admin routes) until
/// the process is killed.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr: SocketAddr = ctx.settings.server.bind_addr.parse()?;
    http::serve(addr, ctx).await
}

/// Points Telegram at our webhook route, built from `app_base_url` and the
/// configured path secret. Best-effort: a bot token left unset (local dev,
/// long-poll mode) or a provider error is logged, not fatal at startup.
async fn register_webhook(settings: &Settings) {
    if settings.telegram.bot_token.is_empty() {
        return;
    }
    let url = format!(
        "{}/tg/webhook/{}",
        settings.app.base_url.trim_end_matches('/'),
        settings.telegram.webhook_secret
    );
    let client = match telegram::client::TelegramClient::new(&settings.telegram.bot_token, std::time::Duration::from_secs(60)) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = ?e, event = "telegram_client_init_failed");
            return;
        }
    };
    match client.set_webhook(&url, Some(&settings.telegram.webhook_secret)).await {
        Ok(_) => tracing::info!(event = "telegram_webhook_registered", url = %url),
        Err(e) => tracing::warn!(error = ?e, event = "telegram_webhook_registration_failed"),
    }
}
