use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tg2tiktok_bridge::{
    AppContext,
    config::{
        Aggregator, App, Captions, Database, Logging, Publishing, RateLimit, Server, Settings,
        Storage, Telegram, TikTok,
    },
};

fn settings() -> Settings {
    Settings {
        env: "test".into(),
        app: App {
            name: "test".into(),
            base_url: "http://localhost".into(),
        },
        telegram: Telegram {
            bot_token: "".into(),
            webhook_secret: "".into(),
            use_webhook: true,
            allowed_chat_ids: "".into(),
            to_tiktok_mapping_json: "".into(),
            polling_timeout_seconds: 30,
            polling_interval_seconds: 1.0,
        },
        tiktok: TikTok {
            client_key: "".into(),
            client_secret: "".into(),
            redirect_uri: "".into(),
        },
        publishing: Publishing {
            posting_mode: "draft".into(),
            fallback_to_draft: true,
            enable_photo_api: false,
        },
        captions: Captions {
            append_hashtags: "".into(),
            caption_template: "{text}".into(),
            caption_max_length: 2200,
        },
        storage: Storage {
            media_storage_path: "./data/media".into(),
        },
        aggregator: Aggregator {
            media_group_flush_seconds: 3,
            slide_seconds: 2,
            slideshow_fps: 30,
        },
        rate_limit: RateLimit { per_minute: 6 },
        database: Database {
            url: "postgres://localhost:1/test?connect_timeout=1".into(),
            max_connections: Some(1),
        },
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

/// Start is idempotent, and stop drains the consumer by sentinel rather
/// than leaving it dangling.
#[tokio::test]
async fn start_is_idempotent_and_stop_drains_cleanly() {
    let ctx = ctx();
    let worker = ctx.with_worker();

    worker.start().await;
    worker.start().await; // second call must not spawn a second consumer

    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.stop().await;
}

/// Enqueuing after shutdown should not panic; the sender simply has no
/// live receiver left to deliver to.
#[tokio::test]
async fn enqueue_after_stop_does_not_panic() {
    let ctx = ctx();
    let worker = ctx.with_worker();
    worker.start().await;
    worker.stop().await;
    worker.enqueue(42).await;
}
