use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::AppContext;
use crate::orchestrator;
use crate::telegram::client::TelegramClient;

const SOURCE_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Long-poll ingress: repeatedly calls `getUpdates` with an advancing
/// offset and feeds each update through the same ingest path the webhook
/// handler uses. Runs until the process is killed; a per-poll failure is
/// logged and retried after a short backoff rather than ending the loop.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let tg = TelegramClient::new(
        &ctx.settings.telegram.bot_token,
        SOURCE_HTTP_TIMEOUT,
    )?;
    let mut offset: Option<i64> = None;

    tracing::info!(event = "telegram_polling_started");

    loop {
        let updates = match tg
            .get_updates(offset, ctx.settings.telegram.polling_timeout_seconds)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!(error = ?e, event = "telegram_poll_failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        for update in &updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                offset = Some(update_id + 1);
            }
            if let Err(e) = ingest(&ctx, update).await {
                tracing::error!(error = ?e, event = "telegram_ingest_failed");
            }
        }

        tokio::time::sleep(Duration::from_secs_f64(ctx.settings.telegram.polling_interval_seconds.max(0.0))).await;
    }
}

async fn ingest(ctx: &Arc<AppContext>, update: &Value) -> Result<()> {
    if let Some(content_item_id) =
        orchestrator::ingest_update(&ctx.db, &ctx.settings, &ctx.album_aggregator(), update).await?
    {
        ctx.worker().enqueue(content_item_id).await;
    }
    Ok(())
}
