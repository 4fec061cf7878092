use std::sync::Arc;

use anyhow::Result;
use tg2tiktok_bridge::{AppContext, config::Settings, telegram::polling};

/// Long-poll-mode entrypoint: starts the worker runtime and drives
/// ingestion via `getUpdates` instead of a webhook. No HTTP surface is
/// exposed in this mode.
#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;
    let result = polling::run(ctx.clone()).await;
    ctx.shutdown().await;
    result
}
