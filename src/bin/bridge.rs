use std::sync::Arc;

use anyhow::Result;
use tg2tiktok_bridge::{AppContext, config::Settings, run};

/// Webhook-mode entrypoint: starts the worker runtime and the HTTP
/// ingress surface (`/tg/webhook/{secret}`, OAuth routes, admin listing).
#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;
    let result = run(ctx.clone()).await;
    ctx.shutdown().await;
    result
}
