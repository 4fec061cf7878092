use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::AppContext;
use crate::orchestrator;
use crate::telegram::client::TelegramClient;

const SHUTDOWN_SENTINEL: i64 = -1;
const SOURCE_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// The consumer+flusher pair, addressed as an owned value with explicit
/// `start`/`stop` rather than a module-level singleton. One consumer task
/// mutates Delivery rows; the flusher only enqueues ids.
pub struct WorkerRuntime {
    ctx: Arc<AppContext>,
    sender: mpsc::UnboundedSender<i64>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<i64>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(ctx: Arc<AppContext>) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            ctx,
            sender,
            receiver: Mutex::new(Some(receiver)),
            consumer: Mutex::new(None),
            flusher: Mutex::new(None),
        })
    }

    /// Places one ContentItem id on the queue for the consumer to pick up.
    pub async fn enqueue(&self, content_item_id: i64) {
        let _ = self.sender.send(content_item_id);
    }

    /// Starts the consumer and flusher tasks. A second call while already
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut consumer_guard = self.consumer.lock().await;
        if consumer_guard.is_some() {
            return;
        }
        let Some(receiver) = self.receiver.lock().await.take() else {
            return;
        };
        *consumer_guard = Some(tokio::spawn(consume_loop(self.ctx.clone(), receiver)));
        drop(consumer_guard);

        let mut flusher_guard = self.flusher.lock().await;
        *flusher_guard = Some(tokio::spawn(flush_loop(self.clone())));
    }

    /// Cancels the flusher, posts the shutdown sentinel, and awaits the
    /// consumer so that an in-flight publish completes rather than being
    /// torn down mid-delivery.
    pub async fn stop(&self) {
        if let Some(handle) = self.flusher.lock().await.take() {
            handle.abort();
        }
        let _ = self.sender.send(SHUTDOWN_SENTINEL);
        if let Some(handle) = self.consumer.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn consume_loop(ctx: Arc<AppContext>, mut receiver: mpsc::UnboundedReceiver<i64>) {
    let tg = match TelegramClient::new(&ctx.settings.telegram.bot_token, SOURCE_HTTP_TIMEOUT) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = ?e, event = "telegram_client_init_failed");
            return;
        }
    };

    while let Some(content_item_id) = receiver.recv().await {
        if content_item_id == SHUTDOWN_SENTINEL {
            return;
        }
        let outcome = orchestrator::process_content_item(
            &ctx.db,
            &ctx.settings,
            &tg,
            &ctx.rate_limiter(),
            content_item_id,
        )
        .await;
        if let Err(e) = outcome {
            tracing::error!(error = ?e, content_item_id, event = "content_processing_failed");
        }
    }
}

async fn flush_loop(runtime: Arc<WorkerRuntime>) {
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        interval.tick().await;
        let flushed =
            orchestrator::flush_due_media_groups_once(&runtime.ctx.db, &runtime.ctx.album_aggregator()).await;
        match flushed {
            Ok(ids) => {
                if !ids.is_empty() {
                    tracing::info!(event = "media_group_flush_completed", count = ids.len());
                }
                for id in ids {
                    runtime.enqueue(id).await;
                }
            }
            Err(e) => tracing::error!(error = ?e, event = "media_group_flush_failed"),
        }
    }
}
