use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use crate::captions::build_caption;
use crate::config::Settings;
use crate::db::Db;
use crate::materializer;
use crate::models::ContentKind;
use crate::ratelimit::RateLimiter;
use crate::store;
use crate::telegram::aggregator::AlbumAggregator;
use crate::telegram::client::TelegramClient;
use crate::telegram::parser::{ParsedKind, parse_update};
use crate::tiktok::{oauth, publisher};

/// Applies the allow-list, then either buffers the message into its album
/// (returning `None`, nothing to enqueue yet) or creates a standalone
/// ContentItem and returns its id for immediate enqueue.
pub async fn ingest_update(db: &Db, settings: &Settings, aggregator: &AlbumAggregator, update: &Value) -> Result<Option<i64>> {
    let Some(parsed) = parse_update(update) else {
        return Ok(None);
    };

    let allowed = settings.telegram.allowed_chat_ids();
    if !allowed.is_empty() && !allowed.contains(&parsed.source_chat_id) {
        tracing::info!(event = "chat_not_allowed_skip", chat_id = parsed.source_chat_id);
        return Ok(None);
    }

    let raw_message = update
        .get("channel_post")
        .or_else(|| update.get("message"))
        .cloned()
        .unwrap_or(Value::Null);

    if parsed.album_id.is_some() {
        aggregator.add(db, &parsed, &raw_message).await?;
        return Ok(None);
    }

    let kind = match parsed.kind {
        ParsedKind::Video => "video",
        ParsedKind::Photo => "photo",
    };
    let item = store::create_content_item(
        db,
        kind,
        parsed.source_chat_id,
        Some(parsed.message_id),
        None,
        &parsed.caption,
        &parsed.text,
        &[parsed.file_handle],
        update,
    )
    .await?;
    Ok(Some(item.id))
}

/// Runs one album-flush sweep and creates a ContentItem per due bundle.
/// Returns the ids ready for enqueue.
pub async fn flush_due_media_groups_once(db: &Db, aggregator: &AlbumAggregator) -> Result<Vec<i64>> {
    let bundles = aggregator.flush_due(db, Utc::now()).await?;
    if bundles.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let min_message_id = bundle.source_message_ids.iter().copied().min();
        let raw_update = serde_json::json!({
            "album_id": bundle.album_id,
            "source_message_ids": bundle.source_message_ids,
        });
        let item = store::create_content_item(
            db,
            "album",
            bundle.source_chat_id,
            min_message_id,
            Some(&bundle.album_id),
            &bundle.caption,
            &bundle.source_text,
            &bundle.file_handles,
            &raw_update,
        )
        .await?;
        ids.push(item.id);
    }
    Ok(ids)
}

/// Processes one ContentItem end to end: materialize, build caption,
/// resolve target accounts, deliver to each, mark processed.
pub async fn process_content_item(
    db: &Db,
    settings: &Settings,
    tg: &TelegramClient,
    rate_limiter: &RateLimiter,
    content_item_id: i64,
) -> Result<()> {
    let Some(item) = store::get_content_item(db, content_item_id).await? else {
        return Ok(());
    };

    let media_root = Path::new(&settings.storage.media_storage_path);
    let local_files = match materializer::materialize(
        db,
        tg,
        media_root,
        item.id,
        item.kind(),
        &item.file_handles(),
        &item.local_paths(),
    )
    .await
    {
        Ok(paths) => paths,
        Err(e) => {
            tracing::error!(error = ?e, content_item_id = item.id, event = "telegram_download_failed");
            mark_all_deliveries_failed(db, &settings.telegram.chat_account_mapping(), &item, &format!("Telegram download failed: {e}"))
                .await?;
            return Ok(());
        }
    };

    let caption = build_caption(&item.caption, &item.source_text, settings);
    let mapping = settings.telegram.chat_account_mapping();
    let accounts = store::resolve_target_accounts(db, item.source_chat_id, &mapping).await?;
    if accounts.is_empty() {
        tracing::warn!(event = "no_target_accounts", content_item_id = item.id);
        return Ok(());
    }

    let source_key = item.source_key();
    for account_label in &accounts {
        deliver_to_account(db, settings, rate_limiter, item.id, item.kind(), &source_key, account_label, &caption, &local_files)
            .await?;
    }

    store::mark_processed(db, item.id).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn deliver_to_account(
    db: &Db,
    settings: &Settings,
    rate_limiter: &RateLimiter,
    content_item_id: i64,
    kind: ContentKind,
    source_key: &str,
    account_label: &str,
    caption: &str,
    local_files: &[String],
) -> Result<()> {
    let delivery = store::find_or_create_delivery(db, content_item_id, source_key, account_label).await?;
    if delivery.is_sent() {
        return Ok(());
    }

    rate_limiter.wait(account_label).await;

    let outcome = deliver_once(db, settings, content_item_id, kind, account_label, caption, local_files).await;
    match outcome {
        Ok(post_id) => {
            store::mark_delivery_sent(db, delivery.id, post_id.as_deref()).await?;
        }
        Err(e) => {
            tracing::error!(error = ?e, content_item_id, account_label, event = "delivery_failed");
            store::mark_delivery_failed(db, delivery.id, &e.to_string()).await?;
        }
    }
    Ok(())
}

async fn deliver_once(
    db: &Db,
    settings: &Settings,
    content_item_id: i64,
    kind: ContentKind,
    account_label: &str,
    caption: &str,
    local_files: &[String],
) -> Result<Option<String>> {
    let account = oauth::get_account(db, account_label)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown tiktok account: {account_label}"))?;
    let access_token = oauth::ensure_valid_token(db, settings, &account).await?;
    let requested_mode = if account.posting_mode.is_empty() {
        settings.publishing.posting_mode.clone()
    } else {
        account.posting_mode.clone()
    };

    let outcome = publisher::publish(
        settings,
        &access_token,
        kind,
        content_item_id,
        local_files,
        caption,
        &requested_mode,
    )
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    Ok(outcome.post_id.or(outcome.publish_id))
}

async fn mark_all_deliveries_failed(
    db: &Db,
    mapping: &std::collections::HashMap<i64, Vec<String>>,
    item: &crate::models::ContentItemRow,
    error_text: &str,
) -> Result<()> {
    let accounts = store::resolve_target_accounts(db, item.source_chat_id, mapping).await?;
    let source_key = item.source_key();
    for account_label in accounts {
        let delivery = store::find_or_create_delivery(db, item.id, &source_key, &account_label).await?;
        store::mark_delivery_failed(db, delivery.id, error_text).await?;
    }
    Ok(())
}
