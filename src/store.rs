use anyhow::Result;
use chrono::Utc;
use sqlx::Row;

use crate::db::Db;
use crate::models::{ContentItemRow, DeliveryRow};

pub async fn ensure_tables(db: &Db) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS tg2tt;")
        .execute(db)
        .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tg2tt.content_items (
            id BIGSERIAL PRIMARY KEY,
            kind TEXT NOT NULL,
            source_chat_id BIGINT NOT NULL,
            source_message_id BIGINT,
            album_id TEXT,
            caption TEXT NOT NULL DEFAULT '',
            source_text TEXT NOT NULL DEFAULT '',
            file_handles_json TEXT NOT NULL DEFAULT '[]',
            local_paths_json TEXT NOT NULL DEFAULT '[]',
            raw_update_json TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            processed_at TIMESTAMPTZ
        )",
    )
    .execute(db)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tg2tt.deliveries (
            id BIGSERIAL PRIMARY KEY,
            content_item_id BIGINT NOT NULL,
            source_key TEXT NOT NULL,
            account_label TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error_text TEXT,
            post_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            CONSTRAINT uq_deliveries_source_account UNIQUE (source_key, account_label)
        )",
    )
    .execute(db)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn create_content_item(
    db: &Db,
    kind: &str,
    source_chat_id: i64,
    source_message_id: Option<i64>,
    album_id: Option<&str>,
    caption: &str,
    source_text: &str,
    file_handles: &[String],
    raw_update: &serde_json::Value,
) -> Result<ContentItemRow> {
    let file_handles_json = serde_json::to_string(file_handles)?;
    let row = sqlx::query_as::<_, ContentItemRow>(
        "INSERT INTO tg2tt.content_items
            (kind, source_chat_id, source_message_id, album_id, caption, source_text, file_handles_json, raw_update_json)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id, kind, source_chat_id, source_message_id, album_id, caption, source_text,
                   file_handles_json, local_paths_json, raw_update_json, created_at, processed_at",
    )
    .bind(kind)
    .bind(source_chat_id)
    .bind(source_message_id)
    .bind(album_id)
    .bind(caption)
    .bind(source_text)
    .bind(file_handles_json)
    .bind(raw_update.to_string())
    .fetch_one(db)
    .await?;
    Ok(row)
}

pub async fn get_content_item(db: &Db, id: i64) -> Result<Option<ContentItemRow>> {
    let row = sqlx::query_as::<_, ContentItemRow>(
        "SELECT id, kind, source_chat_id, source_message_id, album_id, caption, source_text,
                file_handles_json, local_paths_json, raw_update_json, created_at, processed_at
         FROM tg2tt.content_items WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn set_local_paths(db: &Db, content_item_id: i64, paths: &[String]) -> Result<()> {
    let json = serde_json::to_string(paths)?;
    sqlx::query("UPDATE tg2tt.content_items SET local_paths_json = $1 WHERE id = $2")
        .bind(json)
        .bind(content_item_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn mark_processed(db: &Db, content_item_id: i64) -> Result<()> {
    sqlx::query("UPDATE tg2tt.content_items SET processed_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(content_item_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Looks up or creates a pending Delivery for (source_key, account_label).
/// Concurrent creation races are absorbed by the unique index: on conflict
/// this re-reads the existing row rather than erroring.
pub async fn find_or_create_delivery(
    db: &Db,
    content_item_id: i64,
    source_key: &str,
    account_label: &str,
) -> Result<DeliveryRow> {
    if let Some(existing) = find_delivery(db, source_key, account_label).await? {
        return Ok(existing);
    }

    let inserted = sqlx::query_as::<_, DeliveryRow>(
        "INSERT INTO tg2tt.deliveries (content_item_id, source_key, account_label, status)
         VALUES ($1, $2, $3, 'pending')
         ON CONFLICT (source_key, account_label) DO NOTHING
         RETURNING id, content_item_id, source_key, account_label, status, error_text, post_id, created_at, updated_at",
    )
    .bind(content_item_id)
    .bind(source_key)
    .bind(account_label)
    .fetch_optional(db)
    .await?;

    if let Some(row) = inserted {
        return Ok(row);
    }

    // Lost the insert race; the row now exists, read it back.
    find_delivery(db, source_key, account_label)
        .await?
        .ok_or_else(|| anyhow::anyhow!("delivery vanished after conflicting insert"))
}

pub async fn find_delivery(db: &Db, source_key: &str, account_label: &str) -> Result<Option<DeliveryRow>> {
    let row = sqlx::query_as::<_, DeliveryRow>(
        "SELECT id, content_item_id, source_key, account_label, status, error_text, post_id, created_at, updated_at
         FROM tg2tt.deliveries WHERE source_key = $1 AND account_label = $2",
    )
    .bind(source_key)
    .bind(account_label)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn mark_delivery_sent(db: &Db, delivery_id: i64, post_id: Option<&str>) -> Result<()> {
    sqlx::query(
        "UPDATE tg2tt.deliveries SET status = 'sent', error_text = NULL, post_id = $1, updated_at = $2
         WHERE id = $3",
    )
    .bind(post_id)
    .bind(Utc::now())
    .bind(delivery_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn mark_delivery_failed(db: &Db, delivery_id: i64, error_text: &str) -> Result<()> {
    let truncated = truncate_chars(error_text, 2000);
    sqlx::query("UPDATE tg2tt.deliveries SET status = 'failed', error_text = $1, updated_at = $2 WHERE id = $3")
        .bind(truncated)
        .bind(Utc::now())
        .bind(delivery_id)
        .execute(db)
        .await?;
    Ok(())
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Account labels targeted by a ContentItem, resolved from the configured
/// chat->labels mapping, else all known accounts (broadcast default — see
/// DESIGN.md's Open Question decision), ordered by label for a
/// deterministic fan-out.
pub async fn resolve_target_accounts(
    db: &Db,
    source_chat_id: i64,
    mapping: &std::collections::HashMap<i64, Vec<String>>,
) -> Result<Vec<String>> {
    if let Some(labels) = mapping.get(&source_chat_id) {
        let rows = sqlx::query(
            "SELECT label FROM tg2tt.accounts WHERE label = ANY($1) ORDER BY label ASC",
        )
        .bind(labels)
        .fetch_all(db)
        .await?;
        return Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect());
    }

    let rows = sqlx::query("SELECT label FROM tg2tt.accounts ORDER BY label ASC")
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
}
