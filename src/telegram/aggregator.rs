use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::Db;
use crate::telegram::parser::ParsedMessage;

#[derive(Debug, Clone)]
pub struct Bundle {
    pub album_id: String,
    pub source_chat_id: i64,
    pub source_message_ids: Vec<i64>,
    pub file_handles: Vec<String>,
    pub caption: String,
    pub source_text: String,
    pub created_at: DateTime<Utc>,
}

pub struct AlbumAggregator {
    flush_seconds: u64,
}

impl AlbumAggregator {
    pub fn new(flush_seconds: u64) -> Self {
        Self {
            flush_seconds: flush_seconds.max(1),
        }
    }

    pub async fn ensure_tables(db: &Db) -> Result<()> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS tg2tt;")
            .execute(db)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tg2tt.album_buffer (
                id BIGSERIAL PRIMARY KEY,
                album_id TEXT NOT NULL,
                source_chat_id BIGINT NOT NULL,
                source_message_id BIGINT NOT NULL,
                kind TEXT NOT NULL,
                file_handle TEXT NOT NULL,
                caption TEXT NOT NULL DEFAULT '',
                source_text TEXT NOT NULL DEFAULT '',
                raw_message_json TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                CONSTRAINT uq_album_buffer_item UNIQUE (album_id, source_message_id, file_handle)
            )",
        )
        .execute(db)
        .await?;
        Ok(())
    }

    /// Inserts one album member row. A missing album id is a reject, not
    /// an error. Duplicate (album_id, message_id, file_handle) inserts are
    /// idempotent — the unique constraint absorbs them.
    pub async fn add(&self, db: &Db, parsed: &ParsedMessage, raw_message: &serde_json::Value) -> Result<()> {
        let Some(album_id) = parsed.album_id.as_deref() else {
            return Ok(());
        };
        sqlx::query(
            "INSERT INTO tg2tt.album_buffer
                (album_id, source_chat_id, source_message_id, kind, file_handle, caption, source_text, raw_message_json, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (album_id, source_message_id, file_handle) DO NOTHING",
        )
        .bind(album_id)
        .bind(parsed.source_chat_id)
        .bind(parsed.message_id)
        .bind(match parsed.kind {
            crate::telegram::parser::ParsedKind::Video => "video",
            crate::telegram::parser::ParsedKind::Photo => "photo",
        })
        .bind(&parsed.file_handle)
        .bind(&parsed.caption)
        .bind(&parsed.text)
        .bind(raw_message.to_string())
        .bind(parsed.created_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Selects album ids whose earliest row is older than
    /// `now - flush_seconds`, builds one Bundle per album id (ordered by
    /// message id ascending), then deletes those rows in one transaction.
    pub async fn flush_due(&self, db: &Db, now: DateTime<Utc>) -> Result<Vec<Bundle>> {
        let threshold = now - chrono::Duration::seconds(self.flush_seconds as i64);

        let mut tx = db.begin().await?;

        let due_rows = sqlx::query(
            "SELECT album_id FROM tg2tt.album_buffer
             GROUP BY album_id
             HAVING MIN(created_at) <= $1",
        )
        .bind(threshold)
        .fetch_all(&mut *tx)
        .await?;

        let due_album_ids: Vec<String> = due_rows.iter().map(|r| r.get::<String, _>(0)).collect();
        if due_album_ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let mut bundles = Vec::with_capacity(due_album_ids.len());
        for album_id in &due_album_ids {
            let rows = sqlx::query(
                "SELECT source_chat_id, source_message_id, file_handle, caption, source_text, created_at
                 FROM tg2tt.album_buffer
                 WHERE album_id = $1
                 ORDER BY source_message_id ASC",
            )
            .bind(album_id)
            .fetch_all(&mut *tx)
            .await?;

            if rows.is_empty() {
                continue;
            }

            let source_chat_id: i64 = rows[0].get("source_chat_id");
            let mut message_ids = Vec::with_capacity(rows.len());
            let mut file_handles = Vec::with_capacity(rows.len());
            let mut caption = String::new();
            let mut source_text = String::new();
            let mut min_created = rows[0].get::<DateTime<Utc>, _>("created_at");

            for row in &rows {
                message_ids.push(row.get::<i64, _>("source_message_id"));
                file_handles.push(row.get::<String, _>("file_handle"));
                let row_caption: String = row.get("caption");
                if caption.is_empty() && !row_caption.trim().is_empty() {
                    caption = row_caption;
                }
                let row_text: String = row.get("source_text");
                if source_text.is_empty() && !row_text.trim().is_empty() {
                    source_text = row_text;
                }
                let created: DateTime<Utc> = row.get("created_at");
                if created < min_created {
                    min_created = created;
                }
            }

            bundles.push(Bundle {
                album_id: album_id.clone(),
                source_chat_id,
                source_message_ids: message_ids,
                file_handles,
                caption,
                source_text,
                created_at: min_created,
            });
        }

        sqlx::query("DELETE FROM tg2tt.album_buffer WHERE album_id = ANY($1)")
            .bind(&due_album_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(bundles)
    }
}
