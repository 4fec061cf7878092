use std::path::Path;

use anyhow::{Result, bail};

use crate::db::Db;
use crate::models::ContentKind;
use crate::store;
use crate::telegram::client::TelegramClient;

/// Ensures every file handle on a ContentItem is materialized to a local
/// path under `<media_root>/<content_id>/`. Idempotent: a prior
/// successful run whose path count matches the handle count short-circuits
/// without touching the network.
pub async fn materialize(
    db: &Db,
    tg: &TelegramClient,
    media_root: &Path,
    content_item_id: i64,
    kind: ContentKind,
    file_handles: &[String],
    existing_local_paths: &[String],
) -> Result<Vec<String>> {
    let existing: Vec<&String> = existing_local_paths
        .iter()
        .filter(|p| Path::new(p).exists())
        .collect();
    if !existing.is_empty() && existing.len() == file_handles.len() {
        return Ok(existing.into_iter().cloned().collect());
    }

    let media_dir = media_root.join(content_item_id.to_string());
    tokio::fs::create_dir_all(&media_dir).await?;

    let mut downloaded = Vec::new();
    for (index, handle) in file_handles.iter().enumerate() {
        match materialize_one(tg, &media_dir, index + 1, handle, kind).await {
            Ok(path) => downloaded.push(path),
            Err(e) => {
                tracing::warn!(error = ?e, content_item_id, "telegram file download item failed");
            }
        }
    }

    if downloaded.is_empty() {
        bail!("no files could be downloaded from the source platform");
    }

    store::set_local_paths(db, content_item_id, &downloaded).await?;
    Ok(downloaded)
}

async fn materialize_one(
    tg: &TelegramClient,
    media_dir: &Path,
    index: usize,
    handle: &str,
    kind: ContentKind,
) -> Result<String> {
    let file_info = tg.get_file(handle).await?;
    let remote_path = file_info
        .get("file_path")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if remote_path.is_empty() {
        bail!("telegram getFile returned no file_path for handle {handle}");
    }

    let ext = Path::new(remote_path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| default_extension(kind).to_string());

    let target = media_dir.join(format!("{index}{ext}"));
    let bytes = tg.download(remote_path).await?;
    tokio::fs::write(&target, bytes).await?;
    Ok(target.to_string_lossy().to_string())
}

fn default_extension(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Video => ".mp4",
        ContentKind::Photo | ContentKind::Album => ".jpg",
    }
}
