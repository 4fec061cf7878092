use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::config::Settings;
use crate::models::ContentKind;
use crate::tiktok::client::{
    TikTokClient, extract_publish_id_photo, extract_publish_id_video, extract_upload_url, extract_upload_urls,
};
use crate::tiktok::error::TikTokApiError;
use crate::transcode;

const UPLOAD_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "webm", "mkv"];

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub mode: String,
    pub publish_id: Option<String>,
    pub post_id: Option<String>,
}

/// Publishes a materialized ContentItem to one TikTok account: videos go
/// straight through the video pipeline; photos/albums try the photo API
/// first (if enabled) and fall back to an ffmpeg-rendered slideshow video.
pub async fn publish(
    settings: &Settings,
    access_token: &str,
    kind: ContentKind,
    content_item_id: i64,
    local_files: &[String],
    caption: &str,
    requested_mode: &str,
) -> Result<PublishOutcome, TikTokApiError> {
    if local_files.is_empty() {
        return Err(TikTokApiError::Malformed("no local files to publish".into()));
    }

    if kind == ContentKind::Video {
        let video_path = Path::new(&local_files[0]);
        return publish_video_with_fallback(
            settings,
            access_token,
            video_path,
            caption,
            requested_mode,
        )
        .await;
    }

    let image_paths: Vec<PathBuf> = local_files
        .iter()
        .map(PathBuf::from)
        .filter(|p| has_extension(p, IMAGE_EXTENSIONS))
        .collect();

    if settings.publishing.enable_photo_api && !image_paths.is_empty() {
        match try_publish_photo_or_carousel(access_token, &image_paths, caption, requested_mode).await {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }

    let fallback_video = convert_to_video(settings, kind, content_item_id, local_files, &image_paths)
        .await
        .map_err(|e| TikTokApiError::Malformed(e.to_string()))?;

    publish_video_with_fallback(settings, access_token, &fallback_video, caption, requested_mode).await
}

async fn publish_video_with_fallback(
    settings: &Settings,
    access_token: &str,
    video_path: &Path,
    caption: &str,
    requested_mode: &str,
) -> Result<PublishOutcome, TikTokApiError> {
    match publish_video_with_mode(access_token, video_path, caption, requested_mode).await {
        Ok(outcome) => Ok(outcome),
        Err(e) if requested_mode == "direct" && settings.publishing.fallback_to_draft && e.is_permission_or_unsupported() => {
            tracing::warn!(event = "direct_publish_failed_fallback_to_draft", status = %e);
            publish_video_with_mode(access_token, video_path, caption, "draft").await
        }
        Err(e) => Err(e),
    }
}

async fn publish_video_with_mode(
    access_token: &str,
    video_path: &Path,
    caption: &str,
    mode: &str,
) -> Result<PublishOutcome, TikTokApiError> {
    let client = TikTokClient::new(UPLOAD_HTTP_TIMEOUT)?;
    let metadata = tokio::fs::metadata(video_path)
        .await
        .map_err(|e| TikTokApiError::Network(e.to_string()))?;

    let init_data = client
        .init_video_upload(access_token, caption, mode, metadata.len())
        .await?;

    let upload_url = extract_upload_url(&init_data)
        .ok_or_else(|| TikTokApiError::Malformed("TikTok response does not contain upload_url".into()))?;
    let publish_id = extract_publish_id_video(&init_data);

    client.upload_binary(&upload_url, video_path, "video/mp4").await?;

    let finalize_data = client
        .finalize_video(access_token, publish_id.as_deref(), caption, mode)
        .await?;

    let post_id = string_field(&finalize_data, "post_id")
        .or_else(|| string_field(&finalize_data, "item_id"))
        .or_else(|| publish_id.clone());

    Ok(PublishOutcome {
        mode: mode.to_string(),
        publish_id,
        post_id,
    })
}

/// Best-effort photo/carousel publish. Returns `Ok(None)` when the photo
/// API is unavailable for this app/account so the caller can fall back to
/// an ffmpeg-rendered slideshow instead of failing the whole delivery.
async fn try_publish_photo_or_carousel(
    access_token: &str,
    image_paths: &[PathBuf],
    caption: &str,
    mode: &str,
) -> Result<Option<PublishOutcome>, TikTokApiError> {
    if image_paths.is_empty() {
        return Ok(None);
    }

    let client = TikTokClient::new(UPLOAD_HTTP_TIMEOUT)?;
    let attempt = async {
        let init_data = client
            .init_photo_upload(access_token, caption, mode, image_paths.len())
            .await?;
        let upload_urls = extract_upload_urls(&init_data);
        if upload_urls.is_empty() || upload_urls.len() < image_paths.len() {
            return Ok(None);
        }

        for (path, upload_url) in image_paths.iter().zip(upload_urls.iter()) {
            let content_type = image_content_type(path);
            client.upload_binary(upload_url, path, content_type).await?;
        }

        let publish_id = extract_publish_id_photo(&init_data);
        let finalize_data = client
            .finalize_photo_upload(access_token, publish_id.as_deref(), caption, mode)
            .await?;
        let post_id = string_field(&finalize_data, "post_id")
            .or_else(|| string_field(&finalize_data, "item_id"))
            .or_else(|| publish_id.clone());

        Ok(Some(PublishOutcome {
            mode: mode.to_string(),
            publish_id,
            post_id,
        }))
    }
    .await;

    match attempt {
        Ok(outcome) => Ok(outcome),
        Err(e) if matches!(&e, TikTokApiError::PermissionDenied(_) | TikTokApiError::Unsupported(_)) => {
            tracing::info!(event = "photo_api_unavailable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn convert_to_video(
    settings: &Settings,
    kind: ContentKind,
    content_item_id: i64,
    local_files: &[String],
    image_paths: &[PathBuf],
) -> Result<PathBuf> {
    let media_dir = Path::new(&settings.storage.media_storage_path).join(content_item_id.to_string());
    tokio::fs::create_dir_all(&media_dir).await?;
    let target_path = media_dir.join(format!("{content_item_id}_slideshow.mp4"));

    if kind == ContentKind::Photo {
        let source = Path::new(&local_files[0]);
        transcode::photo_to_video(source, &target_path, settings.aggregator.slide_seconds, settings.aggregator.slideshow_fps)
            .await?;
        return Ok(target_path);
    }

    if !image_paths.is_empty() {
        transcode::album_to_video(
            image_paths,
            &target_path,
            settings.aggregator.slide_seconds,
            settings.aggregator.slideshow_fps,
        )
        .await?;
        return Ok(target_path);
    }

    for raw in local_files {
        let path = PathBuf::from(raw);
        if has_extension(&path, VIDEO_EXTENSIONS) {
            return Ok(path);
        }
    }
    Ok(PathBuf::from(&local_files[0]))
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn image_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extension_detection_is_case_insensitive() {
        assert!(has_extension(Path::new("a/B.JPG"), IMAGE_EXTENSIONS));
        assert!(!has_extension(Path::new("a/b.mp4"), IMAGE_EXTENSIONS));
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(image_content_type(Path::new("a.gif")), "application/octet-stream");
        assert_eq!(image_content_type(Path::new("a.PNG")), "image/png");
    }
}
