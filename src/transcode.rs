use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Renders a single still image to a fixed-length H.264 clip.
pub async fn photo_to_video(image_path: &Path, output_path: &Path, seconds: u32, fps: u32) -> Result<()> {
    ensure_ffmpeg().await?;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let seconds = seconds.max(1);
    let fps = fps.max(1);

    let command = [
        "-y".to_string(),
        "-loop".to_string(),
        "1".to_string(),
        "-i".to_string(),
        image_path.to_string_lossy().to_string(),
        "-t".to_string(),
        seconds.to_string(),
        "-vf".to_string(),
        format!("fps={fps},format=yuv420p,scale=trunc(iw/2)*2:trunc(ih/2)*2"),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output_path.to_string_lossy().to_string(),
    ];
    run(&command).await
}

/// Renders an ordered sequence of stills into a slideshow via the concat
/// demuxer. The final `file` line is intentionally repeated without a
/// trailing `duration` — ffmpeg's concat demuxer holds the last frame only
/// until the next `file` entry, so the closing duplicate is what keeps the
/// last slide on screen for its full slot.
pub async fn album_to_video(image_paths: &[PathBuf], output_path: &Path, slide_seconds: u32, fps: u32) -> Result<()> {
    ensure_ffmpeg().await?;
    if image_paths.is_empty() {
        bail!("album_to_video requires at least one image");
    }
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let slide_seconds = slide_seconds.max(1);
    let fps = fps.max(1);

    let mut concat_contents = String::new();
    for path in image_paths {
        let escaped = concat_escape(path)?;
        concat_contents.push_str(&format!("file '{escaped}'\nduration {slide_seconds}\n"));
    }
    let escaped_last = concat_escape(&image_paths[image_paths.len() - 1])?;
    concat_contents.push_str(&format!("file '{escaped_last}'\n"));

    let concat_file = NamedTempFile::with_suffix(".txt")?;
    tokio::fs::write(concat_file.path(), concat_contents).await?;

    let command = [
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        concat_file.path().to_string_lossy().to_string(),
        "-vf".to_string(),
        format!("fps={fps},format=yuv420p,scale=trunc(iw/2)*2:trunc(ih/2)*2"),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output_path.to_string_lossy().to_string(),
    ];
    run(&command).await
}

async fn ensure_ffmpeg() -> Result<()> {
    let status = Command::new("which")
        .arg("ffmpeg")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => Ok(()),
        _ => bail!("ffmpeg is required but not found in PATH"),
    }
}

async fn run(args: &[String]) -> Result<()> {
    let output = Command::new("ffmpeg").args(args).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        bail!("ffmpeg failed with code {:?}: {stderr}", output.status.code());
    }
    Ok(())
}

fn concat_escape(path: &Path) -> Result<String> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Ok(canonical.to_string_lossy().replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_single_quotes_in_path() {
        let escaped = concat_escape(Path::new("/tmp/weird'name.jpg")).unwrap();
        assert!(escaped.contains("'\\''"));
    }
}
