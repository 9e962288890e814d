//! Cover image generation contract and the local resize/compress adapter.
//! Re-encoding shells out to `ffmpeg`, which handles codec details.
use crate::config::ImageSettings;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait CoverImageGenerator: Send + Sync {
    /// Returns the raw image bytes produced for the prompt.
    async fn generate_cover(&self, prompt: &str) -> Result<Vec<u8>>;
}

/// Ensure `ffmpeg` binary is available on PATH by invoking `ffmpeg -version`.
pub async fn ensure_ffmpeg_available() -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-version")
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(anyhow!("ffmpeg not available (exit status {})", s)),
        Err(e) => Err(anyhow!("ffmpeg not available: {}", e)),
    }
}

/// Map a 1-100 quality setting onto ffmpeg's 2-31 `-q:v` scale (lower is
/// better there).
fn qv_for_quality(quality: u32) -> u32 {
    let quality = quality.clamp(1, 100);
    (31 - quality * 29 / 100).clamp(2, 31)
}

async fn encode(input: &Path, output: &Path, cfg: &ImageSettings, qv: u32) -> Result<()> {
    let filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
        w = cfg.width,
        h = cfg.height
    );
    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input.as_os_str())
        .arg("-vf")
        .arg(&filter)
        .arg("-frames:v")
        .arg("1")
        .arg("-q:v")
        .arg(qv.to_string())
        .arg(output.as_os_str())
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("failed to spawn ffmpeg for {}", input.display()))?;
    if !status.success() {
        return Err(anyhow!(
            "ffmpeg exited with status {} for {}",
            status,
            input.display()
        ));
    }
    Ok(())
}

/// Write the generated bytes to disk and re-encode them as a cover JPEG at
/// the configured dimensions and quality. When the result still exceeds
/// `max_bytes`, one re-encode at a lower quality step is attempted before
/// giving up.
pub async fn prepare_cover(
    bytes: &[u8],
    images_dir: &Path,
    slug: &str,
    cfg: &ImageSettings,
) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(anyhow!("empty image payload"));
    }
    tokio::fs::create_dir_all(images_dir)
        .await
        .with_context(|| format!("failed to create images dir: {}", images_dir.display()))?;

    let raw_path = images_dir.join(format!("{slug}-raw.img"));
    let cover_path = images_dir.join(format!("{slug}.jpg"));
    tokio::fs::write(&raw_path, bytes)
        .await
        .context("failed to write raw image")?;

    let mut qv = qv_for_quality(cfg.quality);
    let result = async {
        encode(&raw_path, &cover_path, cfg, qv).await?;
        if cfg.max_bytes > 0 {
            let size = tokio::fs::metadata(&cover_path).await?.len();
            if size > cfg.max_bytes {
                qv = (qv + 6).min(31);
                warn!(size, max = cfg.max_bytes, qv, "cover too large; re-encoding");
                encode(&raw_path, &cover_path, cfg, qv).await?;
                let size = tokio::fs::metadata(&cover_path).await?.len();
                if size > cfg.max_bytes {
                    return Err(anyhow!(
                        "cover image still {} bytes after re-encode (max {})",
                        size,
                        cfg.max_bytes
                    ));
                }
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    let _ = tokio::fs::remove_file(&raw_path).await;
    result?;

    debug!(path = %cover_path.display(), "cover image ready");
    Ok(cover_path)
}
