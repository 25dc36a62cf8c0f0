//! Engine asset cache
//!
//! Model files named by a tier are staged into a per-tier tessdata directory
//! under the cache root. Remote files are downloaded once, local files are
//! copied. Staged files are reused across runs.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::tiers::is_remote;
use super::BackendOptions;

/// Download timeout for a single model file
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Cache of staged model files
pub struct AssetCache {
    root: PathBuf,
    client: reqwest::Client,
}

impl AssetCache {
    /// Create a cache rooted at `root`
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create asset cache: {}", root.display()))?;
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { root, client })
    }

    /// Cache in the per-user cache directory
    pub fn in_user_cache() -> Result<Self> {
        Self::new(crate::storage::get_cache_dir()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// tessdata directory for a staging key
    pub fn tessdata_dir(&self, key: &str) -> PathBuf {
        self.root.join("tessdata").join(key)
    }

    /// Make `source` available at `dest`, downloading or copying as needed
    pub async fn stage(&self, source: &str, dest: &Path, options: &BackendOptions) -> Result<()> {
        if is_staged(dest).await {
            debug!(path = %dest.display(), "asset already staged");
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if is_remote(source) {
            self.download(source, dest, options).await
        } else {
            tokio::fs::copy(source, dest)
                .await
                .with_context(|| format!("Failed to copy asset {} to {}", source, dest.display()))?;
            info!(%source, dest = %dest.display(), "asset staged");
            Ok(())
        }
    }

    async fn download(&self, url: &str, dest: &Path, options: &BackendOptions) -> Result<()> {
        info!(%url, "downloading asset");
        options.report("downloading language data", 0.0);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        let temp_path = dest.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .context("Failed to create temp file")?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write to temp file")?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total_size.filter(|t| *t > 0) {
                options.report("downloading language data", downloaded as f32 / total as f32);
            }
        }

        file.flush().await.context("Failed to flush temp file")?;
        drop(file);

        if downloaded == 0 {
            tokio::fs::remove_file(&temp_path).await.ok();
            anyhow::bail!("Downloaded asset is empty: {}", url);
        }

        tokio::fs::rename(&temp_path, dest)
            .await
            .context("Failed to move downloaded file to final location")?;

        options.report("downloading language data", 1.0);
        info!(%url, bytes = downloaded, "asset downloaded");
        Ok(())
    }
}

async fn is_staged(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Stable directory key for a set of asset sources
pub fn stage_key(parts: &[Option<&str>]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.unwrap_or("-").as_bytes());
        hasher.update(b"|");
    }
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

/// Join a file name onto a local directory or a remote base URL
pub fn join_asset(base: &str, file: &str) -> String {
    if is_remote(base) {
        format!("{}/{}", base.trim_end_matches('/'), file)
    } else {
        Path::new(base).join(file).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_key_is_stable() {
        let a = stage_key(&[Some("https://x/eng.traineddata"), None, Some("eng")]);
        let b = stage_key(&[Some("https://x/eng.traineddata"), None, Some("eng")]);
        let c = stage_key(&[Some("https://y/eng.traineddata"), None, Some("eng")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_join_asset() {
        assert_eq!(
            join_asset("https://cdn.example/tessdata/", "eng.traineddata"),
            "https://cdn.example/tessdata/eng.traineddata"
        );
        let local = join_asset("assets/tessdata", "eng.traineddata");
        assert!(local.ends_with("eng.traineddata"));
        assert!(local.starts_with("assets"));
    }

    #[tokio::test]
    async fn test_stage_local_copy_and_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("eng.traineddata");
        std::fs::write(&source, b"model-bytes").unwrap();

        let cache = AssetCache::new(dir.path().join("cache")).unwrap();
        let dest = cache.tessdata_dir("abc").join("eng.traineddata");
        let options = BackendOptions::default();

        cache
            .stage(source.to_str().unwrap(), &dest, &options)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"model-bytes");

        // Source gone, staged copy still used
        std::fs::remove_file(&source).unwrap();
        cache
            .stage(source.to_str().unwrap(), &dest, &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stage_missing_local_source() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().to_path_buf()).unwrap();
        let dest = cache.tessdata_dir("abc").join("eng.traineddata");

        let result = cache
            .stage("/nonexistent/eng.traineddata", &dest, &BackendOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stage_remote_download() {
        let base = crate::ocr::testing::serve_http("200 OK", b"remote-model").await;
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().to_path_buf()).unwrap();
        let dest = cache.tessdata_dir("abc").join("eng.traineddata");

        cache
            .stage(&format!("{base}/eng.traineddata"), &dest, &BackendOptions::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"remote-model");
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_empty_download_leaves_nothing_behind() {
        let base = crate::ocr::testing::serve_http("200 OK", b"").await;
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().to_path_buf()).unwrap();
        let dest = cache.tessdata_dir("abc").join("eng.traineddata");

        let err = cache
            .stage(&format!("{base}/eng.traineddata"), &dest, &BackendOptions::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("empty"));
        assert!(!dest.exists());
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let base = crate::ocr::testing::serve_http("404 Not Found", b"gone").await;
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().to_path_buf()).unwrap();
        let dest = cache.tessdata_dir("abc").join("eng.traineddata");

        let err = cache
            .stage(&format!("{base}/eng.traineddata"), &dest, &BackendOptions::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
        assert!(!dest.exists());
    }
}
