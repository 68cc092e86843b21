//! HTTP download of release archives.
//!
//! Downloads stream into `<dest>.tmp` and are renamed into place only once
//! complete, so an interrupted fetch never leaves something that looks like a
//! finished archive. Failed attempts are retried with exponential backoff and
//! jitter, bounded by the installer's [`RetryPolicy`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::InstallError;
use crate::toolchain::executor::RetryPolicy;

/// Base delay between retries in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds. LLVM archives are several hundred megabytes.
const REQUEST_TIMEOUT_SECS: u64 = 1800;

/// Minimum interval between progress log lines.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Fetches a URL into a local file.
pub trait Fetcher {
    /// Downloads `url` to `dest`, replacing any existing file.
    fn fetch(&self, url: &str, dest: &Path) -> impl Future<Output = Result<()>>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    policy: RetryPolicy,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        download_file(url, dest, &self.policy).await
    }
}

/// Path of the in-progress download for `dest`.
#[must_use]
pub fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Downloads `url` to `dest`, retrying failed attempts per `policy`.
///
/// # Errors
///
/// Returns the last attempt's error once the policy gives up, or an I/O
/// error if the destination cannot be prepared.
pub async fn download_file(url: &str, dest: &Path, policy: &RetryPolicy) -> Result<()> {
    let temp = temp_path(dest);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut attempts = 0;
    loop {
        attempts += 1;
        info!(url, attempt = attempts, dest = %dest.display(), "Downloading LLVM archive");

        match download_once(url, &temp).await {
            Ok(bytes) => {
                tokio::fs::rename(&temp, dest).await.with_context(|| {
                    format!("Failed to rename {} to {}", temp.display(), dest.display())
                })?;
                info!(size = %format_bytes(bytes), "Download complete");
                return Ok(());
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&temp).await;
                if !policy.should_retry(attempts, &format!("{err:#}")) {
                    return Err(err);
                }
                let delay = calculate_retry_delay(attempts - 1);
                warn!(error = %err, retry_in_ms = delay, "Download failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

/// Performs one streaming download into `dest`, returning the byte count.
async fn download_once(url: &str, dest: &Path) -> Result<u64> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| InstallError::download_error(format!("failed to connect to {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(
            InstallError::download_error(format!("HTTP {} for {url}", response.status())).into(),
        );
    }

    let total = response.content_length().unwrap_or(0);

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create file: {}", dest.display()))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_log = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| InstallError::download_error(format!("failed reading {url}: {e}")))?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        downloaded += chunk.len() as u64;

        if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
            debug!(
                "{}/{} downloaded",
                format_bytes(downloaded),
                format_bytes(total)
            );
            last_log = Instant::now();
        }
    }

    file.flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;

    Ok(downloaded)
}

/// Formats bytes into a human-readable string (KB, MB, GB).
fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let bytes_f = bytes as f64;

    if bytes_f >= GB {
        format!("{:.2} GB", bytes_f / GB)
    } else if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.2} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Calculates the retry delay with exponential backoff and jitter.
///
/// The delay doubles with each retry (1s, 2s, 4s) with +/- 25% jitter.
fn calculate_retry_delay(retry: u32) -> u64 {
    let base_delay = BASE_RETRY_DELAY_MS * 2u64.pow(retry.min(10));
    let jitter_range = base_delay / 4;
    let jitter = rand::rng().random_range(0..=jitter_range * 2);
    base_delay - jitter_range + jitter
}
