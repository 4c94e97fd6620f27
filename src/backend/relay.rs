//! Relay-conversion backend
//!
//! Hands the source URL to an external conversion service, which performs the
//! extraction itself and responds with a direct media link. We then stream
//! that link to local disk in chunks.
//!
//! Wire contract with the conversion service:
//! - `POST {endpoint}/convert` with `{"url", "format"}` → `{"download_url"}`
//! - `POST {endpoint}/info` with `{"url"}` → `{"title", "thumbnail",
//!   "duration", "uploader"}`
//!
//! Progress shaping: the service's own extraction happens before any byte
//! reaches us, so percent starts at a configured floor (default 30) and rises
//! linearly with bytes written toward a cap (default 95). When the media
//! response has no Content-Length, percent holds at the floor until the
//! transfer completes, at which point the worker reports 100.

use super::{JobBackend, JobContext, ProgressUpdate};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::types::{MediaInfo, TaskStatus};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

/// Backend that delegates extraction to a remote conversion service
pub struct RelayBackend {
    client: reqwest::Client,
    endpoint: String,
    progress_floor: f32,
    progress_cap: f32,
}

impl RelayBackend {
    /// Build a backend from configuration
    ///
    /// Fails if no endpoint is configured; `Config::validate` catches this
    /// earlier for the relay backend selection, so hitting it here means the
    /// backend was constructed directly with an incomplete config.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::config_key("relay endpoint not configured", "relay.endpoint"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            progress_floor: config.progress_floor,
            progress_cap: config.progress_cap,
        })
    }

    /// Ask the conversion service for a direct media link
    async fn request_conversion(&self, url: &str, format: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/convert", self.endpoint))
            .json(&json!({ "url": url, "format": format }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Relay(format!(
                "conversion service returned {status}: {body}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        payload
            .get("download_url")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                Error::Relay("conversion response missing download_url".to_string())
            })
    }
}

/// Percent for a relayed transfer: linear from `floor` to `cap` by bytes written
///
/// With an unknown total the transfer contributes nothing; percent holds at
/// the floor. Clamped to `cap` against over-reported totals. 100 is reserved
/// for the worker's terminal transition.
pub(crate) fn interpolate_percent(
    floor: f32,
    cap: f32,
    bytes_written: u64,
    total_size: Option<u64>,
) -> f32 {
    match total_size {
        Some(total) if total > 0 => {
            let fraction = bytes_written as f32 / total as f32;
            (floor + fraction * (cap - floor)).min(cap)
        }
        _ => floor,
    }
}

#[async_trait]
impl JobBackend for RelayBackend {
    fn name(&self) -> &str {
        "relay"
    }

    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo> {
        let response = self
            .client
            .post(format!("{}/info", self.endpoint))
            .json(&json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Relay(format!(
                "metadata request returned {status}: {body}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        Ok(MediaInfo {
            title: payload
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Video")
                .to_string(),
            thumbnail: payload
                .get("thumbnail")
                .and_then(|v| v.as_str())
                .map(String::from),
            duration: payload
                .get("duration")
                .and_then(|v| v.as_str())
                .unwrap_or("00:00")
                .to_string(),
            uploader: payload
                .get("uploader")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string(),
        })
    }

    async fn run_job(&self, ctx: JobContext) -> Result<PathBuf> {
        ctx.progress.send(ProgressUpdate {
            status: TaskStatus::Downloading,
            percent: self.progress_floor,
            speed_bps: None,
            eta_seconds: None,
        });

        let media_url = self
            .request_conversion(&ctx.url, ctx.format.extension())
            .await?;

        tracing::debug!(task_id = %ctx.id, backend = self.name(), "streaming converted media");

        let response = self.client.get(&media_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Relay(format!("media fetch returned {status}")));
        }

        let total_size = response.content_length();
        let output_path = ctx
            .output_dir
            .join(format!("{}.{}", ctx.id, ctx.format.extension()));
        let mut file = tokio::fs::File::create(&output_path).await?;

        let started = Instant::now();
        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();

        let transfer = async {
            while let Some(chunk) = stream.next().await {
                let chunk =
                    chunk.map_err(|e| Error::Relay(format!("media stream interrupted: {e}")))?;

                file.write_all(&chunk).await?;
                bytes_written += chunk.len() as u64;

                let elapsed = started.elapsed().as_secs_f64();
                let speed_bps = if elapsed > 0.0 {
                    Some((bytes_written as f64 / elapsed) as u64)
                } else {
                    None
                };
                let eta_seconds = match (total_size, speed_bps) {
                    (Some(total), Some(speed)) if speed > 0 => {
                        Some(total.saturating_sub(bytes_written) / speed)
                    }
                    _ => None,
                };

                ctx.progress.send(ProgressUpdate {
                    status: TaskStatus::Downloading,
                    percent: interpolate_percent(
                        self.progress_floor,
                        self.progress_cap,
                        bytes_written,
                        total_size,
                    ),
                    speed_bps,
                    eta_seconds,
                });
            }
            file.flush().await?;
            Ok::<(), Error>(())
        };

        // Any transfer failure drops the partial file, so a task whose record
        // says error never has a retrievable half-written artifact.
        if let Err(e) = transfer.await {
            drop(file);
            tokio::fs::remove_file(&output_path).await.ok();
            return Err(e);
        }

        Ok(output_path)
    }
}
