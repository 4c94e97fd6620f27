//! Direct-extraction backend using the external yt-dlp binary
//!
//! Spawns `yt-dlp` per job with `--newline` so progress arrives as parseable
//! lines on stdout, and with the output templated by task id so the artifact
//! can be located by stem afterwards. The anti-bot and network hardening flags
//! are passed through as-is; their semantics belong to the extractor.

use super::{JobBackend, JobContext, ProgressUpdate, find_artifact};
use crate::config::ExtractorConfig;
use crate::error::{Error, Result};
use crate::types::{MediaFormat, MediaInfo};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// User agent presented to media hosts, matching a mainstream desktop browser
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// How many trailing stderr lines to surface in an error message
const STDERR_TAIL_LINES: usize = 5;

/// Backend that runs jobs by invoking the yt-dlp executable
pub struct YtdlpBackend {
    binary_path: PathBuf,
    cookies_file: Option<PathBuf>,
    socket_timeout_secs: u64,
}

impl YtdlpBackend {
    /// Create a backend with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            cookies_file: None,
            socket_timeout_secs: 30,
        }
    }

    /// Build a backend from configuration, discovering the binary if needed
    ///
    /// Uses the explicit `ytdlp_path` when set; otherwise searches PATH with
    /// the `which` crate (unless `search_path` is disabled).
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let binary_path = match &config.ytdlp_path {
            Some(path) => path.clone(),
            None if config.search_path => which::which("yt-dlp")
                .map_err(|_| Error::Extractor("yt-dlp not found in PATH".to_string()))?,
            None => {
                return Err(Error::config_key(
                    "no yt-dlp path configured and PATH search disabled",
                    "extractor.ytdlp_path",
                ));
            }
        };

        let cookies_file = config
            .cookies_file
            .as_ref()
            .filter(|path| path.exists())
            .cloned();
        if config.cookies_file.is_some() && cookies_file.is_none() {
            tracing::warn!("configured cookies file does not exist, extractor runs without cookies");
        }

        Ok(Self {
            binary_path,
            cookies_file,
            socket_timeout_secs: config.socket_timeout_secs,
        })
    }

    /// Flags shared by metadata fetches and downloads
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--force-ipv4".to_string(),
            "--geo-bypass".to_string(),
            "--no-check-certificates".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
            "--user-agent".to_string(),
            USER_AGENT.to_string(),
        ];
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args
    }

    /// Full argument list for one download job
    fn job_args(&self, url: &str, format: MediaFormat, output_template: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(format_args(format).into_iter().map(String::from));
        args.extend([
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            output_template.to_string(),
            url.to_string(),
        ]);
        args
    }
}

/// Format selection flags per output format
///
/// Single-format selections are preferred over separate bestvideo+bestaudio to
/// reduce exposure to per-stream throttling on large hosts.
pub(crate) fn format_args(format: MediaFormat) -> Vec<&'static str> {
    match format {
        MediaFormat::Mp3 => vec![
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "192K",
        ],
        MediaFormat::Mp4 => vec!["-f", "best[ext=mp4]/best", "--merge-output-format", "mp4"],
    }
}

/// Parse a percentage out of one yt-dlp progress line
///
/// Expects `--newline` output of the form
/// `[download]  42.3% of 10.00MiB at 1.00MiB/s ETA 00:05`.
/// Returns None for lines without a parseable percentage; the caller keeps the
/// previous value in that case.
pub(crate) fn parse_progress_line(line: &str) -> Option<f32> {
    let rest = line.trim().strip_prefix("[download]")?;
    let token = rest.split_whitespace().find(|t| t.ends_with('%'))?;
    token.trim_end_matches('%').parse::<f32>().ok()
}

/// Whether a stdout line marks the start of post-processing
fn is_postprocess_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("[ExtractAudio]")
        || trimmed.starts_with("[Merger]")
        || trimmed.starts_with("[ffmpeg]")
}

#[async_trait]
impl JobBackend for YtdlpBackend {
    fn name(&self) -> &str {
        "ytdlp"
    }

    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo> {
        let output = Command::new(&self.binary_path)
            .args(self.common_args())
            .arg("-J")
            .arg("--no-download")
            .arg(url)
            .output()
            .await
            .map_err(|e| Error::Extractor(format!("failed to execute yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(Error::Extractor(stderr_tail(&output.stderr)));
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(MediaInfo {
            title: info
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Video")
                .to_string(),
            thumbnail: info
                .get("thumbnail")
                .and_then(|v| v.as_str())
                .map(String::from),
            duration: info
                .get("duration_string")
                .and_then(|v| v.as_str())
                .unwrap_or("00:00")
                .to_string(),
            uploader: info
                .get("uploader")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string(),
        })
    }

    async fn run_job(&self, ctx: JobContext) -> Result<PathBuf> {
        let template = ctx
            .output_dir
            .join(format!("{}.%(ext)s", ctx.id))
            .to_string_lossy()
            .into_owned();
        let args = self.job_args(&ctx.url, ctx.format, &template);

        tracing::debug!(task_id = %ctx.id, backend = self.name(), "spawning extractor");

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Extractor(format!("failed to execute yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Extractor("could not capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Extractor("could not capture yt-dlp stderr".to_string()))?;

        // Collect trailing stderr for the failure message while stdout drives
        // progress. Both must drain concurrently or the child can deadlock on
        // a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut tail: std::collections::VecDeque<String> =
                std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut postprocessing = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if !postprocessing && is_postprocess_line(&line) {
                postprocessing = true;
                ctx.progress.send(ProgressUpdate::processing());
                continue;
            }
            if let Some(percent) = parse_progress_line(&line) {
                ctx.progress.send(ProgressUpdate::downloading(percent));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Extractor(format!("failed to wait for yt-dlp: {e}")))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let message = if stderr_text.is_empty() {
                format!("yt-dlp exited with {status}")
            } else {
                stderr_text
            };
            return Err(Error::Extractor(message));
        }

        find_artifact(&ctx.output_dir, ctx.id).ok_or_else(|| {
            Error::Extractor("yt-dlp completed without producing an output file".to_string())
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "yt-dlp failed without error output".to_string()
    } else {
        tail
    }
}
