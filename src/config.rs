//! Configuration types for vid-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use utoipa::ToSchema;

/// Which worker strategy performs fetch jobs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Direct extraction via the yt-dlp binary
    #[default]
    Ytdlp,
    /// Relay through an external conversion service
    Relay,
}

/// Storage and job execution settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobConfig {
    /// Directory artifacts are written to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Which backend runs jobs (default: ytdlp)
    #[serde(default)]
    pub backend: BackendKind,

    /// Maximum jobs transferring at once (default: 4)
    ///
    /// Submission always returns immediately; jobs beyond the cap wait in
    /// `starting` until a permit frees up. There is no cancellation: a job
    /// holding a permit runs to a terminal state.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// Seconds a terminal task record stays in the store before removal (default: 60)
    #[serde(default = "default_record_ttl")]
    pub record_ttl_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            backend: BackendKind::default(),
            max_concurrent_jobs: default_max_concurrent(),
            record_ttl_secs: default_record_ttl(),
        }
    }
}

impl JobConfig {
    /// Record retention after a terminal transition, as a [`Duration`]
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}

/// Settings for the direct-extraction (yt-dlp) backend
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExtractorConfig {
    /// Path to the yt-dlp executable (auto-detected from PATH if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for the binary if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Cookies file passed to the extractor, if present on disk
    ///
    /// Materialized from the `COOKIES_CONTENT` environment variable at startup
    /// when that variable is set.
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Socket timeout in seconds passed to the extractor (default: 30)
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
            cookies_file: None,
            socket_timeout_secs: default_socket_timeout(),
        }
    }
}

/// Settings for the relay-conversion backend
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RelayConfig {
    /// Base URL of the conversion service (required when `backend = relay`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Percent reported while the relayed transfer has written nothing (default: 30)
    ///
    /// The conversion service does its own extraction before we start pulling
    /// bytes, so progress starts at this floor rather than zero. When the media
    /// response carries no Content-Length, percent stays pinned here until
    /// completion.
    #[serde(default = "default_progress_floor")]
    pub progress_floor: f32,

    /// Percent reported when the relayed transfer is nearly complete (default: 95)
    #[serde(default = "default_progress_cap")]
    pub progress_cap: f32,

    /// Request timeout in seconds for conversion API calls (default: 30)
    #[serde(default = "default_socket_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            progress_floor: default_progress_floor(),
            progress_cap: default_progress_cap(),
            request_timeout_secs: default_socket_timeout(),
        }
    }
}

/// Retention sweeper settings
///
/// The sweeper and an in-flight artifact transfer may race: a file can be
/// deleted while a retrieval response is mid-stream. The source system accepts
/// this risk and so do we; size the age threshold well above the largest
/// expected transfer time.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetentionConfig {
    /// Seconds between sweeper passes (default: 300)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Files older than this many seconds are deleted (default: 600)
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            max_age_secs: default_max_age(),
        }
    }
}

impl RetentionConfig {
    /// Interval between sweeps, as a [`Duration`]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Maximum artifact age, as a [`Duration`]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// REST API server settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address the API server binds to (default: 0.0.0.0:7860)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS handling (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins ("*" allows any; default: any)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Serve interactive Swagger UI at /swagger-ui (default: false)
    #[serde(default)]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            swagger_ui: false,
        }
    }
}

/// Main configuration for [`VidFetcher`](crate::VidFetcher)
///
/// Fields are organized into logical sub-configs:
/// - [`jobs`](JobConfig) — storage directory, backend selection, concurrency
/// - [`extractor`](ExtractorConfig) — yt-dlp binary and cookies
/// - [`relay`](RelayConfig) — conversion service endpoint and progress shaping
/// - [`retention`](RetentionConfig) — artifact sweeper timing
/// - [`api`](ApiConfig) — REST server settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Storage and job execution settings
    #[serde(default)]
    pub jobs: JobConfig,

    /// Direct-extraction backend settings
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Relay-conversion backend settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Retention sweeper settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// REST API server settings
    #[serde(default)]
    pub api: ApiConfig,

    /// API key for the summarization provider, read from `AI_API_KEY`
    ///
    /// Absence is tolerated; summarization-dependent callers degrade with a
    /// logged warning.
    #[serde(skip)]
    pub ai_api_key: Option<String>,
}

impl Config {
    /// Build a config from defaults plus process environment overrides
    ///
    /// Recognized variables:
    /// - `VIDDL_BIND` — API bind address
    /// - `VIDDL_DOWNLOAD_DIR` — artifact directory
    /// - `VIDDL_BACKEND` — `ytdlp` or `relay`
    /// - `VIDDL_RELAY_ENDPOINT` — conversion service base URL
    /// - `AI_API_KEY` — summarization provider key (optional, warns when absent)
    ///
    /// `COOKIES_CONTENT` is handled separately at fetcher startup, where its
    /// contents are written to a cookies file under the download directory.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(bind) = std::env::var("VIDDL_BIND") {
            config.api.bind_address = bind
                .parse()
                .map_err(|e| Error::config_key(format!("invalid VIDDL_BIND: {e}"), "api.bind_address"))?;
        }
        if let Ok(dir) = std::env::var("VIDDL_DOWNLOAD_DIR") {
            config.jobs.download_dir = PathBuf::from(dir);
        }
        if let Ok(backend) = std::env::var("VIDDL_BACKEND") {
            config.jobs.backend = match backend.as_str() {
                "ytdlp" => BackendKind::Ytdlp,
                "relay" => BackendKind::Relay,
                other => {
                    return Err(Error::config_key(
                        format!("unknown backend: {other}"),
                        "jobs.backend",
                    ));
                }
            };
        }
        if let Ok(endpoint) = std::env::var("VIDDL_RELAY_ENDPOINT") {
            config.relay.endpoint = Some(endpoint);
        }

        match std::env::var("AI_API_KEY") {
            Ok(key) if !key.is_empty() => config.ai_api_key = Some(key),
            _ => {
                tracing::warn!("AI_API_KEY not set, summarization features unavailable");
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(Error::config_key(
                "max_concurrent_jobs must be at least 1",
                "jobs.max_concurrent_jobs",
            ));
        }
        if self.jobs.backend == BackendKind::Relay && self.relay.endpoint.is_none() {
            return Err(Error::config_key(
                "relay backend selected but no endpoint configured",
                "relay.endpoint",
            ));
        }
        if !(0.0..100.0).contains(&self.relay.progress_floor) {
            return Err(Error::config_key(
                "progress_floor must be in [0, 100)",
                "relay.progress_floor",
            ));
        }
        if self.relay.progress_cap <= self.relay.progress_floor || self.relay.progress_cap > 100.0 {
            return Err(Error::config_key(
                "progress_cap must be in (progress_floor, 100]",
                "relay.progress_cap",
            ));
        }
        Ok(())
    }

    /// Artifact storage directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.jobs.download_dir
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_record_ttl() -> u64 {
    60
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_progress_floor() -> f32 {
    30.0
}

fn default_progress_cap() -> f32 {
    95.0
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_max_age() -> u64 {
    600
}

fn default_bind_address() -> SocketAddr {
    use std::net::{IpAddr, Ipv4Addr};
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7860)
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_source_values() {
        let config = Config::default();
        assert_eq!(config.retention.sweep_interval_secs, 300);
        assert_eq!(config.retention.max_age_secs, 600);
        assert_eq!(config.relay.progress_floor, 30.0);
        assert_eq!(config.relay.progress_cap, 95.0);
        assert_eq!(config.api.bind_address.port(), 7860);
        assert_eq!(config.jobs.backend, BackendKind::Ytdlp);
    }

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn relay_backend_requires_endpoint() {
        let mut config = Config::default();
        config.jobs.backend = BackendKind::Relay;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("endpoint"));

        config.relay.endpoint = Some("http://convert.example".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = Config::default();
        config.jobs.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_progress_bounds_rejected() {
        let mut config = Config::default();
        config.relay.progress_floor = 96.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_from_partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"jobs": {"max_concurrent_jobs": 2}}"#).unwrap();
        assert_eq!(config.jobs.max_concurrent_jobs, 2);
        assert_eq!(config.retention.max_age_secs, 600);
    }
}
