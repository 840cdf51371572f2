use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    downloader::DownloaderConfig,
    util::{FetchConfig, DEFAULT_USER_AGENT},
    worker::{BatchPolicy, RecorderConfig},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read {0}: {1}")]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("could not parse {0}: {1}")]
    ParseError(PathBuf, #[source] toml::de::Error),
}

/// On-disk settings. Every field has a default, so an empty file or no file
/// at all is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: HttpSection,
    pub download: DownloadSection,
    pub recorder: RecorderSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub proxy: Option<String>,
    pub timeout_secs: u64,
    pub verify_tls: bool,
    pub user_agent: String,
    pub client_id: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 4,
            verify_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            client_id: None,
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadSection {
    pub concurrency: usize,
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            concurrency: 1000,
            max_attempts: 5,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderSection {
    pub storage_path: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub name_format: String,
    pub manifest_name: String,
    pub batch_policy: BatchPolicy,
    pub stall_timeout_secs: Option<u64>,
}

impl Default for RecorderSection {
    fn default() -> Self {
        let recorder = RecorderConfig::default();
        Self {
            storage_path: None,
            poll_interval_secs: recorder.poll_interval.as_secs(),
            name_format: recorder.name_format,
            manifest_name: recorder.manifest_name,
            batch_policy: recorder.batch_policy,
            stall_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub concat: bool,
    pub file_name: String,
    pub clean_cache: bool,
    pub ffmpeg: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            concat: true,
            file_name: "output.mp4".to_string(),
            clean_cache: true,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl Config {
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseError(origin.to_path_buf(), e))
    }

    /// Loads `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::IoError(path.to_path_buf(), e)),
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let mut headers = vec![("user-agent".to_string(), self.http.user_agent.clone())];
        if let Some(client_id) = &self.http.client_id {
            headers.push(("client-id".to_string(), client_id.clone()));
        }
        headers.extend(self.http.headers.iter().cloned());

        FetchConfig {
            proxy: self.http.proxy.clone(),
            timeout: Duration::from_secs(self.http.timeout_secs),
            verify_tls: self.http.verify_tls,
            headers,
        }
    }

    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            concurrency: self.download.concurrency,
            max_attempts: self.download.max_attempts.max(1),
            retry_backoff: Duration::from_millis(self.download.retry_backoff_ms),
        }
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            poll_interval: Duration::from_secs(self.recorder.poll_interval_secs),
            name_format: self.recorder.name_format.clone(),
            manifest_name: self.recorder.manifest_name.clone(),
            batch_policy: self.recorder.batch_policy,
            stall_timeout: self.recorder.stall_timeout_secs.map(Duration::from_secs),
        }
    }
}
