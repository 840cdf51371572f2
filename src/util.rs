use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::downloader::Fetcher;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/71.0.3578.80 Safari/537.36";

/// Transport settings shared by the segment and playlist clients.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub proxy: Option<String>,
    /// Applied to every single request, not to a whole task.
    pub timeout: Duration,
    pub verify_tls: bool,
    pub headers: Vec<(String, String)>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Duration::from_secs(4),
            verify_tls: true,
            headers: vec![("user-agent".to_string(), DEFAULT_USER_AGENT.to_string())],
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("empty response body from {0}")]
    EmptyBody(String),
}

fn client_builder(config: &FetchConfig) -> Result<reqwest::ClientBuilder, FetchError> {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| FetchError::Config(format!("header name {key:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::Config(format!("header value for {key:?}: {e}")))?;
        headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .danger_accept_invalid_certs(!config.verify_tls);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    Ok(builder)
}

/// Single-shot GET client for segment payloads. Retrying is left to the
/// downloader so that a retry covers fetch, transform and persist together.
#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
}

impl FetchClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = client_builder(config)?.build()?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if body.is_empty() {
            return Err(FetchError::EmptyBody(url.to_string()));
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for FetchClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        FetchClient::fetch(self, url).await
    }
}

/// Playlist session: keeps cookies between polls and retries transient
/// transport errors before a poll is reported as failed.
pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<HttpClient, FetchError> {
        let cookies = Arc::new(CookieStoreMutex::default());
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = client_builder(config)?
            .cookie_provider(cookies.clone())
            .build()?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient { client, cookies })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .map_err(|e| e.into())
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    for next in ["KiB", "MiB", "GiB", "TiB"] {
        if bytes <= 1024.0 {
            break;
        }
        bytes /= 1024.0;
        suffix = next;
    }

    format!("{:.2} {}", bytes, suffix)
}
