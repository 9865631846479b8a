//! Durable annotation storage + HTTP fetch utilities for the contest tracker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cct_core::AnnotationMap;
use reqwest::{header, StatusCode};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cct-store";

/// File-backed store for per-contest "marked" flags, keyed by the contest
/// identity string. Read once at startup; every toggle rewrites the file
/// through a temp-file rename, so a crash loses at most the in-flight write.
#[derive(Debug)]
pub struct AnnotationStore {
    path: PathBuf,
    map: AnnotationMap,
}

impl AnnotationStore {
    /// Load persisted annotations. A missing file is an empty map; a corrupt
    /// or unreadable one falls back to an empty map with a warning, never an
    /// error.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<AnnotationMap>(&text) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), %err, "annotation file corrupt, starting empty");
                    AnnotationMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => AnnotationMap::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "annotation file unreadable, starting empty");
                AnnotationMap::new()
            }
        };
        Self { path, map }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn map(&self) -> &AnnotationMap {
        &self.map
    }

    /// Absent entries default to unmarked.
    pub fn is_marked(&self, identity_key: &str) -> bool {
        self.map.get(identity_key).copied().unwrap_or(false)
    }

    pub fn marked_count(&self) -> usize {
        self.map.values().filter(|flag| **flag).count()
    }

    /// Flip the flag for one identity and persist the whole map before
    /// returning the new value.
    pub async fn toggle(&mut self, identity_key: &str) -> anyhow::Result<bool> {
        let flag = !self.is_marked(identity_key);
        self.map.insert(identity_key.to_string(), flag);
        self.persist().await?;
        Ok(flag)
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.map).context("encoding annotation map")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating annotation directory {}", parent.display()))?;
            }
        }

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp annotation file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp annotation file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp annotation file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp annotation file {} -> {}",
                        temp_path.display(),
                        self.path.display()
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Sent verbatim as the `Authorization` header when present, e.g.
    /// `ApiKey <username>:<api_key>` for clist.by.
    pub authorization: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            authorization: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    authorization: Option<String>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            authorization: config.authorization,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let mut request = self.client.get(url);
            if let Some(auth) = &self.authorization {
                request = request.header(header::AUTHORIZATION, auth.as_str());
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}
