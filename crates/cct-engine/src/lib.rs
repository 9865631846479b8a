//! Refresh/render orchestration for the contest tracker.
//!
//! Two triggers drive recomputation: a data refresh (on demand or cron) that
//! re-runs the normalize/dedupe pipeline and swaps the whole collection in
//! one write, and a render pass (clock tick or web request) that derives the
//! view from the held collection at the current instant.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::Job;
use tracing::{info, warn};
use uuid::Uuid;

use cct_core::{
    assemble_contests, dedupe_and_sort, normalize, Contest, FilterSelection, Platform, ViewModel,
};
use cct_provider::{ClistProvider, ContestProvider, ProviderError};
use cct_store::{AnnotationStore, BackoffPolicy, HttpClientConfig, HttpFetcher};

pub use tokio_cron_scheduler::JobScheduler;

pub const CRATE_NAME: &str = "cct-engine";

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub page_limit: usize,
    pub clist_username: String,
    pub clist_api_key: String,
    pub annotations_path: PathBuf,
    pub allowed_platforms: Vec<Platform>,
    pub tick_period: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub refresh_cron: String,
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_or("CCT_BASE_URL", cct_provider::DEFAULT_BASE_URL),
            page_limit: std::env::var("CCT_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(cct_provider::DEFAULT_PAGE_LIMIT),
            clist_username: std::env::var("CLIST_USERNAME").unwrap_or_default(),
            clist_api_key: std::env::var("CLIST_API_KEY").unwrap_or_default(),
            annotations_path: std::env::var("CCT_ANNOTATIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./annotations.json")),
            allowed_platforms: Platform::ALL.to_vec(),
            tick_period: Duration::from_secs(
                std::env::var("CCT_TICK_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            ),
            http_timeout: Duration::from_secs(
                std::env::var("CCT_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
            user_agent: env_or("CCT_USER_AGENT", "cct-bot/0.1"),
            scheduler_enabled: std::env::var("CCT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            refresh_cron: env_or("CCT_REFRESH_CRON", "0 */10 * * * *"),
        }
    }

    /// Overlay the platform allow-list from a registry file when present; a
    /// missing file leaves the full built-in list in place.
    pub fn with_platforms_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(self);
        }
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading platform registry {}", path.display()))?;
        let parsed: PlatformsFile = serde_yaml::from_str(&yaml)
            .with_context(|| format!("parsing platform registry {}", path.display()))?;
        if !parsed.platforms.is_empty() {
            self.allowed_platforms = parsed.platforms;
        }
        Ok(self)
    }

    /// `Authorization` header value for clist.by, when credentials are set.
    pub fn authorization(&self) -> Option<String> {
        if self.clist_username.is_empty() || self.clist_api_key.is_empty() {
            return None;
        }
        Some(format!(
            "ApiKey {}:{}",
            self.clist_username, self.clist_api_key
        ))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct PlatformsFile {
    platforms: Vec<Platform>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub fetched: usize,
    pub normalized: usize,
    pub skipped: usize,
    /// True when a newer refresh started while this one was in flight; the
    /// result was discarded.
    pub superseded: bool,
}

#[derive(Debug, Default)]
struct Held {
    contests: Arc<Vec<Contest>>,
    skipped: usize,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Shared application state. The contest collection is replaced wholesale
/// under a single write lock, so a render pass never observes a half-updated
/// batch.
pub struct Tracker {
    provider: Arc<dyn ContestProvider>,
    allowed_platforms: Vec<Platform>,
    held: RwLock<Held>,
    selection: RwLock<FilterSelection>,
    annotations: Mutex<AnnotationStore>,
    last_error: RwLock<Option<String>>,
    refresh_generation: AtomicU64,
}

impl Tracker {
    pub fn new(
        provider: Arc<dyn ContestProvider>,
        allowed_platforms: Vec<Platform>,
        annotations: AnnotationStore,
    ) -> Self {
        Self {
            provider,
            allowed_platforms,
            held: RwLock::new(Held::default()),
            selection: RwLock::new(FilterSelection::new()),
            annotations: Mutex::new(annotations),
            last_error: RwLock::new(None),
            refresh_generation: AtomicU64::new(0),
        }
    }

    /// Fetch a fresh batch and install it atomically. On failure the held
    /// collection is untouched (last known good is never cleared) and the
    /// error message is retained for the presentation layer.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshSummary, ProviderError> {
        let run_id = Uuid::new_v4();
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let raw = match self.provider.fetch_raw_contests(run_id, now).await {
            Ok(raw) => raw,
            Err(err) => {
                *self.last_error.write().await = Some(err.to_string());
                return Err(err);
            }
        };

        let batch = normalize(&raw, &self.allowed_platforms);
        let contests = dedupe_and_sort(batch.contests);
        let summary = RefreshSummary {
            run_id,
            fetched: raw.len(),
            normalized: contests.len(),
            skipped: batch.skipped,
            superseded: false,
        };

        {
            let mut held = self.held.write().await;
            if self.refresh_generation.load(Ordering::SeqCst) != generation {
                return Ok(RefreshSummary {
                    superseded: true,
                    ..summary
                });
            }
            *held = Held {
                contests: Arc::new(contests),
                skipped: batch.skipped,
                refreshed_at: Some(now),
            };
        }
        *self.last_error.write().await = None;

        info!(
            %run_id,
            fetched = summary.fetched,
            normalized = summary.normalized,
            skipped = summary.skipped,
            "contest collection refreshed"
        );
        Ok(summary)
    }

    /// Render pass: a pure function of the held collection, the filter
    /// selection, the annotation map and `now`. Never fetches.
    pub async fn render(&self, now: DateTime<Utc>) -> ViewModel {
        let (contests, skipped) = {
            let held = self.held.read().await;
            (Arc::clone(&held.contests), held.skipped)
        };
        let selection = self.selection.read().await.clone();
        let annotations = self.annotations.lock().await.map().clone();
        assemble_contests(&contests, &selection, now, &annotations, skipped)
    }

    pub async fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.held.read().await.refreshed_at
    }

    pub async fn last_refresh_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn selection(&self) -> FilterSelection {
        self.selection.read().await.clone()
    }

    /// Add or remove one platform from the filter selection; returns the new
    /// selection.
    pub async fn toggle_platform(&self, platform: Platform) -> FilterSelection {
        let mut selection = self.selection.write().await;
        if !selection.remove(&platform) {
            selection.insert(platform);
        }
        selection.clone()
    }

    pub async fn clear_selection(&self) {
        self.selection.write().await.clear();
    }

    /// Flip the marked flag for one contest identity; persisted before this
    /// returns.
    pub async fn toggle_mark(&self, identity_key: &str) -> Result<bool> {
        self.annotations.lock().await.toggle(identity_key).await
    }

    pub async fn is_marked(&self, identity_key: &str) -> bool {
        self.annotations.lock().await.is_marked(identity_key)
    }
}

/// Wire a live tracker from configuration: authenticated fetcher, clist
/// provider, annotation store.
pub async fn tracker_from_config(config: &TrackerConfig) -> Result<Arc<Tracker>> {
    let fetcher = HttpFetcher::new(HttpClientConfig {
        timeout: config.http_timeout,
        user_agent: Some(config.user_agent.clone()),
        authorization: config.authorization(),
        backoff: BackoffPolicy::default(),
    })
    .context("building http fetcher")?;
    let provider = ClistProvider::new(fetcher, config.base_url.clone(), config.page_limit);
    let annotations = AnnotationStore::load(config.annotations_path.clone()).await;
    Ok(Arc::new(Tracker::new(
        Arc::new(provider),
        config.allowed_platforms.clone(),
        annotations,
    )))
}

/// Optional cron-driven background refresh mirroring the on-demand path.
pub async fn spawn_refresh_scheduler(tracker: Arc<Tracker>, cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_id, _lock| {
        let tracker = Arc::clone(&tracker);
        Box::pin(async move {
            if let Err(err) = tracker.refresh(Utc::now()).await {
                warn!(%err, "scheduled refresh failed, keeping previous contest list");
            }
        })
    })
    .context("building refresh job")?;
    scheduler.add(job).await.context("adding refresh job")?;
    scheduler.start().await.context("starting scheduler")?;
    Ok(scheduler)
}
