//! Upstream contest feed providers.
//!
//! The transport seam of the refresh pipeline: a provider returns one full
//! raw batch or a failure, never a partial list. The core engine does the
//! rest (normalization, dedupe, classification).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use cct_core::RawContestRecord;
use cct_store::{FetchError, HttpFetcher};

pub const CRATE_NAME: &str = "cct-provider";

pub const DEFAULT_BASE_URL: &str = "https://clist.by/api/v4/contest/";
pub const DEFAULT_PAGE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("upstream payload malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ContestProvider: Send + Sync {
    /// Fetch the forward-looking raw batch as observed at `now`.
    async fn fetch_raw_contests(
        &self,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RawContestRecord>, ProviderError>;
}

// One upstream contest object. `id` arrives as a JSON number; kept loose so
// a string id from a future API revision still decodes.
#[derive(Debug, Clone, Deserialize)]
struct ClistContest {
    id: JsonValue,
    event: String,
    resource: String,
    start: String,
    duration: i64,
    href: String,
}

fn stringify_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode a clist.by v4 page body into raw records. A missing or non-array
/// `objects` member is a malformed payload; individual undecodable objects
/// are skipped with a warning.
pub fn decode_payload(body: &[u8]) -> Result<Vec<RawContestRecord>, ProviderError> {
    let page: JsonValue =
        serde_json::from_slice(body).map_err(|err| ProviderError::Malformed(err.to_string()))?;
    let objects = page
        .get("objects")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| ProviderError::Malformed("missing `objects` array".to_string()))?;

    let mut records = Vec::with_capacity(objects.len());
    for object in objects {
        let contest = match serde_json::from_value::<ClistContest>(object.clone()) {
            Ok(contest) => contest,
            Err(err) => {
                warn!(%err, "skipping undecodable upstream contest object");
                continue;
            }
        };
        let Some(id) = stringify_id(&contest.id) else {
            warn!("skipping upstream contest object with unusable id");
            continue;
        };
        records.push(RawContestRecord {
            id,
            name: contest.event,
            platform_label: contest.resource,
            start_time: contest.start,
            duration_seconds: contest.duration,
            detail_url: contest.href,
        });
    }
    Ok(records)
}

/// Live provider against a clist.by-compatible endpoint.
#[derive(Debug)]
pub struct ClistProvider {
    fetcher: HttpFetcher,
    base_url: String,
    page_limit: usize,
}

impl ClistProvider {
    pub fn new(fetcher: HttpFetcher, base_url: impl Into<String>, page_limit: usize) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            page_limit,
        }
    }

    /// Forward-looking window ordered by start; the engine re-sorts anyway,
    /// the upstream ordering just keeps the page limit meaningful.
    pub fn query_url(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}?limit={}&start__gte={}&order_by=start",
            self.base_url,
            self.page_limit,
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[async_trait]
impl ContestProvider for ClistProvider {
    async fn fetch_raw_contests(
        &self,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RawContestRecord>, ProviderError> {
        let url = self.query_url(now);
        let response = self.fetcher.fetch_bytes(run_id, &url).await?;
        decode_payload(&response.body)
    }
}

/// Fixed in-memory batch, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    records: Vec<RawContestRecord>,
}

impl StaticProvider {
    pub fn new(records: Vec<RawContestRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl ContestProvider for StaticProvider {
    async fn fetch_raw_contests(
        &self,
        _run_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<Vec<RawContestRecord>, ProviderError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_maps_upstream_fields_and_stringifies_numeric_ids() {
        let body = br#"{
            "objects": [
                {
                    "id": 1842,
                    "event": "Codeforces Round 999",
                    "resource": "codeforces.com",
                    "start": "2026-08-07T14:00:00",
                    "duration": 7200,
                    "href": "https://codeforces.com/contests/1842"
                }
            ]
        }"#;
        let records = decode_payload(body).expect("decode");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1842");
        assert_eq!(records[0].name, "Codeforces Round 999");
        assert_eq!(records[0].platform_label, "codeforces.com");
        assert_eq!(records[0].start_time, "2026-08-07T14:00:00");
        assert_eq!(records[0].duration_seconds, 7200);
        assert_eq!(records[0].detail_url, "https://codeforces.com/contests/1842");
    }

    #[test]
    fn decode_skips_undecodable_objects_but_keeps_the_rest() {
        let body = br#"{
            "objects": [
                {"id": null, "event": "x", "resource": "y", "start": "z", "duration": 1, "href": "u"},
                {"event": "missing fields"},
                {
                    "id": "abc",
                    "event": "AtCoder Beginner Contest",
                    "resource": "atcoder.jp",
                    "start": "2026-08-08T12:00:00",
                    "duration": 6000,
                    "href": "https://atcoder.jp/contests/abc"
                }
            ]
        }"#;
        let records = decode_payload(body).expect("decode");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "abc");
    }

    #[test]
    fn decode_rejects_malformed_top_level_payloads() {
        assert!(matches!(
            decode_payload(b"not json"),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(
            decode_payload(br#"{"results": []}"#),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(
            decode_payload(br#"{"objects": 7}"#),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn static_provider_returns_its_batch_verbatim() {
        let record = RawContestRecord {
            id: "1".to_string(),
            name: "Weekly Contest".to_string(),
            platform_label: "leetcode.com".to_string(),
            start_time: "2026-08-09T02:30:00".to_string(),
            duration_seconds: 5400,
            detail_url: "https://leetcode.com/contest/weekly".to_string(),
        };
        let provider = StaticProvider::new(vec![record.clone()]);
        let records = provider
            .fetch_raw_contests(Uuid::new_v4(), Utc::now())
            .await
            .expect("static fetch");
        assert_eq!(records, vec![record]);
    }
}
