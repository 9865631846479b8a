//! Core domain model and pure scheduling engine for the contest tracker.
//!
//! Everything here is a function of its inputs: normalization of the raw
//! upstream feed, dedupe/ordering, lifecycle classification against an
//! observation instant, platform filtering, and view assembly. I/O lives in
//! the store/provider/engine crates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cct-core";

/// Supported contest platforms. Declaration order is the authoritative
/// tie-break order when an upstream label matches more than one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    CodeForces,
    CodeChef,
    LeetCode,
    AtCoder,
    TopCoder,
    HackerRank,
    HackerEarth,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::CodeForces,
        Platform::CodeChef,
        Platform::LeetCode,
        Platform::AtCoder,
        Platform::TopCoder,
        Platform::HackerRank,
        Platform::HackerEarth,
    ];

    /// Lowercase token matched against upstream platform labels.
    pub fn token(self) -> &'static str {
        match self {
            Platform::CodeForces => "codeforces",
            Platform::CodeChef => "codechef",
            Platform::LeetCode => "leetcode",
            Platform::AtCoder => "atcoder",
            Platform::TopCoder => "topcoder",
            Platform::HackerRank => "hackerrank",
            Platform::HackerEarth => "hackerearth",
        }
    }

    /// Canonical display name shown to users.
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::CodeForces => "CodeForces",
            Platform::CodeChef => "CodeChef",
            Platform::LeetCode => "LeetCode",
            Platform::AtCoder => "AtCoder",
            Platform::TopCoder => "TopCoder",
            Platform::HackerRank => "HackerRank",
            Platform::HackerEarth => "HackerEarth",
        }
    }

    pub fn from_token(token: &str) -> Option<Platform> {
        Platform::ALL
            .into_iter()
            .find(|p| p.token() == token.to_ascii_lowercase())
    }

    /// Case-insensitive substring match of an upstream label (for example
    /// `"codeforces.com"`) against the allow-list; the first hit in `allow`
    /// order wins.
    pub fn match_label(label: &str, allow: &[Platform]) -> Option<Platform> {
        let lower = label.to_ascii_lowercase();
        allow.iter().copied().find(|p| lower.contains(p.token()))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Provider -> core handoff contract. The start timestamp stays a raw string
/// until normalization so a bad record fails alone, never the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContestRecord {
    pub id: String,
    pub name: String,
    pub platform_label: String,
    pub start_time: String,
    pub duration_seconds: i64,
    pub detail_url: String,
}

/// Canonical contest entity, immutable once constructed. `platform` is
/// always a member of the allow-list used during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contest {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub detail_url: String,
}

impl Contest {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::seconds(self.duration_seconds as i64)
    }

    pub fn identity(&self) -> ContestIdentity {
        ContestIdentity {
            id: self.id.clone(),
            start_time: self.start_time,
        }
    }
}

/// Composite key disambiguating contests across feed refreshes: upstream ids
/// may be reused, pairing with the start time catches reschedules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContestIdentity {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

impl ContestIdentity {
    /// String form used as the annotation key: `<id>-<RFC3339 start>`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}",
            self.id,
            self.start_time.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Lifecycle of a contest at one observation instant. Derived only, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Upcoming,
    Live,
    Ended,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Upcoming => "Upcoming",
            LifecycleState::Live => "Live",
            LifecycleState::Ended => "Ended",
        };
        f.write_str(label)
    }
}

/// Marked flags keyed by the contest identity string.
pub type AnnotationMap = BTreeMap<String, bool>;

/// User-selected platform filter; empty means "show all".
pub type FilterSelection = BTreeSet<Platform>;

/// Result of normalizing one raw batch: the surviving contests plus how many
/// records were dropped (unknown platform, bad timestamp, negative duration).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub contests: Vec<Contest>,
    pub skipped: usize,
}

/// Convert a raw batch into canonical contests. Records that match no allowed
/// platform or fail value parsing are dropped silently and counted.
pub fn normalize(records: &[RawContestRecord], allow: &[Platform]) -> NormalizedBatch {
    let mut contests = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for record in records {
        match normalize_record(record, allow) {
            Some(contest) => contests.push(contest),
            None => skipped += 1,
        }
    }
    NormalizedBatch { contests, skipped }
}

fn normalize_record(record: &RawContestRecord, allow: &[Platform]) -> Option<Contest> {
    let platform = Platform::match_label(&record.platform_label, allow)?;
    let start_time = parse_start_time(&record.start_time)?;
    let duration_seconds = u64::try_from(record.duration_seconds).ok()?;
    Some(Contest {
        id: record.id.clone(),
        name: record.name.clone(),
        platform,
        start_time,
        duration_seconds,
        detail_url: record.detail_url.clone(),
    })
}

/// Accepts RFC3339 stamps and the provider's offset-less
/// `YYYY-MM-DDTHH:MM:SS` form, which clist.by emits in UTC.
pub fn parse_start_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Drop duplicate identities (the later record wins, a refreshed feed sends
/// fresher rows last) and order by start time, ties broken by id.
pub fn dedupe_and_sort(contests: Vec<Contest>) -> Vec<Contest> {
    let mut slot_by_identity: HashMap<ContestIdentity, usize> =
        HashMap::with_capacity(contests.len());
    let mut kept: Vec<Option<Contest>> = Vec::with_capacity(contests.len());
    for contest in contests {
        match slot_by_identity.get(&contest.identity()) {
            Some(&slot) => kept[slot] = Some(contest),
            None => {
                slot_by_identity.insert(contest.identity(), kept.len());
                kept.push(Some(contest));
            }
        }
    }
    let mut out: Vec<Contest> = kept.into_iter().flatten().collect();
    out.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Lifecycle state and display string at `now`. Boundary policy: the start
/// instant is Live, the end instant is Ended.
pub fn classify(contest: &Contest, now: DateTime<Utc>) -> (LifecycleState, String) {
    let start = contest.start_time;
    let end = contest.end_time();
    if now < start {
        (LifecycleState::Upcoming, format_countdown(start - now))
    } else if now < end {
        (LifecycleState::Live, "Live Now".to_string())
    } else {
        (LifecycleState::Ended, "Ended".to_string())
    }
}

// Largest leading units of the remaining time, floor divisions throughout.
fn format_countdown(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

/// Row label for a contest's length, coarser than the countdown.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if hours > 24 {
        format!("{}d {}h", hours / 24, hours % 24)
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Subsequence whose platform is in `selection`, original order preserved.
/// An empty selection is the identity.
pub fn filter_by_selection(contests: &[Contest], selection: &FilterSelection) -> Vec<Contest> {
    if selection.is_empty() {
        return contests.to_vec();
    }
    contests
        .iter()
        .filter(|c| selection.contains(&c.platform))
        .cloned()
        .collect()
}

/// One rendered schedule row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContestRow {
    pub identity_key: String,
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub platform_name: String,
    pub start_time: DateTime<Utc>,
    pub start_display: String,
    pub duration_seconds: u64,
    pub duration_display: String,
    pub detail_url: String,
    pub state: LifecycleState,
    pub display: String,
    pub marked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewCounts {
    /// Contests surviving normalization and dedupe, before filtering.
    pub total: usize,
    /// Contests after applying the filter selection.
    pub shown: usize,
    /// Marked contests within the filtered set.
    pub marked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewModel {
    pub rows: Vec<ContestRow>,
    pub counts: ViewCounts,
    pub skipped_records: usize,
}

/// Full pipeline: normalize -> dedupe/sort -> filter -> classify + annotate.
/// Deterministic given identical inputs, including `now`.
pub fn assemble(
    records: &[RawContestRecord],
    allow: &[Platform],
    selection: &FilterSelection,
    now: DateTime<Utc>,
    annotations: &AnnotationMap,
) -> ViewModel {
    let batch = normalize(records, allow);
    let contests = dedupe_and_sort(batch.contests);
    assemble_contests(&contests, selection, now, annotations, batch.skipped)
}

/// Render pass over an already-normalized collection: the clock-tick path,
/// which never re-fetches or re-normalizes.
pub fn assemble_contests(
    contests: &[Contest],
    selection: &FilterSelection,
    now: DateTime<Utc>,
    annotations: &AnnotationMap,
    skipped_records: usize,
) -> ViewModel {
    let shown = filter_by_selection(contests, selection);
    let mut marked_count = 0usize;
    let rows: Vec<ContestRow> = shown
        .into_iter()
        .map(|contest| {
            let (state, display) = classify(&contest, now);
            let identity_key = contest.identity().key();
            let marked = annotations.get(&identity_key).copied().unwrap_or(false);
            if marked {
                marked_count += 1;
            }
            ContestRow {
                identity_key,
                platform_name: contest.platform.display_name().to_string(),
                start_display: contest
                    .start_time
                    .format("%b %d, %Y %H:%M UTC")
                    .to_string(),
                duration_display: format_duration(contest.duration_seconds),
                id: contest.id,
                name: contest.name,
                platform: contest.platform,
                start_time: contest.start_time,
                duration_seconds: contest.duration_seconds,
                detail_url: contest.detail_url,
                state,
                display,
                marked,
            }
        })
        .collect();
    ViewModel {
        counts: ViewCounts {
            total: contests.len(),
            shown: rows.len(),
            marked: marked_count,
        },
        rows,
        skipped_records,
    }
}
