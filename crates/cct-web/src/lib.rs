//! Axum + Askama web UI for the contest tracker.
//!
//! The page polls the schedule table partial every second, which is how the
//! clock tick reaches the browser: each poll is one render pass over the
//! held collection, no re-fetching involved.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;

use cct_core::{Platform, ViewModel};
use cct_engine::Tracker;

pub const CRATE_NAME: &str = "cct-web";

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self { tracker }
    }
}

#[derive(Debug, Clone)]
struct PlatformButton {
    token: &'static str,
    name: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    platforms: Vec<PlatformButton>,
    any_selected: bool,
    error: Option<String>,
}

#[derive(Template)]
#[template(path = "schedule_table_partial.html")]
struct ScheduleTablePartialTemplate {
    view: ViewModel,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/schedule/table", get(schedule_table_handler))
        .route("/api/schedule", get(api_schedule_handler))
        .route("/api/refresh", post(api_refresh_handler))
        .route("/api/filters/clear", post(api_filters_clear_handler))
        .route("/api/filters/{token}", post(api_filters_toggle_handler))
        .route("/api/contests/{identity_key}/mark", post(api_mark_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(tracker: Arc<Tracker>) -> anyhow::Result<()> {
    let port: u16 = std::env::var("CCT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(tracker))).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let selection = state.tracker.selection().await;
    let platforms = Platform::ALL
        .into_iter()
        .map(|p| PlatformButton {
            token: p.token(),
            name: p.display_name(),
            selected: selection.contains(&p),
        })
        .collect::<Vec<_>>();
    render_html(IndexTemplate {
        any_selected: !selection.is_empty(),
        platforms,
        error: state.tracker.last_refresh_error().await,
    })
}

async fn schedule_table_handler(State(state): State<Arc<AppState>>) -> Response {
    let view = state.tracker.render(Utc::now()).await;
    render_html(ScheduleTablePartialTemplate { view })
}

async fn api_schedule_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.tracker.render(Utc::now()).await).into_response()
}

async fn api_refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.tracker.refresh(Utc::now()).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn api_filters_toggle_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(token): AxumPath<String>,
) -> Response {
    let Some(platform) = Platform::from_token(&token) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown platform `{token}`") })),
        )
            .into_response();
    };
    let selection = state.tracker.toggle_platform(platform).await;
    let tokens = selection.iter().map(|p| p.token()).collect::<Vec<_>>();
    Json(json!({ "selected": tokens })).into_response()
}

async fn api_filters_clear_handler(State(state): State<Arc<AppState>>) -> Response {
    state.tracker.clear_selection().await;
    Json(json!({ "selected": [] })).into_response()
}

async fn api_mark_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(identity_key): AxumPath<String>,
) -> Response {
    match state.tracker.toggle_mark(&identity_key).await {
        Ok(marked) => {
            Json(json!({ "identity_key": identity_key, "marked": marked })).into_response()
        }
        Err(err) => server_error(err),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use cct_core::RawContestRecord;
    use cct_provider::{ContestProvider, StaticProvider};
    use cct_store::AnnotationStore;
    use chrono::Duration;
    use http_body_util::BodyExt;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn raw(id: &str, label: &str, start: chrono::DateTime<Utc>, duration: i64) -> RawContestRecord {
        RawContestRecord {
            id: id.to_string(),
            name: format!("Contest {id}"),
            platform_label: label.to_string(),
            start_time: start.to_rfc3339(),
            duration_seconds: duration,
            detail_url: format!("https://example.com/{id}"),
        }
    }

    async fn seeded_app() -> (Router, TempDir) {
        let now = Utc::now();
        let provider: Arc<dyn ContestProvider> = Arc::new(StaticProvider::new(vec![
            raw("1", "codeforces.com", now + Duration::hours(2), 7200),
            raw("2", "codechef.com", now - Duration::minutes(10), 3600),
        ]));
        let dir = tempdir().expect("tempdir");
        let annotations = AnnotationStore::load(dir.path().join("annotations.json")).await;
        let tracker = Arc::new(Tracker::new(provider, Platform::ALL.to_vec(), annotations));
        tracker.refresh(Utc::now()).await.expect("seed refresh");
        (app(AppState::new(tracker)), dir)
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn index_page_renders_header_and_filters() {
        let (app, _dir) = seeded_app().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Contest Tracker"));
        assert!(text.contains("CodeForces"));
        assert!(text.contains("HackerEarth"));
    }

    #[tokio::test]
    async fn schedule_table_partial_shows_live_and_footer_counts() {
        let (app, _dir) = seeded_app().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/schedule/table")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Live Now"));
        assert!(text.contains("Showing 2 of 2 upcoming contests"));
    }

    #[tokio::test]
    async fn schedule_json_carries_rows_and_counts() {
        let (app, _dir) = seeded_app().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/schedule")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(resp).await).expect("json body");
        assert_eq!(value["counts"]["total"], 2);
        assert_eq!(value["rows"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn refresh_endpoint_reports_a_summary() {
        let (app, _dir) = seeded_app().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(resp).await).expect("json body");
        assert_eq!(value["fetched"], 2);
        assert_eq!(value["superseded"], false);
    }

    #[tokio::test]
    async fn filter_toggle_accepts_known_tokens_only() {
        let (app, _dir) = seeded_app().await;
        let ok = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/filters/atcoder")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(ok).await).expect("json body");
        assert_eq!(value["selected"], serde_json::json!(["atcoder"]));

        let missing = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/filters/codewars")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mark_toggle_round_trips_through_the_store() {
        let (app, _dir) = seeded_app().await;
        let uri = "/api/contests/1-2026-08-07T10:00:00Z/mark";

        let first = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(first).await).expect("json body");
        assert_eq!(value["marked"], true);

        let second = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&body_text(second).await).expect("json body");
        assert_eq!(value["marked"], false);
    }
}
