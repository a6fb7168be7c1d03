//! Axum endpoints for the client report and service rollup pipelines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use seodash_report::{section_value, Section};
use seodash_rollup::{list_cities, resolve_rollup};
use seodash_store::{CacheKey, InMemoryTtlCache, ReportCache, WorkbookRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "seodash-web";

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub registry_path: PathBuf,
    pub services_workbook_id: String,
    pub cache_ttl_secs: u64,
    pub port: u16,
    pub default_location: String,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            registry_path: std::env::var("SEODASH_REGISTRY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("workbooks.yaml")),
            services_workbook_id: std::env::var("SEODASH_SERVICES_WORKBOOK")
                .unwrap_or_else(|_| "services".to_string()),
            cache_ttl_secs: std::env::var("SEODASH_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            port: std::env::var("SEODASH_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            default_location: std::env::var("SEODASH_DEFAULT_LOCATION")
                .unwrap_or_else(|_| "USA".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: WebConfig,
    pub registry: WorkbookRegistry,
    pub cache: Arc<dyn ReportCache>,
}

impl AppState {
    pub fn from_config(config: WebConfig) -> anyhow::Result<Self> {
        let registry = WorkbookRegistry::load(&config.registry_path)?;
        let cache: Arc<dyn ReportCache> = Arc::new(InMemoryTtlCache::new(Duration::from_secs(
            config.cache_ttl_secs,
        )));
        Ok(Self {
            config,
            registry,
            cache,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ClientReportQuery {
    workbook_id: Option<String>,
    sections: Option<String>,
    cache_bust: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceRollupQuery {
    location: Option<String>,
    callback: Option<String>,
    action: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/client-report", get(client_report_handler))
        .route("/api/service-rollup", get(service_rollup_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = WebConfig::from_env();
    let port = config.port;
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn client_report_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientReportQuery>,
) -> Response {
    let workbook_id = query
        .workbook_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let Some(workbook_id) = workbook_id else {
        return error_envelope(anyhow!("missing required parameter: workbookId"));
    };
    let cache_bust = query
        .cache_bust
        .as_deref()
        .is_some_and(|v| !v.trim().is_empty());

    match build_client_report(&state, workbook_id, query.sections.as_deref(), cache_bust) {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => error_envelope(err),
    }
}

fn requested_sections(param: Option<&str>) -> Vec<Section> {
    match param {
        None => Section::ALL.to_vec(),
        Some(names) => {
            let mut sections = Vec::new();
            for name in names.split(',') {
                match Section::from_name(name) {
                    Some(section) if !sections.contains(&section) => sections.push(section),
                    Some(_) => {}
                    None => debug!(section = name.trim(), "ignoring unknown section name"),
                }
            }
            sections
        }
    }
}

fn build_client_report(
    state: &AppState,
    workbook_id: &str,
    sections_param: Option<&str>,
    cache_bust: bool,
) -> anyhow::Result<Value> {
    let workbook = state.registry.open(workbook_id)?;
    let mut payload = serde_json::Map::new();

    for section in requested_sections(sections_param) {
        let key = CacheKey::new(workbook_id, section.name());
        if !cache_bust {
            if let Some(cached) = state.cache.get(&key) {
                match serde_json::from_str::<Value>(&cached) {
                    Ok(value) => {
                        payload.insert(section.name().to_string(), value);
                        continue;
                    }
                    Err(_) => {
                        // A corrupt cache entry is a miss, not a failure.
                        warn!(key = %key.composite(), "dropping undecodable cache entry");
                        state.cache.expire(&key);
                    }
                }
            }
        }

        let value = section_value(&workbook, section)?;
        if let Ok(serialized) = serde_json::to_string(&value) {
            state.cache.put(key, serialized);
        }
        payload.insert(section.name().to_string(), value);
    }

    Ok(Value::Object(payload))
}

async fn service_rollup_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServiceRollupQuery>,
) -> Response {
    let callback = query.callback.as_deref();

    if query.action.as_deref() == Some("listCities") {
        return match state.registry.open(&state.config.services_workbook_id) {
            Ok(workbook) => respond(json!(list_cities(&workbook)), callback),
            Err(err) => respond(rollup_error_body(err.into()), callback),
        };
    }

    let location = query
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(&state.config.default_location)
        .to_string();

    match state.registry.open(&state.config.services_workbook_id) {
        Ok(workbook) => respond(json!(resolve_rollup(&workbook, &location)), callback),
        Err(err) => respond(rollup_error_body(err.into()), callback),
    }
}

/// Errors surface in-band; the transport status stays 200 so the dashboard
/// frontend always receives a parseable body.
fn error_envelope(err: anyhow::Error) -> Response {
    Json(json!({
        "error": err.to_string(),
        "stack": format!("{err:?}"),
    }))
    .into_response()
}

/// Endpoint B error bodies always carry empty catalogs so callers render
/// without null-checking.
fn rollup_error_body(err: anyhow::Error) -> Value {
    json!({
        "error": err.to_string(),
        "stack": format!("{err:?}"),
        "topServices": [],
        "newServices": [],
    })
}

fn respond(value: Value, callback: Option<&str>) -> Response {
    match callback.and_then(sanitize_callback) {
        Some(cb) => (
            [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
            format!("{cb}({value});"),
        )
            .into_response(),
        None => Json(value).into_response(),
    }
}

/// JSONP callback names are restricted to identifier-ish characters; anything
/// else falls back to a plain JSON response.
fn sanitize_callback(callback: &str) -> Option<String> {
    let trimmed = callback.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
    valid.then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::path::Path;
    use tower::ServiceExt;

    fn write_fixtures(dir: &Path) {
        let client_headers = [
            "Account Type",
            "Name",
            "Address",
            "City",
            "Website",
            "Review Score",
            "Review Count",
            "Site Speed",
            "Hours",
            "Top Keyword Positions",
            "Backlinks",
            "Ads Running",
            "Ads Link",
            "Facebook",
            "Instagram",
            "YouTube",
            "AI Notes",
        ];
        let on_page_headers = [
            "Account Type",
            "Website",
            "Page Score",
            "Broken Links",
            "Load Time",
            "Mobile Friendly",
        ];
        let clinic = json!({
            "tables": [
                {
                    "name": "Client & Competitor Info",
                    "headers": client_headers,
                    "rows": [
                        ["Client", "Our Clinic", "100 Main St", "Miami",
                         "https://www.clinic.example", 4.8, 120, null, "9-5",
                         7, 230, true, "https://ads.example", null, null, null, null],
                        ["Competitor", "Rival Clinic", "200 Side St", "Miami",
                         "https://rival.example", 4.1, 60, null, null,
                         2, 90, false, null, null, null, null, null]
                    ]
                },
                {
                    "name": "On-Page Insights",
                    "headers": on_page_headers,
                    "rows": [
                        ["Client", "https://clinic.example", 85,
                         "https://clinic.example/a, https://clinic.example/b",
                         "1.2s", "TRUE"]
                    ]
                }
            ]
        });
        let services_headers = [
            "Service", "Keyword", "City", "State", "Country",
            "Competition", "CPC", "February 2026", "January 2026",
        ];
        let services = json!({
            "tables": [{
                "name": "Services by City",
                "headers": services_headers,
                "rows": [
                    ["Botox", "botox miami", "Miami", "FL", "USA", 0.4, 3.0, 500, 400],
                    ["Botox", "botox tampa", "Tampa", "FL", "USA", 0.3, 2.0, 900, 950]
                ]
            }]
        });

        std::fs::create_dir_all(dir.join("fixtures")).unwrap();
        std::fs::write(
            dir.join("fixtures/clinic.json"),
            serde_json::to_vec_pretty(&clinic).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join("fixtures/services.json"),
            serde_json::to_vec_pretty(&services).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join("workbooks.yaml"),
            concat!(
                "workbooks:\n",
                "  - workbook_id: demo-clinic\n",
                "    display_name: Demo Clinic\n",
                "    path: fixtures/clinic.json\n",
                "  - workbook_id: services\n",
                "    display_name: Shared Services\n",
                "    path: fixtures/services.json\n",
            ),
        )
        .unwrap();
    }

    fn test_app(dir: &Path) -> Router {
        let config = WebConfig {
            registry_path: dir.join("workbooks.yaml"),
            services_workbook_id: "services".to_string(),
            cache_ttl_secs: 300,
            port: 0,
            default_location: "USA".to_string(),
        };
        app(AppState::from_config(config).unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_workbook_id_yields_in_band_error() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let (status, body) = get_json(test_app(dir.path()), "/api/client-report").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("workbookId"));
    }

    #[tokio::test]
    async fn unknown_workbook_yields_in_band_error() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let (status, body) =
            get_json(test_app(dir.path()), "/api/client-report?workbookId=nope").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().contains("nope"));
        assert!(body["stack"].is_string());
    }

    #[tokio::test]
    async fn client_report_returns_requested_sections() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let (status, body) = get_json(
            test_app(dir.path()),
            "/api/client-report?workbookId=demo-clinic&sections=dashboard,websiteStats",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dashboard"]["client"]["name"], "Our Clinic");
        assert_eq!(body["websiteStats"]["healthData"]["pageScore"], 85.0);
        assert_eq!(
            body["websiteStats"]["technicalSeoData"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert!(body.get("keywordsTable").is_none());
    }

    #[tokio::test]
    async fn full_report_covers_all_sections_with_empty_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let (_status, body) = get_json(
            test_app(dir.path()),
            "/api/client-report?workbookId=demo-clinic&cacheBust=1",
        )
        .await;
        for section in Section::ALL {
            assert!(body.get(section.name()).is_some(), "missing {}", section.name());
        }
        assert_eq!(body["keywordsTable"], json!({}));
        assert_eq!(body["webhooks"], json!({}));
    }

    #[tokio::test]
    async fn repeated_requests_are_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let config = WebConfig {
            registry_path: dir.path().join("workbooks.yaml"),
            services_workbook_id: "services".to_string(),
            cache_ttl_secs: 300,
            port: 0,
            default_location: "USA".to_string(),
        };
        let state = AppState::from_config(config).unwrap();
        let cache = state.cache.clone();
        let app = app(state);

        let (_s, first) = get_json(
            app.clone(),
            "/api/client-report?workbookId=demo-clinic&sections=dashboard",
        )
        .await;
        let key = CacheKey::new("demo-clinic", "dashboard");
        assert!(cache.get(&key).is_some());

        // Poison the cached entry; the next read must match it, not recompute.
        cache.put(key.clone(), "{\"client\":{\"name\":\"cached\"}}".to_string());
        let (_s, second) = get_json(
            app.clone(),
            "/api/client-report?workbookId=demo-clinic&sections=dashboard",
        )
        .await;
        assert_eq!(second["dashboard"]["client"]["name"], "cached");
        assert_ne!(first["dashboard"]["client"]["name"], "cached");

        // cacheBust recomputes and refreshes the entry.
        let (_s, busted) = get_json(
            app,
            "/api/client-report?workbookId=demo-clinic&sections=dashboard&cacheBust=1",
        )
        .await;
        assert_eq!(busted["dashboard"]["client"]["name"], "Our Clinic");
    }

    #[tokio::test]
    async fn service_rollup_defaults_to_configured_location() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let (status, body) = get_json(
            test_app(dir.path()),
            "/api/service-rollup?location=Miami,%20FL",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let top = body["topServices"].as_array().unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0]["service"], "Botox");
        assert_eq!(top[0]["totalVolume"], 500);
        assert_eq!(top[0]["trend"], 1);

        // Default location (USA) reads the country table, which is absent in
        // this fixture set, so catalogs come back empty rather than erroring.
        let (_s, body) = get_json(test_app(dir.path()), "/api/service-rollup").await;
        assert_eq!(body["topServices"], json!([]));
        assert_eq!(body["newServices"], json!([]));
    }

    #[tokio::test]
    async fn jsonp_callback_wraps_the_body() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let resp = test_app(dir.path())
            .oneshot(
                Request::builder()
                    .uri("/api/service-rollup?location=Miami,%20FL&callback=render")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/javascript"));
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("render("));
        assert!(text.ends_with(");"));
    }

    #[tokio::test]
    async fn hostile_callback_names_fall_back_to_plain_json() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let resp = test_app(dir.path())
            .oneshot(
                Request::builder()
                    .uri("/api/service-rollup?callback=%3Cscript%3E")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
    }

    #[tokio::test]
    async fn list_cities_action_returns_distinct_sorted_triples() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let (status, body) = get_json(
            test_app(dir.path()),
            "/api/service-rollup?action=listCities",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cities = body.as_array().unwrap();
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0]["city"], "Miami");
        assert_eq!(cities[1]["city"], "Tampa");
    }
}
