use crate::common::error::PipelineError;
use crate::common::types::{NormalizedRecord, TimeRange};
use crate::pipeline::daylight::{self, LightsPolicy, SunWindow, TideLevel};
use crate::pipeline::normalize::registry::LocationRegistry;
use crate::pipeline::normalize::zone::ZoneSpec;
use crate::pipeline::storage::RecordStore;
use axum::{
    extract::{Path, Query},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Shared handles for the read API
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn RecordStore>,
    pub registry: Arc<LocationRegistry>,
}

/// Error body returned by every read endpoint
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match err {
            PipelineError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "Read request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "earth_data",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub location: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

async fn records(
    Extension(state): Extension<ServerState>,
    Query(q): Query<RecordsQuery>,
) -> ApiResult<Vec<NormalizedRecord>> {
    let range = TimeRange::new(q.start, q.end)?;
    let key = state.registry.resolve(&q.location).key;
    Ok(Json(state.store.query(&key, &range).await?))
}

fn site_zone(state: &ServerState, key: &str) -> Result<(String, ZoneSpec), ApiError> {
    let site = state
        .registry
        .site(key)
        .ok_or_else(|| ApiError::not_found(format!("unknown location '{}'", key)))?;
    // Locations without a configured zone are reported in UTC
    let zone = site.zone.unwrap_or(ZoneSpec::Named(chrono_tz::UTC));
    Ok((site.key.clone(), zone))
}

/// One day either way
const MAX_ON_OFFSET_MINUTES: i64 = 24 * 60;

#[derive(Debug, Deserialize)]
pub struct SunQuery {
    /// Local date; defaults to today in the location's zone
    pub date: Option<NaiveDate>,
    /// Instant to evaluate the lights rule at; defaults to now
    pub at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub on_offset: i64,
    /// Local `HH:MM` after which lights are forced out
    pub hard_off: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SunResponse {
    #[serde(flatten)]
    pub window: SunWindow,
    pub lights_out: Option<bool>,
}

async fn sun(
    Extension(state): Extension<ServerState>,
    Path(key): Path<String>,
    Query(q): Query<SunQuery>,
) -> ApiResult<SunResponse> {
    let (key, zone) = site_zone(&state, &key)?;
    if !(-MAX_ON_OFFSET_MINUTES..=MAX_ON_OFFSET_MINUTES).contains(&q.on_offset) {
        return Err(ApiError::bad_request(format!(
            "on_offset must be within ±{} minutes",
            MAX_ON_OFFSET_MINUTES
        )));
    }
    let at = q.at.unwrap_or_else(Utc::now);
    let date = q.date.unwrap_or_else(|| zone.local_date(at));
    let hard_off = match q.hard_off.as_deref() {
        Some(text) => Some(
            NaiveTime::parse_from_str(text, "%H:%M")
                .map_err(|_| ApiError::bad_request(format!("hard_off '{}' is not HH:MM", text)))?,
        ),
        None => None,
    };
    let window = daylight::sun_window(state.store.as_ref(), &key, &zone, date)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no sun data for '{}' on {}", key, date)))?;
    let policy = LightsPolicy {
        on_offset_minutes: q.on_offset,
        hard_off,
    };
    let lights_out = policy.lights_out(&window, &zone, at);
    Ok(Json(SunResponse { window, lights_out }))
}

#[derive(Debug, Deserialize)]
pub struct TideQuery {
    pub at: Option<DateTime<Utc>>,
}

async fn latest_tide(
    Extension(state): Extension<ServerState>,
    Path(key): Path<String>,
    Query(q): Query<TideQuery>,
) -> ApiResult<TideLevel> {
    let (key, _) = site_zone(&state, &key)?;
    let at = q.at.unwrap_or_else(Utc::now);
    let level = daylight::tide_level(state.store.as_ref(), &key, at)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no tide reading for '{}' at or before {}", key, at)))?;
    Ok(Json(level))
}

/// Create the HTTP router with all read routes
pub fn create_server(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/records", get(records))
        .route("/locations/:key/sun", get(sun))
        .route("/locations/:key/tide/latest", get(latest_tide))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: ServerState, port: u16) -> anyhow::Result<()> {
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Read API listening on http://localhost:{}", port);
    println!("🌊 Read API running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");

    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::RecordKind;
    use crate::pipeline::storage::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn state() -> ServerState {
        let store = InMemoryStore::default();
        store
            .persist(&[
                NormalizedRecord::tide_height("phoenix", ts("2024-06-01T17:00:00Z"), 1.2),
                NormalizedRecord::event("phoenix", ts("2024-06-01T12:48:00Z"), RecordKind::Sunrise),
                NormalizedRecord::event("phoenix", ts("2024-06-02T03:32:00Z"), RecordKind::Sunset),
            ])
            .await
            .unwrap();
        let mut registry = LocationRegistry::new();
        registry
            .add_site("phoenix", ZoneSpec::parse("US/Arizona"), &["9414290"])
            .unwrap();
        ServerState {
            store: Arc::new(store),
            registry: Arc::new(registry),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_records_endpoint_resolves_provider_ids() {
        let app = create_server(state().await);
        let (status, body) = get_json(
            app,
            "/records?location=9414290&start=2024-06-01T00:00:00Z&end=2024-06-02T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let kinds: Vec<_> = body.as_array().unwrap().iter().map(|r| r["kind"].clone()).collect();
        assert_eq!(kinds, vec!["sunrise", "tide-height"]);
    }

    #[tokio::test]
    async fn test_reversed_range_is_bad_request() {
        let app = create_server(state().await);
        let (status, body) = get_json(
            app,
            "/records?location=phoenix&start=2024-06-02T00:00:00Z&end=2024-06-01T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("precedes"));
    }

    #[tokio::test]
    async fn test_sun_endpoint_reports_lights() {
        let app = create_server(state().await);
        let (status, body) = get_json(
            app,
            "/locations/phoenix/sun?date=2024-06-01&at=2024-06-01T20:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sunrise"], "2024-06-01T12:48:00Z");
        assert_eq!(body["lights_out"], true);
        assert_eq!(body["from_previous_day"], false);
    }

    #[tokio::test]
    async fn test_sun_offset_out_of_range_is_bad_request() {
        let app = create_server(state().await);
        let (status, body) = get_json(
            app,
            "/locations/phoenix/sun?date=2024-06-01&on_offset=9223372036854775807",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("on_offset"));

        let app = create_server(state().await);
        let (status, _) = get_json(
            app,
            "/locations/phoenix/sun?date=2024-06-01&at=2024-06-01T20:00:00Z&on_offset=-1440",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_location_is_not_found() {
        let app = create_server(state().await);
        let (status, _) = get_json(app, "/locations/tucson/tide/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_latest_tide() {
        let app = create_server(state().await);
        let (status, body) = get_json(app, "/locations/phoenix/tide/latest?at=2024-06-01T18:00:00Z").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["height_m"], 1.2);
        assert_eq!(body["level"], 1);
    }
}
