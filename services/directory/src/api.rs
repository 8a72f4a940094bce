use crate::config::ApiConfig;
use crate::cursor::Cursor;
use crate::directory::DirectoryService;
use crate::error::DirectoryError;
use crate::ingest::IngestPipeline;
use crate::store::{Profile, ProfileStore};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<DirectoryService>,
    pub ingest: Arc<IngestPipeline>,
    pub store: Arc<dyn ProfileStore>,
    /// Name of the path parameter carrying the handle
    pub path_parameter: Arc<str>,
}

/// Query parameters for the listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Cursor returned by the previous page
    #[serde(rename = "lastKey")]
    pub last_key: Option<String>,
}

/// Listing response
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Cursor for the next page, empty when there is none
    #[serde(rename = "lastKey")]
    pub last_key: String,
    pub users: Vec<Profile>,
}

/// Lookup response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub profile_image_url: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let lookup_route = format!("/api/v1/users/:{}", config.path_parameter);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/users", get(list_profiles))
        .route(&lookup_route, get(get_profile))
        .route("/api/v1/users/", get(get_profile_without_handle))
        .route("/api/v1/scrape", post(scrape_profile))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "profile-directory"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Store readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "store": "disconnected"
                })),
            )
        }
    }
}

/// List profiles, one page per call
#[instrument(skip(state))]
async fn list_profiles(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListResponse>, DirectoryError> {
    let cursor = params
        .last_key
        .filter(|token| !token.is_empty())
        .map(Cursor::from_token);

    let listing = state.directory.list_profiles(cursor.as_ref()).await?;

    Ok(Json(ListResponse {
        last_key: listing
            .next_cursor
            .map(Cursor::into_token)
            .unwrap_or_default(),
        users: listing.profiles,
    }))
}

/// Get the profile image for one handle
#[instrument(skip(state, params))]
async fn get_profile(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Json<LookupResponse>, DirectoryError> {
    let handle = params
        .get(state.path_parameter.as_ref())
        .map(String::as_str)
        .unwrap_or_default();

    lookup(&state, handle).await
}

/// `/api/v1/users/` carries an empty handle
async fn get_profile_without_handle(
    State(state): State<AppState>,
) -> Result<Json<LookupResponse>, DirectoryError> {
    lookup(&state, "").await
}

async fn lookup(state: &AppState, handle: &str) -> Result<Json<LookupResponse>, DirectoryError> {
    let profile = state.directory.get_profile(handle).await?;

    Ok(Json(LookupResponse {
        profile_image_url: profile.profile_image_url,
    }))
}

/// Scrape and store the profile image for the handle in the request body
#[instrument(skip(state, payload))]
async fn scrape_profile(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Profile>, DirectoryError> {
    let handle = match payload {
        Ok(Json(body)) => body
            .get("handle")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable scrape request body");
            String::new()
        }
    };

    let profile = state.ingest.ingest(&handle).await?;
    Ok(Json(profile))
}

/// Start the directory API server, running until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting directory API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
