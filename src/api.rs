use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::commands::{
    remove_destination, setup_destination, ChannelDirectory, CommandError, RecentEvents,
    RemoveReply, SetupReply, SetupRequest,
};
use crate::notify::AlertMessage;
use crate::pipeline::{Pipeline, TickPhase};
use crate::registry::{Destination, FocusRegion, Registry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub recent: Arc<RecentEvents>,
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Earthquake alert bot is running" }))
        .route("/health", get(|| async { "OK" }))
        .route("/ping", get(|| async { "PONG" }))
        .route("/status", get(status))
        .route("/destinations", get(list_destinations))
        .route(
            "/destinations/{community_id}",
            axum::routing::put(put_destination).delete(delete_destination),
        )
        .route("/recent", get(recent))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// JSON error body: `{"error": "..."}`.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        let code = match e {
            CommandError::InvalidChannel(_) | CommandError::InvalidMagnitude => {
                StatusCode::BAD_REQUEST
            }
            CommandError::CreateChannel(..) | CommandError::Lookup(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError(code, e.to_string())
    }
}

#[derive(Serialize)]
struct StatusOut {
    phase: TickPhase,
    dedup_size: usize,
    registry_connected: bool,
    pending_ops: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    Json(StatusOut {
        phase: state.pipeline.phase(),
        dedup_size: state.pipeline.dedup().size(),
        registry_connected: state.registry.is_connected(),
        pending_ops: state.registry.pending_len(),
    })
}

async fn list_destinations(State(state): State<AppState>) -> Json<Vec<Destination>> {
    let mut out: Vec<Destination> = state.registry.get_all().await.into_values().collect();
    out.sort_by(|a, b| a.community_id.cmp(&b.community_id));
    Json(out)
}

#[derive(Deserialize)]
struct SetupBody {
    #[serde(default)]
    community_name: String,
    channel: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    min_magnitude: Option<f64>,
}

fn parse_region(raw: Option<&str>) -> Result<Option<FocusRegion>, ApiError> {
    raw.map(|s| s.parse::<FocusRegion>())
        .transpose()
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))
}

async fn put_destination(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Json(body): Json<SetupBody>,
) -> Result<Json<SetupReply>, ApiError> {
    let req = SetupRequest {
        community_id,
        community_name: body.community_name,
        channel: body.channel,
        region: parse_region(body.region.as_deref())?,
        min_magnitude: body.min_magnitude,
    };
    let reply = setup_destination(&state.registry, state.directory.as_ref(), req).await?;
    Ok(Json(reply))
}

async fn delete_destination(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Json<RemoveReply> {
    Json(remove_destination(&state.registry, &community_id).await)
}

#[derive(Deserialize)]
struct RecentQuery {
    count: Option<u8>,
    region: Option<String>,
}

async fn recent(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<AlertMessage>, ApiError> {
    let region = parse_region(q.region.as_deref())?;
    match state.recent.query(q.count, region).await {
        Ok(msg) => Ok(Json(msg)),
        Err(e) => {
            tracing::warn!(error = %e, "recent events query failed");
            Err(ApiError(
                StatusCode::BAD_GATEWAY,
                "Could not fetch earthquake data, please try again later.".to_string(),
            ))
        }
    }
}

/// Periodically GET our own public URL so free hosting tiers don't idle us out.
pub fn spawn_keep_alive(url: String, period: Duration, client: reqwest::Client) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // Skip the immediate first tick; the server just started.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match client.get(&url).timeout(Duration::from_secs(10)).send().await {
                Ok(rsp) => tracing::debug!(status = %rsp.status(), "keep-alive ping"),
                Err(e) => tracing::warn!(error = %e, "keep-alive ping failed"),
            }
        }
    })
}
