use std::{collections::BTreeSet, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{CaseSnapshot, CollectionKey},
    error::{ApiError, ErrorCode},
    protocol::CommandResponse,
};
use storage::{StoreError, Subscription};
use tracing::error;

use crate::app_state::AppState;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
pub(crate) struct EventsQuery {
    /// Comma separated collection keys; absent means every collection.
    keys: Option<String>,
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/command", post(http_command))
        .route("/data", get(http_data))
        .route("/events", get(ws_handler))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state
        .dispatcher
        .registry()
        .storage()
        .health_check()
        .await
        .map_err(|e| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiError::new(ErrorCode::StoreUnavailable, e.to_string())),
            )
        })?;
    Ok("ok")
}

async fn http_command(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<CommandResponse>> {
    let response = state
        .dispatcher
        .dispatch_json(payload)
        .await
        .map_err(store_failure)?;
    Ok(Json(response))
}

async fn http_data(State(state): State<Arc<AppState>>) -> ApiResult<Json<CaseSnapshot>> {
    let snapshot = state
        .dispatcher
        .registry()
        .snapshot()
        .await
        .map_err(store_failure)?;
    Ok(Json(snapshot))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let keys = parse_keys(q.keys.as_deref()).map_err(|message| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, message)),
        )
    })?;
    // Subscribe before the upgrade so nothing published in between is missed.
    let subscription = state.dispatcher.registry().subscribe(keys);
    Ok(ws.on_upgrade(move |socket| ws_connection(socket, subscription)))
}

async fn ws_connection(socket: WebSocket, subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = Box::pin(subscription.into_stream());

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

pub(crate) fn parse_keys(raw: Option<&str>) -> Result<BTreeSet<CollectionKey>, String> {
    let Some(raw) = raw else {
        return Ok(CollectionKey::ALL.into_iter().collect());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::parse::<CollectionKey>)
        .collect()
}

fn store_failure(err: StoreError) -> (StatusCode, Json<ApiError>) {
    error!(%err, "command failed on store access");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new(ErrorCode::StoreUnavailable, err.to_string())),
    )
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;
