use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use futures::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, error, info};

use crate::config::{ChatConfig, Config};
use crate::live::LiveBroadcaster;
use crate::message::{public_file_path, LiveMessage, FILE_WEB_PATH_PREFIX};
use crate::metadata::DATE_FORMAT;
use crate::store::{MessageStore, StoredMessage};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: MessageStore,
    pub live: Arc<LiveBroadcaster>,
}

type ApiError = (StatusCode, String);

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn list_chats(State(state): State<AppState>) -> Result<Json<Vec<ChatConfig>>, ApiError> {
    let configured = state.config.chat_list();
    if !configured.is_empty() {
        return Ok(Json(configured.to_vec()));
    }

    let chats = state.store.list_chats().await.map_err(|e| {
        error!("Failed to list chats: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to list chats".to_string())
    })?;
    Ok(Json(
        chats
            .into_iter()
            .map(|id| ChatConfig { id, alias: None })
            .collect(),
    ))
}

fn date_param(params: &HashMap<String, String>, name: &str) -> Result<NaiveDate, ApiError> {
    let value = params
        .get(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing '{}' parameter", name)))?;
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("'{}' must be a DD.MM.YYYY date", name),
        )
    })
}

fn to_live(row: StoredMessage, storage_root: &Path) -> LiveMessage {
    LiveMessage {
        filename: row
            .path
            .map(|p| public_file_path(Path::new(&p), storage_root)),
        id: row.id,
        sender: row.sender,
        chat: row.chat,
        content: row.content,
        timestamp: row.timestamp,
    }
}

async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<LiveMessage>>, ApiError> {
    let from = date_param(&params, "from")?;
    let to = date_param(&params, "to")?;
    let content = params.get("content").map(String::as_str).filter(|c| !c.is_empty());

    let rows = state
        .store
        .query_messages(from, to, content)
        .await
        .map_err(|e| {
            error!("Failed to query messages: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to query messages".to_string())
        })?;

    let root = &state.config.file_storage_path;
    Ok(Json(rows.into_iter().map(|row| to_live(row, root)).collect()))
}

async fn live_feed(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| feed_connection(socket, state.live))
}

async fn feed_connection(socket: WebSocket, live: Arc<LiveBroadcaster>) {
    let (writer, mut reader) = socket.split();
    let id = live.subscribe(Box::new(writer)).await;

    // Clients never send anything meaningful; read only to notice the close
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Live feed client {} read error: {}", id, e);
                break;
            }
        }
    }

    live.unsubscribe(id).await;
}

// ── CORS ───────────────────────────────────────────────────────────────────────

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// CorsLayer answers preflight requests with 200; clients here expect 204
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

// ── Router ─────────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let files = ServeDir::new(&state.config.file_storage_path);
    let static_files = ServeDir::new(&state.config.static_path);

    Router::new()
        .route("/chats", get(list_chats))
        .route("/messages", get(list_messages))
        .route("/ws", get(live_feed))
        .nest_service(FILE_WEB_PATH_PREFIX, files)
        .fallback_service(static_files)
        .layer(cors_layer())
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("HTTP server listening on http://{}", bind);

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}
