//! News server administration endpoints.

use std::time::Instant;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::config::ServerConfig;
use crate::db::{NewServer, NewsServer};
use crate::error::{ApiError, DatabaseError, Error};
use crate::nntp::NntpConnection;

use super::AppState;

/// Server record as exposed over the API: everything but the password.
#[derive(Debug, Serialize)]
pub struct ServerView {
    /// Stable identity
    pub id: i64,
    /// Display name
    pub name: String,
    /// Hostname
    pub host: String,
    /// Port
    pub port: u16,
    /// TLS flag
    pub tls: bool,
    /// Username (password is never echoed back)
    pub username: Option<String>,
    /// Desired connection count
    pub connections: u32,
    /// Whether this server participates in fetching
    pub enabled: bool,
}

impl From<&NewsServer> for ServerView {
    fn from(server: &NewsServer) -> Self {
        Self {
            id: server.id,
            name: server.name.clone(),
            host: server.host.clone(),
            port: server.port,
            tls: server.tls,
            username: server.username.clone(),
            connections: server.connections,
            enabled: server.enabled,
        }
    }
}

/// Re-drive the pool map from the servers table after any change.
async fn reconcile_pools(state: &AppState) {
    match state.db.enabled_servers().await {
        Ok(servers) => state.pools.update_servers(servers).await,
        Err(e) => error!(error = %e, "failed to reload servers for pool reconcile"),
    }
}

/// `GET /api/servers`
pub async fn list_servers(State(state): State<AppState>) -> Response {
    match state.db.list_servers().await {
        Ok(servers) => {
            let views: Vec<ServerView> = servers.iter().map(ServerView::from).collect();
            Json(views).into_response()
        }
        Err(e) => internal(e),
    }
}

/// `GET /api/servers/{id}`
pub async fn get_server(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.db.get_server(id).await {
        Ok(Some(server)) => Json(ServerView::from(&server)).into_response(),
        Ok(None) => not_found(id),
        Err(e) => internal(e),
    }
}

/// `POST /api/servers`
pub async fn create_server(
    State(state): State<AppState>,
    Json(payload): Json<ServerConfig>,
) -> Response {
    if payload.name.trim().is_empty() || payload.host.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation("name and host are required")),
        )
            .into_response();
    }

    match state.db.insert_server(&NewServer::from(&payload)).await {
        Ok(id) => {
            reconcile_pools(&state).await;
            (StatusCode::CREATED, Json(json!({ "id": id }))).into_response()
        }
        Err(e @ Error::Database(DatabaseError::ConstraintViolation(_))) => (
            StatusCode::CONFLICT,
            Json(ApiError::conflict(e.to_string())),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

/// `PUT /api/servers/{id}`
pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ServerConfig>,
) -> Response {
    match state.db.update_server(id, &NewServer::from(&payload)).await {
        Ok(true) => {
            reconcile_pools(&state).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found(id),
        Err(e) => internal(e),
    }
}

/// `DELETE /api/servers/{id}`
pub async fn delete_server(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.db.delete_server(id).await {
        Ok(true) => {
            reconcile_pools(&state).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found(id),
        Err(e) => internal(e),
    }
}

/// `POST /api/servers/test` - dial, greet, and authenticate through the
/// current interface-bound dialer; report latency or the failure.
pub async fn test_server(
    State(state): State<AppState>,
    Json(payload): Json<ServerConfig>,
) -> Response {
    let candidate = NewsServer {
        id: 0,
        name: payload.name.clone(),
        host: payload.host.clone(),
        port: payload.port,
        tls: payload.tls,
        username: payload.username.clone(),
        password: payload.password.clone(),
        connections: payload.connections,
        enabled: true,
    };

    let dialer = state.pools.dialer().await;
    let started = Instant::now();

    match NntpConnection::connect(&dialer, &candidate).await {
        Ok(conn) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            conn.close().await;
            Json(json!({ "success": true, "latency_ms": latency_ms })).into_response()
        }
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })).into_response(),
    }
}

fn not_found(id: i64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::not_found(format!("server {id}"))),
    )
        .into_response()
}

fn internal(e: Error) -> Response {
    error!(error = %e, "server admin request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::from(e))).into_response()
}
