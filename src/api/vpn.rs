//! VPN administration endpoints.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::error::{ApiError, Error};

use super::AppState;

/// `PUT /api/vpn` payload
#[derive(Debug, Deserialize)]
pub struct VpnSettings {
    /// Whether managed mode should auto-connect at startup
    pub auto_connect: bool,
}

/// `GET /api/vpn` - configuration plus live status.
pub async fn get_vpn(State(state): State<AppState>) -> Response {
    let auto_connect = match state.db.vpn_auto_connect().await {
        Ok(value) => value,
        Err(e) => return internal(e),
    };

    Json(json!({
        "mode": state.config.vpn.mode,
        "interface": state.state.vpn_interface(),
        "connected": state.state.vpn_connected(),
        "auto_connect": auto_connect,
    }))
    .into_response()
}

/// `PUT /api/vpn` - persist the auto-connect preference.
pub async fn update_vpn(
    State(state): State<AppState>,
    Json(settings): Json<VpnSettings>,
) -> Response {
    match state.db.set_vpn_auto_connect(settings.auto_connect).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal(e),
    }
}

/// `POST /api/vpn/connect`
pub async fn connect_vpn(State(state): State<AppState>) -> Response {
    match state.vpn.user_connect().await {
        Ok(()) => Json(json!({ "status": true })).into_response(),
        Err(e @ Error::Vpn(_)) => (
            StatusCode::CONFLICT,
            Json(ApiError::conflict(e.to_string())),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

/// `POST /api/vpn/disconnect`
pub async fn disconnect_vpn(State(state): State<AppState>) -> Response {
    match state.vpn.user_disconnect().await {
        Ok(()) => Json(json!({ "status": true })).into_response(),
        Err(e @ Error::Vpn(_)) => (
            StatusCode::CONFLICT,
            Json(ApiError::conflict(e.to_string())),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

/// `GET /api/vpn/status`
pub async fn vpn_status(State(state): State<AppState>) -> Response {
    Json(json!({
        "connected": state.state.vpn_connected(),
        "interface": state.state.vpn_interface(),
        "paused": state.state.is_paused(),
    }))
    .into_response()
}

fn internal(e: Error) -> Response {
    error!(error = %e, "vpn admin request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::from(e))).into_response()
}
