//! HTTP control plane
//!
//! Two surfaces share one router:
//! - `/api` - the SABnzbd-compatible endpoint automation tools speak
//!   (`mode=queue|history|status|fullstatus|version|addfile|addurl`)
//! - admin endpoints for servers (`/api/servers…`), the VPN
//!   (`/api/vpn…`), and queue entry removal (`DELETE /api/queue/{id}`)

pub mod sabnzbd;
pub mod servers;
pub mod state;
pub mod vpn;


pub use state::AppState;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};

/// Create the API router with all route definitions.
pub fn create_router(state: AppState) -> Router {
    let cors_enabled = state.config.api.cors_enabled;

    let router = Router::new()
        // SABnzbd emulation
        .route(
            "/api",
            get(sabnzbd::handle_get).post(sabnzbd::handle_post),
        )
        .route("/api/queue/:id", delete(sabnzbd::delete_queue_entry))
        // Server administration
        .route(
            "/api/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route("/api/servers/test", post(servers::test_server))
        .route(
            "/api/servers/:id",
            get(servers::get_server)
                .put(servers::update_server)
                .delete(servers::delete_server),
        )
        // VPN administration
        .route("/api/vpn", get(vpn::get_vpn).put(vpn::update_vpn))
        .route("/api/vpn/connect", post(vpn::connect_vpn))
        .route("/api/vpn/disconnect", post(vpn::disconnect_vpn))
        .route("/api/vpn/status", get(vpn::vpn_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the listener errors or the process shuts down.
pub async fn start_api_server(state: AppState) -> Result<()> {
    let bind_address = state.config.api.bind_address;
    let app = create_router(state);

    let listener = TcpListener::bind(bind_address).await.map_err(Error::Io)?;
    tracing::info!(address = %bind_address, "control plane listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))?;

    tracing::info!("control plane stopped");
    Ok(())
}
