//! SABnzbd-compatible `/api` endpoint.
//!
//! Automation tools (Sonarr, Radarr, ...) speak this dialect: a single
//! endpoint dispatched on the `mode` parameter, with SABnzbd's ad-hoc JSON
//! response shapes reproduced field for field.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::db::Download;
use crate::error::{ApiError, Error};
use crate::types::{DownloadId, DownloadOptions, Status};
use crate::utils;

use super::AppState;

/// Version string advertised to SABnzbd clients
const SAB_VERSION: &str = "4.0.0";

/// `GET /api?mode=...`
pub async fn handle_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match params.get("mode").map(String::as_str) {
        Some("queue") => queue_response(&state).await,
        Some("history") => history_response(&state).await,
        Some("status") | Some("fullstatus") => status_response(&state).await,
        Some("version") => Json(json!({ "version": SAB_VERSION })).into_response(),
        other => {
            warn!(mode = ?other, "unknown api mode");
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::validation(format!("unknown mode: {other:?}"))),
            )
                .into_response()
        }
    }
}

/// `POST /api` - `mode=addfile` (multipart) and `mode=addurl` (form).
pub async fn handle_post(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = match Multipart::from_request(request, &()).await {
            Ok(multipart) => multipart,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiError::validation(format!("bad multipart body: {e}"))),
                )
                    .into_response();
            }
        };
        return addfile(&state, params, multipart).await;
    }

    // Some clients put everything in the query string with an empty body;
    // treat an unparseable form as empty rather than rejecting outright
    let form: HashMap<String, String> =
        match axum::extract::Form::from_request(request, &()).await {
            Ok(axum::extract::Form(form)) => form,
            Err(_) => HashMap::new(),
        };

    let mode = params
        .get("mode")
        .or_else(|| form.get("mode"))
        .map(String::as_str);

    match mode {
        Some("addurl") => addurl(&state, params, form).await,
        other => (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation(format!("unknown mode: {other:?}"))),
        )
            .into_response(),
    }
}

/// `DELETE /api/queue/{id}`
pub async fn delete_queue_entry(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Response {
    let Some(id) = DownloadId::from_nzo_id(&raw_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation(format!("bad download id: {raw_id}"))),
        )
            .into_response();
    };

    match state.engine.remove_from_queue(id).await {
        Ok(true) => Json(json!({ "status": true })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::not_found(format!("queue entry {raw_id}"))),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

// -----------------------------------------------------------------------
// mode=addfile / mode=addurl
// -----------------------------------------------------------------------

async fn addfile(
    state: &AppState,
    params: HashMap<String, String>,
    mut multipart: Multipart,
) -> Response {
    let mut nzb_bytes: Option<Vec<u8>> = None;
    let mut name: Option<String> = None;
    let mut category = params.get("cat").cloned();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiError::validation(format!("bad multipart field: {e}"))),
                )
                    .into_response();
            }
        };

        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "nzbfile" | "name" => {
                if let Some(filename) = field.file_name().map(str::to_string) {
                    name = Some(strip_nzb_extension(&filename));
                }
                match field.bytes().await {
                    Ok(bytes) => nzb_bytes = Some(bytes.to_vec()),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(ApiError::validation(format!("bad nzbfile upload: {e}"))),
                        )
                            .into_response();
                    }
                }
            }
            "cat" => {
                if let Ok(value) = field.text().await
                    && !value.is_empty()
                {
                    category = Some(value);
                }
            }
            _ => {}
        }
    }

    let Some(raw_nzb) = nzb_bytes else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation("missing nzbfile field")),
        )
            .into_response();
    };

    enqueue(state, raw_nzb, name, category).await
}

async fn addurl(
    state: &AppState,
    params: HashMap<String, String>,
    form: HashMap<String, String>,
) -> Response {
    let url = form
        .get("name")
        .or_else(|| form.get("value"))
        .or_else(|| params.get("name"))
        .or_else(|| params.get("value"));

    let Some(url) = url.filter(|u| !u.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation("missing name/value url field")),
        )
            .into_response();
    };

    if url::Url::parse(url).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation(format!("invalid url: {url}"))),
        )
            .into_response();
    }

    let response = match reqwest::get(url).await {
        Ok(response) => response,
        Err(e) => return internal(Error::Network(e)),
    };

    let name = utils::extract_filename_from_response(&response, url);
    let raw_nzb = match response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => return internal(Error::Network(e)),
    };

    let category = form.get("cat").or_else(|| params.get("cat")).cloned();
    enqueue(state, raw_nzb, Some(name), category).await
}

async fn enqueue(
    state: &AppState,
    raw_nzb: Vec<u8>,
    name: Option<String>,
    category: Option<String>,
) -> Response {
    let options = DownloadOptions { name, category };

    match state.engine.add_nzb(raw_nzb, options).await {
        Ok(id) => Json(json!({
            "status": true,
            "nzo_ids": [id.to_nzo_id()],
        }))
        .into_response(),
        Err(e @ Error::InvalidNzb(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError::from(e)),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

fn strip_nzb_extension(filename: &str) -> String {
    filename
        .strip_suffix(".nzb")
        .or_else(|| filename.strip_suffix(".NZB"))
        .unwrap_or(filename)
        .to_string()
}

// -----------------------------------------------------------------------
// mode=queue / mode=history / mode=status
// -----------------------------------------------------------------------

const MEGABYTE: f64 = 1024.0 * 1024.0;

fn mb(bytes: i64) -> String {
    format!("{:.2}", bytes as f64 / MEGABYTE)
}

fn queue_slot(state: &AppState, job: &Download, speed_bps: u64) -> Value {
    let remaining = (job.total_bytes - job.downloaded_bytes).max(0);
    let percentage = if job.total_bytes > 0 {
        job.downloaded_bytes * 100 / job.total_bytes
    } else {
        0
    };

    let (extract_pct, extract_file) = if job.status() == Status::Processing {
        state
            .state
            .extraction_progress(job.download_id())
            .unwrap_or((0.0, String::new()))
    } else {
        (0.0, String::new())
    };

    json!({
        "nzo_id": job.download_id().to_nzo_id(),
        "filename": job.name,
        "cat": job.category.clone().unwrap_or_else(|| "*".to_string()),
        "status": job.status().sab_queue_label(),
        "mb": mb(job.total_bytes),
        "mbleft": mb(remaining),
        "percentage": percentage.to_string(),
        "size": utils::format_size(job.total_bytes as u64),
        "sizeleft": utils::format_size(remaining as u64),
        "timeleft": utils::format_timeleft(remaining as u64, speed_bps),
        "extract_pct": format!("{extract_pct:.0}"),
        "extract_file": extract_file,
    })
}

async fn queue_response(state: &AppState) -> Response {
    let jobs = match state.db.list_queue().await {
        Ok(jobs) => jobs,
        Err(e) => return internal(e),
    };

    let speed_bps = state.state.speed_bps();
    let slots: Vec<Value> = jobs
        .iter()
        .map(|job| queue_slot(state, job, speed_bps))
        .collect();

    Json(json!({
        "queue": {
            "paused": state.state.is_paused(),
            "slots": slots,
            "speed": utils::format_size(speed_bps),
            "noofslots": jobs.len(),
        }
    }))
    .into_response()
}

fn history_slot(job: &Download) -> Value {
    let status = match job.status() {
        Status::Completed => "Completed",
        _ => "Failed",
    };
    let download_time = match job.completed_at {
        Some(completed) => (completed - job.created_at).max(0),
        None => 0,
    };

    json!({
        "nzo_id": job.download_id().to_nzo_id(),
        "name": job.name,
        "category": job.category.clone().unwrap_or_else(|| "*".to_string()),
        "status": status,
        "fail_message": job.error_msg.clone().unwrap_or_default(),
        "storage": job.path.clone().unwrap_or_default(),
        "bytes": job.downloaded_bytes,
        "download_time": download_time,
        "completed": job.completed_at.unwrap_or_default(),
    })
}

async fn history_response(state: &AppState) -> Response {
    let jobs = match state.db.list_history().await {
        Ok(jobs) => jobs,
        Err(e) => return internal(e),
    };

    let slots: Vec<Value> = jobs.iter().map(history_slot).collect();

    Json(json!({
        "history": {
            "slots": slots,
            "noofslots": jobs.len(),
        }
    }))
    .into_response()
}

async fn status_response(state: &AppState) -> Response {
    let jobs = match state.db.list_queue().await {
        Ok(jobs) => jobs,
        Err(e) => return internal(e),
    };

    let remaining: i64 = jobs
        .iter()
        .map(|job| (job.total_bytes - job.downloaded_bytes).max(0))
        .sum();
    let speed_bps = state.state.speed_bps();

    Json(json!({
        "status": {
            "paused": state.state.is_paused(),
            "speed": utils::format_size(speed_bps),
            "kbpersec": speed_bps as f64 / 1024.0,
            "mbleft": mb(remaining),
            "noofslots_total": jobs.len(),
            "version": SAB_VERSION,
            "vpn_connected": state.state.vpn_connected(),
            "vpn_interface": state.state.vpn_interface(),
        }
    }))
    .into_response()
}

fn internal(e: Error) -> Response {
    error!(error = %e, "api request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::from(e))).into_response()
}
