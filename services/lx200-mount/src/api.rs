//! JSON command surface exposed over HTTP
//!
//! Thin transport adapter: each route maps onto a daemon method and
//! passes the caller's peer address through for the control allow-list
//! check. Every response is a JSON object carrying the numeric status
//! code, with a message attached for failures.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::mount::MountDaemon;
use crate::types::CommandStatus;

/// Router state
#[derive(Clone)]
struct ApiState {
    daemon: Arc<MountDaemon>,
}

/// Build the command-surface router
pub fn build_router(daemon: Arc<MountDaemon>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/status", get(status_handler))
        .route("/initialize", post(initialize_handler))
        .route("/shutdown", post(shutdown_handler))
        .route("/stop", post(stop_handler))
        .route("/slew", post(slew_handler))
        .route("/track", post(track_handler))
        .route("/offset", post(offset_handler))
        .route("/sync", post(sync_handler))
        .route("/zero", post(zero_handler))
        .route("/park", post(park_handler))
        .with_state(ApiState { daemon })
}

#[derive(Debug, Deserialize)]
struct RaDecBody {
    ra: f64,
    dec: f64,
}

#[derive(Debug, Deserialize)]
struct OffsetBody {
    delta_ra: f64,
    delta_dec: f64,
}

#[derive(Debug, Deserialize)]
struct ParkBody {
    position: String,
}

fn respond(status: CommandStatus) -> Json<Value> {
    let mut payload = json!({ "status": status.code() });
    if let Some(message) = status.message() {
        payload["message"] = json!(message);
    }
    Json(payload)
}

async fn ping_handler(State(api): State<ApiState>) -> Json<Value> {
    respond(api.daemon.ping().await)
}

async fn status_handler(State(api): State<ApiState>) -> Json<Value> {
    Json(api.daemon.status().await)
}

async fn initialize_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    respond(api.daemon.initialize(addr.ip()).await)
}

async fn shutdown_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    respond(api.daemon.shutdown(addr.ip()).await)
}

async fn stop_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    respond(api.daemon.stop(addr.ip()).await)
}

async fn slew_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RaDecBody>,
) -> Json<Value> {
    respond(api.daemon.slew_radec(addr.ip(), body.ra, body.dec).await)
}

async fn track_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RaDecBody>,
) -> Json<Value> {
    respond(api.daemon.track_radec(addr.ip(), body.ra, body.dec).await)
}

async fn offset_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<OffsetBody>,
) -> Json<Value> {
    respond(
        api.daemon
            .offset_radec(addr.ip(), body.delta_ra, body.delta_dec)
            .await,
    )
}

async fn sync_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RaDecBody>,
) -> Json<Value> {
    respond(api.daemon.sync(addr.ip(), body.ra, body.dec).await)
}

async fn zero_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    respond(api.daemon.zero(addr.ip()).await)
}

async fn park_handler(
    State(api): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ParkBody>,
) -> Json<Value> {
    respond(api.daemon.park(addr.ip(), &body.position).await)
}
