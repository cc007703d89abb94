//! Rendezvous routes: `/api/host/*`.

use super::ApiError;
use crate::server::DuetServer;
use axum::{extract::Path, Extension, Json};
use duet_types::{
    AcceptResponse, ConnectRequest, HostId, LocationResponse, OpenHostResponse, PeerKey,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn host_id(raw: &str) -> Result<HostId, ApiError> {
    raw.parse().map_err(|_| ApiError::BadId)
}

pub(super) async fn open(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
) -> Json<OpenHostResponse> {
    let hid = server.hosts().open(key, server.host_expiry());
    Json(OpenHostResponse { hid })
}

pub(super) async fn close(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(hid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    server.hosts().close(&host_id(&hid)?, &key)?;
    Ok(Json(json!({})))
}

/// Long-poll for the next offer.
pub(super) async fn accept(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(hid): Path<String>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let offer = server.hosts().accept(&host_id(&hid)?, &key).await?;
    Ok(Json(offer.into()))
}

pub(super) async fn connect(
    Extension(server): Extension<Arc<DuetServer>>,
    Path(hid): Path<String>,
    body: Option<Json<ConnectRequest>>,
) -> Result<Json<LocationResponse>, ApiError> {
    let message = body.map(|Json(req)| req.message).unwrap_or(Value::Null);
    let location = server.hosts().connect(&host_id(&hid)?, message)?;
    Ok(Json(LocationResponse { location }))
}

/// Mint a location without a mailbox.
pub(super) async fn gen_location(
    Extension(server): Extension<Arc<DuetServer>>,
) -> Json<LocationResponse> {
    Json(LocationResponse {
        location: server.hosts().gen_location(),
    })
}
