//! Relay routes: `/api/relay/:sid/*`.
//!
//! `send` takes the request body as the byte source. `recv` streams matched
//! bytes back as the response body; it holds the response until the first
//! chunk (or the outcome) is known, so errors raised before any data still
//! get a proper status.

use super::ApiError;
use crate::error::RelayResult;
use crate::server::DuetServer;
use crate::transport::{ChannelSink, StreamSource};
use axum::{
    body::Body,
    extract::Path,
    http::{
        header::{self, CONTENT_TYPE},
        HeaderMap,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use duet_types::{ClosedResponse, ConnectionId, PeerKey};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const OCTET_STREAM: &str = "application/octet-stream";

fn conn_id(raw: String) -> Result<ConnectionId, ApiError> {
    ConnectionId::new(raw).map_err(|_| ApiError::BadId)
}

fn is_octet_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(OCTET_STREAM))
}

pub(super) async fn open(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(sid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    server.relay().open(&conn_id(sid)?, &key)?;
    Ok(Json(json!({})))
}

pub(super) async fn close(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(sid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    server.relay().close(&conn_id(sid)?, &key)?;
    Ok(Json(json!({})))
}

pub(super) async fn closed(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(sid): Path<String>,
) -> Result<Json<ClosedResponse>, ApiError> {
    let closed = server.relay().is_closed(&conn_id(sid)?, &key)?;
    Ok(Json(ClosedResponse { closed }))
}

pub(super) async fn send(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(sid): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    if !is_octet_stream(&headers) {
        return Err(ApiError::UnsupportedMediaType);
    }
    let id = conn_id(sid)?;

    let source = Box::new(StreamSource::new(body.into_data_stream()));
    server.relay().send(&id, &key, source).await?;
    Ok(([(CONTENT_TYPE, OCTET_STREAM)], ()).into_response())
}

/// Aborts the receiving task when dropped, along with any receive it still
/// has queued.
struct AbortOnDrop(JoinHandle<RelayResult<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(super) async fn recv(
    Extension(server): Extension<Arc<DuetServer>>,
    Extension(key): Extension<PeerKey>,
    Path(sid): Path<String>,
) -> Result<Response, ApiError> {
    let id = conn_id(sid)?;
    server.relay().validate(&id, &key)?;

    let (sink, mut rx) = ChannelSink::new(server.config().relay.stream_buffer_chunks);
    let relay = server.relay().clone();
    let mut task = AbortOnDrop(tokio::spawn(async move {
        let result = relay.recv(&id, &key, Box::new(sink.clone())).await;
        if let Err(e) = &result {
            tracing::warn!(conn = %id, error = %e, "recv failed");
            sink.fail(io::Error::new(io::ErrorKind::Other, e.clone())).await;
        }
        result
    }));

    match rx.recv().await {
        Some(Ok(first)) => {
            // The guard rides along with the body stream.
            let rest = futures_util::stream::unfold(
                (ReceiverStream::new(rx), task),
                |(mut rest, task)| async move { rest.next().await.map(|item| (item, (rest, task))) },
            );
            let body = Body::from_stream(futures_util::stream::iter([Ok(first)]).chain(rest));
            Ok(([(CONTENT_TYPE, OCTET_STREAM)], body).into_response())
        }
        // Nothing was written: the task has settled, ask it how.
        Some(Err(_)) | None => match (&mut task.0).await {
            Ok(Ok(())) => Ok(([(CONTENT_TYPE, OCTET_STREAM)], ()).into_response()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => {
                tracing::error!(error = %e, "recv task failed");
                Err(ApiError::Internal)
            }
        },
    }
}
