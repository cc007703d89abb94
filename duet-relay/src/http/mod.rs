//! HTTP endpoints for duet-relay.
//!
//! Thin mapping from routes to the rendezvous store and relay engine, plus
//! health and metrics. Callers are identified by an anonymous cookie (see
//! [`identity`]).

pub mod health;
mod host;
pub mod identity;
mod metrics;
mod relay;

use crate::error::{HostError, RelayError};
use crate::server::DuetServer;
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;
pub use identity::IdentityCookie;

/// Build the HTTP router with all endpoints.
pub fn build_router(server: Arc<DuetServer>) -> Router {
    let cookie = IdentityCookie::new(&server.config().server.identity_cookie);

    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/host/open", post(host::open))
        .route("/api/host/close/:hid", post(host::close))
        .route("/api/host/accept/:hid", post(host::accept))
        .route("/api/host/connect/:hid", post(host::connect))
        .route("/api/host/connect", post(host::gen_location))
        .route("/api/relay/:sid/open", post(relay::open))
        .route("/api/relay/:sid/close", post(relay::close))
        .route("/api/relay/:sid/send", post(relay::send))
        .route("/api/relay/:sid/recv", post(relay::recv))
        .route("/api/relay/:sid/closed", get(relay::closed));

    if server.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router
        .layer(middleware::from_fn_with_state(cookie, identity::identity_layer))
        .layer(Extension(server))
}

/// Error returned by a handler, mapped to a status code.
#[derive(Debug)]
enum ApiError {
    Host(HostError),
    Relay(RelayError),
    /// Path id that cannot name anything.
    BadId,
    UnsupportedMediaType,
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Host(HostError::NoSuchHost(_)) => StatusCode::NOT_FOUND,
            ApiError::Host(HostError::WrongKey(_)) => StatusCode::FORBIDDEN,
            ApiError::Relay(e) => match e {
                RelayError::NoSuchSocket(_) => StatusCode::NOT_FOUND,
                RelayError::WrongKey(_) => StatusCode::FORBIDDEN,
                RelayError::AlreadyEstablished | RelayError::AlreadyClosed => StatusCode::CONFLICT,
                RelayError::Timeout => StatusCode::IM_A_TEAPOT,
                RelayError::Transport(_) | RelayError::Abandoned => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadId => StatusCode::NOT_FOUND,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "request failed");
        }
        let body = match &self {
            ApiError::Host(e) => e.code(),
            ApiError::Relay(e) => e.code(),
            _ => status.canonical_reason().unwrap_or(""),
        };
        (status, body).into_response()
    }
}

impl From<HostError> for ApiError {
    fn from(e: HostError) -> Self {
        ApiError::Host(e)
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError::Relay(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_server() -> Arc<DuetServer> {
        Arc::new(DuetServer::new(Config::default()))
    }

    fn post(uri: &str, identity: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, format!("identity={identity}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_server());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["hosts"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let app = build_router(test_server());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(Arc::new(DuetServer::new(config)));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn host_open_connect_accept() {
        let server = test_server();
        let app = build_router(server.clone());

        let response = app.clone().oneshot(post("/api/host/open", "k1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let hid = json_body(response).await["hid"].as_str().unwrap().to_string();

        let connect = Request::builder()
            .method("POST")
            .uri(format!("/api/host/connect/{hid}"))
            .header(header::COOKIE, "identity=k2")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"message":{"msg":"hello"}}"#))
            .unwrap();
        let response = app.clone().oneshot(connect).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let location = json_body(response).await["location"].clone();
        assert!(location.as_str().unwrap().starts_with("/api/relay/"));

        let response = app
            .oneshot(post(&format!("/api/host/accept/{hid}"), "k1"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["location"], location);
        assert_eq!(body["message"]["msg"], "hello");
    }

    #[tokio::test]
    async fn host_errors_map_to_status() {
        let app = build_router(test_server());

        let response = app.clone().oneshot(post("/api/host/open", "k1")).await.unwrap();
        let hid = json_body(response).await["hid"].as_str().unwrap().to_string();

        let wrong = app
            .clone()
            .oneshot(post(&format!("/api/host/close/{hid}"), "intruder"))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

        let closed = app
            .clone()
            .oneshot(post(&format!("/api/host/close/{hid}"), "k1"))
            .await
            .unwrap();
        assert_eq!(closed.status(), StatusCode::OK);

        let gone = app
            .clone()
            .oneshot(post(&format!("/api/host/accept/{hid}"), "k1"))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);

        let garbage = app
            .oneshot(post("/api/host/accept/not-a-uuid", "k1"))
            .await
            .unwrap();
        assert_eq!(garbage.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn gen_location_needs_no_host() {
        let app = build_router(test_server());

        let response = app.oneshot(post("/api/host/connect", "k1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["location"].as_str().unwrap().starts_with("/api/relay/"));
    }

    #[tokio::test]
    async fn relay_third_peer_conflicts() {
        let app = build_router(test_server());

        for key in ["kA", "kB"] {
            let response = app
                .clone()
                .oneshot(post("/api/relay/c1/open", key))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.oneshot(post("/api/relay/c1/open", "kC")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn relay_send_requires_octet_stream() {
        let app = build_router(test_server());
        app.clone().oneshot(post("/api/relay/c1/open", "kA")).await.unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/relay/c1/send")
                    .header(header::COOKIE, "identity=kA")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("abc"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn relay_send_and_recv_over_http() {
        let app = build_router(test_server());
        for key in ["kA", "kB"] {
            app.clone()
                .oneshot(post("/api/relay/c1/open", key))
                .await
                .unwrap();
        }

        let send = Request::builder()
            .method("POST")
            .uri("/api/relay/c1/send")
            .header(header::COOKIE, "identity=kA")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from("abc"))
            .unwrap();
        let sending = tokio::spawn(app.clone().oneshot(send));

        let response = app.clone().oneshot(post("/api/relay/c1/recv", "kB")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"abc");
        assert_eq!(sending.await.unwrap().unwrap().status(), StatusCode::OK);

        // Closing A ends B's stream; B then reads nothing
        app.clone().oneshot(post("/api/relay/c1/close", "kA")).await.unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/relay/c1/closed")
                    .header(header::COOKIE, "identity=kB")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(response).await["closed"], true);

        let response = app.oneshot(post("/api/relay/c1/recv", "kB")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn abandoned_recv_does_not_swallow_next_send() {
        let server = test_server();
        let app = build_router(server.clone());
        for key in ["kA", "kB"] {
            app.clone()
                .oneshot(post("/api/relay/c1/open", key))
                .await
                .unwrap();
        }

        // B's client gives up before anything arrives
        let gave_up = tokio::time::timeout(
            Duration::from_millis(50),
            app.clone().oneshot(post("/api/relay/c1/recv", "kB")),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(server.relay().queued(), 1);

        // A fresh receive queues behind the abandoned one
        let receiving = tokio::spawn(app.clone().oneshot(post("/api/relay/c1/recv", "kB")));
        while server.relay().queued() < 2 {
            tokio::task::yield_now().await;
        }

        let send = Request::builder()
            .method("POST")
            .uri("/api/relay/c1/send")
            .header(header::COOKIE, "identity=kA")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from("abc"))
            .unwrap();
        let response = app.oneshot(send).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = receiving.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"abc");
    }

    #[tokio::test]
    async fn relay_recv_unknown_socket_is_not_found() {
        let app = build_router(test_server());
        let response = app.oneshot(post("/api/relay/nope/recv", "kB")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn closed_on_unknown_connection_is_true() {
        let app = build_router(test_server());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/relay/gone/closed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["closed"], true);
    }

    #[test]
    fn timeout_maps_to_distinct_status() {
        assert_eq!(ApiError::Relay(RelayError::Timeout).status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(
            ApiError::Relay(RelayError::AlreadyClosed).status(),
            StatusCode::CONFLICT
        );
    }
}
