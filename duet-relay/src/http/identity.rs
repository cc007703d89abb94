//! Anonymous caller identity.
//!
//! Every caller carries an opaque secret in a cookie. A request without one
//! is issued a fresh UUID, which is set on the response. Handlers receive the
//! secret as an `Extension<PeerKey>`; the services only ever compare it.

use axum::{
    extract::{Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use duet_types::PeerKey;
use std::sync::Arc;

/// Name of the identity cookie.
#[derive(Debug, Clone)]
pub struct IdentityCookie(Arc<str>);

impl IdentityCookie {
    /// Use the cookie called `name`.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The cookie name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Find this cookie's value in the request headers.
    pub fn find(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.name() && !value.is_empty())
            .map(|(_, value)| value.to_string())
    }
}

/// Attach the caller's [`PeerKey`] to the request, minting one if needed.
pub async fn identity_layer(
    State(cookie): State<IdentityCookie>,
    mut request: Request,
    next: Next,
) -> Response {
    tracing::debug!("{} {}", request.method(), request.uri());

    let (secret, minted) = match cookie.find(request.headers()) {
        Some(secret) => (secret, false),
        None => (uuid::Uuid::new_v4().to_string(), true),
    };
    request.extensions_mut().insert(PeerKey::new(secret.clone()));

    let mut response = next.run(request).await;

    if minted {
        match HeaderValue::from_str(&format!("{}={}; Path=/", cookie.name(), secret)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "identity cookie not set"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Extension, Router};
    use tower::util::ServiceExt;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn finds_named_cookie_among_others() {
        let cookie = IdentityCookie::new("identity");
        assert_eq!(
            cookie.find(&headers("theme=dark; identity=abc-123; lang=en")),
            Some("abc-123".to_string())
        );
        assert_eq!(cookie.find(&headers("theme=dark")), None);
        assert_eq!(cookie.find(&headers("identity=")), None);
        assert_eq!(cookie.find(&HeaderMap::new()), None);
    }

    async fn echo_fingerprint(Extension(key): Extension<PeerKey>) -> String {
        key.fingerprint().to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo_fingerprint))
            .layer(middleware::from_fn_with_state(
                IdentityCookie::new("identity"),
                identity_layer,
            ))
    }

    #[tokio::test]
    async fn existing_identity_is_kept() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header(COOKIE, "identity=k1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().get(SET_COOKIE).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, PeerKey::from("k1").fingerprint().to_string());
    }

    #[tokio::test]
    async fn missing_identity_is_minted_and_set() {
        let response = app()
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let set = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let minted = set
            .strip_prefix("identity=")
            .and_then(|rest| rest.split(';').next())
            .unwrap();
        assert!(uuid::Uuid::parse_str(minted).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, PeerKey::from(minted).fingerprint().to_string());
    }
}
