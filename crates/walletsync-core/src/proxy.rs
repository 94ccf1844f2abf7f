//! Authentication proxy.
//!
//! Forwards the challenge/verify/refresh/logout endpoints to the router
//! backend and refuses every other path under the auth prefix. Redirects from
//! the backend are passed through to the caller, not followed.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::sync::http_client;

/// Prefix every proxied path lives under.
pub const AUTH_PATH_PREFIX: &str = "/api/v1/public/auth";

const ALLOWED_PATHS: [&str; 4] = [
    "/api/v1/public/auth/challenge",
    "/api/v1/public/auth/verify",
    "/api/v1/public/auth/refresh",
    "/api/v1/public/auth/logout",
];

#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    backend_url: Arc<str>,
}

impl ProxyState {
    pub fn new(backend_url: &str) -> Result<Self, StorageError> {
        let backend_url = backend_url.trim().trim_end_matches('/');
        if backend_url.is_empty() {
            return Err(StorageError::InvalidUrl(
                "ROUTER_BACKEND_URL is not set".to_string(),
            ));
        }
        Ok(Self {
            client: http_client()?,
            backend_url: Arc::from(backend_url),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, reqwest::Error> {
        let target = format!("{}{}", self.backend_url, path);
        headers.remove(header::HOST);

        let has_body = !matches!(method, Method::GET | Method::HEAD | Method::OPTIONS);
        let mut request = self.client.request(method, target).headers(headers);
        if has_body {
            request = request.body(body);
        }
        let upstream = request.send().await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        response_headers.remove(header::ACCESS_CONTROL_ALLOW_ORIGIN);
        // The body is re-framed below.
        response_headers.remove(header::TRANSFER_ENCODING);
        response_headers.remove(header::CONNECTION);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

pub fn is_allowed_path(path: &str) -> bool {
    ALLOWED_PATHS.iter().any(|allowed| path.ends_with(allowed))
}

pub fn router(state: ProxyState) -> Router {
    let path = format!("{}/{{*path}}", AUTH_PATH_PREFIX);
    Router::new()
        .route(
            &path,
            get(forward)
                .post(forward)
                .put(forward)
                .delete(forward)
                .options(forward),
        )
        .with_state(state)
}

/// Serve the proxy until the listener fails.
pub async fn serve(listener: TcpListener, state: ProxyState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, backend = %state.backend_url, "Auth proxy listening");
    }
    axum::serve(listener, router(state)).await
}

async fn forward(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path();
    if !is_allowed_path(path) {
        warn!(path, "Rejected auth proxy path");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": true, "msg": format!("Forbidden API path => {}", path) })),
        )
            .into_response();
    }

    debug!(%method, path, "Proxying auth request");
    match state.send(method, path, headers, body).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, path, "Failed to proxy request to router backend");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": true, "msg": "Failed to proxy request to router backend" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::any;
    use serde_json::Value;

    use super::*;
    use crate::testing::serve as serve_app;

    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Response {
        if uri.path().ends_with("/logout") {
            return (StatusCode::FOUND, [(header::LOCATION, "/goodbye")]).into_response();
        }
        let marker = headers
            .get("x-client")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        (
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::HeaderName::from_static("x-upstream"), "router"),
            ],
            format!("{} {} {} {}", method, uri.path(), marker, body),
        )
            .into_response()
    }

    async fn proxy_to_backend() -> String {
        let backend = serve_app(Router::new().route("/{*path}", any(echo))).await;
        let state = ProxyState::new(&format!("{}/", backend)).expect("state");
        serve_app(router(state)).await
    }

    #[tokio::test]
    async fn test_forwards_allowed_path() {
        let proxy = proxy_to_backend().await;
        let response = http_client()
            .expect("client")
            .post(format!("{}/api/v1/public/auth/challenge", proxy))
            .header("x-client", "web")
            .body(r#"{"address":"0xabc"}"#)
            .send()
            .await
            .expect("send");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("access-control-allow-origin").is_none());
        assert_eq!(response.headers().get("x-upstream").map(|v| v.as_bytes()), Some(&b"router"[..]));
        assert_eq!(
            response.text().await.expect("body"),
            r#"POST /api/v1/public/auth/challenge web {"address":"0xabc"}"#
        );
    }

    #[tokio::test]
    async fn test_get_drops_body() {
        let proxy = proxy_to_backend().await;
        let text = http_client()
            .expect("client")
            .get(format!("{}/api/v1/public/auth/refresh", proxy))
            .send()
            .await
            .expect("send")
            .text()
            .await
            .expect("body");
        assert_eq!(text, "GET /api/v1/public/auth/refresh - ");
    }

    #[tokio::test]
    async fn test_rejects_other_paths() {
        let proxy = proxy_to_backend().await;
        let response = http_client()
            .expect("client")
            .get(format!("{}/api/v1/public/auth/users", proxy))
            .send()
            .await
            .expect("send");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["error"], Value::Bool(true));
        assert_eq!(body["msg"], "Forbidden API path => /api/v1/public/auth/users");
    }

    #[tokio::test]
    async fn test_redirect_passed_through() {
        let proxy = proxy_to_backend().await;
        let response = http_client()
            .expect("client")
            .post(format!("{}/api/v1/public/auth/logout", proxy))
            .send()
            .await
            .expect("send");

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).map(|v| v.as_bytes()),
            Some(&b"/goodbye"[..])
        );
    }

    #[tokio::test]
    async fn test_backend_down_is_500() {
        let state = ProxyState::new("http://127.0.0.1:1").expect("state");
        let proxy = serve_app(router(state)).await;
        let response = http_client()
            .expect("client")
            .post(format!("{}/api/v1/public/auth/verify", proxy))
            .send()
            .await
            .expect("send");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["msg"], "Failed to proxy request to router backend");
    }

    #[test]
    fn test_allowed_paths() {
        assert!(is_allowed_path("/api/v1/public/auth/verify"));
        assert!(!is_allowed_path("/api/v1/public/auth/verify/extra"));
        assert!(ProxyState::new("  ").is_err());
    }
}
