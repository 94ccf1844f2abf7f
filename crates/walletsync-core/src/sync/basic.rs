//! Basic-auth WebDAV client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::{mkcol_method, SyncClient, SyncConfig, BACKUP_FILENAME, WEBDAV_PROXY_PREFIX};
use crate::error::StorageError;

/// Statuses that prove the server is reachable. An empty folder (404), an
/// existing one (405) or a redirect all still mean the remote is usable.
const REACHABLE_STATUSES: [u16; 8] = [200, 201, 404, 405, 301, 302, 307, 308];

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct BasicSyncClient {
    client: Client,
    config: SyncConfig,
}

impl BasicSyncClient {
    pub fn new(client: Client, config: SyncConfig) -> Self {
        Self { client, config }
    }

    pub fn backup_path(&self) -> String {
        format!("{}/{}", self.config.folder(), BACKUP_FILENAME)
    }

    /// Request URL for `path`. Through the proxy the real endpoint (and the
    /// method the proxy should use) travel as query parameters.
    pub fn url(&self, path: &str, proxy_method: Option<&str>) -> Result<Url, StorageError> {
        let path = path.trim_start_matches('/');
        match self.config.proxy_base() {
            Some(proxy) => {
                let raw = format!("{}{}/{}", proxy, WEBDAV_PROXY_PREFIX, path);
                let mut url =
                    Url::parse(&raw).map_err(|e| StorageError::InvalidUrl(format!("{}: {}", raw, e)))?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("endpoint", &self.config.endpoint);
                    if let Some(method) = proxy_method {
                        query.append_pair("proxy_method", method);
                    }
                }
                Ok(url)
            }
            None => {
                let endpoint = self.config.endpoint.trim().trim_end_matches('/');
                let raw = format!("{}/{}", endpoint, path);
                Url::parse(&raw).map_err(|e| StorageError::InvalidUrl(format!("{}: {}", raw, e)))
            }
        }
    }

    fn authorization(&self) -> String {
        let credentials = format!("{}:{}", self.config.username, self.config.password);
        format!("Basic {}", STANDARD.encode(credentials))
    }

    fn check_request(&self) -> Result<RequestBuilder, StorageError> {
        let folder = self.config.folder();
        let builder = if self.config.proxy_base().is_some() {
            self.client.get(self.url(folder, Some("MKCOL"))?)
        } else {
            self.client.request(mkcol_method()?, self.url(folder, None)?)
        };
        Ok(builder.header(header::AUTHORIZATION, self.authorization()))
    }
}

#[async_trait]
impl SyncClient for BasicSyncClient {
    async fn check(&self) -> bool {
        let request = match self.check_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "WebDAV check failed");
                return false;
            }
        };
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let reachable = REACHABLE_STATUSES.contains(&status);
                if reachable {
                    debug!(status, "WebDAV check succeeded");
                } else {
                    warn!(status, "WebDAV check failed");
                }
                reachable
            }
            Err(e) => {
                warn!(error = %e, "WebDAV check failed");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let response = self
            .client
            .get(self.url(&self.backup_path(), None)?)
            .header(header::AUTHORIZATION, self.authorization())
            .send()
            .await?;

        let status = response.status();
        debug!(key = key, status = status.as_u16(), "WebDAV get");
        if status == StatusCode::NOT_FOUND {
            return Ok(String::new());
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(StorageError::from_status(status, &body));
        }
        Ok(body)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.url(&self.backup_path(), None)?)
            .header(header::AUTHORIZATION, self.authorization())
            .header(header::CONTENT_TYPE, "application/json")
            .body(value.to_string())
            .send()
            .await?;

        let status = response.status();
        debug!(key = key, status = status.as_u16(), "WebDAV set");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status, &body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, Method, StatusCode as AxumStatus};
    use axum::routing::any;
    use axum::Router;

    use super::*;
    use crate::sync::http_client;
    use crate::testing::serve;

    fn client(endpoint: String) -> BasicSyncClient {
        let config = SyncConfig {
            endpoint,
            username: "user".to_string(),
            password: "pass".to_string(),
            ..SyncConfig::default()
        };
        BasicSyncClient::new(http_client().expect("client"), config)
    }

    async fn status_server() -> String {
        let app = Router::new().route(
            "/status/{code}/{*rest}",
            any(|Path((code, _rest)): Path<(u16, String)>| async move {
                AxumStatus::from_u16(code).unwrap_or(AxumStatus::INTERNAL_SERVER_ERROR)
            }),
        );
        serve(app).await
    }

    #[tokio::test]
    async fn test_check_accepts_reachable_statuses() {
        let base = status_server().await;
        for code in REACHABLE_STATUSES {
            let client = client(format!("{}/status/{}", base, code));
            assert!(client.check().await, "status {} should be reachable", code);
        }
        for code in [500, 401, 403] {
            let client = client(format!("{}/status/{}", base, code));
            assert!(!client.check().await, "status {} should fail", code);
        }
    }

    #[tokio::test]
    async fn test_check_unreachable_host() {
        let client = client("http://127.0.0.1:1".to_string());
        assert!(!client.check().await);
    }

    #[tokio::test]
    async fn test_check_uses_mkcol_without_proxy() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/{*rest}",
                any(
                    |State(seen): State<Arc<Mutex<Vec<String>>>>, method: Method| async move {
                        seen.lock().unwrap().push(method.to_string());
                        AxumStatus::CREATED
                    },
                ),
            )
            .with_state(seen.clone());
        let base = serve(app).await;

        assert!(client(base).check().await);
        assert_eq!(seen.lock().unwrap().as_slice(), ["MKCOL".to_string()]);
    }

    #[tokio::test]
    async fn test_get_missing_backup_is_empty() {
        let base = status_server().await;
        let client = client(format!("{}/status/404", base));
        assert_eq!(client.get("sync").await.expect("get"), "");
    }

    #[tokio::test]
    async fn test_get_server_error_is_reported() {
        let base = status_server().await;
        let client = client(format!("{}/status/500", base));
        let err = client.get("sync").await.unwrap_err();
        assert!(matches!(err, StorageError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip_with_auth_header() {
        #[derive(Clone, Default)]
        struct Remote {
            body: Arc<Mutex<Option<String>>>,
            auth: Arc<Mutex<Vec<String>>>,
        }

        async fn handle(
            State(remote): State<Remote>,
            method: Method,
            headers: HeaderMap,
            body: String,
        ) -> (AxumStatus, String) {
            if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
                remote.auth.lock().unwrap().push(value.to_string());
            }
            match method {
                Method::PUT => {
                    *remote.body.lock().unwrap() = Some(body);
                    (AxumStatus::CREATED, String::new())
                }
                _ => match remote.body.lock().unwrap().clone() {
                    Some(body) => (AxumStatus::OK, body),
                    None => (AxumStatus::NOT_FOUND, String::new()),
                },
            }
        }

        let remote = Remote::default();
        let app = Router::new()
            .route("/dav/walletsync/backup.json", any(handle))
            .with_state(remote.clone());
        let base = serve(app).await;
        let client = client(format!("{}/dav/", base));

        assert_eq!(client.get("sync").await.expect("get"), "");
        client.set("sync", r#"{"chats":[]}"#).await.expect("set");
        assert_eq!(client.get("sync").await.expect("get"), r#"{"chats":[]}"#);

        let auth = remote.auth.lock().unwrap();
        assert_eq!(auth.len(), 3);
        assert!(auth.iter().all(|v| v == "Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_proxy_url_carries_endpoint() {
        let config = SyncConfig {
            endpoint: "https://dav.example/remote.php".to_string(),
            use_proxy: true,
            proxy_url: "https://proxy.example/".to_string(),
            ..SyncConfig::default()
        };
        let client = BasicSyncClient::new(Client::new(), config);

        let url = client.url("walletsync", Some("MKCOL")).expect("url");
        assert_eq!(
            url.as_str(),
            "https://proxy.example/api/webdav/walletsync?endpoint=https%3A%2F%2Fdav.example%2Fremote.php&proxy_method=MKCOL"
        );

        let url = client.url(&client.backup_path(), None).expect("url");
        assert_eq!(url.path(), "/api/webdav/walletsync/backup.json");
    }

    #[test]
    fn test_invalid_endpoint() {
        let client = BasicSyncClient::new(Client::new(), SyncConfig::default());
        assert!(matches!(
            client.url("walletsync", None),
            Err(StorageError::InvalidUrl(_))
        ));
    }
}
