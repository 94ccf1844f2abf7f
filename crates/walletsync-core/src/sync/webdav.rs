//! HTTP backend for UCAN storage.
//!
//! Minting the invocation token is delegated to an [`InvocationSigner`]; this
//! module only speaks WebDAV with the resulting bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use tracing::debug;
use url::Url;

use super::ucan::{CapabilityStorage, ScopedStorage, StorageGrant};
use super::mkcol_method;
use crate::error::{StorageError, WalletError};

/// Directory holding per-application data on the storage backend.
const APPS_ROOT: &str = "/apps";

const QUOTA_PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:quota-available-bytes/><d:quota-used-bytes/></d:prop></d:propfind>"#;

/// Produces the invocation token presented to the storage backend.
#[async_trait]
pub trait InvocationSigner: Send + Sync {
    async fn sign_invocation(&self, grant: &StorageGrant) -> Result<String, WalletError>;
}

/// An invocation token signed elsewhere and handed in as-is.
#[derive(Debug, Clone)]
pub struct StaticInvocation {
    token: String,
}

impl StaticInvocation {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl InvocationSigner for StaticInvocation {
    async fn sign_invocation(&self, _grant: &StorageGrant) -> Result<String, WalletError> {
        if self.token.trim().is_empty() {
            return Err(WalletError::new("no UCAN invocation token available"));
        }
        Ok(self.token.clone())
    }
}

pub struct WebDavStorage {
    http: Client,
    signer: Arc<dyn InvocationSigner>,
}

impl WebDavStorage {
    pub fn new(http: Client, signer: Arc<dyn InvocationSigner>) -> Self {
        Self { http, signer }
    }
}

#[async_trait]
impl CapabilityStorage for WebDavStorage {
    async fn derive(&self, grant: &StorageGrant) -> Result<Arc<dyn ScopedStorage>, StorageError> {
        let token = self.signer.sign_invocation(grant).await?;
        let app_dir = if grant.app_id.is_empty() {
            String::new()
        } else {
            format!("{}/{}", APPS_ROOT, grant.app_id)
        };
        debug!(base_url = %grant.base_url, app_dir = %app_dir, "Derived UCAN WebDAV client");
        Ok(Arc::new(ScopedWebDav {
            http: self.http.clone(),
            base: format!("{}{}", grant.base_url.trim_end_matches('/'), grant.prefix),
            endpoint: grant.endpoint.clone(),
            token,
            app_dir,
        }))
    }
}

struct ScopedWebDav {
    http: Client,
    base: String,
    endpoint: Option<String>,
    token: String,
    app_dir: String,
}

impl ScopedWebDav {
    fn url(&self, path: &str) -> Result<Url, StorageError> {
        let raw = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| StorageError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if let Some(endpoint) = &self.endpoint {
            url.query_pairs_mut().append_pair("endpoint", endpoint);
        }
        Ok(url)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StorageError> {
        Ok(self.http.request(method, self.url(path)?).bearer_auth(&self.token))
    }

    async fn check_response(response: Response) -> Result<Response, StorageError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StorageError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl ScopedStorage for ScopedWebDav {
    fn app_dir(&self) -> &str {
        &self.app_dir
    }

    async fn create_directory(&self, path: &str) -> Result<u16, StorageError> {
        let response = self.request(mkcol_method()?, path)?.send().await?;
        Ok(response.status().as_u16())
    }

    async fn quota(&self) -> Result<(), StorageError> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|e| StorageError::Backend(e.to_string()))?;
        let path = if self.app_dir.is_empty() { "/" } else { self.app_dir.as_str() };
        let response = self
            .request(method, path)?
            .header("Depth", "0")
            .header(header::CONTENT_TYPE, "application/xml")
            .body(QUOTA_PROPFIND_BODY)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn download_text(&self, path: &str) -> Result<String, StorageError> {
        let response = self.request(Method::GET, path)?.send().await?;
        let response = Self::check_response(response).await?;
        Ok(response.text().await?)
    }

    async fn upload(&self, path: &str, body: &str, content_type: &str) -> Result<(), StorageError> {
        let response = self
            .request(Method::PUT, path)?
            .header(header::CONTENT_TYPE, content_type)
            .body(body.to_string())
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
