//! UCAN-authorized sync client.
//!
//! Each call re-validates the cached session and root, then derives a storage
//! client scoped to the root's capabilities. Deriving may make the wallet sign
//! an invocation, so it runs under the [`SignLock`](crate::auth::SignLock).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{SyncClient, SyncConfig, SyncContext, BACKUP_FILENAME, WEBDAV_PROXY_PREFIX};
use crate::auth::{Capability, UcanRoot, UcanSession};
use crate::error::{AuthError, StorageError};

/// Everything a storage backend needs to mint a scoped client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageGrant {
    pub base_url: String,
    pub prefix: String,
    /// Real backend URL, sent as `endpoint` on proxied requests.
    pub endpoint: Option<String>,
    pub audience: String,
    pub app_id: String,
    pub app_action: String,
    pub capabilities: Vec<Capability>,
    pub invocation_capabilities: Vec<Capability>,
    pub session_id: String,
    pub session: UcanSession,
    pub root: UcanRoot,
}

/// Mints capability-scoped storage clients.
#[async_trait]
pub trait CapabilityStorage: Send + Sync {
    async fn derive(&self, grant: &StorageGrant) -> Result<Arc<dyn ScopedStorage>, StorageError>;
}

/// Storage client bound to one capability grant.
#[async_trait]
pub trait ScopedStorage: Send + Sync {
    /// Directory the grant is scoped to, empty when unscoped.
    fn app_dir(&self) -> &str;

    /// MKCOL `path`, returning the raw status.
    async fn create_directory(&self, path: &str) -> Result<u16, StorageError>;

    async fn quota(&self) -> Result<(), StorageError>;

    async fn download_text(&self, path: &str) -> Result<String, StorageError>;

    async fn upload(&self, path: &str, body: &str, content_type: &str) -> Result<(), StorageError>;
}

pub struct UcanSyncClient {
    config: SyncConfig,
    ctx: Arc<SyncContext>,
}

impl UcanSyncClient {
    pub fn new(config: SyncConfig, ctx: Arc<SyncContext>) -> Self {
        Self { config, ctx }
    }

    /// Where requests go: the backend directly, or the proxy under its prefix.
    fn route(&self, backend_url: &str) -> Result<(String, &'static str, Option<String>), StorageError> {
        if !self.config.use_proxy {
            return Ok((backend_url.to_string(), "", None));
        }
        let proxy = self.config.proxy_url.trim().trim_end_matches('/');
        if proxy.is_empty() {
            return Err(StorageError::InvalidUrl("sync proxy URL is not configured".to_string()));
        }
        Ok((proxy.to_string(), WEBDAV_PROXY_PREFIX, Some(backend_url.to_string())))
    }

    /// Validate, lock, derive, unlock. Returns the scoped client and the
    /// backup file path inside its app directory.
    async fn scoped(&self) -> Result<(Arc<dyn ScopedStorage>, String), StorageError> {
        let ucan = &self.ctx.ucan;
        let backend_url = ucan.backend_url.trim().trim_end_matches('/');
        if backend_url.is_empty() {
            return Err(AuthError::Generic("WEBDAV_BACKEND_URL is not configured".to_string()).into());
        }
        let audience = ucan.audience.trim();
        if audience.is_empty() {
            return Err(AuthError::Generic("WebDAV UCAN audience is not configured".to_string()).into());
        }
        let (base_url, prefix, endpoint) = self.route(backend_url)?;

        let (session, root) = self.ctx.sessions.resolve_authorized()?;

        let lock = &self.ctx.sign_lock;
        if !lock.acquire() {
            info!("UCAN sign already pending, not deriving storage client");
            return Err(AuthError::SignPending.into());
        }

        let grant = StorageGrant {
            base_url: base_url.clone(),
            prefix: prefix.to_string(),
            endpoint,
            audience: audience.to_string(),
            app_id: ucan.app_id.clone(),
            app_action: ucan.app_action.clone(),
            capabilities: root.cap.clone(),
            invocation_capabilities: ucan.invocation_capabilities.clone(),
            session_id: self.ctx.sessions.session_id().to_string(),
            session,
            root,
        };

        let storage = match self.ctx.storage.derive(&grant).await {
            Ok(storage) => {
                lock.release();
                storage
            }
            Err(err) => {
                if err.is_sign_pending() {
                    debug!("Wallet still signing, extending sign lock");
                    lock.refresh();
                } else {
                    lock.release();
                }
                return Err(err);
            }
        };

        let app_dir = storage.app_dir().trim_end_matches('/').to_string();
        if !app_dir.is_empty() {
            self.ctx
                .ensure_app_dir(storage.as_ref(), &base_url, prefix, &app_dir)
                .await;
        }
        let file_path = format!("{}/{}", app_dir, BACKUP_FILENAME);
        Ok((storage, file_path))
    }
}

#[async_trait]
impl SyncClient for UcanSyncClient {
    async fn check(&self) -> bool {
        let result = async {
            let (storage, _) = self.scoped().await?;
            storage.quota().await
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, kind = %e.classify(), "UCAN WebDAV check failed");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let (storage, file_path) = self.scoped().await?;
        match storage.download_text(&file_path).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_not_found() => {
                debug!(key = key, path = %file_path, "No remote backup yet");
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let (storage, file_path) = self.scoped().await?;
        debug!(key = key, path = %file_path, bytes = value.len(), "UCAN WebDAV upload");
        storage.upload(&file_path, value, "application/json").await
    }
}
