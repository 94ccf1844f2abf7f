//! Backup sync against WebDAV-compatible storage.
//!
//! [`create_sync_client`] picks the client from [`SyncConfig::auth_type`]:
//! basic auth talks HTTP directly, UCAN mode derives a capability-scoped
//! client through [`CapabilityStorage`] on every call. Both expose the same
//! check/get/set surface, where an empty string from `get` means "no backup".

pub mod basic;
pub mod config;
pub mod ucan;
pub mod webdav;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Method};
use tracing::{debug, warn};

use crate::auth::{SessionCache, SignLock};
use crate::error::StorageError;

pub use basic::BasicSyncClient;
pub use config::{AuthType, SyncConfig, UcanConfig};
pub use ucan::{CapabilityStorage, ScopedStorage, StorageGrant, UcanSyncClient};
pub use webdav::{InvocationSigner, StaticInvocation, WebDavStorage};

// ============================================================================
// Constants
// ============================================================================

/// Path prefix served by the same-origin storage proxy.
pub const WEBDAV_PROXY_PREFIX: &str = "/api/webdav";

/// File holding the backup inside the sync folder.
pub const BACKUP_FILENAME: &str = "backup.json";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// MKCOL answers meaning the directory exists afterwards.
const DIR_READY_STATUSES: [u16; 3] = [201, 405, 409];

#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Whether the remote is reachable with the current credentials.
    /// Failures are logged, never returned.
    async fn check(&self) -> bool;

    /// Backup contents, or an empty string when there is none yet.
    async fn get(&self, key: &str) -> Result<String, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Shared state for sync clients, owned by the composition root.
pub struct SyncContext {
    pub http: Client,
    pub ucan: UcanConfig,
    pub sessions: Arc<SessionCache>,
    pub sign_lock: Arc<SignLock>,
    pub storage: Arc<dyn CapabilityStorage>,
    ensured_dirs: Mutex<HashSet<String>>,
}

impl SyncContext {
    pub fn new(
        ucan: UcanConfig,
        sessions: Arc<SessionCache>,
        sign_lock: Arc<SignLock>,
        storage: Arc<dyn CapabilityStorage>,
    ) -> Result<Self, StorageError> {
        Ok(Self::with_client(
            http_client()?,
            ucan,
            sessions,
            sign_lock,
            storage,
        ))
    }

    pub fn with_client(
        http: Client,
        ucan: UcanConfig,
        sessions: Arc<SessionCache>,
        sign_lock: Arc<SignLock>,
        storage: Arc<dyn CapabilityStorage>,
    ) -> Self {
        Self {
            http,
            ucan,
            sessions,
            sign_lock,
            storage,
            ensured_dirs: Mutex::new(HashSet::new()),
        }
    }

    /// Create the app directory once per (base URL, prefix, directory).
    ///
    /// A failed MKCOL is logged and not remembered, so the next client
    /// derivation tries again. It never fails the caller.
    pub(crate) async fn ensure_app_dir(
        &self,
        storage: &dyn ScopedStorage,
        base_url: &str,
        prefix: &str,
        app_dir: &str,
    ) {
        let key = format!("{}|{}|{}", base_url, prefix, app_dir);
        if self
            .ensured_dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            return;
        }

        match storage.create_directory(app_dir).await {
            Ok(status) if DIR_READY_STATUSES.contains(&status) => {
                debug!(dir = app_dir, status, "App directory ready");
                self.ensured_dirs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key);
            }
            Ok(status) => warn!(dir = app_dir, status, "MKCOL for app directory failed"),
            Err(e) => warn!(error = %e, dir = app_dir, "Failed to ensure app directory"),
        }
    }
}

/// HTTP client for storage calls. Redirects are surfaced to the caller,
/// not followed.
pub fn http_client() -> Result<Client, StorageError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .redirect(redirect::Policy::none())
        .build()?)
}

/// WebDAV's collection-creation verb.
pub(crate) fn mkcol_method() -> Result<Method, StorageError> {
    Method::from_bytes(b"MKCOL").map_err(|e| StorageError::Backend(e.to_string()))
}

pub fn create_sync_client(config: &SyncConfig, ctx: &Arc<SyncContext>) -> Box<dyn SyncClient> {
    match config.auth_type {
        AuthType::Basic => Box::new(BasicSyncClient::new(ctx.http.clone(), config.clone())),
        AuthType::Ucan => Box::new(UcanSyncClient::new(config.clone(), Arc::clone(ctx))),
    }
}
