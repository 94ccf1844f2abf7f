//! Composition root: wires the core components against on-disk state.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use walletsync_core::auth::{AuthContext, CredentialStore};
use walletsync_core::store::keys;
use walletsync_core::sync::{
    self, AuthType, StaticInvocation, SyncClient, SyncContext, WebDavStorage,
};
use walletsync_core::wallet::DiscoveryOptions;
use walletsync_core::{
    create_sync_client, AuthOrchestrator, Clock, Config, FileStore, KeyValueStore,
    ProviderResolver, SessionCache, SignLock, SystemClock, WalletDiscovery, WalletProvider,
};

/// Invocation token minted by the web app's signer, used for UCAN sync.
const INVOCATION_ENV: &str = "WALLETSYNC_UCAN_INVOCATION";

/// A terminal session has no injected wallet.
struct NoInjectedWallet;

#[async_trait]
impl WalletDiscovery for NoInjectedWallet {
    async fn discover(&self, _options: &DiscoveryOptions) -> Option<Arc<dyn WalletProvider>> {
        debug!("No injected wallet available in a terminal session");
        None
    }
}

pub struct App {
    pub config: Config,
    pub store: Arc<dyn KeyValueStore>,
    pub sessions: Arc<SessionCache>,
    pub sign_lock: Arc<SignLock>,
    pub auth: Arc<AuthOrchestrator>,
    pub sync: Arc<SyncContext>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let state = FileStore::in_dir(&Config::state_dir()?);
        debug!(path = %state.path().display(), "Using state file");
        let store: Arc<dyn KeyValueStore> = Arc::new(state);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let sessions = Arc::new(SessionCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            keys::UCAN_SESSION_ID,
            &config.ucan.root_capabilities,
        ));
        let sign_lock = Arc::new(SignLock::new(Arc::clone(&store), Arc::clone(&clock)));

        let auth = AuthOrchestrator::new(AuthContext {
            store: Arc::clone(&store),
            clock,
            resolver: ProviderResolver::new(
                Arc::new(NoInjectedWallet),
                config.auth.discovery_options(),
            ),
            sessions: Arc::clone(&sessions),
            challenge_base_url: config.auth.challenge_base_url.clone(),
        });

        let http = sync::http_client()?;
        let signer = Arc::new(StaticInvocation::new(
            std::env::var(INVOCATION_ENV).unwrap_or_default(),
        ));
        let storage = Arc::new(WebDavStorage::new(http.clone(), signer));
        let sync = Arc::new(SyncContext::with_client(
            http,
            config.ucan.clone(),
            Arc::clone(&sessions),
            Arc::clone(&sign_lock),
            storage,
        ));

        Ok(Self {
            config,
            store,
            sessions,
            sign_lock,
            auth,
            sync,
        })
    }

    /// Sync client for the configured mode. A basic-auth password missing
    /// from the config is looked up in the OS keychain.
    pub fn sync_client(&self) -> Box<dyn SyncClient> {
        let mut config = self.config.sync.clone();
        if config.auth_type == AuthType::Basic
            && config.password.is_empty()
            && !config.username.is_empty()
        {
            match CredentialStore::get_password(&config.username) {
                Ok(Some(password)) => config.password = password,
                Ok(None) => warn!(username = %config.username, "No keychain password for sync user"),
                Err(e) => warn!(error = %e, username = %config.username, "Keychain lookup failed"),
            }
        }
        create_sync_client(&config, &self.sync)
    }
}
