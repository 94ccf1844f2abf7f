//! Test doubles for the wallet and storage seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tokio::sync::{broadcast, watch, Notify};

use crate::auth::{
    AuthContext, AuthOrchestrator, Capability, SessionCache, SignLock, UcanRoot, UcanSession,
    DEFAULT_CHALLENGE_BASE_URL,
};
use crate::clock::{Clock, FixedClock};
use crate::error::{StorageError, WalletError};
use crate::store::{keys, KeyValueStore, MemoryStore};
use crate::sync::{CapabilityStorage, ScopedStorage, StorageGrant, SyncContext, UcanConfig};
use crate::wallet::{
    ChallengeLogin, DiscoveryOptions, ProviderResolver, WalletDiscovery, WalletEvent,
    WalletProvider,
};

/// Pinned "now" for every fixture, in epoch millis.
pub const NOW: i64 = 1_700_000_000_000;

pub const DID: &str = "did:key:alice";

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{}", addr)
}

pub fn required_caps() -> Vec<Capability> {
    UcanConfig::default().root_capabilities
}

pub fn session_pair(root_exp: i64) -> (UcanSession, UcanRoot) {
    let session = UcanSession {
        did: DID.to_string(),
        created_at: NOW - 1_000,
        expires_at: None,
    };
    let root = UcanRoot {
        aud: DID.to_string(),
        cap: required_caps(),
        exp: root_exp,
        iss: Some("did:pkh:eth:0xabc".to_string()),
    };
    (session, root)
}

/// Store a session and a root expiring at `root_exp`.
pub fn authorize(sessions: &SessionCache, root_exp: i64) {
    let (session, root) = session_pair(root_exp);
    sessions.store_session(session);
    sessions.store_root(&root);
}

/// Unsigned three-segment token with the given `exp` (seconds).
pub fn jwt(exp_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"0xabc","exp":{}}}"#, exp_secs));
    format!("{}.{}.sig", header, claims)
}

// ============================================================================
// Wallet
// ============================================================================

pub struct MockWallet {
    accounts: Vec<String>,
    accounts_error: Option<WalletError>,
    login_error: Option<WalletError>,
    chain: Option<String>,
    balance: String,
    token: String,
    pub login_calls: AtomicUsize,
    logins: Mutex<Vec<String>>,
    gate: Option<watch::Sender<bool>>,
    entered: Notify,
    events: broadcast::Sender<WalletEvent>,
}

impl MockWallet {
    pub fn new(accounts: Vec<&str>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: accounts.into_iter().map(str::to_string).collect(),
            accounts_error: None,
            login_error: None,
            chain: Some("0x1".to_string()),
            balance: "0x0".to_string(),
            token: jwt(NOW / 1000 + 3600),
            login_calls: AtomicUsize::new(0),
            logins: Mutex::new(Vec::new()),
            gate: None,
            entered: Notify::new(),
            events,
        }
    }

    /// Hold every login until [`MockWallet::release_login`].
    pub fn gated(mut self) -> Self {
        self.gate = Some(watch::channel(false).0);
        self
    }

    pub fn with_accounts_error(mut self, err: WalletError) -> Self {
        self.accounts_error = Some(err);
        self
    }

    pub fn with_login_error(mut self, err: WalletError) -> Self {
        self.login_error = Some(err);
        self
    }

    pub fn with_chain(mut self, chain: &str) -> Self {
        self.chain = Some(chain.to_string());
        self
    }

    pub fn with_balance(mut self, wei_hex: &str) -> Self {
        self.balance = wei_hex.to_string();
        self
    }

    pub fn token(&self) -> String {
        self.token.clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }

    pub async fn wait_for_login(&self) {
        self.entered.notified().await;
    }

    pub fn release_login(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        match &self.accounts_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.accounts.clone()),
        }
    }

    async fn chain_id(&self) -> Result<Option<String>, WalletError> {
        Ok(self.chain.clone())
    }

    async fn balance(&self, _address: &str, _block: &str) -> Result<String, WalletError> {
        Ok(self.balance.clone())
    }

    async fn login_with_challenge(&self, request: &ChallengeLogin) -> Result<String, WalletError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.logins.lock().unwrap().push(request.address.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let mut open = gate.subscribe();
            let _ = open.wait_for(|open| *open).await;
        }
        match &self.login_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.token.clone()),
        }
    }

    fn events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

pub struct MockDiscovery {
    provider: Mutex<Option<Arc<dyn WalletProvider>>>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl MockDiscovery {
    pub fn found(wallet: MockWallet) -> Self {
        Self::found_arc(Arc::new(wallet))
    }

    pub fn found_arc(wallet: Arc<MockWallet>) -> Self {
        let provider: Arc<dyn WalletProvider> = wallet;
        Self {
            provider: Mutex::new(Some(provider)),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn absent() -> Self {
        Self {
            provider: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn install(&self, wallet: MockWallet) {
        let provider: Arc<dyn WalletProvider> = Arc::new(wallet);
        *self.provider.lock().unwrap() = Some(provider);
    }
}

#[async_trait]
impl WalletDiscovery for MockDiscovery {
    async fn discover(&self, _options: &DiscoveryOptions) -> Option<Arc<dyn WalletProvider>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let provider = self.provider.lock().unwrap().clone();
        provider
    }
}

/// Orchestrator over a fresh in-memory store and a pinned clock.
pub fn orchestrator(
    wallet: Option<Arc<MockWallet>>,
) -> (Arc<AuthOrchestrator>, MemoryStore, Arc<MockDiscovery>) {
    let store = MemoryStore::new();
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(NOW));
    let discovery = Arc::new(match wallet {
        Some(wallet) => MockDiscovery::found_arc(wallet),
        None => MockDiscovery::absent(),
    });
    let sessions = Arc::new(SessionCache::new(
        Arc::clone(&shared),
        Arc::clone(&clock),
        keys::UCAN_SESSION_ID,
        &required_caps(),
    ));
    let auth = AuthOrchestrator::new(AuthContext {
        store: shared,
        clock,
        resolver: ProviderResolver::new(discovery.clone(), DiscoveryOptions::default()),
        sessions,
        challenge_base_url: DEFAULT_CHALLENGE_BASE_URL.to_string(),
    });
    (auth, store, discovery)
}

// ============================================================================
// Storage
// ============================================================================

pub struct MockCapabilityStorage {
    app_dir: String,
    derive_error: Option<WalletError>,
    download_error: Option<String>,
    files: Arc<Mutex<HashMap<String, String>>>,
    mkcol_status: Arc<AtomicU16>,
    last_grant: Mutex<Option<StorageGrant>>,
    pub derive_calls: AtomicUsize,
    pub mkcol_calls: Arc<AtomicUsize>,
}

impl MockCapabilityStorage {
    pub fn new(app_dir: &str) -> Self {
        Self {
            app_dir: app_dir.to_string(),
            derive_error: None,
            download_error: None,
            files: Arc::new(Mutex::new(HashMap::new())),
            mkcol_status: Arc::new(AtomicU16::new(201)),
            last_grant: Mutex::new(None),
            derive_calls: AtomicUsize::new(0),
            mkcol_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_derive_error(mut self, err: WalletError) -> Self {
        self.derive_error = Some(err);
        self
    }

    pub fn with_download_error(mut self, message: &str) -> Self {
        self.download_error = Some(message.to_string());
        self
    }

    pub fn with_mkcol_status(self, status: u16) -> Self {
        self.set_mkcol_status(status);
        self
    }

    pub fn set_mkcol_status(&self, status: u16) {
        self.mkcol_status.store(status, Ordering::SeqCst);
    }

    pub fn files(&self) -> HashMap<String, String> {
        self.files.lock().unwrap().clone()
    }

    pub fn last_grant(&self) -> Option<StorageGrant> {
        self.last_grant.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityStorage for MockCapabilityStorage {
    async fn derive(&self, grant: &StorageGrant) -> Result<Arc<dyn ScopedStorage>, StorageError> {
        self.derive_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_grant.lock().unwrap() = Some(grant.clone());
        if let Some(err) = &self.derive_error {
            return Err(err.clone().into());
        }
        Ok(Arc::new(MockScoped {
            app_dir: self.app_dir.clone(),
            download_error: self.download_error.clone(),
            files: Arc::clone(&self.files),
            mkcol_status: Arc::clone(&self.mkcol_status),
            mkcol_calls: Arc::clone(&self.mkcol_calls),
        }))
    }
}

struct MockScoped {
    app_dir: String,
    download_error: Option<String>,
    files: Arc<Mutex<HashMap<String, String>>>,
    mkcol_status: Arc<AtomicU16>,
    mkcol_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ScopedStorage for MockScoped {
    fn app_dir(&self) -> &str {
        &self.app_dir
    }

    async fn create_directory(&self, _path: &str) -> Result<u16, StorageError> {
        self.mkcol_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.mkcol_status.load(Ordering::SeqCst))
    }

    async fn quota(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn download_text(&self, path: &str) -> Result<String, StorageError> {
        if let Some(message) = &self.download_error {
            return Err(StorageError::Backend(message.clone()));
        }
        let file = self.files.lock().unwrap().get(path).cloned();
        file.ok_or(StorageError::Status {
            status: 404,
            body: String::new(),
        })
    }

    async fn upload(&self, path: &str, body: &str, _content_type: &str) -> Result<(), StorageError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), body.to_string());
        Ok(())
    }
}

/// Sync context over mock storage with a configured backend.
pub struct SyncHarness {
    pub store: MemoryStore,
    pub sessions: Arc<SessionCache>,
    pub storage: Arc<MockCapabilityStorage>,
    pub ctx: Arc<SyncContext>,
}

impl SyncHarness {
    pub fn new(storage: MockCapabilityStorage) -> Self {
        let store = MemoryStore::new();
        let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(NOW));
        let sessions = Arc::new(SessionCache::new(
            Arc::clone(&shared),
            Arc::clone(&clock),
            keys::UCAN_SESSION_ID,
            &required_caps(),
        ));
        let sign_lock = Arc::new(SignLock::new(shared, clock));
        let storage = Arc::new(storage);
        let ucan = UcanConfig {
            backend_url: "https://webdav.example".to_string(),
            audience: "did:web:webdav.example".to_string(),
            ..UcanConfig::default()
        };
        let ctx = Arc::new(SyncContext::with_client(
            reqwest::Client::new(),
            ucan,
            Arc::clone(&sessions),
            sign_lock,
            storage.clone(),
        ));
        Self {
            store,
            sessions,
            storage,
            ctx,
        }
    }

    pub fn set_backend_url(&mut self, url: &str) {
        let ucan = UcanConfig {
            backend_url: url.to_string(),
            ..self.ctx.ucan.clone()
        };
        self.ctx = Arc::new(SyncContext::with_client(
            self.ctx.http.clone(),
            ucan,
            Arc::clone(&self.sessions),
            Arc::clone(&self.ctx.sign_lock),
            self.storage.clone(),
        ));
    }
}
