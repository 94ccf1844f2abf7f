//! Wallet connection and challenge login.
//!
//! ```text
//! Disconnected -> Connecting -> ChallengeIssued -> Authorized
//!        ^             |               |
//!        +-------------+---------------+  (any failure)
//! ```
//!
//! Wallet account/chain notifications are applied in delivery order by the
//! listener task started with [`AuthOrchestrator::attach_listeners`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::events::{AuthEvent, AuthState, AuthStatus, Notice, NoticeLevel};
use super::session::SessionCache;
use super::token::is_valid_token;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::store::{keys, KeyValueStore};
use crate::wallet::{ChallengeLogin, ProviderResolver, WalletEvent, WalletProvider};

/// Path prefix of the challenge/verify/refresh/logout endpoints.
pub const DEFAULT_CHALLENGE_BASE_URL: &str = "/api/v1/public/auth";

/// Buffer size for the auth event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

const WEI_PER_ETH: f64 = 1e18;

const KNOWN_CHAINS: &[(&str, &str)] = &[
    ("0x1", "Ethereum Mainnet"),
    ("0xaa36a7", "Sepolia Testnet"),
    ("0x5", "Goerli Testnet"),
    ("0x1538", "YeYing Network"),
];

/// Everything the orchestrator needs, owned by the composition root.
pub struct AuthContext {
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub resolver: ProviderResolver,
    pub sessions: Arc<SessionCache>,
    pub challenge_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn(String),
    /// Another login was already in flight in this process.
    Skipped,
    /// No account to log in with; the user was asked to connect first.
    NeedsAccount,
    /// The wallet was marked absent; the user was asked to install one.
    NoWallet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub id: String,
    pub name: String,
}

impl ChainInfo {
    pub fn from_id(id: String) -> Self {
        let name = KNOWN_CHAINS
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown network")
            .to_string();
        Self { id, name }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub wei_hex: String,
    /// ETH with six decimals.
    pub eth: String,
}

impl Balance {
    pub fn from_wei_hex(wei_hex: &str) -> Result<Self, AuthError> {
        let digits = wei_hex.trim_start_matches("0x").trim_start_matches("0X");
        let wei = if digits.is_empty() {
            0
        } else {
            u128::from_str_radix(digits, 16)
                .map_err(|_| AuthError::Generic(format!("Invalid balance value: {}", wei_hex)))?
        };
        Ok(Self {
            wei_hex: wei_hex.to_string(),
            eth: format!("{:.6}", wei as f64 / WEI_PER_ETH),
        })
    }
}

/// Detaches the wallet listeners when asked; clones share the same task.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    detached: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl ListenerHandle {
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.abort.abort();
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

/// Process-local single-flight marker for the login sub-flow.
struct LoginFlight<'a>(&'a AtomicBool);

impl<'a> LoginFlight<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoginFlight(flag))
    }
}

impl Drop for LoginFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AuthOrchestrator {
    ctx: AuthContext,
    events: broadcast::Sender<AuthEvent>,
    state: Mutex<AuthState>,
    login_in_flight: AtomicBool,
    listeners: Mutex<Option<ListenerHandle>>,
}

impl AuthOrchestrator {
    pub fn new(ctx: AuthContext) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            ctx,
            events,
            state: Mutex::new(AuthState::Disconnected),
            login_in_flight: AtomicBool::new(false),
            listeners: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.ctx.sessions
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored account, or an empty string when none is connected.
    pub fn current_account(&self) -> String {
        self.ctx.store.get(keys::CURRENT_ACCOUNT).unwrap_or_default()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.ctx.store.get(keys::AUTH_TOKEN)
    }

    pub fn has_valid_token(&self) -> bool {
        self.auth_token()
            .is_some_and(|token| is_valid_token(&token, self.ctx.clock.now_secs()))
    }

    pub fn is_valid_ucan_authorization(&self) -> bool {
        if self.wallet_marked_absent() {
            return false;
        }
        self.ctx.sessions.is_valid_authorization()
    }

    pub fn status(&self) -> AuthStatus {
        if self.is_valid_ucan_authorization() {
            AuthStatus::Authorized
        } else if !self.current_account().is_empty() {
            AuthStatus::Expired
        } else {
            AuthStatus::Unauthorized
        }
    }

    /// Tell subscribers to re-derive auth-dependent state, e.g. after the
    /// signing flow stored a new UCAN session.
    pub fn announce_auth_change(&self) {
        self.emit(AuthEvent::AuthStateChanged(self.state()));
    }

    // =========================================================================
    // Connect and login
    // =========================================================================

    /// Connect the wallet and log in with the first account.
    ///
    /// `Ok(None)` covers the soft failures (wallet marked absent, no account
    /// returned); each of those has already produced a notice.
    pub async fn connect_wallet(&self) -> Result<Option<String>, AuthError> {
        if self.reject_if_wallet_absent() {
            return Ok(None);
        }
        self.set_state(AuthState::Connecting);
        match self.connect_inner().await {
            Ok(account) => Ok(account),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn connect_inner(&self) -> Result<Option<String>, AuthError> {
        let provider = self.ctx.resolver.require().await?;
        let accounts = provider.request_accounts().await?;

        let Some(account) = accounts.into_iter().next() else {
            warn!("Wallet returned no accounts");
            self.set_state(AuthState::Disconnected);
            self.notify(Notice::error("The wallet did not return an account."));
            return Ok(None);
        };

        self.ctx.store.set(keys::CURRENT_ACCOUNT, &account);
        self.emit(AuthEvent::AccountChanged(Some(account.clone())));
        self.notify(Notice::success(format!("Wallet connected. Account: {}", account)));

        self.run_login(Some(provider), Some(account.clone())).await?;
        Ok(Some(account))
    }

    /// Challenge login. A call made while another login is running returns
    /// [`LoginOutcome::Skipped`] without doing anything. A missing wallet or
    /// account is reported as a notice, not an error.
    pub async fn login_with_challenge(
        &self,
        provider: Option<Arc<dyn WalletProvider>>,
        address: Option<String>,
    ) -> Result<LoginOutcome, AuthError> {
        if self.reject_if_wallet_absent() {
            return Ok(LoginOutcome::NoWallet);
        }
        match self.run_login(provider, address).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn run_login(
        &self,
        provider: Option<Arc<dyn WalletProvider>>,
        address: Option<String>,
    ) -> Result<LoginOutcome, AuthError> {
        let Some(_flight) = LoginFlight::begin(&self.login_in_flight) else {
            debug!("Login already in flight, skipping");
            return Ok(LoginOutcome::Skipped);
        };

        let provider = match provider {
            Some(provider) => provider,
            None => self.ctx.resolver.require().await?,
        };
        let account = address
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.current_account());
        if account.is_empty() {
            warn!("No account to log in with");
            self.notify(Notice::for_error(&AuthError::AccountUnavailable));
            return Ok(LoginOutcome::NeedsAccount);
        }

        self.set_state(AuthState::ChallengeIssued);
        let request = ChallengeLogin {
            address: account.clone(),
            base_url: self.ctx.challenge_base_url.clone(),
        };
        let token = provider.login_with_challenge(&request).await?;

        self.ctx.store.set(keys::AUTH_TOKEN, &token);
        info!(account = %account, "Wallet login succeeded");
        self.notify(Notice::success("Login succeeded."));
        self.set_state(AuthState::Authorized);
        Ok(LoginOutcome::LoggedIn(account))
    }

    // =========================================================================
    // Wallet info
    // =========================================================================

    pub async fn chain_info(&self) -> Result<Option<ChainInfo>, AuthError> {
        if self.reject_if_wallet_absent() {
            return Ok(None);
        }
        let result = async {
            let provider = self.ctx.resolver.require().await?;
            Ok::<_, AuthError>(provider.chain_id().await?)
        }
        .await;

        match result {
            Ok(Some(id)) if !id.is_empty() => Ok(Some(ChainInfo::from_id(id))),
            Ok(_) => {
                self.notify(Notice::error("Failed to read the chain id."));
                Ok(None)
            }
            Err(err) => {
                error!(error = %err, "Failed to read chain id");
                self.notify(Notice::for_error(&err));
                Err(err)
            }
        }
    }

    pub async fn balance(&self) -> Result<Option<Balance>, AuthError> {
        if self.reject_if_wallet_absent() {
            return Ok(None);
        }
        let account = self.current_account();
        if account.is_empty() {
            self.notify(Notice::for_error(&AuthError::AccountUnavailable));
            return Ok(None);
        }
        let result = async {
            let provider = self.ctx.resolver.require().await?;
            let wei_hex = provider.balance(&account, "latest").await?;
            Balance::from_wei_hex(&wei_hex)
        }
        .await;

        match result {
            Ok(balance) => Ok(Some(balance)),
            Err(err) => {
                error!(error = %err, account = %account, "Failed to read balance");
                self.notify(Notice::for_error(&err));
                Err(err)
            }
        }
    }

    // =========================================================================
    // Wallet events
    // =========================================================================

    /// Subscribe to the wallet's account and chain notifications.
    ///
    /// Returns the existing handle while listeners are attached, and `None`
    /// when no wallet is available.
    pub async fn attach_listeners(self: &Arc<Self>) -> Option<ListenerHandle> {
        if let Some(handle) = self.active_listener() {
            return Some(handle);
        }
        let provider = self.ctx.resolver.resolve().await?;

        let mut slot = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_ref().filter(|h| !h.is_detached()) {
            return Some(handle.clone());
        }

        let mut events = provider.events();
        let detached = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&detached);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Ok(event) => this.handle_wallet_event(&provider, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Wallet event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Wallet event listener stopped");
        });

        let handle = ListenerHandle {
            detached,
            abort: task.abort_handle(),
        };
        *slot = Some(handle.clone());
        Some(handle)
    }

    pub fn detach_listeners(&self) {
        if let Some(handle) = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.detach();
        }
    }

    fn active_listener(&self) -> Option<ListenerHandle> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|h| !h.is_detached())
            .cloned()
    }

    pub async fn handle_wallet_event(&self, provider: &Arc<dyn WalletProvider>, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => {
                self.handle_accounts_changed(provider, accounts).await
            }
            WalletEvent::ChainChanged(chain_id) => self.handle_chain_changed(chain_id),
        }
    }

    async fn handle_accounts_changed(&self, provider: &Arc<dyn WalletProvider>, accounts: Vec<String>) {
        let Some(next) = accounts.into_iter().next() else {
            info!("Wallet disconnected");
            self.ctx.store.remove(keys::CURRENT_ACCOUNT);
            self.clear_access_token();
            self.set_state(AuthState::Disconnected);
            self.emit(AuthEvent::AccountChanged(None));
            self.notify(Notice::error("Wallet disconnected, please reconnect."));
            return;
        };

        if next == self.current_account() {
            debug!(account = %next, "Account notification unchanged, ignoring");
            return;
        }

        info!(account = %next, "Wallet account changed");
        self.ctx.store.set(keys::CURRENT_ACCOUNT, &next);
        self.clear_access_token();
        self.emit(AuthEvent::AccountChanged(Some(next.clone())));

        // Failures are already logged and turned into a notice.
        let _ = self
            .login_with_challenge(Some(Arc::clone(provider)), Some(next))
            .await;
    }

    fn handle_chain_changed(&self, chain_id: String) {
        info!(chain_id = %chain_id, "Wallet chain changed");
        self.notify(Notice::info(format!("Switched network: {}", chain_id)));
        self.emit(AuthEvent::ChainChanged(chain_id));
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn clear_access_token(&self) {
        self.ctx.store.remove(keys::AUTH_TOKEN);
        self.emit(AuthEvent::TokenInvalidated);
    }

    fn wallet_marked_absent(&self) -> bool {
        self.ctx.store.get(keys::HAS_CONNECTED_WALLET).as_deref() == Some("false")
    }

    fn reject_if_wallet_absent(&self) -> bool {
        if !self.wallet_marked_absent() {
            return false;
        }
        warn!("Wallet marked as not installed, skipping wallet call");
        self.notify(Notice::for_error(&AuthError::ProviderNotFound));
        true
    }

    fn fail(&self, err: &AuthError) {
        error!(error = %err, "Wallet authentication failed");
        self.notify(Notice::for_error(err));
        self.set_state(AuthState::Disconnected);
    }

    fn set_state(&self, next: AuthState) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            debug!(state = ?next, "Auth state changed");
            self.emit(AuthEvent::AuthStateChanged(next));
        }
    }

    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => warn!(message = %notice.message, "Auth notice"),
            _ => info!(message = %notice.message, "Auth notice"),
        }
        self.emit(AuthEvent::Notice(notice));
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
