//! Wallet adapter seam.
//!
//! The injected wallet SDK is opaque to this crate. An adapter implements
//! [`WalletDiscovery`] to find the injected provider and [`WalletProvider`]
//! for the calls the login flow needs. Adapter errors come back as
//! [`WalletError`] and are classified once, in
//! [`WalletError::classify`](crate::error::WalletError::classify).

pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::WalletError;

pub use resolver::ProviderResolver;

/// Default upper bound for provider discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Prefer the vendor wallet when several providers are injected.
    pub prefer_vendor: bool,
    /// Discovery that takes longer than this counts as "no wallet".
    pub timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            prefer_vendor: true,
            timeout: Duration::from_millis(DEFAULT_DISCOVERY_TIMEOUT_MS),
        }
    }
}

/// Notifications delivered by the wallet, in wallet order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

/// Parameters for the wallet SDK's challenge login (challenge, sign, verify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeLogin {
    pub address: String,
    pub base_url: String,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError>;

    async fn chain_id(&self) -> Result<Option<String>, WalletError>;

    /// Balance as a hex wei string.
    async fn balance(&self, address: &str, block: &str) -> Result<String, WalletError>;

    /// Run the challenge/verify exchange and return the issued access token.
    async fn login_with_challenge(&self, request: &ChallengeLogin) -> Result<String, WalletError>;

    /// Account and chain notifications. Dropping the receiver unsubscribes.
    fn events(&self) -> broadcast::Receiver<WalletEvent>;
}

#[async_trait]
pub trait WalletDiscovery: Send + Sync {
    async fn discover(&self, options: &DiscoveryOptions) -> Option<Arc<dyn WalletProvider>>;
}
