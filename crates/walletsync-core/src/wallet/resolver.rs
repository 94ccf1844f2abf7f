use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use super::{DiscoveryOptions, WalletDiscovery, WalletProvider};
use crate::error::AuthError;

type Probe = Shared<BoxFuture<'static, Option<Arc<dyn WalletProvider>>>>;

/// Finds the injected wallet once per process.
///
/// Concurrent callers share one in-flight probe. A probe that comes back
/// empty is forgotten, so a wallet installed later is picked up by the next
/// call.
pub struct ProviderResolver {
    discovery: Arc<dyn WalletDiscovery>,
    options: DiscoveryOptions,
    probe: Mutex<Option<Probe>>,
}

impl ProviderResolver {
    pub fn new(discovery: Arc<dyn WalletDiscovery>, options: DiscoveryOptions) -> Self {
        Self {
            discovery,
            options,
            probe: Mutex::new(None),
        }
    }

    pub async fn resolve(&self) -> Option<Arc<dyn WalletProvider>> {
        let probe = {
            let mut slot = self.probe.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(probe) => probe.clone(),
                None => {
                    let probe = self.start_probe();
                    *slot = Some(probe.clone());
                    probe
                }
            }
        };

        let provider = probe.clone().await;
        if provider.is_none() {
            let mut slot = self.probe.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&probe)) {
                debug!("No wallet provider found, clearing memoized probe");
                *slot = None;
            }
        }
        provider
    }

    pub async fn require(&self) -> Result<Arc<dyn WalletProvider>, AuthError> {
        self.resolve().await.ok_or(AuthError::ProviderNotFound)
    }

    fn start_probe(&self) -> Probe {
        let discovery = Arc::clone(&self.discovery);
        let options = self.options.clone();
        async move {
            match tokio::time::timeout(options.timeout, discovery.discover(&options)).await {
                Ok(provider) => provider,
                Err(_) => {
                    warn!(timeout_ms = options.timeout.as_millis() as u64, "Wallet discovery timed out");
                    None
                }
            }
        }
        .boxed()
        .shared()
    }
}
