use std::sync::{Arc, Mutex, PoisonError};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::capability::{caps_key, Capability};
use crate::clock::Clock;
use crate::error::{AuthError, MismatchReason};
use crate::store::{keys, KeyValueStore};

/// Wallet-signed UCAN session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UcanSession {
    pub did: String,
    #[serde(default)]
    pub created_at: i64,
    /// Epoch millis. Sessions without one live until their root says otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl UcanSession {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_millis)
    }

    fn is_usable(&self, now_millis: i64) -> bool {
        !self.did.trim().is_empty() && !self.is_expired(now_millis)
    }
}

/// Root capability grant for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UcanRoot {
    pub aud: String,
    pub cap: Vec<Capability>,
    /// Epoch millis.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Check, in order: audience, capability set, expiry.
pub fn validate_root(
    root: &UcanRoot,
    session: &UcanSession,
    required_caps_key: &str,
    now_millis: i64,
) -> Result<(), AuthError> {
    if root.aud != session.did {
        return Err(AuthError::CapabilityMismatch(MismatchReason::AudienceMismatch));
    }
    if caps_key(&root.cap) != required_caps_key {
        return Err(AuthError::CapabilityMismatch(MismatchReason::CapabilityMismatch));
    }
    if root.exp <= now_millis {
        return Err(AuthError::CapabilityMismatch(MismatchReason::Expired));
    }
    Ok(())
}

/// Single process-wide UCAN session entry, backed by the durable store.
///
/// The wallet-signing flow writes session and root through
/// [`SessionCache::store_session`] / [`SessionCache::store_root`]; readers
/// only ever get a session that is still structurally usable.
pub struct SessionCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    session_id: String,
    required_caps_key: String,
    cached: Mutex<Option<UcanSession>>,
}

impl SessionCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        session_id: impl Into<String>,
        required_caps: &[Capability],
    ) -> Self {
        Self {
            store,
            clock,
            session_id: session_id.into(),
            required_caps_key: caps_key(required_caps),
            cached: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn required_caps_key(&self) -> &str {
        &self.required_caps_key
    }

    pub fn store_session(&self, session: UcanSession) {
        self.write(&keys::ucan_session(&self.session_id), &session);
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn store_root(&self, root: &UcanRoot) {
        self.write(&keys::ucan_root(&self.session_id), root);
    }

    pub fn root(&self) -> Option<UcanRoot> {
        self.read(&keys::ucan_root(&self.session_id))
    }

    /// Cached session if it is still usable, else `None`. Never fails.
    pub fn get_valid_session(&self) -> Option<UcanSession> {
        let now = self.clock.now_millis();
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        let session = match cached.clone() {
            Some(session) => session,
            None => self.read::<UcanSession>(&keys::ucan_session(&self.session_id))?,
        };

        if !session.is_usable(now) {
            debug!(did = %session.did, "Cached UCAN session is no longer usable");
            *cached = None;
            return None;
        }

        *cached = Some(session.clone());
        Some(session)
    }

    pub fn validate_root(&self, root: &UcanRoot, session: &UcanSession) -> Result<(), AuthError> {
        validate_root(root, session, &self.required_caps_key, self.clock.now_millis())
    }

    /// Session and root, validated. Does not touch the cache on failure.
    pub fn authorized(&self) -> Result<(UcanSession, UcanRoot), AuthError> {
        let session = self.get_valid_session().ok_or(AuthError::SessionUnavailable)?;
        let root = self.root().ok_or(AuthError::RootUnavailable)?;
        self.validate_root(&root, &session)?;
        Ok((session, root))
    }

    /// Like [`SessionCache::authorized`], but any root mismatch (audience,
    /// capability set or expiry) also drops the cached session so the next
    /// caller is sent back to login.
    pub fn resolve_authorized(&self) -> Result<(UcanSession, UcanRoot), AuthError> {
        let result = self.authorized();
        if let Err(ref err) = result {
            if matches!(err, AuthError::CapabilityMismatch(_)) {
                warn!(error = %err, "UCAN root rejected, invalidating session");
                self.invalidate();
            }
        }
        result
    }

    pub fn is_valid_authorization(&self) -> bool {
        self.authorized().is_ok()
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.store.remove(&keys::ucan_session(&self.session_id));
    }

    /// Drop session and root, e.g. on wallet disconnect.
    pub fn clear(&self) {
        self.invalidate();
        self.store.remove(&keys::ucan_root(&self.session_id));
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, key = key, "Discarding unreadable UCAN entry");
                self.store.remove(key);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.store.set(key, &json),
            Err(e) => warn!(error = %e, key = key, "Failed to serialize UCAN entry"),
        }
    }
}
