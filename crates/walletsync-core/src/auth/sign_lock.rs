//! Advisory lock around wallet signature prompts.
//!
//! Most wallets reject a second signature request while one is open, so only
//! one signing flow may run at a time across every process sharing the
//! store. The record is a single epoch-millis timestamp; a record older than
//! the TTL is stale and gets cleared lazily by whoever reads it next.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{keys, KeyValueStore};

/// A pending record older than this no longer holds the lock.
pub const SIGN_LOCK_TTL_MS: i64 = 90 * 1000;

/// Wallet error wording that means "a signature request is already open".
const PENDING_PHRASES: &[&str] = &["Sign message request already pending", "UCAN sign pending"];

/// Whether an error message is the wallet (or this lock) reporting a
/// signature request already in flight. Unknown wording is never treated
/// as pending.
pub fn is_lock_pending_error(message: &str) -> bool {
    PENDING_PHRASES.iter().any(|phrase| message.contains(phrase))
}

pub struct SignLock {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl SignLock {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn read_timestamp(&self) -> Option<i64> {
        let raw = self.store.get(keys::UCAN_SIGN_PENDING)?;
        match raw.trim().parse::<f64>() {
            Ok(ts) if ts.is_finite() => Some(ts as i64),
            _ => {
                warn!(value = %raw, "Clearing corrupt sign lock record");
                self.store.remove(keys::UCAN_SIGN_PENDING);
                None
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        let Some(ts) = self.read_timestamp() else {
            return false;
        };
        let elapsed = self.clock.now_millis() - ts;
        if elapsed > SIGN_LOCK_TTL_MS {
            debug!(elapsed_ms = elapsed, "Sign lock expired, clearing");
            self.store.remove(keys::UCAN_SIGN_PENDING);
            return false;
        }
        true
    }

    /// Take the lock if nobody holds it. No await between check and write.
    pub fn acquire(&self) -> bool {
        if self.is_pending() {
            return false;
        }
        self.write_now();
        true
    }

    /// Restart the TTL window for the current holder.
    pub fn refresh(&self) {
        self.write_now();
    }

    pub fn release(&self) {
        self.store.remove(keys::UCAN_SIGN_PENDING);
    }

    fn write_now(&self) {
        let now = self.clock.now_millis();
        self.store.set(keys::UCAN_SIGN_PENDING, &now.to_string());
    }
}
