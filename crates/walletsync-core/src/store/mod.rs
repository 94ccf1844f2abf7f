//! Durable key/value state.
//!
//! One flat namespace shared by every component (and by every process using
//! the same backing file). Operations are synchronous on purpose: a
//! check-then-act sequence over the store never crosses an `.await`.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Key names in the durable store.
pub mod keys {
    pub const CURRENT_ACCOUNT: &str = "currentAccount";
    pub const AUTH_TOKEN: &str = "authToken";
    pub const HAS_CONNECTED_WALLET: &str = "hasConnectedWallet";
    pub const UCAN_SIGN_PENDING: &str = "ucanSignPending";

    /// Session identifier the sync-mode UCAN entries are scoped by.
    pub const UCAN_SESSION_ID: &str = "webdav";

    pub fn ucan_session(session_id: &str) -> String {
        format!("ucan:{}:session", session_id)
    }

    pub fn ucan_root(session_id: &str) -> String {
        format!("ucan:{}:root", session_id)
    }
}
