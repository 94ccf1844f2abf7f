//! walletsync core library.
//!
//! Wallet-based login, UCAN capability checks and the dual-mode WebDAV sync
//! client. The wallet SDK, the UCAN signing primitives and the remote storage
//! protocol are reached only through the adapter traits in [`wallet`] and
//! [`sync`]; everything here is orchestration and validation around them.
//!
//! Layout, leaves first:
//! - [`store`]: durable key/value state shared by every component
//! - [`auth::SignLock`]: TTL-bounded advisory lock around wallet signatures
//! - [`wallet::ProviderResolver`]: memoized wallet provider discovery
//! - [`auth::SessionCache`]: UCAN session/root validation
//! - [`auth::AuthOrchestrator`]: connect, challenge login, wallet event reactions
//! - [`sync`]: basic-auth and UCAN storage clients behind one trait
//! - [`proxy`]: the authentication proxy that forwards only the login endpoints

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod proxy;
pub mod store;
pub mod sync;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthOrchestrator, SessionCache, SignLock};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{AuthError, MismatchReason, StorageError, WalletError};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use sync::{create_sync_client, SyncClient, SyncConfig, SyncContext};
pub use wallet::{ProviderResolver, WalletDiscovery, WalletEvent, WalletProvider};
