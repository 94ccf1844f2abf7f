pub mod capability;
pub mod credentials;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod sign_lock;
pub mod status;
pub mod token;

pub use capability::{caps_key, Capability};
pub use credentials::CredentialStore;
pub use events::{AuthEvent, AuthState, AuthStatus, Notice, NoticeLevel};
pub use orchestrator::{
    AuthContext, AuthOrchestrator, Balance, ChainInfo, ListenerHandle, LoginOutcome,
    DEFAULT_CHALLENGE_BASE_URL,
};
pub use session::{validate_root, SessionCache, UcanRoot, UcanSession};
pub use sign_lock::{is_lock_pending_error, SignLock, SIGN_LOCK_TTL_MS};
pub use status::{watch_status, StatusSubscription};
pub use token::is_valid_token;
