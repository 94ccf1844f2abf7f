use std::fmt;

use thiserror::Error;

use crate::auth::sign_lock::is_lock_pending_error;

/// Vendor error code a wallet returns when the user dismisses a prompt.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Why a UCAN root cannot be used for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    AudienceMismatch,
    CapabilityMismatch,
    Expired,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MismatchReason::AudienceMismatch => "audience mismatch",
            MismatchReason::CapabilityMismatch => "capability mismatch",
            MismatchReason::Expired => "expired",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no wallet detected")]
    ProviderNotFound,

    #[error("no wallet account available, connect the wallet first")]
    AccountUnavailable,

    #[error("wallet session expired: {0}")]
    SessionExpired(String),

    #[error("user rejected the request: {0}")]
    UserRejected(String),

    #[error("UCAN root {0}")]
    CapabilityMismatch(MismatchReason),

    #[error("UCAN session is not available")]
    SessionUnavailable,

    #[error("UCAN root is not ready")]
    RootUnavailable,

    #[error("UCAN sign pending")]
    SignPending,

    #[error("storage unreachable: {0}")]
    StorageUnreachable(String),

    #[error("{0}")]
    Generic(String),
}

impl AuthError {
    /// The cached session cannot be used; the caller has to start a new login.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            AuthError::CapabilityMismatch(_)
                | AuthError::SessionExpired(_)
                | AuthError::SessionUnavailable
                | AuthError::RootUnavailable
        )
    }

    /// Conditions handled locally with a notice and a safe default.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::ProviderNotFound | AuthError::AccountUnavailable | AuthError::SignPending
        )
    }

    pub fn mismatch_reason(&self) -> Option<MismatchReason> {
        match self {
            AuthError::CapabilityMismatch(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Raw error surfaced by the wallet adapter, before classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WalletError {
    pub code: Option<i64>,
    pub message: String,
}

impl WalletError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Map the adapter error into the fixed taxonomy. This is the only place
    /// that looks at wallet error wording.
    pub fn classify(&self) -> AuthError {
        if self.message.contains("Session expired") {
            AuthError::SessionExpired(self.message.clone())
        } else if self.code == Some(USER_REJECTED_CODE) {
            AuthError::UserRejected(self.message.clone())
        } else if is_lock_pending_error(&self.message) {
            AuthError::SignPending
        } else {
            AuthError::Generic(self.message.clone())
        }
    }
}

impl From<WalletError> for AuthError {
    fn from(err: WalletError) -> Self {
        err.classify()
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("{0}")]
    Backend(String),
}

impl StorageError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        StorageError::Status {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// Missing remote file: any error whose text mentions "404".
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::Status { status: 404, .. } => true,
            other => other.to_string().contains("404"),
        }
    }

    /// The wallet (or the lock) reports a signature request already in flight.
    pub fn is_sign_pending(&self) -> bool {
        match self {
            StorageError::Auth(err) => *err == AuthError::SignPending,
            StorageError::Wallet(err) => err.classify() == AuthError::SignPending,
            StorageError::Backend(msg) => is_lock_pending_error(msg),
            _ => false,
        }
    }

    pub fn auth(&self) -> Option<&AuthError> {
        match self {
            StorageError::Auth(err) => Some(err),
            _ => None,
        }
    }

    /// Place the failure in the auth taxonomy. Transport failures, bad URLs
    /// and 5xx responses mean the storage could not be reached.
    pub fn classify(&self) -> AuthError {
        match self {
            StorageError::Auth(err) => err.clone(),
            StorageError::Wallet(err) => err.classify(),
            StorageError::Network(_) | StorageError::InvalidUrl(_) => {
                AuthError::StorageUnreachable(self.to_string())
            }
            StorageError::Status { status, .. } if *status >= 500 => {
                AuthError::StorageUnreachable(self.to_string())
            }
            StorageError::Backend(msg) if is_lock_pending_error(msg) => AuthError::SignPending,
            other => AuthError::Generic(other.to_string()),
        }
    }
}
