//! Typed notifications emitted by the auth layer.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// User-facing message. Rendering is up to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    /// The notice shown when an auth attempt ends in `err`.
    pub fn for_error(err: &AuthError) -> Self {
        match err {
            AuthError::ProviderNotFound => {
                Self::error("No wallet detected. Install and connect a wallet first.")
            }
            AuthError::AccountUnavailable => Self::error("Connect your wallet first."),
            AuthError::SessionExpired(detail) => Self::error(format!(
                "Wallet session expired. Open the wallet and unlock it. ({})",
                detail
            )),
            AuthError::UserRejected(detail) => {
                Self::error(format!("The request was rejected in the wallet. ({})", detail))
            }
            AuthError::SignPending => {
                Self::error("A wallet signature is already pending. Finish it in the wallet.")
            }
            AuthError::StorageUnreachable(detail) => Self::error(format!(
                "Sync storage is unreachable. Check the endpoint and proxy settings. ({})",
                detail
            )),
            other => Self::error(format!("Connection failed, check the wallet status: {}", other)),
        }
    }
}

/// Connection state of the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Disconnected,
    Connecting,
    ChallengeIssued,
    Authorized,
}

/// What the UI shows, derived from stored account and UCAN session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Authorized,
    Expired,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The stored account changed; `None` after a disconnect.
    AccountChanged(Option<String>),
    ChainChanged(String),
    /// The stored access token was cleared.
    TokenInvalidated,
    /// Login finished or state was reset; dependent views should re-derive.
    AuthStateChanged(AuthState),
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MismatchReason;

    #[test]
    fn test_each_error_family_has_distinct_notice() {
        let expired = Notice::for_error(&AuthError::SessionExpired("Session expired".into()));
        let rejected = Notice::for_error(&AuthError::UserRejected("denied".into()));
        let generic = Notice::for_error(&AuthError::Generic("boom".into()));
        let unreachable =
            Notice::for_error(&AuthError::StorageUnreachable("Status 503: down".into()));

        assert!(unreachable.message.starts_with("Sync storage is unreachable"));
        assert!(unreachable.message.contains("Status 503"));
        assert_ne!(expired.message, rejected.message);
        assert_ne!(rejected.message, generic.message);
        assert!(generic.message.contains("boom"));
        assert_eq!(expired.level, NoticeLevel::Error);
    }

    #[test]
    fn test_capability_mismatch_falls_back_to_generic_text() {
        let notice =
            Notice::for_error(&AuthError::CapabilityMismatch(MismatchReason::Expired));
        assert!(notice.message.contains("UCAN root expired"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&AuthStatus::Unauthorized).expect("serialize");
        assert_eq!(json, "\"unauthorized\"");
    }
}
