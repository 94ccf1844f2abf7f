use serde::{Deserialize, Serialize};

use crate::auth::Capability;

/// Remote folder used when none is configured.
pub const DEFAULT_FOLDER: &str = "walletsync";

/// Application id used to scope the UCAN app directory.
pub const DEFAULT_APP_ID: &str = "walletsync";

pub const DEFAULT_APP_ACTION: &str = "write";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Basic,
    Ucan,
}

/// User-editable sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub auth_type: AuthType,
    pub endpoint: String,
    pub username: String,
    /// Empty when the password lives in the OS keychain.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub use_proxy: bool,
    pub proxy_url: String,
    pub folder: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auth_type: AuthType::Basic,
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            use_proxy: false,
            proxy_url: String::new(),
            folder: DEFAULT_FOLDER.to_string(),
        }
    }
}

impl SyncConfig {
    /// Proxy base URL without a trailing slash, if proxying is on.
    pub fn proxy_base(&self) -> Option<&str> {
        let url = self.proxy_url.trim().trim_end_matches('/');
        (self.use_proxy && !url.is_empty()).then_some(url)
    }

    pub fn folder(&self) -> &str {
        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            DEFAULT_FOLDER
        } else {
            folder
        }
    }
}

/// Deployment-level UCAN parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UcanConfig {
    pub backend_url: String,
    pub audience: String,
    pub app_id: String,
    pub app_action: String,
    /// Capabilities requested for each storage invocation.
    pub invocation_capabilities: Vec<Capability>,
    /// Capability set a root must carry to be accepted.
    pub root_capabilities: Vec<Capability>,
}

impl Default for UcanConfig {
    fn default() -> Self {
        let app_resource = format!("app:{}", DEFAULT_APP_ID);
        Self {
            backend_url: String::new(),
            audience: String::new(),
            app_id: DEFAULT_APP_ID.to_string(),
            app_action: DEFAULT_APP_ACTION.to_string(),
            invocation_capabilities: vec![Capability::new(app_resource.clone(), DEFAULT_APP_ACTION)],
            root_capabilities: vec![Capability::new(app_resource, DEFAULT_APP_ACTION)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_base_requires_toggle_and_url() {
        let mut config = SyncConfig {
            proxy_url: "https://proxy.example/".to_string(),
            ..SyncConfig::default()
        };
        assert_eq!(config.proxy_base(), None);

        config.use_proxy = true;
        assert_eq!(config.proxy_base(), Some("https://proxy.example"));

        config.proxy_url = "  ".to_string();
        assert_eq!(config.proxy_base(), None);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"authType":"ucan","useProxy":true}"#).expect("parse");
        assert_eq!(config.auth_type, AuthType::Ucan);
        assert!(config.use_proxy);
        assert_eq!(config.folder(), DEFAULT_FOLDER);
    }

    #[test]
    fn test_password_not_written_when_empty() {
        let json = serde_json::to_string(&SyncConfig::default()).expect("serialize");
        assert!(!json.contains("password"));
    }
}
