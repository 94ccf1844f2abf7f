use anyhow::{bail, Context, Result};
use keyring::Entry;

/// Keychain service name for WebDAV basic-auth passwords
const SERVICE_NAME: &str = "walletsync-webdav";

/// OS keychain access for basic-auth sync credentials, so the config file
/// only has to carry the username.
pub struct CredentialStore;

impl CredentialStore {
    fn entry(username: &str) -> Result<Entry> {
        let username = username.trim();
        if username.is_empty() {
            bail!("A sync username is required for keychain access");
        }
        Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")
    }

    pub fn store(username: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            bail!("Refusing to store an empty password");
        }
        Self::entry(username)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// The stored password, or `None` when the keychain has no entry for
    /// this username.
    pub fn get_password(username: &str) -> Result<Option<String>> {
        match Self::entry(username)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve password from keychain"),
        }
    }

    /// Remove the password. Returns whether there was one.
    pub fn delete(username: &str) -> Result<bool> {
        match Self::entry(username)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}
