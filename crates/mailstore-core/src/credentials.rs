//! Credential providers.
//!
//! A [`CredentialProvider`] resolves the user name and password (or `OAuth2`
//! access token) used to authenticate against a named store. Providers are
//! registered per store on the [`MailContext`](crate::MailContext); stores
//! without a registered provider use [`BasicCredentialProvider`].
//!
//! [`KeyringCredentialProvider`] reads the secret from the platform's native
//! credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use std::fmt;
use std::sync::Arc;

use keyring::Entry;
use tracing::debug;

use crate::config::Variables;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailstore";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A required credential is not configured.
    #[error("No {key} configured for store '{store}'")]
    Missing {
        /// Store name.
        store: String,
        /// Missing credential, such as `user` or `password`.
        key: &'static str,
    },

    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Resolves credentials for a named store.
pub trait CredentialProvider: Send + Sync {
    /// Returns the user name for `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the user name cannot be resolved.
    fn user(&self, store: &str) -> CredentialResult<String>;

    /// Returns the password or access token for `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be resolved.
    fn password(&self, store: &str) -> CredentialResult<String>;

    /// Short name used in log messages.
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Reads `mailstore.<store>.user` and `mailstore.<store>.password`.
#[derive(Debug, Clone)]
pub struct BasicCredentialProvider {
    vars: Arc<Variables>,
}

impl BasicCredentialProvider {
    /// Creates a provider backed by the given variables.
    #[must_use]
    pub const fn new(vars: Arc<Variables>) -> Self {
        Self { vars }
    }
}

impl CredentialProvider for BasicCredentialProvider {
    fn user(&self, store: &str) -> CredentialResult<String> {
        required(&self.vars, store, "user")
    }

    fn password(&self, store: &str) -> CredentialResult<String> {
        required(&self.vars, store, "password")
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}

fn required(vars: &Variables, store: &str, key: &'static str) -> CredentialResult<String> {
    vars.store_var(store, key)
        .map(ToString::to_string)
        .ok_or_else(|| CredentialError::Missing {
            store: store.to_string(),
            key,
        })
}

/// Fixed credentials, such as an access token obtained out of band.
#[derive(Clone)]
pub struct StaticCredentialProvider {
    user: String,
    password: String,
}

impl StaticCredentialProvider {
    /// Creates a provider that always returns the given credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for StaticCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentialProvider")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn user(&self, _store: &str) -> CredentialResult<String> {
        Ok(self.user.clone())
    }

    fn password(&self, _store: &str) -> CredentialResult<String> {
        Ok(self.password.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Reads the user name from the variables and the password from the
/// system keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialProvider {
    vars: Arc<Variables>,
}

impl KeyringCredentialProvider {
    /// Creates a provider backed by the given variables.
    #[must_use]
    pub const fn new(vars: Arc<Variables>) -> Self {
        Self { vars }
    }

    /// Stores the password for a store in the system keyring.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring operation fails.
    pub fn store_password(store: &str, password: &str) -> CredentialResult<()> {
        let entry = Entry::new(SERVICE_NAME, &credential_key(store))?;
        entry.set_password(password)?;
        debug!("Stored password for store {}", store);
        Ok(())
    }

    /// Deletes the password for a store from the system keyring.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring operation fails (except for missing entries).
    pub fn delete_password(store: &str) -> CredentialResult<()> {
        let entry = Entry::new(SERVICE_NAME, &credential_key(store))?;
        match entry.delete_credential() {
            Ok(()) => debug!("Deleted password for store {}", store),
            Err(keyring::Error::NoEntry) => {
                debug!("No password to delete for store {}", store);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

impl CredentialProvider for KeyringCredentialProvider {
    fn user(&self, store: &str) -> CredentialResult<String> {
        required(&self.vars, store, "user")
    }

    fn password(&self, store: &str) -> CredentialResult<String> {
        let entry = Entry::new(SERVICE_NAME, &credential_key(store))?;
        match entry.get_password() {
            Ok(password) => Ok(password),
            Err(keyring::Error::NoEntry) => {
                debug!("No password found in keyring for store {}", store);
                Err(CredentialError::Missing {
                    store: store.to_string(),
                    key: "password",
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// Generates the keyring entry key for a store.
fn credential_key(store: &str) -> String {
    format!("{SERVICE_NAME}_password_{store}")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_provider_reads_store_variables() {
        let vars: Variables = [
            ("mailstore.work.user", "alice@example.com"),
            ("mailstore.work.password", "secret"),
        ]
        .into_iter()
        .collect();
        let provider = BasicCredentialProvider::new(Arc::new(vars));

        assert_eq!(provider.user("work").unwrap(), "alice@example.com");
        assert_eq!(provider.password("work").unwrap(), "secret");
        assert_eq!(provider.name(), "basic");
    }

    #[test]
    fn test_basic_provider_missing_password() {
        let vars: Variables = [("mailstore.work.user", "alice")].into_iter().collect();
        let provider = BasicCredentialProvider::new(Arc::new(vars));

        let err = provider.password("work").unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Missing {
                key: "password",
                ..
            }
        ));
        assert_eq!(err.to_string(), "No password configured for store 'work'");
    }

    #[test]
    fn test_static_provider_redacts_debug() {
        let provider = StaticCredentialProvider::new("bob", "token");
        assert_eq!(provider.user("any").unwrap(), "bob");
        assert_eq!(provider.password("other").unwrap(), "token");
        assert!(!format!("{provider:?}").contains("token"));
    }

    #[test]
    fn test_credential_key() {
        assert_eq!(credential_key("work"), "mailstore_password_work");
    }
}
