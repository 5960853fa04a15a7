//! Shared configuration context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{Properties, Variables};
use crate::credentials::{BasicCredentialProvider, CredentialProvider};
use crate::session::{SecureTransport, SessionBuilder, WebPkiTransport};

/// Configuration variables, credential providers, default session
/// properties and the secure transport used to build sessions.
///
/// Everything a connector needs is injected here instead of living in
/// process-wide state, so independent contexts never interfere.
pub struct MailContext {
    variables: Arc<Variables>,
    providers: HashMap<String, Arc<dyn CredentialProvider>>,
    default_properties: Properties,
    transport: Arc<dyn SecureTransport>,
}

impl MailContext {
    /// Creates a context with no default properties and the
    /// [`WebPkiTransport`].
    #[must_use]
    pub fn new(variables: Variables) -> Self {
        Self {
            variables: Arc::new(variables),
            providers: HashMap::new(),
            default_properties: Properties::new(),
            transport: Arc::new(WebPkiTransport::new()),
        }
    }

    /// Replaces the default session properties.
    #[must_use]
    pub fn with_default_properties(mut self, properties: Properties) -> Self {
        self.default_properties = properties;
        self
    }

    /// Replaces the secure transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn SecureTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Configuration variables.
    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Shared handle to the configuration variables.
    #[must_use]
    pub fn shared_variables(&self) -> Arc<Variables> {
        Arc::clone(&self.variables)
    }

    /// Default session properties.
    #[must_use]
    pub const fn default_properties(&self) -> &Properties {
        &self.default_properties
    }

    /// Secure transport used for TLS connections.
    #[must_use]
    pub fn transport(&self) -> &dyn SecureTransport {
        self.transport.as_ref()
    }

    /// Registers the credential provider for a store, returning the one it
    /// replaces.
    pub fn register_credential_provider(
        &mut self,
        store: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Option<Arc<dyn CredentialProvider>> {
        let store = store.into();
        debug!(store, provider = provider.name(), "Registered credential provider");
        self.providers.insert(store, provider)
    }

    /// Returns the provider registered for `store`, or a
    /// [`BasicCredentialProvider`] over this context's variables.
    #[must_use]
    pub fn credential_provider(&self, store: &str) -> Arc<dyn CredentialProvider> {
        match self.providers.get(store) {
            Some(provider) => Arc::clone(provider),
            None => Arc::new(BasicCredentialProvider::new(self.shared_variables())),
        }
    }

    /// Creates a session builder over this context.
    #[must_use]
    pub const fn session_builder(&self) -> SessionBuilder<'_> {
        SessionBuilder::new(self)
    }
}

impl Default for MailContext {
    fn default() -> Self {
        Self::new(Variables::new())
    }
}

impl fmt::Debug for MailContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stores: Vec<_> = self.providers.keys().collect();
        stores.sort();
        f.debug_struct("MailContext")
            .field("variables", &self.variables.len())
            .field("providers", &stores)
            .field("default_properties", &self.default_properties)
            .field("transport", &self.transport.name())
            .finish()
    }
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
    use crate::credentials::StaticCredentialProvider;

    #[test]
    fn test_default_provider_is_basic() {
        let vars: Variables = [("mailstore.work.user", "alice")].into_iter().collect();
        let ctx = MailContext::new(vars);

        let provider = ctx.credential_provider("work");
        assert_eq!(provider.name(), "basic");
        assert_eq!(provider.user("work").unwrap(), "alice");
    }

    #[test]
    fn test_registered_provider_is_per_store() {
        let mut ctx = MailContext::default();
        let previous = ctx.register_credential_provider(
            "oauth",
            Arc::new(StaticCredentialProvider::new("bob", "token")),
        );
        assert!(previous.is_none());

        assert_eq!(ctx.credential_provider("oauth").name(), "static");
        assert_eq!(ctx.credential_provider("other").name(), "basic");
    }

    #[test]
    fn test_register_replaces_previous() {
        let mut ctx = MailContext::default();
        ctx.register_credential_provider("s", Arc::new(StaticCredentialProvider::new("a", "1")));
        let previous =
            ctx.register_credential_provider("s", Arc::new(StaticCredentialProvider::new("b", "2")));

        assert_eq!(previous.unwrap().user("s").unwrap(), "a");
        assert_eq!(ctx.credential_provider("s").user("s").unwrap(), "b");
    }

    #[test]
    fn test_debug_lists_stores() {
        let mut ctx = MailContext::default();
        ctx.register_credential_provider("b", Arc::new(StaticCredentialProvider::new("u", "p")));
        ctx.register_credential_provider("a", Arc::new(StaticCredentialProvider::new("u", "p")));
        let debug = format!("{ctx:?}");
        assert!(debug.contains(r#"providers: ["a", "b"]"#));
        assert!(!debug.contains("\"p\""));
    }
}
