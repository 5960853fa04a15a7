//! Store connector for `imap` and `imaps` stores.

use std::sync::Arc;

use mailstore_core::{
    DebugTrace, Error as CoreError, MailContext, MailSession, MovingMethod, Result as CoreResult,
    StoreConnector, StoreSettings,
};
use rustls::ClientConfig;

use crate::auth::XOAuth2;
use crate::config::{AuthMechanism, ConnectionConfig, Security};
use crate::store::ImapStore;
use crate::stream::{self, ImapStream, Traced};
use crate::{Error, Result};

/// Opens authenticated IMAP stores described by a [`MailContext`].
///
/// Settings come from `mailstore.<store>.*` variables, credentials from the
/// provider registered for the store, and TLS trust from the context's
/// secure transport.
#[derive(Debug, Clone, Copy)]
pub struct ImapConnector<'a> {
    context: &'a MailContext,
}

impl<'a> ImapConnector<'a> {
    /// Creates a connector over a context.
    #[must_use]
    pub const fn new(context: &'a MailContext) -> Self {
        Self { context }
    }

    fn tls_config(&self, session: &MailSession) -> CoreResult<Arc<ClientConfig>> {
        match session.tls_config() {
            Some(config) => Ok(Arc::clone(config)),
            None => self.context.transport().client_config(),
        }
    }
}

impl StoreConnector for ImapConnector<'_> {
    type Store = ImapStore;

    fn open_store(&self, store: &str) -> CoreResult<ImapStore> {
        let settings = StoreSettings::resolve(self.context.variables(), store)?;
        let session = self.context.session_builder().build(store)?;
        let config = ConnectionConfig::from_session(&settings, &session)?;

        let provider = self.context.credential_provider(store);
        let user = provider.user(store)?;
        let password = provider.password(store)?;

        tracing::debug!(
            store,
            provider = provider.name(),
            host = %config.host,
            port = config.port,
            security = ?config.security,
            auth = ?config.auth,
            user = %user,
            password_set = !password.is_empty(),
            "Connecting to store"
        );

        let tls = match config.security {
            Security::None => {
                tracing::warn!(store, "Connecting without transport encryption");
                None
            }
            Security::StartTls | Security::Implicit => Some(self.tls_config(&session)?),
        };

        let trace = session.trace().clone();
        let result = connect(&config, tls, &user, &password, &trace);
        trace.flush(store);

        match result {
            Ok(imap_session) => {
                tracing::info!(store, host = %config.host, "Connected to store");
                Ok(ImapStore::new(store, imap_session, trace))
            }
            Err(e) => {
                tracing::warn!(
                    store,
                    host = %config.host,
                    error = %e,
                    "Failed to connect to store"
                );
                Err(CoreError::Connection {
                    store: store.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn moving_method(&self, store: &str) -> CoreResult<MovingMethod> {
        MovingMethod::resolve(self.context.variables(), store)
    }
}

/// Connects, reads the greeting and authenticates.
///
/// The socket is shut down if anything after the TCP connect fails.
fn connect(
    config: &ConnectionConfig,
    tls: Option<Arc<ClientConfig>>,
    user: &str,
    password: &str,
    trace: &DebugTrace,
) -> Result<imap::Session<Traced<ImapStream>>> {
    let (transport, greeted) = match (config.security, tls) {
        (Security::Implicit, Some(tls)) => (stream::connect_tls(config, tls)?, false),
        (Security::StartTls, Some(tls)) => (stream::connect_starttls(config, tls, trace)?, true),
        _ => (stream::connect_plain(config)?, false),
    };
    let socket = transport.tcp().try_clone()?;

    authenticate(transport, greeted, config.auth, user, password, trace)
        .inspect_err(|_| stream::shutdown(&socket))
}

fn authenticate(
    transport: ImapStream,
    greeted: bool,
    auth: AuthMechanism,
    user: &str,
    password: &str,
    trace: &DebugTrace,
) -> Result<imap::Session<Traced<ImapStream>>> {
    let mut client = imap::Client::new(Traced::new(transport, trace.clone()));
    if !greeted {
        client.read_greeting()?;
    }

    let session = match auth {
        AuthMechanism::Login => client.login(user, password),
        AuthMechanism::XOAuth2 => client.authenticate("XOAUTH2", &XOAuth2::new(user, password)),
    };
    session.map_err(|(e, _client)| Error::Imap(e))
}
