//! Connection configuration types.

use std::time::Duration;

use mailstore_core::session::protocol_property;
use mailstore_core::{Error as CoreError, MailSession, Result as CoreResult, StoreSettings};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// No encryption. **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS. Never falls back to
    /// plaintext.
    StartTls,
    /// TLS from the start (`imaps`).
    Implicit,
}

/// Authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// `LOGIN` with user name and password.
    Login,
    /// SASL `XOAUTH2`; the password is an `OAuth2` access token.
    XOAuth2,
}

/// IMAP connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Connection timeout; zero waits indefinitely.
    pub connect_timeout: Duration,
    /// Read/write timeout; zero waits indefinitely.
    pub io_timeout: Duration,
    /// Authentication mechanism.
    pub auth: AuthMechanism,
}

impl ConnectionConfig {
    /// Derives the configuration for a store from its settings and session.
    ///
    /// Implicit TLS applies to `imaps` or when `mail.<protocol>.ssl.enable`
    /// is true; STARTTLS applies when the session carries a TLS
    /// configuration; otherwise the connection is plaintext.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for protocols other than `imap` and
    /// `imaps`.
    pub fn from_session(settings: &StoreSettings, session: &MailSession) -> CoreResult<Self> {
        let protocol = settings.protocol.as_str();
        if protocol != "imap" && protocol != "imaps" {
            return Err(CoreError::Configuration {
                store: settings.store.clone(),
                message: format!("unsupported protocol '{protocol}'"),
            });
        }

        let security = if protocol == "imaps"
            || session.bool_property(&protocol_property(protocol, "ssl.enable"))
        {
            Security::Implicit
        } else if session.tls_config().is_some() {
            Security::StartTls
        } else {
            Security::None
        };

        let millis = |suffix: &str| {
            session
                .u64_property(&protocol_property(protocol, suffix))
                .map(Duration::from_millis)
        };

        let xoauth2 = session
            .property(&protocol_property(protocol, "auth.mechanisms"))
            .is_some_and(|mechanisms| {
                mechanisms
                    .split([' ', ','])
                    .any(|m| m.eq_ignore_ascii_case("XOAUTH2"))
            });

        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            security,
            connect_timeout: millis("connectiontimeout").unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            io_timeout: millis("timeout").unwrap_or(DEFAULT_IO_TIMEOUT),
            auth: if xoauth2 {
                AuthMechanism::XOAuth2
            } else {
                AuthMechanism::Login
            },
        })
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
    use mailstore_core::{MailContext, Variables};

    use super::*;

    fn resolve(pairs: &[(&str, &str)]) -> CoreResult<ConnectionConfig> {
        let vars: Variables = pairs.iter().copied().collect();
        let context = MailContext::new(vars);
        let settings = StoreSettings::resolve(context.variables(), "work")?;
        let session = context.session_builder().build("work")?;
        ConnectionConfig::from_session(&settings, &session)
    }

    const BASE: [(&str, &str); 2] = [
        ("mailstore.work.host", "imap.example.com"),
        ("mailstore.work.port", "1143"),
    ];

    #[test]
    fn test_imaps_is_implicit_tls() {
        let config = resolve(&[BASE[0], BASE[1], ("mailstore.work.protocol", "IMAPS")]).unwrap();
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.port, 1143);
        assert_eq!(config.auth, AuthMechanism::Login);
    }

    #[test]
    fn test_ssl_enable_property() {
        let config = resolve(&[
            BASE[0],
            BASE[1],
            ("mailstore.work.protocol", "imap"),
            ("mailstore.work.properties.mail.imap.ssl.enable", "true"),
        ])
        .unwrap();
        assert_eq!(config.security, Security::Implicit);
    }

    #[test]
    fn test_starttls_and_timeouts() {
        let config = resolve(&[
            BASE[0],
            BASE[1],
            ("mailstore.work.protocol", "imap"),
            ("mailstore.work.properties.mail.imap.starttls.enable", "true"),
            ("mailstore.work.properties.mail.imap.connectiontimeout", "2500"),
            ("mailstore.work.properties.mail.imap.timeout", "0"),
            ("mailstore.work.properties.mail.imap.auth.mechanisms", "PLAIN xoauth2"),
        ])
        .unwrap();
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.io_timeout, Duration::ZERO);
        assert_eq!(config.auth, AuthMechanism::XOAuth2);
    }

    #[test]
    fn test_plain_imap() {
        let config = resolve(&[BASE[0], BASE[1], ("mailstore.work.protocol", "imap")]).unwrap();
        assert_eq!(config.security, Security::None);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = resolve(&[BASE[0], BASE[1], ("mailstore.work.protocol", "pop3")]).unwrap_err();
        assert!(err.to_string().contains("unsupported protocol 'pop3'"));
    }
}
