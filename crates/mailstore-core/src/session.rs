//! Session assembly for named stores.
//!
//! A [`MailSession`] carries everything a store backend needs to open a
//! connection except credentials: the merged session properties, the debug
//! flag, the trusted TLS configuration and a [`DebugTrace`] buffer.
//!
//! Properties are merged in this order, later entries overriding earlier ones:
//!
//! 1. the context's default properties
//! 2. store-scoped `mailstore.<store>.properties.<name>` variables
//! 3. STARTTLS wiring, when the secure transport reports STARTTLS as enabled

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rustls::ClientConfig;
use tracing::{debug, info};

use crate::config::{NAMESPACE, PROPERTIES, Properties, bool_property, resolve_debug};
use crate::context::MailContext;
use crate::{Error, Result};

/// Property suffix naming the injected TLS socket factory.
pub const SOCKET_FACTORY_CLASS: &str = "ssl.socketFactory.class";

/// Property suffix controlling plaintext fallback for the socket factory.
pub const SOCKET_FACTORY_FALLBACK: &str = "ssl.socketFactory.fallback";

/// Builds the full property name `mail.<protocol>.<suffix>`.
#[must_use]
pub fn protocol_property(protocol: &str, suffix: &str) -> String {
    format!("mail.{protocol}.{suffix}")
}

/// Provides trusted TLS configuration and decides when STARTTLS applies.
pub trait SecureTransport: Send + Sync {
    /// Returns true if STARTTLS is enabled or required for the protocol.
    fn is_start_tls_enabled(&self, protocol: &str, properties: &Properties) -> bool {
        bool_property(properties, &protocol_property(protocol, "starttls.enable"))
            || self.is_start_tls_required(protocol, properties)
    }

    /// Returns true if the session must refuse to continue without STARTTLS.
    fn is_start_tls_required(&self, protocol: &str, properties: &Properties) -> bool {
        bool_property(properties, &protocol_property(protocol, "starttls.required"))
    }

    /// Returns the trusted client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the trust material cannot be loaded.
    fn client_config(&self) -> Result<Arc<ClientConfig>>;

    /// Identifier recorded as the socket factory property.
    fn name(&self) -> &'static str;
}

/// Trusts the Mozilla root certificates bundled by `webpki-roots`.
#[derive(Debug, Default)]
pub struct WebPkiTransport {
    config: OnceLock<Arc<ClientConfig>>,
}

impl WebPkiTransport {
    /// Creates a new transport.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: OnceLock::new(),
        }
    }
}

impl SecureTransport for WebPkiTransport {
    fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let config = self.config.get_or_init(|| {
            let root_store = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };

            let config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            Arc::new(config)
        });
        Ok(Arc::clone(config))
    }

    fn name(&self) -> &'static str {
        "rustls-webpki"
    }
}

/// Direction of traced protocol bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes written to the server.
    Sent,
    /// Bytes read from the server.
    Received,
}

impl Direction {
    const fn prefix(self) -> &'static [u8] {
        match self {
            Self::Sent => b"C: ",
            Self::Received => b"S: ",
        }
    }
}

const LOGIN: &[u8] = b" LOGIN ";
const AUTHENTICATE: &[u8] = b" AUTHENTICATE ";

#[derive(Debug, Default)]
struct TraceBuffer {
    bytes: Vec<u8>,
    last: Option<Direction>,
    redact_next: bool,
}

/// In-memory capture of the protocol exchange, enabled by the store's
/// `debug` flag.
///
/// Clones share the same buffer. A disabled trace records nothing.
#[derive(Debug, Clone, Default)]
pub struct DebugTrace {
    buffer: Option<Arc<Mutex<TraceBuffer>>>,
}

impl DebugTrace {
    /// Creates a trace; when `enabled` is false every call is a no-op.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            buffer: enabled.then(|| Arc::new(Mutex::new(TraceBuffer::default()))),
        }
    }

    /// Returns true if bytes are being captured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.buffer.is_some()
    }

    /// Appends bytes exchanged in the given direction, prefixing each line
    /// with `C: ` or `S: `.
    ///
    /// The arguments of a `LOGIN` command and the client response following
    /// an `AUTHENTICATE` command are redacted.
    pub fn record(&self, direction: Direction, bytes: &[u8]) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);

        for line in bytes.split_inclusive(|&b| b == b'\n') {
            let at_line_start = buffer.bytes.is_empty() || buffer.bytes.ends_with(b"\n");
            if !at_line_start && buffer.last != Some(direction) {
                buffer.bytes.push(b'\n');
            }
            if at_line_start || buffer.last != Some(direction) {
                buffer.bytes.extend_from_slice(direction.prefix());
            }
            buffer.last = Some(direction);

            if direction == Direction::Sent && buffer.redact_next {
                buffer.redact_next = false;
                buffer.bytes.extend_from_slice(b"<redacted>\r\n");
                continue;
            }
            if direction == Direction::Sent && find(line, AUTHENTICATE).is_some() {
                buffer.redact_next = true;
            }

            match find(line, LOGIN) {
                Some(at) if direction == Direction::Sent => {
                    buffer.bytes.extend_from_slice(&line[..at + LOGIN.len()]);
                    buffer.bytes.extend_from_slice(b"<redacted>\r\n");
                }
                _ => buffer.bytes.extend_from_slice(line),
            }
        }
    }

    /// Returns the captured exchange.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.as_ref().map_or_else(String::new, |buffer| {
            let buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&buffer.bytes).into_owned()
        })
    }

    /// Logs the captured exchange for `store` and clears the buffer.
    pub fn flush(&self, store: &str) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.bytes.is_empty() {
            return;
        }
        let trace = String::from_utf8_lossy(&buffer.bytes);
        debug!(store, "Protocol trace:\n{}", trace.trim_end());
        buffer.bytes.clear();
        buffer.last = None;
        buffer.redact_next = false;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Connection properties and transport wiring for one store.
#[derive(Clone)]
pub struct MailSession {
    store: String,
    protocol: String,
    properties: Properties,
    debug: bool,
    tls: Option<Arc<ClientConfig>>,
    trace: DebugTrace,
}

impl MailSession {
    /// Store name.
    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Protocol name, lower-cased.
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns a property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Returns true if the property is set to `true`, ignoring case.
    #[must_use]
    pub fn bool_property(&self, name: &str) -> bool {
        bool_property(&self.properties, name)
    }

    /// Parses a numeric property, ignoring unparseable values.
    #[must_use]
    pub fn u64_property(&self, name: &str) -> Option<u64> {
        self.property(name).and_then(|v| v.trim().parse().ok())
    }

    /// Whether protocol tracing is enabled.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    /// Trusted TLS configuration injected for STARTTLS.
    #[must_use]
    pub const fn tls_config(&self) -> Option<&Arc<ClientConfig>> {
        self.tls.as_ref()
    }

    /// Protocol trace buffer.
    #[must_use]
    pub const fn trace(&self) -> &DebugTrace {
        &self.trace
    }
}

impl fmt::Debug for MailSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSession")
            .field("store", &self.store)
            .field("protocol", &self.protocol)
            .field("properties", &self.properties)
            .field("debug", &self.debug)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds [`MailSession`]s from a [`MailContext`].
#[derive(Debug, Clone, Copy)]
pub struct SessionBuilder<'a> {
    context: &'a MailContext,
}

impl<'a> SessionBuilder<'a> {
    /// Creates a builder over the given context.
    #[must_use]
    pub const fn new(context: &'a MailContext) -> Self {
        Self { context }
    }

    /// Builds the session for a named store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store has no protocol, or an
    /// error if the trusted TLS configuration cannot be loaded.
    pub fn build(&self, store: &str) -> Result<MailSession> {
        let vars = self.context.variables();
        let protocol = vars
            .store_value(store, "protocol")
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| Error::Configuration {
                store: store.to_string(),
                message: format!("missing variable '{NAMESPACE}.{store}.protocol'"),
            })?;

        let mut properties = self.context.default_properties().clone();
        let prefix = format!("{NAMESPACE}.{store}.{PROPERTIES}");
        for (name, value) in vars.with_prefix(&prefix) {
            info!(store, property = name, value, "Applying store property");
            properties.insert(name.to_string(), value.to_string());
        }

        let transport = self.context.transport();
        let tls = if transport.is_start_tls_enabled(&protocol, &properties) {
            let config = transport.client_config()?;
            properties.insert(
                protocol_property(&protocol, SOCKET_FACTORY_CLASS),
                transport.name().to_string(),
            );
            properties.insert(
                protocol_property(&protocol, SOCKET_FACTORY_FALLBACK),
                "false".to_string(),
            );
            debug!(store, transport = transport.name(), "Injected STARTTLS transport");
            Some(config)
        } else {
            None
        };

        let debug = resolve_debug(vars, store);
        Ok(MailSession {
            store: store.to_string(),
            protocol,
            properties,
            debug,
            tls,
            trace: DebugTrace::new(debug),
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
    use super::*;
    use crate::config::Variables;

    fn context(pairs: &[(&str, &str)]) -> MailContext {
        MailContext::new(pairs.iter().copied().collect::<Variables>())
    }

    #[test]
    fn test_build_applies_store_properties() {
        let ctx = context(&[
            ("mailstore.work.protocol", "imaps"),
            ("mailstore.work.properties.mail.imaps.timeout", "5000"),
            ("mailstore.other.properties.mail.imaps.timeout", "1"),
        ]);
        let session = SessionBuilder::new(&ctx).build("work").unwrap();

        assert_eq!(session.store(), "work");
        assert_eq!(session.protocol(), "imaps");
        assert_eq!(session.u64_property("mail.imaps.timeout"), Some(5000));
        assert!(session.tls_config().is_none());
        assert!(!session.debug());
        assert!(!session.trace().is_enabled());
    }

    #[test]
    fn test_store_properties_override_defaults() {
        let mut defaults = Properties::new();
        defaults.insert("mail.imap.timeout".into(), "1".into());
        defaults.insert("mail.imap.partialfetch".into(), "false".into());
        let ctx = context(&[
            ("mailstore.work.protocol", "imap"),
            ("mailstore.work.properties.mail.imap.timeout", "2"),
        ])
        .with_default_properties(defaults);

        let session = SessionBuilder::new(&ctx).build("work").unwrap();
        assert_eq!(session.property("mail.imap.timeout"), Some("2"));
        assert_eq!(session.property("mail.imap.partialfetch"), Some("false"));
    }

    #[test]
    fn test_build_requires_protocol() {
        let ctx = context(&[("mailstore.work.host", "h")]);
        assert!(matches!(
            SessionBuilder::new(&ctx).build("work"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_starttls_injects_transport_without_fallback() {
        let ctx = context(&[
            ("mailstore.work.protocol", "imap"),
            ("mailstore.work.debug", "true"),
            ("mailstore.work.properties.mail.imap.starttls.enable", "true"),
            (
                "mailstore.work.properties.mail.imap.ssl.socketFactory.fallback",
                "true",
            ),
        ]);
        let session = SessionBuilder::new(&ctx).build("work").unwrap();

        assert!(session.tls_config().is_some());
        assert_eq!(
            session.property("mail.imap.ssl.socketFactory.class"),
            Some("rustls-webpki")
        );
        assert_eq!(
            session.property("mail.imap.ssl.socketFactory.fallback"),
            Some("false")
        );
        assert!(session.debug());
        assert!(session.trace().is_enabled());
    }

    #[test]
    fn test_starttls_required_counts_as_enabled() {
        let ctx = context(&[
            ("mailstore.work.protocol", "imap"),
            ("mailstore.work.properties.mail.imap.starttls.required", "TRUE"),
        ]);
        let session = SessionBuilder::new(&ctx).build("work").unwrap();
        assert!(session.tls_config().is_some());
    }

    mod trace_tests {
        use super::*;

        #[test]
        fn test_disabled_trace_records_nothing() {
            let trace = DebugTrace::new(false);
            trace.record(Direction::Sent, b"a1 NOOP\r\n");
            assert_eq!(trace.contents(), "");
        }

        #[test]
        fn test_trace_prefixes_directions() {
            let trace = DebugTrace::new(true);
            trace.record(Direction::Received, b"* OK ready\r\n");
            trace.record(Direction::Sent, b"a1 NOOP\r\n");
            trace.record(Direction::Received, b"a1 OK ");
            trace.record(Direction::Received, b"done\r\n");

            trace.record(Direction::Received, b"* 1 EXISTS\r\n* 0 RECENT\r\n");

            assert_eq!(
                trace.contents(),
                "S: * OK ready\r\nC: a1 NOOP\r\nS: a1 OK done\r\nS: * 1 EXISTS\r\nS: * 0 RECENT\r\n"
            );
        }

        #[test]
        fn test_trace_redacts_login() {
            let trace = DebugTrace::new(true);
            trace.record(Direction::Sent, b"a1 LOGIN \"alice\" \"hunter2\"\r\n");
            let contents = trace.contents();
            assert!(!contents.contains("hunter2"));
            assert!(contents.contains("a1 LOGIN <redacted>"));
        }

        #[test]
        fn test_trace_redacts_sasl_response() {
            let trace = DebugTrace::new(true);
            trace.record(Direction::Sent, b"a1 AUTHENTICATE XOAUTH2\r\n");
            trace.record(Direction::Received, b"+ \r\n");
            trace.record(Direction::Sent, b"dXNlcj1hbGljZQFhdXRoPUJlYXJlcg==\r\n");
            trace.record(Direction::Received, b"a1 OK\r\n");

            assert_eq!(
                trace.contents(),
                "C: a1 AUTHENTICATE XOAUTH2\r\nS: + \r\nC: <redacted>\r\nS: a1 OK\r\n"
            );
        }

        #[test]
        fn test_clones_share_buffer() {
            let trace = DebugTrace::new(true);
            let clone = trace.clone();
            clone.record(Direction::Sent, b"x\r\n");
            assert_eq!(trace.contents(), "C: x\r\n");

            trace.flush("work");
            assert_eq!(clone.contents(), "");
        }
    }
}
