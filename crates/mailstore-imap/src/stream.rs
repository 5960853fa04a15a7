//! Stream types for IMAP connections.

#![allow(clippy::missing_errors_doc)]

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use mailstore_core::{DebugTrace, Direction};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};

use crate::config::ConnectionConfig;
use crate::{Error, Result};

const STARTTLS_TAG: &str = "a0";
const MAX_LINE: usize = 8192;

/// A stream that can be either plaintext or TLS.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl ImapStream {
    /// The underlying socket.
    #[must_use]
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(stream) => &stream.sock,
        }
    }

    /// Upgrades a plaintext stream to TLS.
    pub fn upgrade(self, host: &str, tls: Arc<ClientConfig>) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let server_name = ServerName::try_from(host.to_string())?;
                let connection = ClientConnection::new(tls, server_name)?;
                Ok(Self::Tls(Box::new(StreamOwned::new(connection, tcp))))
            }
            Self::Tls(_) => Err(Error::StartTls("stream is already TLS".to_string())),
        }
    }
}

impl Read for ImapStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// Copies every byte read or written into a [`DebugTrace`].
#[derive(Debug)]
pub struct Traced<S> {
    inner: S,
    trace: DebugTrace,
}

impl<S> Traced<S> {
    /// Wraps a stream.
    pub const fn new(inner: S, trace: DebugTrace) -> Self {
        Self { inner, trace }
    }
}

impl<S: Read> Read for Traced<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.trace.record(Direction::Received, &buf[..n]);
        Ok(n)
    }
}

impl<S: Write> Write for Traced<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.trace.record(Direction::Sent, &buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Connects without encryption.
pub fn connect_plain(config: &ConnectionConfig) -> Result<ImapStream> {
    Ok(ImapStream::Plain(open_tcp(config)?))
}

/// Connects to a server with TLS from the start.
pub fn connect_tls(config: &ConnectionConfig, tls: Arc<ClientConfig>) -> Result<ImapStream> {
    ImapStream::Plain(open_tcp(config)?).upgrade(&config.host, tls)
}

/// Connects in plaintext, consumes the greeting and upgrades with STARTTLS.
///
/// A refused STARTTLS is an error; the connection is never used in
/// plaintext. The server does not greet again after the upgrade.
pub fn connect_starttls(
    config: &ConnectionConfig,
    tls: Arc<ClientConfig>,
    trace: &DebugTrace,
) -> Result<ImapStream> {
    let mut tcp = open_tcp(config)?;
    if let Err(e) = negotiate_starttls(&mut tcp, trace) {
        shutdown(&tcp);
        return Err(e);
    }
    ImapStream::Plain(tcp).upgrade(&config.host, tls)
}

/// Exchanges the greeting and `STARTTLS` command on a plaintext stream.
pub fn negotiate_starttls<S: Read + Write>(stream: &mut S, trace: &DebugTrace) -> Result<()> {
    let greeting = read_line(stream)?;
    trace.record(Direction::Received, greeting.as_bytes());
    if !greeting.starts_with("* OK") {
        return Err(Error::StartTls(format!(
            "unexpected greeting: {}",
            greeting.trim_end()
        )));
    }

    let command = format!("{STARTTLS_TAG} STARTTLS\r\n");
    stream.write_all(command.as_bytes())?;
    stream.flush()?;
    trace.record(Direction::Sent, command.as_bytes());

    let tagged = format!("{STARTTLS_TAG} ");
    loop {
        let line = read_line(stream)?;
        trace.record(Direction::Received, line.as_bytes());
        if let Some(status) = line.strip_prefix(&tagged) {
            if status.starts_with("OK") {
                return Ok(());
            }
            return Err(Error::StartTls(status.trim_end().to_string()));
        }
    }
}

/// Shuts the socket down, logging a failure instead of returning it.
pub fn shutdown(tcp: &TcpStream) {
    if let Err(e) = tcp.shutdown(Shutdown::Both) {
        tracing::info!(?e, "Failed to shut down socket");
    }
}

fn open_tcp(config: &ConnectionConfig) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        let connected = if config.connect_timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, config.connect_timeout)
        };
        match connected {
            Ok(tcp) => {
                let timeout = (!config.io_timeout.is_zero()).then_some(config.io_timeout);
                tcp.set_read_timeout(timeout)?;
                tcp.set_write_timeout(timeout)?;
                return Ok(tcp);
            }
            Err(e) => {
                tracing::debug!(%addr, ?e, "Connection attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {}", config.host),
            )
        })
        .into())
}

fn read_line<S: Read>(stream: &mut S) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\n") {
        if line.len() >= MAX_LINE {
            return Err(Error::StartTls("response line too long".to_string()));
        }
        if stream.read(&mut byte)? == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
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
    use std::io::Cursor;

    use super::*;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_starttls_accepted() {
        let mut stream =
            Duplex::new(b"* OK IMAP4rev1 ready\r\n* CAPABILITY IMAP4rev1\r\na0 OK Begin TLS\r\n");
        let trace = DebugTrace::new(true);
        negotiate_starttls(&mut stream, &trace).unwrap();

        assert_eq!(stream.output, b"a0 STARTTLS\r\n");
        assert!(trace.contents().contains("C: a0 STARTTLS"));
    }

    #[test]
    fn test_starttls_refused() {
        let mut stream = Duplex::new(b"* OK ready\r\na0 NO not now\r\n");
        let err = negotiate_starttls(&mut stream, &DebugTrace::new(false)).unwrap_err();
        assert!(matches!(err, Error::StartTls(ref msg) if msg == "NO not now"));
    }

    #[test]
    fn test_starttls_bad_greeting() {
        let mut stream = Duplex::new(b"* BYE go away\r\n");
        let err = negotiate_starttls(&mut stream, &DebugTrace::new(false)).unwrap_err();
        assert!(err.to_string().contains("unexpected greeting"));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn test_starttls_connection_lost() {
        let mut stream = Duplex::new(b"* OK ready\r\n");
        let err = negotiate_starttls(&mut stream, &DebugTrace::new(false)).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_traced_records_both_directions() {
        let trace = DebugTrace::new(true);
        let mut stream = Traced::new(Duplex::new(b"* OK hi\r\n"), trace.clone());

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"* OK hi\r\n");
        stream.write_all(b"a1 NOOP\r\n").unwrap();

        assert_eq!(trace.contents(), "S: * OK hi\r\nC: a1 NOOP\r\n");
    }
}
