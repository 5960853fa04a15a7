//! Error types for the IMAP store backend.

use thiserror::Error;

/// Errors that can occur during IMAP store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The IMAP client reported an error.
    #[error("IMAP error: {0}")]
    Imap(#[from] imap::Error),

    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The server refused or broke the STARTTLS exchange.
    #[error("STARTTLS failed: {0}")]
    StartTls(String),

    /// The operation needs the selected source folder.
    #[error("Folder '{0}' is not selected")]
    NotSelected(String),

    /// The connection was already logged out.
    #[error("Connection is closed")]
    Closed,

    /// The shared connection is in use by another handle.
    #[error("Connection is busy")]
    Busy,

    /// The server answered without the requested data item.
    #[error("Server returned no {item} for UID {uid}")]
    MissingData {
        /// Message UID.
        uid: u32,
        /// Requested data item.
        item: &'static str,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for mailstore_core::Error {
    fn from(error: Error) -> Self {
        Self::store(error)
    }
}
