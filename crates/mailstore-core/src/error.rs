//! Error types for the core library.

use thiserror::Error;

use crate::credentials::CredentialError;

/// Prefix shared by every error code reported by this library.
pub const ERROR_BASE: &str = "mailstore:connector";

/// Boxed error raised by a store backend.
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration variable is missing or malformed.
    #[error("Configuration error for store '{store}': {message}")]
    Configuration {
        /// Store name the variable belongs to.
        store: String,
        /// What is wrong with the configuration.
        message: String,
    },

    /// Credentials could not be resolved.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Connecting or authenticating to the store failed.
    #[error("Failed to connect to store '{store}': {source}")]
    Connection {
        /// Store name.
        store: String,
        /// Underlying transport or authentication error.
        source: StoreError,
    },

    /// A folder does not exist or could not be opened.
    #[error("Failed to open folder '{folder}'")]
    FolderOpen {
        /// Folder name.
        folder: String,
        /// Cause, absent when the folder does not exist.
        #[source]
        source: Option<Box<Error>>,
    },

    /// Building the message iterator failed; every opened resource was released.
    #[error("Failed to create message iterator: {0}")]
    IteratorInit(#[source] Box<Error>),

    /// A predicate could not read the message field it matches against.
    #[error("Predicate {name} failed: {source}")]
    Predicate {
        /// Predicate name, such as `subjectmatches`.
        name: &'static str,
        /// Cause of the failure.
        #[source]
        source: Box<Error>,
    },

    /// A regular expression did not compile.
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        /// The pattern as supplied.
        pattern: String,
        /// Compilation error.
        #[source]
        source: regex::Error,
    },

    /// Committing a handled message failed.
    #[error("Failed to handle {message}: {source}")]
    HandledMessage {
        /// Tolerant description of the message.
        message: String,
        /// Cause of the failure.
        #[source]
        source: Box<Error>,
    },

    /// A commit was requested but no message is current.
    #[error("No current message to commit")]
    NoCurrentMessage,

    /// The iterator is exhausted.
    #[error("No message at index {index}, iterator holds {len} messages")]
    NoSuchElement {
        /// Requested index.
        index: usize,
        /// Number of messages in the snapshot.
        len: usize,
    },

    /// At least one resource failed to close; carries the first failure.
    #[error("Failed to close message iterator: {0}")]
    Close(#[source] Box<Error>),

    /// Serializing a message failed.
    #[error("Failed to save message: {0}")]
    Save(#[source] Box<Error>),

    /// Deserializing a message failed.
    #[error("Failed to load message: {0}")]
    Load(#[source] Box<Error>),

    /// Raw bytes are not a parseable message.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A store backend operation failed.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wraps a backend error.
    pub fn store(error: impl Into<StoreError>) -> Self {
        Self::Store(error.into())
    }

    /// Returns the stable error code, if this error carries one.
    ///
    /// Codes are prefixed with [`ERROR_BASE`], for example
    /// `mailstore:connector:predicate:subjectmatches`.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        let suffix = match self {
            Self::Predicate { name, .. } => return Some(format!("{ERROR_BASE}:predicate:{name}")),
            Self::IteratorInit(_) => "iterator",
            Self::Close(_) => "close",
            Self::HandledMessage { .. } => "handled",
            Self::Save(_) => "save",
            Self::Load(_) => "load",
            _ => return None,
        };
        Some(format!("{ERROR_BASE}:{suffix}"))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_error_codes() {
        let predicate = Error::Predicate {
            name: "tomatches",
            source: Box::new(Error::Parse("bad".into())),
        };
        assert_eq!(
            predicate.code().as_deref(),
            Some("mailstore:connector:predicate:tomatches")
        );

        let close = Error::Close(Box::new(Error::NoCurrentMessage));
        assert_eq!(close.code().as_deref(), Some("mailstore:connector:close"));

        let init = Error::IteratorInit(Box::new(Error::NoCurrentMessage));
        assert_eq!(init.code().as_deref(), Some("mailstore:connector:iterator"));

        assert_eq!(Error::NoCurrentMessage.code(), None);
    }

    #[test]
    fn test_source_is_preserved() {
        let err = Error::HandledMessage {
            message: "Message[subject: 'x']".into(),
            source: Box::new(Error::Parse("boom".into())),
        };
        assert_eq!(err.code().as_deref(), Some("mailstore:connector:handled"));
        assert_eq!(err.source().unwrap().to_string(), "Parse error: boom");
    }

    #[test]
    fn test_folder_open_without_cause() {
        let err = Error::FolderOpen {
            folder: "Archive".into(),
            source: None,
        };
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "Failed to open folder 'Archive'");
    }
}
