//! # mailstore-core
//!
//! Move-on-handle iteration over messages held by a remote mail store.
//!
//! This crate provides:
//! - Configuration variables and per-store settings
//! - Pluggable credential providers (configuration, static, OS keyring)
//! - Session building with an injectable secure transport
//! - Message predicates, comparators and MIME part traversal
//! - The [`MessageIterator`], which snapshots a source folder and moves or
//!   deletes each message only when the caller commits it as handled
//! - Raw message serialization
//!
//! Store backends implement [`StoreConnector`], [`MailStore`] and
//! [`MailFolder`]; see the `mailstore-imap` crate for the IMAP backend.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod compare;
pub mod config;
pub mod content;
pub mod context;
pub mod credentials;
mod error;
pub mod iterator;
pub mod message;
pub mod predicate;
pub mod session;
pub mod store;

pub use codec::{load_message, save_message};
pub use config::{MovingMethod, Properties, StoreSettings, Variables};
pub use content::{ContentWalker, MimeWalker, Part};
pub use context::MailContext;
pub use credentials::{
    BasicCredentialProvider, CredentialError, CredentialProvider, CredentialResult,
    KeyringCredentialProvider, StaticCredentialProvider,
};
pub use error::{ERROR_BASE, Error, Result, StoreError};
pub use iterator::{MessageIterator, MessageIteratorBuilder, MessageOf};
pub use message::{Address, Envelope, MailMessage, MimeMessage, RecipientType};
pub use predicate::Predicate;
pub use session::{
    DebugTrace, Direction, MailSession, SecureTransport, SessionBuilder, WebPkiTransport,
};
pub use store::{FetchProfile, FolderMode, FolderStatus, MailFolder, MailStore, StoreConnector};
