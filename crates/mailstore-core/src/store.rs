//! Store, folder and connector abstractions.
//!
//! A backend implements [`StoreConnector`], [`MailStore`] and [`MailFolder`];
//! the [`MessageIterator`](crate::MessageIterator) drives them. Every method
//! is a blocking round trip.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::MovingMethod;
use crate::message::MailMessage;

/// Access mode for an opened folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMode {
    /// Messages can be read but not flagged or expunged.
    ReadOnly,
    /// Messages can be flagged, appended and expunged.
    ReadWrite,
}

/// Message counts reported by a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStatus {
    /// Total number of messages.
    pub messages: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// Number of unseen messages, if reported.
    pub unseen: Option<u32>,
}

/// What to retrieve in bulk before messages are inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProfile {
    /// Header metadata (subject, addresses, dates, raw headers).
    pub envelope: bool,
    /// Complete message content.
    pub content: bool,
}

impl FetchProfile {
    /// Prefetches header metadata only.
    #[must_use]
    pub const fn envelope() -> Self {
        Self {
            envelope: true,
            content: false,
        }
    }

    /// Prefetches header metadata and complete content.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            envelope: true,
            content: true,
        }
    }
}

impl Default for FetchProfile {
    fn default() -> Self {
        Self::envelope()
    }
}

/// Opens authenticated store connections.
pub trait StoreConnector {
    /// The store type produced.
    type Store: MailStore;

    /// Opens and authenticates a connection to the named store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store settings or credentials are
    /// incomplete, or a connection error if connecting or authenticating
    /// fails. Nothing stays open on failure.
    fn open_store(&self, store: &str) -> Result<Self::Store>;

    /// Moving method configured for the named store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unrecognized value.
    fn moving_method(&self, _store: &str) -> Result<MovingMethod> {
        Ok(MovingMethod::default())
    }
}

/// An open, authenticated connection to one store.
pub trait MailStore {
    /// The folder type handed out by this store.
    type Folder: MailFolder;

    /// Returns a handle to a folder; the folder is not opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn folder(&mut self, name: &str) -> Result<Self::Folder>;

    /// Returns true until the store is closed.
    fn is_connected(&self) -> bool;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server or transport reports a failure; the
    /// store counts as closed afterwards either way.
    fn close(&mut self) -> Result<()>;
}

/// A folder within a store.
pub trait MailFolder {
    /// The message type handed out by this folder.
    type Message: MailMessage;

    /// Folder name.
    fn name(&self) -> &str;

    /// Returns true if the folder exists on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be queried.
    fn exists(&mut self) -> Result<bool>;

    /// Returns message counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be queried.
    fn status(&mut self) -> Result<FolderStatus>;

    /// Opens the folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be opened in the requested mode.
    fn open(&mut self, mode: FolderMode) -> Result<()>;

    /// Returns true between a successful [`open`](Self::open) and
    /// [`close`](Self::close).
    fn is_open(&self) -> bool;

    /// Lists the folder's messages in server order.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder is not open or the listing fails.
    fn messages(&mut self) -> Result<Vec<Self::Message>>;

    /// Retrieves the profiled data for all `messages` in bulk.
    ///
    /// # Errors
    ///
    /// Returns an error if the retrieval fails.
    fn fetch(&mut self, messages: &mut [Self::Message], profile: &FetchProfile) -> Result<()>;

    /// Appends copies of `messages` to this folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be read or the append fails.
    fn append_messages(&mut self, messages: &[&Self::Message]) -> Result<()>;

    /// Copies `messages` from this folder into `destination` server-side.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    fn copy_messages(&mut self, messages: &[&Self::Message], destination: &Self) -> Result<()>;

    /// Flags a message as deleted; it is removed when the folder closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag cannot be stored.
    fn set_deleted(&mut self, message: &Self::Message) -> Result<()>;

    /// Closes the folder, expunging messages flagged as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the server reports a failure; the folder counts as
    /// closed afterwards either way.
    fn close(&mut self) -> Result<()>;
}
