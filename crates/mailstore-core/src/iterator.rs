//! Move-on-handle message iteration.
//!
//! A [`MessageIterator`] owns one store connection, the source folder and
//! every destination folder for its whole life. It takes a snapshot of the
//! source folder when it opens (prefetched, filtered and sorted) and hands
//! the messages out one at a time. Nothing changes on the server until the
//! caller [`commit`](MessageIterator::commit)s a handled message.
//!
//! ```text
//! INITIALIZING ──open()──→ READY ──next()──→ ITERATING
//!                            ▲                  │
//!                            └────commit()──────┘
//!
//! READY/ITERATING ──exhaustion, close() or drop──→ CLOSED
//! ```
//!
//! Messages flagged as deleted are expunged when the source folder closes.

use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, error, info, warn};

use crate::config::MovingMethod;
use crate::message::MailMessage;
use crate::predicate::Predicate;
use crate::store::{FetchProfile, FolderMode, MailFolder, MailStore, StoreConnector};
use crate::{Error, Result};

/// Message type handed out by a store's folders.
pub type MessageOf<S> = <<S as MailStore>::Folder as MailFolder>::Message;

type Comparator<M> = Box<dyn Fn(&M, &M) -> Ordering>;

/// Configures and opens a [`MessageIterator`].
pub struct MessageIteratorBuilder<M> {
    store: String,
    source: String,
    destinations: Vec<String>,
    delete: bool,
    filter: Option<Predicate<M>>,
    sort: Option<Comparator<M>>,
    profile: FetchProfile,
}

impl<M: MailMessage + 'static> MessageIteratorBuilder<M> {
    /// Starts configuring an iterator over `source` in the named store.
    #[must_use]
    pub fn new(store: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            source: source.into(),
            destinations: Vec::new(),
            delete: false,
            filter: None,
            sort: None,
            profile: FetchProfile::default(),
        }
    }

    /// Adds a destination folder. A blank name is a valid destination that
    /// moves nothing.
    #[must_use]
    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.destinations.push(name.into());
        self
    }

    /// Adds several destination folders, keeping their order.
    #[must_use]
    pub fn destinations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destinations.extend(names.into_iter().map(Into::into));
        self
    }

    /// Flags committed messages as deleted in the source folder.
    #[must_use]
    pub const fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Keeps only messages matching `filter`.
    #[must_use]
    pub fn filter(mut self, filter: Predicate<M>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Orders the snapshot with a stable sort; server order otherwise.
    #[must_use]
    pub fn sort_by(mut self, compare: impl Fn(&M, &M) -> Ordering + 'static) -> Self {
        self.sort = Some(Box::new(compare));
        self
    }

    /// Replaces the bulk prefetch profile.
    #[must_use]
    pub const fn fetch_profile(mut self, profile: FetchProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Opens the store and folders and takes the message snapshot.
    ///
    /// On failure every resource opened so far is closed again before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IteratorInit`] wrapping the first failure.
    pub fn open<C, S, F>(self, connector: &C) -> Result<MessageIterator<S>>
    where
        C: StoreConnector<Store = S>,
        S: MailStore<Folder = F>,
        F: MailFolder<Message = M>,
    {
        let Self {
            store,
            source,
            destinations,
            delete,
            filter,
            sort,
            profile,
        } = self;

        let mut iterator = MessageIterator {
            store_name: store,
            store: None,
            source: None,
            destinations: Vec::new(),
            messages: Vec::new(),
            cursor: 0,
            current: None,
            delete,
            moving_method: MovingMethod::default(),
            closed: false,
        };

        let setup = iterator.initialize(
            connector,
            &source,
            &destinations,
            filter.as_ref(),
            sort.as_deref(),
            &profile,
        );

        match setup {
            Ok(()) => {
                info!(
                    store = %iterator.store_name,
                    folder = %source,
                    messages = iterator.messages.len(),
                    moving_method = %iterator.moving_method,
                    delete,
                    "Opened message iterator"
                );
                Ok(iterator)
            }
            Err(e) => {
                if let Err(close_error) = iterator.close() {
                    info!(
                        store = %iterator.store_name,
                        error = %close_error,
                        "Failed to release resources of incomplete iterator"
                    );
                }
                Err(Error::IteratorInit(Box::new(e)))
            }
        }
    }
}

impl<M> fmt::Debug for MessageIteratorBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageIteratorBuilder")
            .field("store", &self.store)
            .field("source", &self.source)
            .field("destinations", &self.destinations)
            .field("delete", &self.delete)
            .field("filter", &self.filter.is_some())
            .field("sort", &self.sort.is_some())
            .field("profile", &self.profile)
            .finish()
    }
}

struct Destination<F> {
    name: String,
    folder: Option<F>,
}

/// Iterates over a snapshot of a source folder and applies deferred moves
/// and deletions as messages are committed.
///
/// The iterator closes itself when [`has_next`](Self::has_next) reports
/// exhaustion or when the last message is committed. Callers that stop early
/// must call [`close`](Self::close); dropping an unclosed iterator closes it
/// as a last resort and only logs failures.
pub struct MessageIterator<S: MailStore> {
    store_name: String,
    store: Option<S>,
    source: Option<S::Folder>,
    destinations: Vec<Destination<S::Folder>>,
    messages: Vec<MessageOf<S>>,
    cursor: usize,
    current: Option<usize>,
    delete: bool,
    moving_method: MovingMethod,
    closed: bool,
}

impl<S: MailStore> MessageIterator<S> {
    fn initialize<C>(
        &mut self,
        connector: &C,
        source_name: &str,
        destination_names: &[String],
        filter: Option<&Predicate<MessageOf<S>>>,
        sort: Option<&dyn Fn(&MessageOf<S>, &MessageOf<S>) -> Ordering>,
        profile: &FetchProfile,
    ) -> Result<()>
    where
        C: StoreConnector<Store = S>,
    {
        let store = self.store.insert(connector.open_store(&self.store_name)?);

        let mut source = store.folder(source_name)?;
        open_folder(&mut source, FolderMode::ReadWrite)?;
        let source = self.source.insert(source);

        self.moving_method = connector.moving_method(&self.store_name)?;

        for name in destination_names {
            if self.destinations.iter().any(|d| d.name == *name) {
                continue;
            }
            let folder = if name.trim().is_empty() {
                None
            } else {
                let mut folder = store.folder(name)?;
                open_folder(&mut folder, FolderMode::ReadWrite)?;
                Some(folder)
            };
            self.destinations.push(Destination {
                name: name.clone(),
                folder,
            });
        }

        let mut messages = source.messages()?;
        source.fetch(&mut messages, profile)?;
        let listed = messages.len();

        if let Some(filter) = filter {
            let mut kept = Vec::with_capacity(messages.len());
            for message in messages {
                if filter.test(&message)? {
                    kept.push(message);
                }
            }
            messages = kept;
        }

        if let Some(compare) = sort {
            messages.sort_by(|a, b| compare(a, b));
        }

        debug!(
            store = %self.store_name,
            folder = source_name,
            listed,
            selected = messages.len(),
            "Prepared message snapshot"
        );
        self.messages = messages;
        Ok(())
    }

    /// Returns true while messages remain.
    ///
    /// Once the snapshot is exhausted the iterator closes itself and every
    /// later call returns `false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Close`] if closing on exhaustion fails.
    pub fn has_next(&mut self) -> Result<bool> {
        if !self.closed && self.cursor < self.messages.len() {
            return Ok(true);
        }
        self.close()?;
        Ok(false)
    }

    /// Returns the next message and makes it the current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchElement`] once the snapshot is exhausted or the
    /// iterator is closed.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<&MessageOf<S>> {
        let index = self.cursor;
        let len = self.messages.len();
        if self.closed || index >= len {
            return Err(Error::NoSuchElement { index, len });
        }

        self.cursor += 1;
        self.current = Some(index);
        self.messages
            .get(index)
            .ok_or(Error::NoSuchElement { index, len })
    }

    /// The message most recently returned by [`next`](Self::next), until it
    /// is committed.
    #[must_use]
    pub fn current(&self) -> Option<&MessageOf<S>> {
        self.current.and_then(|index| self.messages.get(index))
    }

    /// Commits the outcome for the current message.
    ///
    /// When `handled` is true the message is moved to `destination` (a
    /// blank name selects the first configured destination) using the
    /// store's moving method, then flagged as deleted if deletion was
    /// requested. The deletion flag is set even when the move fails; the
    /// move error is still returned. When `handled` is false nothing
    /// changes on the server.
    ///
    /// Committing the last message closes the iterator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandledMessage`] describing the message and wrapping
    /// the cause, including when `handled` is true but no message is current.
    pub fn commit(&mut self, handled: bool, destination: &str) -> Result<()> {
        let current = self.current.take();

        let outcome = self.apply(current, handled, destination).and_then(|()| {
            if self.cursor >= self.messages.len() {
                self.close()
            } else {
                Ok(())
            }
        });

        outcome.map_err(|source| {
            let message = self.describe(current);
            error!(
                store = %self.store_name,
                message = %message,
                error = %source,
                "Failed to commit handled message"
            );
            Error::HandledMessage {
                message,
                source: Box::new(source),
            }
        })
    }

    fn apply(&mut self, current: Option<usize>, handled: bool, destination: &str) -> Result<()> {
        if !handled {
            return Ok(());
        }

        let index = current.ok_or(Error::NoCurrentMessage)?;
        let message = self.messages.get(index).ok_or(Error::NoCurrentMessage)?;
        let source = self.source.as_mut().ok_or(Error::NoCurrentMessage)?;

        let moved = resolve_destination(&mut self.destinations, destination).map_or(
            Ok(()),
            |target| move_message(self.moving_method, source, target, message),
        );

        let flagged = if self.delete {
            source.set_deleted(message).inspect(|()| {
                debug!(folder = source.name(), index, "Flagged message as deleted");
            })
        } else {
            Ok(())
        };

        match (moved, flagged) {
            (Err(move_error), Err(flag_error)) => {
                warn!(error = %flag_error, "Failed to flag message as deleted after failed move");
                Err(move_error)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn describe(&self, index: Option<usize>) -> String {
        match index.and_then(|i| self.messages.get(i)) {
            Some(message) => match message.subject() {
                Ok(subject) => format!("Message[subject: '{subject}']"),
                Err(_) => "Message[subject: <unreadable>]".to_string(),
            },
            None => "Message[none]".to_string(),
        }
    }

    /// Closes destination folders in insertion order, then the source folder
    /// (expunging deleted messages), then the store.
    ///
    /// Every close is attempted even if an earlier one fails. Calling this
    /// again after it returned has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Close`] wrapping the first failure.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;

        let mut first_error = None;

        for destination in self.destinations.drain(..) {
            if let Some(mut folder) = destination.folder
                && folder.is_open()
            {
                let result = folder.close();
                note_close(&mut first_error, &self.store_name, &destination.name, result);
            }
        }

        if let Some(mut source) = self.source.take()
            && source.is_open()
        {
            let result = source.close();
            note_close(&mut first_error, &self.store_name, source.name(), result);
        }

        if let Some(mut store) = self.store.take()
            && store.is_connected()
        {
            let result = store.close();
            note_close(&mut first_error, &self.store_name, "store", result);
        }

        match first_error {
            None => {
                debug!(store = %self.store_name, "Closed message iterator");
                Ok(())
            }
            Some(e) => Err(Error::Close(Box::new(e))),
        }
    }

    /// Returns true once the iterator has closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of messages in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the snapshot holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages already returned by [`next`](Self::next).
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor
    }

    /// Store name.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Moving method resolved when the iterator opened.
    #[must_use]
    pub const fn moving_method(&self) -> MovingMethod {
        self.moving_method
    }
}

impl<S: MailStore> Drop for MessageIterator<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        debug!(store = %self.store_name, "Closing message iterator on drop");
        if let Err(e) = self.close() {
            error!(store = %self.store_name, error = %e, "Failed to close message iterator on drop");
        }
    }
}

impl<S: MailStore> fmt::Debug for MessageIterator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let destinations: Vec<_> = self.destinations.iter().map(|d| &d.name).collect();
        f.debug_struct("MessageIterator")
            .field("store", &self.store_name)
            .field("destinations", &destinations)
            .field("messages", &self.messages.len())
            .field("cursor", &self.cursor)
            .field("moving_method", &self.moving_method)
            .field("delete", &self.delete)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn open_folder<F: MailFolder>(folder: &mut F, mode: FolderMode) -> Result<()> {
    let name = folder.name().to_string();
    let wrap = |source: Error| Error::FolderOpen {
        folder: name.clone(),
        source: Some(Box::new(source)),
    };

    if !folder.exists().map_err(wrap)? {
        return Err(Error::FolderOpen {
            folder: name.clone(),
            source: None,
        });
    }

    let status = folder.status().map_err(wrap)?;
    debug!(
        folder = %name,
        messages = status.messages,
        recent = status.recent,
        unseen = ?status.unseen,
        "Opening folder"
    );
    folder.open(mode).map_err(wrap)
}

fn resolve_destination<'d, F: MailFolder>(
    destinations: &'d mut [Destination<F>],
    name: &str,
) -> Option<&'d mut F> {
    if name.trim().is_empty() {
        return destinations.first_mut().and_then(|d| d.folder.as_mut());
    }

    match destinations.iter_mut().find(|d| d.name == name) {
        Some(destination) => destination.folder.as_mut(),
        None => {
            warn!(destination = name, "Unknown destination, message stays in place");
            None
        }
    }
}

fn move_message<F: MailFolder>(
    method: MovingMethod,
    source: &mut F,
    target: &mut F,
    message: &F::Message,
) -> Result<()> {
    match method {
        MovingMethod::Append => target.append_messages(&[message])?,
        MovingMethod::Copy => source.copy_messages(&[message], target)?,
    }
    debug!(
        from = source.name(),
        to = target.name(),
        method = %method,
        "Moved message"
    );
    Ok(())
}

fn note_close(first_error: &mut Option<Error>, store: &str, resource: &str, result: Result<()>) {
    if let Err(e) = result {
        error!(store, resource, error = %e, "Failed to close");
        if first_error.is_none() {
            *first_error = Some(e);
        }
    }
}
