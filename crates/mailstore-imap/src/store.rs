//! `MailStore` and `MailFolder` over an authenticated `imap` session.
//!
//! A store, its folders and their messages share one connection. The first
//! folder opened is selected (`SELECT`, or `EXAMINE` when read-only) and
//! becomes the source of listings, fetches, copies and deletion flags.
//! Folders opened afterwards are append or copy targets and never change the
//! selection.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

use imap::types::Fetch;
use mailstore_core::{
    DebugTrace, Envelope, FetchProfile, FolderMode, FolderStatus, MailFolder, MailMessage,
    MailStore, Result as CoreResult,
};

use crate::message::ImapMessage;
use crate::stream::{ImapStream, Traced};
use crate::{Error, Result};

const LIST_QUERY: &str = "(UID FLAGS RFC822.SIZE INTERNALDATE)";
pub(crate) const HEADER_QUERY: &str = "(UID BODY.PEEK[HEADER])";
pub(crate) const CONTENT_QUERY: &str = "(UID BODY.PEEK[])";
const DELETED: &str = "+FLAGS.SILENT (\\Deleted)";

/// Connection state shared by a store and everything it hands out.
pub(crate) struct Connection<S: Read + Write> {
    session: Option<imap::Session<S>>,
    selected: Option<String>,
    exists: u32,
}

pub(crate) type Shared<S> = Rc<RefCell<Connection<S>>>;

/// Runs one command on the shared session.
pub(crate) fn with_session<S, T>(
    connection: &Shared<S>,
    command: impl FnOnce(&mut imap::Session<S>) -> imap::Result<T>,
) -> Result<T>
where
    S: Read + Write,
{
    let mut connection = connection.try_borrow_mut().map_err(|_| Error::Busy)?;
    let session = connection.session.as_mut().ok_or(Error::Closed)?;
    Ok(command(session)?)
}

/// An authenticated IMAP connection to one store.
pub struct ImapStore<S: Read + Write = Traced<ImapStream>> {
    name: String,
    connection: Shared<S>,
    trace: DebugTrace,
}

impl<S: Read + Write> ImapStore<S> {
    /// Wraps an authenticated session.
    #[must_use]
    pub fn new(name: impl Into<String>, session: imap::Session<S>, trace: DebugTrace) -> Self {
        Self {
            name: name.into(),
            connection: Rc::new(RefCell::new(Connection {
                session: Some(session),
                selected: None,
                exists: 0,
            })),
            trace,
        }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the selected folder, if any.
    #[must_use]
    pub fn selected(&self) -> Option<String> {
        self.connection.borrow().selected.clone()
    }
}

impl<S: Read + Write> MailStore for ImapStore<S> {
    type Folder = ImapFolder<S>;

    fn folder(&mut self, name: &str) -> CoreResult<ImapFolder<S>> {
        if !self.is_connected() {
            return Err(Error::Closed.into());
        }
        Ok(ImapFolder {
            name: name.to_string(),
            connection: Rc::clone(&self.connection),
            state: FolderState::Closed,
        })
    }

    fn is_connected(&self) -> bool {
        self.connection.borrow().session.is_some()
    }

    fn close(&mut self) -> CoreResult<()> {
        let session = {
            let mut connection = self.connection.try_borrow_mut().map_err(|_| Error::Busy)?;
            connection.selected = None;
            connection.session.take()
        };
        let Some(mut session) = session else {
            return Ok(());
        };

        let result = session.logout();
        self.trace.flush(&self.name);
        result.map_err(Error::from)?;
        tracing::debug!(store = %self.name, "Logged out");
        Ok(())
    }
}

impl<S: Read + Write> fmt::Debug for ImapStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapStore")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("selected", &self.selected())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderState {
    Closed,
    Selected(FolderMode),
    Target,
}

/// A folder on an IMAP store.
pub struct ImapFolder<S: Read + Write = Traced<ImapStream>> {
    name: String,
    connection: Shared<S>,
    state: FolderState,
}

impl<S: Read + Write> ImapFolder<S> {
    /// Returns true if this folder is the selected source folder.
    #[must_use]
    pub const fn is_selected(&self) -> bool {
        matches!(self.state, FolderState::Selected(_))
    }

    fn require_selected(&self) -> Result<()> {
        if self.is_selected() {
            Ok(())
        } else {
            Err(Error::NotSelected(self.name.clone()))
        }
    }
}

impl<S: Read + Write> MailFolder for ImapFolder<S> {
    type Message = ImapMessage<S>;

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&mut self) -> CoreResult<bool> {
        let pattern = quote_mailbox(&self.name);
        let names = with_session(&self.connection, |s| s.list(None, Some(pattern.as_str())))?;
        Ok(!names.is_empty())
    }

    fn status(&mut self) -> CoreResult<FolderStatus> {
        let mailbox = with_session(&self.connection, |s| {
            s.status(&self.name, "(MESSAGES RECENT UNSEEN)")
        })?;
        Ok(FolderStatus {
            messages: mailbox.exists,
            recent: mailbox.recent,
            unseen: mailbox.unseen,
        })
    }

    fn open(&mut self, mode: FolderMode) -> CoreResult<()> {
        let mut connection = self.connection.try_borrow_mut().map_err(|_| Error::Busy)?;
        if connection.selected.is_some() {
            self.state = FolderState::Target;
            tracing::debug!(folder = %self.name, "Opened folder as target");
            return Ok(());
        }

        let session = connection.session.as_mut().ok_or(Error::Closed)?;
        let mailbox = match mode {
            FolderMode::ReadWrite => session.select(&self.name),
            FolderMode::ReadOnly => session.examine(&self.name),
        }
        .map_err(Error::from)?;

        connection.selected = Some(self.name.clone());
        connection.exists = mailbox.exists;
        self.state = FolderState::Selected(mode);
        tracing::debug!(folder = %self.name, ?mode, exists = mailbox.exists, "Selected folder");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state != FolderState::Closed
    }

    fn messages(&mut self) -> CoreResult<Vec<ImapMessage<S>>> {
        self.require_selected()?;
        if self.connection.borrow().exists == 0 {
            return Ok(Vec::new());
        }

        let fetches = with_session(&self.connection, |s| s.fetch("1:*", LIST_QUERY))?;
        let mut messages: Vec<_> = fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                Some(ImapMessage::new(
                    uid,
                    fetch.message,
                    fetch.size,
                    fetch.flags().iter().map(ToString::to_string).collect(),
                    fetch.internal_date(),
                    Rc::clone(&self.connection),
                ))
            })
            .collect();
        messages.sort_by_key(ImapMessage::sequence);
        Ok(messages)
    }

    fn fetch(&mut self, messages: &mut [ImapMessage<S>], profile: &FetchProfile) -> CoreResult<()> {
        self.require_selected()?;

        if profile.envelope {
            let missing: Vec<u32> = messages
                .iter()
                .filter(|m| !m.has_envelope())
                .map(ImapMessage::uid)
                .collect();
            let headers =
                fetch_sections(&self.connection, &missing, HEADER_QUERY, Fetch::header)?;
            for message in messages.iter_mut() {
                if let Some(header) = headers.get(&message.uid()) {
                    message.set_envelope(Envelope::parse(header));
                }
            }
        }

        if profile.content {
            let missing: Vec<u32> = messages
                .iter()
                .filter(|m| !m.has_content())
                .map(ImapMessage::uid)
                .collect();
            let mut bodies =
                fetch_sections(&self.connection, &missing, CONTENT_QUERY, Fetch::body)?;
            for message in messages.iter_mut() {
                if let Some(body) = bodies.remove(&message.uid()) {
                    message.set_content(body);
                }
            }
        }

        tracing::debug!(
            folder = %self.name,
            messages = messages.len(),
            envelope = profile.envelope,
            content = profile.content,
            "Prefetched messages"
        );
        Ok(())
    }

    fn append_messages(&mut self, messages: &[&ImapMessage<S>]) -> CoreResult<()> {
        for message in messages {
            let raw = message.raw()?;
            with_session(&self.connection, |s| s.append(&self.name, &raw))?;
            tracing::debug!(folder = %self.name, uid = message.uid(), "Appended message");
        }
        Ok(())
    }

    fn copy_messages(
        &mut self,
        messages: &[&ImapMessage<S>],
        destination: &Self,
    ) -> CoreResult<()> {
        self.require_selected()?;
        let uids: Vec<u32> = messages.iter().map(|m| m.uid()).collect();
        if uids.is_empty() {
            return Ok(());
        }

        let set = sequence_set(&uids);
        let target = quote_mailbox(&destination.name);
        with_session(&self.connection, |s| s.uid_copy(&set, &target))?;
        tracing::debug!(from = %self.name, to = %destination.name, uids = %set, "Copied messages");
        Ok(())
    }

    fn set_deleted(&mut self, message: &ImapMessage<S>) -> CoreResult<()> {
        self.require_selected()?;
        let uid = message.uid().to_string();
        with_session(&self.connection, |s| s.uid_store(&uid, DELETED))?;
        tracing::debug!(folder = %self.name, uid = message.uid(), "Flagged message as deleted");
        Ok(())
    }

    fn close(&mut self) -> CoreResult<()> {
        let state = std::mem::replace(&mut self.state, FolderState::Closed);
        if !matches!(state, FolderState::Selected(_)) {
            return Ok(());
        }

        let result = with_session(&self.connection, imap::Session::close);
        if let Ok(mut connection) = self.connection.try_borrow_mut() {
            connection.selected = None;
            connection.exists = 0;
        }
        result?;
        tracing::debug!(folder = %self.name, "Closed folder");
        Ok(())
    }
}

impl<S: Read + Write> fmt::Debug for ImapFolder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapFolder")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Fetches one body section for many UIDs in a single round trip.
fn fetch_sections<S: Read + Write>(
    connection: &Shared<S>,
    uids: &[u32],
    query: &str,
    section: impl Fn(&Fetch) -> Option<&[u8]>,
) -> Result<HashMap<u32, Vec<u8>>> {
    if uids.is_empty() {
        return Ok(HashMap::new());
    }

    let set = sequence_set(uids);
    let fetches = with_session(connection, |s| s.uid_fetch(&set, query))?;
    Ok(fetches
        .iter()
        .filter_map(|fetch| Some((fetch.uid?, section(fetch)?.to_vec())))
        .collect())
}

/// Fetches one body section for a single UID.
pub(crate) fn fetch_section<S: Read + Write>(
    connection: &Shared<S>,
    uid: u32,
    query: &str,
    item: &'static str,
    section: impl Fn(&Fetch) -> Option<&[u8]>,
) -> Result<Vec<u8>> {
    fetch_sections(connection, &[uid], query, section)?
        .remove(&uid)
        .ok_or(Error::MissingData { uid, item })
}

/// Quotes a mailbox name for the commands that pass it through verbatim
/// (`LIST` patterns and `UID COPY` targets).
fn quote_mailbox(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Renders UIDs as a compact IMAP sequence set, such as `1:3,7,9:10`.
#[must_use]
pub fn sequence_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for uid in sorted {
        match ranges.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(uid) => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
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
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn expand(set: &str) -> BTreeSet<u32> {
        set.split(',')
            .flat_map(|part| match part.split_once(':') {
                Some((start, end)) => {
                    let (start, end): (u32, u32) = (start.parse().unwrap(), end.parse().unwrap());
                    (start..=end).collect::<Vec<_>>()
                }
                None => vec![part.parse().unwrap()],
            })
            .collect()
    }

    #[test]
    fn test_sequence_set_compresses_runs() {
        assert_eq!(sequence_set(&[3, 1, 2, 7, 9, 10]), "1:3,7,9:10");
        assert_eq!(sequence_set(&[5]), "5");
        assert_eq!(sequence_set(&[4, 4, 4]), "4");
        assert_eq!(sequence_set(&[u32::MAX, u32::MAX - 1]), "4294967294:4294967295");
    }

    #[test]
    fn test_quote_mailbox() {
        assert_eq!(quote_mailbox("INBOX"), "\"INBOX\"");
        assert_eq!(quote_mailbox("Sent Items"), "\"Sent Items\"");
        assert_eq!(quote_mailbox("[Gmail]/All Mail"), "\"[Gmail]/All Mail\"");
        assert_eq!(quote_mailbox(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    proptest! {
        #[test]
        fn test_sequence_set_covers_exactly(uids in prop::collection::vec(1u32..500, 1..60)) {
            let set = sequence_set(&uids);
            let expected: BTreeSet<u32> = uids.iter().copied().collect();
            prop_assert_eq!(expand(&set), expected);
        }
    }
}
