//! Messages held by an IMAP folder.
//!
//! Listing a folder yields UID, flags, size and internal date only. Headers
//! and content are filled in by a bulk prefetch, or fetched by UID on first
//! access and cached for the life of the message.

use std::fmt;
use std::io::{Read, Write};

use chrono::{DateTime, FixedOffset};
use imap::types::Fetch;
use mailstore_core::{Envelope, MailMessage, Result as CoreResult};
use once_cell::unsync::OnceCell;

use crate::stream::{ImapStream, Traced};
use crate::store::{CONTENT_QUERY, HEADER_QUERY, Shared, fetch_section};

/// A message in the selected folder of an IMAP store.
pub struct ImapMessage<S: Read + Write = Traced<ImapStream>> {
    uid: u32,
    sequence: u32,
    size: Option<u32>,
    flags: Vec<String>,
    internal_date: Option<DateTime<FixedOffset>>,
    envelope: OnceCell<Envelope>,
    content: OnceCell<Vec<u8>>,
    connection: Shared<S>,
}

impl<S: Read + Write> ImapMessage<S> {
    pub(crate) fn new(
        uid: u32,
        sequence: u32,
        size: Option<u32>,
        flags: Vec<String>,
        internal_date: Option<DateTime<FixedOffset>>,
        connection: Shared<S>,
    ) -> Self {
        Self {
            uid,
            sequence,
            size,
            flags,
            internal_date,
            envelope: OnceCell::new(),
            content: OnceCell::new(),
            connection,
        }
    }

    /// Unique identifier within the folder.
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    /// Sequence number at listing time.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Size in bytes as reported by the server.
    #[must_use]
    pub const fn size(&self) -> Option<u32> {
        self.size
    }

    /// Flags at listing time, such as `\Seen`.
    #[must_use]
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Returns true if the message carried the `\Seen` flag when listed.
    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }

    pub(crate) fn has_envelope(&self) -> bool {
        self.envelope.get().is_some()
    }

    pub(crate) fn has_content(&self) -> bool {
        self.content.get().is_some()
    }

    pub(crate) fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = OnceCell::with_value(envelope);
    }

    pub(crate) fn set_content(&mut self, content: Vec<u8>) {
        if !self.has_envelope() {
            self.envelope = OnceCell::with_value(Envelope::parse(&content));
        }
        self.content = OnceCell::with_value(content);
    }
}

impl<S: Read + Write> MailMessage for ImapMessage<S> {
    fn envelope(&self) -> CoreResult<&Envelope> {
        self.envelope.get_or_try_init(|| -> CoreResult<Envelope> {
            if let Some(content) = self.content.get() {
                return Ok(Envelope::parse(content));
            }
            tracing::debug!(uid = self.uid, "Loading message header");
            let header =
                fetch_section(&self.connection, self.uid, HEADER_QUERY, "header", Fetch::header)?;
            Ok(Envelope::parse(&header))
        })
    }

    fn raw(&self) -> CoreResult<Vec<u8>> {
        let content = self.content.get_or_try_init(|| -> CoreResult<Vec<u8>> {
            tracing::debug!(uid = self.uid, "Loading message content");
            Ok(fetch_section(
                &self.connection,
                self.uid,
                CONTENT_QUERY,
                "content",
                Fetch::body,
            )?)
        })?;
        Ok(content.clone())
    }

    fn received_date(&self) -> CoreResult<Option<DateTime<FixedOffset>>> {
        Ok(self.internal_date)
    }
}

impl<S: Read + Write> fmt::Debug for ImapMessage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapMessage")
            .field("uid", &self.uid)
            .field("sequence", &self.sequence)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("envelope", &self.has_envelope())
            .field("content", &self.has_content())
            .finish_non_exhaustive()
    }
}
