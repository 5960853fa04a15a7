//! Message abstractions.
//!
//! [`MailMessage`] is implemented by every message a store hands out and by
//! the detached [`MimeMessage`]. Header metadata is exposed through an
//! [`Envelope`], parsed once from the raw header block.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Address in `local@domain` form.
    pub email: String,
}

impl Address {
    /// Creates an address.
    #[must_use]
    pub fn new(name: Option<&str>, email: impl Into<String>) -> Self {
        Self {
            name: name.map(ToString::to_string),
            email: email.into(),
        }
    }
}

/// Renders `Name <local@domain>`, or just `local@domain` without a name.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.email),
            _ => f.write_str(&self.email),
        }
    }
}

/// Recipient header kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientType {
    /// `To` recipients.
    To,
    /// `Cc` recipients.
    Cc,
    /// `Bcc` recipients.
    Bcc,
}

/// Header metadata of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Decoded subject.
    pub subject: Option<String>,
    /// Sender addresses.
    pub from: Vec<Address>,
    /// `To` recipients.
    pub to: Vec<Address>,
    /// `Cc` recipients.
    pub cc: Vec<Address>,
    /// `Bcc` recipients.
    pub bcc: Vec<Address>,
    /// `Date` header.
    pub date: Option<DateTime<FixedOffset>>,
    /// `Message-ID` header.
    pub message_id: Option<String>,
    headers: Vec<(String, String)>,
}

impl Envelope {
    /// Parses an envelope from a raw header block or a complete message.
    ///
    /// Input without recognizable headers yields an empty envelope.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let headers = unfold_headers(header_block(raw));
        let Some(message) = MessageParser::new().parse(raw) else {
            return Self {
                headers,
                ..Self::default()
            };
        };

        Self {
            subject: message.subject().map(ToString::to_string),
            from: addresses(message.from()),
            to: addresses(message.to()),
            cc: addresses(message.cc()),
            bcc: addresses(message.bcc()),
            date: message.date().and_then(convert_date),
            message_id: message.message_id().map(ToString::to_string),
            headers,
        }
    }

    /// Returns the raw, unfolded values of every header named `name`,
    /// ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// All raw headers in message order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Recipients of the given kind.
    #[must_use]
    pub fn recipients(&self, kind: RecipientType) -> &[Address] {
        match kind {
            RecipientType::To => &self.to,
            RecipientType::Cc => &self.cc,
            RecipientType::Bcc => &self.bcc,
        }
    }
}

fn addresses(value: Option<&mail_parser::Address<'_>>) -> Vec<Address> {
    match value {
        None => Vec::new(),
        Some(mail_parser::Address::List(list)) => list.iter().filter_map(convert_addr).collect(),
        Some(mail_parser::Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(convert_addr)
            .collect(),
    }
}

fn convert_addr(addr: &mail_parser::Addr<'_>) -> Option<Address> {
    let email = addr.address.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
    let name = addr
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    Some(Address::new(name, email))
}

fn convert_date(date: &mail_parser::DateTime) -> Option<DateTime<FixedOffset>> {
    let offset = i32::from(date.tz_hour) * 3600 + i32::from(date.tz_minute) * 60;
    let offset = FixedOffset::east_opt(if date.tz_before_gmt { -offset } else { offset })?;
    DateTime::from_timestamp(date.to_timestamp(), 0).map(|utc| utc.with_timezone(&offset))
}

/// Returns the header block of a raw message (everything before the first
/// empty line).
fn header_block(raw: &[u8]) -> &[u8] {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = raw.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) => &raw[..a.min(b)],
        (Some(end), None) | (None, Some(end)) => &raw[..end],
        (None, None) => raw,
    }
}

/// Splits a header block into unfolded `(name, value)` pairs.
fn unfold_headers(block: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(block);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        // Continuation lines start with whitespace
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some(colon_idx) = line.find(':') {
            let name = line[..colon_idx].trim();
            if !name.is_empty() && !name.contains(' ') {
                headers.push((name.to_string(), line[colon_idx + 1..].trim().to_string()));
            }
        }
    }
    headers
}

/// A message as seen by predicates, walkers and the iterator.
///
/// Only [`envelope`](Self::envelope) and [`raw`](Self::raw) are required;
/// the field accessors are derived from the envelope.
pub trait MailMessage {
    /// Header metadata, loaded on first access if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers cannot be retrieved.
    fn envelope(&self) -> Result<&Envelope>;

    /// Complete raw RFC 5322 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be retrieved.
    fn raw(&self) -> Result<Vec<u8>>;

    /// Date the store received the message, if known.
    ///
    /// # Errors
    ///
    /// Returns an error if the date cannot be retrieved.
    fn received_date(&self) -> Result<Option<DateTime<FixedOffset>>> {
        Ok(None)
    }

    /// Subject, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be loaded.
    fn subject(&self) -> Result<String> {
        Ok(self.envelope()?.subject.clone().unwrap_or_default())
    }

    /// Sender addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be loaded.
    fn from(&self) -> Result<Vec<Address>> {
        Ok(self.envelope()?.from.clone())
    }

    /// Recipients of one kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be loaded.
    fn recipients(&self, kind: RecipientType) -> Result<Vec<Address>> {
        Ok(self.envelope()?.recipients(kind).to_vec())
    }

    /// `To`, `Cc` and `Bcc` recipients in that order.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be loaded.
    fn all_recipients(&self) -> Result<Vec<Address>> {
        let envelope = self.envelope()?;
        Ok(envelope
            .to
            .iter()
            .chain(&envelope.cc)
            .chain(&envelope.bcc)
            .cloned()
            .collect())
    }

    /// Raw values of a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be loaded.
    fn header(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .envelope()?
            .header(name)
            .into_iter()
            .map(ToString::to_string)
            .collect())
    }

    /// Date the message was sent, from the `Date` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be loaded.
    fn sent_date(&self) -> Result<Option<DateTime<FixedOffset>>> {
        Ok(self.envelope()?.date)
    }
}

/// A message detached from any store, backed by its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeMessage {
    raw: Vec<u8>,
    envelope: Envelope,
}

impl MimeMessage {
    /// Parses a message from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the bytes carry no message headers.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let has_headers = MessageParser::new()
            .parse(raw.as_slice())
            .is_some_and(|message| !message.headers().is_empty());
        if !has_headers {
            return Err(Error::Parse(format!(
                "no message headers found in {} bytes",
                raw.len()
            )));
        }

        let envelope = Envelope::parse(&raw);
        Ok(Self { raw, envelope })
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the message, returning its raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }
}

impl MailMessage for MimeMessage {
    fn envelope(&self) -> Result<&Envelope> {
        Ok(&self.envelope)
    }

    fn raw(&self) -> Result<Vec<u8>> {
        Ok(self.raw.clone())
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

    const SAMPLE: &str = "From: Alice Example <alice@example.com>\r\n\
        To: bob@example.com, \"Carol\" <carol@example.com>\r\n\
        Cc: Team: dave@example.com, erin@example.com;\r\n\
        Subject: =?UTF-8?Q?Invoice_=E2=82=AC42?=\r\n\
        Date: Tue, 1 Jul 2025 10:52:37 +0200\r\n\
        Message-ID: <abc123@example.com>\r\n\
        X-Tags: first,\r\n\
        \tsecond\r\n\
        X-Tags: third\r\n\
        \r\n\
        Body text\r\n";

    #[test]
    fn test_address_display() {
        assert_eq!(
            Address::new(Some("Alice"), "alice@example.com").to_string(),
            "Alice <alice@example.com>"
        );
        assert_eq!(
            Address::new(None, "bob@example.com").to_string(),
            "bob@example.com"
        );
        assert_eq!(Address::new(Some(""), "x@y.z").to_string(), "x@y.z");
    }

    #[test]
    fn test_envelope_parse() {
        let envelope = Envelope::parse(SAMPLE.as_bytes());

        assert_eq!(envelope.subject.as_deref(), Some("Invoice €42"));
        assert_eq!(
            envelope.from,
            vec![Address::new(Some("Alice Example"), "alice@example.com")]
        );
        assert_eq!(envelope.to.len(), 2);
        assert_eq!(envelope.to[1].to_string(), "Carol <carol@example.com>");
        assert_eq!(
            envelope
                .cc
                .iter()
                .map(|a| a.email.as_str())
                .collect::<Vec<_>>(),
            vec!["dave@example.com", "erin@example.com"]
        );
        assert!(envelope.bcc.is_empty());
        assert_eq!(envelope.message_id.as_deref(), Some("abc123@example.com"));

        let date = envelope.date.unwrap();
        assert_eq!(date.to_rfc3339(), "2025-07-01T10:52:37+02:00");
    }

    #[test]
    fn test_header_values_are_unfolded() {
        let envelope = Envelope::parse(SAMPLE.as_bytes());
        assert_eq!(envelope.header("x-tags"), vec!["first, second", "third"]);
        assert!(envelope.header("X-Missing").is_empty());
    }

    #[test]
    fn test_header_block_stops_at_body() {
        let envelope = Envelope::parse(b"Subject: hi\n\nX-Not-A-Header: body\n");
        assert_eq!(envelope.header("X-Not-A-Header"), Vec::<&str>::new());
        assert_eq!(envelope.header("subject"), vec!["hi"]);
    }

    #[test]
    fn test_trait_accessors() {
        let message = MimeMessage::parse(SAMPLE.as_bytes().to_vec()).unwrap();

        assert_eq!(message.subject().unwrap(), "Invoice €42");
        assert_eq!(message.from().unwrap().len(), 1);
        assert_eq!(message.recipients(RecipientType::Cc).unwrap().len(), 2);
        assert_eq!(message.all_recipients().unwrap().len(), 4);
        assert_eq!(message.header("Message-ID").unwrap(), vec!["<abc123@example.com>"]);
        assert!(message.sent_date().unwrap().is_some());
        assert!(message.received_date().unwrap().is_none());
        assert_eq!(message.raw().unwrap(), SAMPLE.as_bytes());
    }

    #[test]
    fn test_missing_subject_is_empty() {
        let message = MimeMessage::parse(b"From: a@b.c\r\n\r\nhi".to_vec()).unwrap();
        assert_eq!(message.subject().unwrap(), "");
        assert!(message.all_recipients().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        assert!(matches!(MimeMessage::parse(Vec::new()), Err(Error::Parse(_))));
    }
}
