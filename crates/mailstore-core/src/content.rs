//! MIME part traversal.
//!
//! A [`ContentWalker`] flattens a message's body structure into [`Part`]s.
//! The default [`MimeWalker`] parses the raw message with `mail-parser`.

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::message::MailMessage;
use crate::predicate::compile;
use crate::{Error, Result};

/// Predicate over a single part.
pub type PartPredicate = Box<dyn Fn(&Part) -> bool + Send + Sync>;

/// Summary of one MIME part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Lower-case `type/subtype`.
    pub content_type: String,
    /// Lower-case disposition type, such as `attachment` or `inline`.
    pub disposition: Option<String>,
    /// File name from the disposition or content type parameters.
    pub filename: Option<String>,
    /// `Content-ID` header.
    pub content_id: Option<String>,
    /// Decoded content size in bytes.
    pub size: usize,
    /// Whether the part belongs to an attached message.
    pub embedded: bool,
}

impl Part {
    /// Returns true if the disposition is `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.disposition.as_deref() == Some("attachment")
    }
}

/// Flattens the body structure of a message.
pub trait ContentWalker: Send + Sync {
    /// Returns every leaf part matching `predicate`, in document order.
    ///
    /// Attached messages are reported as a single `message/rfc822` part;
    /// their own parts are visited too when `include_sub_messages` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the message content cannot be retrieved or parsed.
    fn all_parts(
        &self,
        message: &dyn MailMessage,
        include_sub_messages: bool,
        predicate: &dyn Fn(&Part) -> bool,
    ) -> Result<Vec<Part>>;
}

/// Walks parts with `mail-parser`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeWalker;

impl ContentWalker for MimeWalker {
    fn all_parts(
        &self,
        message: &dyn MailMessage,
        include_sub_messages: bool,
        predicate: &dyn Fn(&Part) -> bool,
    ) -> Result<Vec<Part>> {
        let raw = message.raw()?;
        let parsed = MessageParser::new()
            .parse(raw.as_slice())
            .ok_or_else(|| Error::Parse("message body structure is unreadable".to_string()))?;

        let mut parts = Vec::new();
        walk(
            &parsed,
            parsed.root_part(),
            include_sub_messages,
            false,
            &mut parts,
        );
        parts.retain(|part| predicate(part));
        Ok(parts)
    }
}

fn walk(
    message: &Message<'_>,
    part: &MessagePart<'_>,
    include_sub_messages: bool,
    embedded: bool,
    out: &mut Vec<Part>,
) {
    match &part.body {
        PartType::Multipart(ids) => {
            for id in ids {
                if let Some(child) = message.part(*id) {
                    walk(message, child, include_sub_messages, embedded, out);
                }
            }
        }
        PartType::Message(inner) => {
            out.push(describe(part, embedded));
            if include_sub_messages {
                walk(inner, inner.root_part(), include_sub_messages, true, out);
            }
        }
        _ => out.push(describe(part, embedded)),
    }
}

fn describe(part: &MessagePart<'_>, embedded: bool) -> Part {
    let content_type = part.content_type().map_or_else(
        || default_content_type(part).to_string(),
        |ct| {
            ct.subtype().map_or_else(
                || ct.ctype().to_ascii_lowercase(),
                |sub| format!("{}/{sub}", ct.ctype()).to_ascii_lowercase(),
            )
        },
    );

    Part {
        content_type,
        disposition: part
            .content_disposition()
            .map(|cd| cd.ctype().to_ascii_lowercase()),
        filename: part.attachment_name().map(ToString::to_string),
        content_id: part.content_id().map(ToString::to_string),
        size: part.contents().len(),
        embedded,
    }
}

fn default_content_type(part: &MessagePart<'_>) -> &'static str {
    match &part.body {
        PartType::Message(_) => "message/rfc822",
        PartType::Binary(_) | PartType::InlineBinary(_) => "application/octet-stream",
        PartType::Html(_) => "text/html",
        _ => "text/plain",
    }
}

/// Matches parts by MIME type; `image/*` matches any image subtype.
#[must_use]
pub fn is_mime_type(mime_type: &str) -> PartPredicate {
    let wanted = mime_type.trim().to_ascii_lowercase();
    Box::new(move |part| match wanted.strip_suffix("/*") {
        Some(primary) => part
            .content_type
            .split_once('/')
            .is_some_and(|(ty, _)| ty == primary),
        None => part.content_type == wanted,
    })
}

/// Matches parts by disposition, ignoring case.
#[must_use]
pub fn is_disposition(disposition: &str) -> PartPredicate {
    let wanted = disposition.trim().to_ascii_lowercase();
    Box::new(move |part| part.disposition.as_deref() == Some(wanted.as_str()))
}

/// Matches parts whose file name fully matches `pattern`, ignoring case.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn filename_matches(pattern: &str) -> Result<PartPredicate> {
    let regex: Regex = compile(pattern)?;
    Ok(Box::new(move |part| {
        part.filename.as_deref().is_some_and(|name| regex.is_match(name))
    }))
}

/// Matches parts with an `attachment` disposition.
#[must_use]
pub fn is_attachment() -> PartPredicate {
    Box::new(Part::is_attachment)
}

/// Combines part predicates; an empty list matches every part.
#[must_use]
pub fn all_of(predicates: Vec<PartPredicate>) -> PartPredicate {
    Box::new(move |part| predicates.iter().all(|p| p(part)))
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
    use crate::message::MimeMessage;

    const MULTIPART: &str = "From: a@example.com\r\n\
        Subject: report\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
        \r\n\
        --outer\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        See attached.\r\n\
        --outer\r\n\
        Content-Type: application/pdf; name=\"report.pdf\"\r\n\
        Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        JVBERi0xLjQK\r\n\
        --outer\r\n\
        Content-Type: message/rfc822\r\n\
        Content-Disposition: attachment\r\n\
        \r\n\
        From: b@example.com\r\n\
        Subject: inner\r\n\
        Content-Type: multipart/mixed; boundary=\"inner\"\r\n\
        \r\n\
        --inner\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        inner text\r\n\
        --inner\r\n\
        Content-Type: image/png\r\n\
        Content-Disposition: attachment; filename=\"logo.png\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        iVBORw0KGgo=\r\n\
        --inner--\r\n\
        --outer--\r\n";

    fn message() -> MimeMessage {
        MimeMessage::parse(MULTIPART.as_bytes().to_vec()).unwrap()
    }

    fn types(parts: &[Part]) -> Vec<&str> {
        parts.iter().map(|p| p.content_type.as_str()).collect()
    }

    #[test]
    fn test_walk_top_level() {
        let parts = MimeWalker.all_parts(&message(), false, &|_: &Part| true).unwrap();
        assert_eq!(
            types(&parts),
            vec!["text/plain", "application/pdf", "message/rfc822"]
        );
        assert_eq!(parts[1].filename.as_deref(), Some("report.pdf"));
        assert!(parts[1].is_attachment());
        assert!(!parts[0].is_attachment());
        assert!(parts.iter().all(|p| !p.embedded));
    }

    #[test]
    fn test_walk_into_sub_messages() {
        let parts = MimeWalker.all_parts(&message(), true, &|_: &Part| true).unwrap();
        assert_eq!(
            types(&parts),
            vec![
                "text/plain",
                "application/pdf",
                "message/rfc822",
                "text/plain",
                "image/png"
            ]
        );
        assert!(parts[4].embedded);
        assert_eq!(parts[4].filename.as_deref(), Some("logo.png"));
    }

    #[test]
    fn test_predicates_filter_parts() {
        let images = is_mime_type("image/*");
        let parts = MimeWalker.all_parts(&message(), true, &*images).unwrap();
        assert_eq!(types(&parts), vec!["image/png"]);

        let pdf_attachments = all_of(vec![
            is_mime_type("APPLICATION/PDF"),
            is_disposition("Attachment"),
            filename_matches(r".*\.PDF").unwrap(),
        ]);
        let parts = MimeWalker
            .all_parts(&message(), false, &*pdf_attachments)
            .unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_filename_requires_full_match() {
        let predicate = filename_matches("report").unwrap();
        let parts = MimeWalker.all_parts(&message(), false, &*predicate).unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_single_part_message() {
        let message = MimeMessage::parse(b"Subject: plain\r\n\r\nhello".to_vec()).unwrap();
        let parts = MimeWalker.all_parts(&message, true, &|_: &Part| true).unwrap();
        assert_eq!(types(&parts), vec!["text/plain"]);
        assert_eq!(parts[0].size, 5);
    }

    #[test]
    fn test_invalid_filename_pattern() {
        assert!(matches!(
            filename_matches("("),
            Err(Error::Pattern { .. })
        ));
    }
}
