//! Serialization of messages to and from raw RFC 5322 bytes.

use std::io::Read;

use tracing::debug;

use crate::message::{MailMessage, MimeMessage};
use crate::{Error, Result};

/// Serializes a message to its complete wire form.
///
/// # Errors
///
/// Returns [`Error::Save`] if the message content cannot be retrieved.
pub fn save_message<M: MailMessage + ?Sized>(message: &M) -> Result<Vec<u8>> {
    let bytes = message.raw().map_err(|e| Error::Save(Box::new(e)))?;
    debug!(bytes = bytes.len(), "Saved message");
    Ok(bytes)
}

/// Reads a detached message from `reader`.
///
/// # Errors
///
/// Returns [`Error::Load`] if reading fails or the bytes are not a message.
pub fn load_message(mut reader: impl Read) -> Result<MimeMessage> {
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .map_err(|e| Error::Load(Box::new(e.into())))?;

    let message = MimeMessage::parse(raw).map_err(|e| Error::Load(Box::new(e)))?;
    debug!(bytes = message.as_bytes().len(), "Loaded message");
    Ok(message)
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
    use std::fs::File;
    use std::io::{Cursor, Write};

    use super::*;
    use crate::content::{ContentWalker, MimeWalker, Part};
    use crate::message::{Address, Envelope, RecipientType};

    const SAMPLE: &str = "From: Alice <alice@example.com>\r\n\
To: bob@example.com, Carol <carol@example.com>\r\n\
Cc: dave@example.com\r\n\
Subject: Quarterly report\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0200\r\n\
Message-ID: <report-1@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Numbers attached.\r\n\
--b1\r\n\
Content-Type: application/pdf; name=\"q2.pdf\"\r\n\
Content-Disposition: attachment; filename=\"q2.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--b1--\r\n";

    struct Unreadable(Envelope);

    impl MailMessage for Unreadable {
        fn envelope(&self) -> Result<&Envelope> {
            Ok(&self.0)
        }

        fn raw(&self) -> Result<Vec<u8>> {
            Err(Error::store("connection reset"))
        }
    }

    fn parts(message: &MimeMessage) -> Vec<Part> {
        MimeWalker
            .all_parts(message, true, &|_: &Part| true)
            .unwrap()
    }

    #[test]
    fn test_round_trip_through_file() {
        let original = MimeMessage::parse(SAMPLE.as_bytes().to_vec()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.eml");

        let mut file = File::create(&path).unwrap();
        file.write_all(&save_message(&original).unwrap()).unwrap();
        drop(file);

        let loaded = load_message(File::open(&path).unwrap()).unwrap();

        assert_eq!(loaded.subject().unwrap(), "Quarterly report");
        assert_eq!(
            loaded.from().unwrap(),
            vec![Address::new(Some("Alice"), "alice@example.com")]
        );
        assert_eq!(loaded.recipients(RecipientType::To).unwrap().len(), 2);
        assert_eq!(loaded.all_recipients().unwrap().len(), 3);
        assert_eq!(loaded.sent_date().unwrap(), original.sent_date().unwrap());
        assert_eq!(parts(&loaded), parts(&original));
        assert_eq!(loaded.as_bytes(), SAMPLE.as_bytes());
    }

    #[test]
    fn test_save_failure_is_coded() {
        let message = Unreadable(Envelope::parse(b"Subject: x\r\n\r\n"));
        let err = save_message(&message).unwrap_err();
        assert!(matches!(err, Error::Save(_)));
        assert_eq!(err.code().as_deref(), Some("mailstore:connector:save"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let err = load_message(Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Load(_)));
        assert_eq!(err.code().as_deref(), Some("mailstore:connector:load"));
    }
}
