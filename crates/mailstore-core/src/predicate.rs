//! Message predicates.
//!
//! Factories in this module compile their pattern once and return a cheap,
//! cloneable [`Predicate`]. Patterns are matched case-insensitively with `.`
//! matching line breaks, and must match the **whole** field: `abc` rejects
//! `xabcx`, while `.*abc.*` accepts it.
//!
//! Absent fields are treated as the empty string or an empty address list.
//! A failure to read a field is reported as [`Error::Predicate`] tagged with
//! the predicate name.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::content::{
    self, ContentWalker, MimeWalker, PartPredicate, is_disposition, is_mime_type,
};
use crate::message::{Address, MailMessage, RecipientType};
use crate::{Error, Result};

/// Tag of [`subject_matches`] failures.
pub const SUBJECT_MATCHES: &str = "subjectmatches";
/// Tag of [`from_matches`] and [`any_recipient_matches`] failures.
pub const FROM_MATCHES: &str = "frommatches";
/// Tag of [`to_matches`] failures.
pub const TO_MATCHES: &str = "tomatches";
/// Tag of [`cc_matches`] failures.
pub const CC_MATCHES: &str = "ccmatches";
/// Tag of [`bcc_matches`] failures.
pub const BCC_MATCHES: &str = "bccmatches";
/// Tag of [`header_matches`] failures.
pub const HEADER_MATCHES: &str = "headermatches";

type Test<M> = dyn Fn(&M) -> Result<bool> + Send + Sync;

/// A side-effect free test over messages.
pub struct Predicate<M: ?Sized> {
    test: Arc<Test<M>>,
}

impl<M: ?Sized> Predicate<M> {
    /// Evaluates the predicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the message field could not be read.
    pub fn test(&self, message: &M) -> Result<bool> {
        (self.test)(message)
    }
}

impl<M: ?Sized + 'static> Predicate<M> {
    /// Wraps a test function.
    pub fn new(test: impl Fn(&M) -> Result<bool> + Send + Sync + 'static) -> Self {
        Self {
            test: Arc::new(test),
        }
    }

    /// Matches when both predicates match; `other` is skipped when `self`
    /// rejects.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::new(move |m| Ok(self.test(m)? && other.test(m)?))
    }

    /// Matches when either predicate matches; `other` is skipped when `self`
    /// accepts.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::new(move |m| Ok(self.test(m)? || other.test(m)?))
    }

    /// Inverts the predicate.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::new(move |m| Ok(!self.test(m)?))
    }
}

impl<M: ?Sized> Clone for Predicate<M> {
    fn clone(&self) -> Self {
        Self {
            test: Arc::clone(&self.test),
        }
    }
}

impl<M: ?Sized> fmt::Debug for Predicate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").finish_non_exhaustive()
    }
}

/// Compiles a full-match, case-insensitive, dot-all pattern.
pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!(r"\A(?:{pattern})\z"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|source| Error::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn tagged(name: &'static str) -> impl Fn(Error) -> Error {
    move |source| Error::Predicate {
        name,
        source: Box::new(source),
    }
}

/// Matches the subject.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn subject_matches<M: MailMessage + 'static>(pattern: &str) -> Result<Predicate<M>> {
    let regex = compile(pattern)?;
    Ok(Predicate::new(move |m: &M| {
        let subject = m.subject().map_err(tagged(SUBJECT_MATCHES))?;
        Ok(regex.is_match(&subject))
    }))
}

/// Matches the sender addresses, rendered as `Name <local@domain>`.
///
/// Every sender is tested and only the last result counts, so a message
/// whose first sender matches and whose second does not is rejected.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn from_matches<M: MailMessage + 'static>(pattern: &str) -> Result<Predicate<M>> {
    let regex = compile(pattern)?;
    Ok(Predicate::new(move |m: &M| {
        let from = m.from().map_err(tagged(FROM_MATCHES))?;
        let mut matched = false;
        for address in &from {
            matched = regex.is_match(&address.to_string());
        }
        Ok(matched)
    }))
}

fn any_address_matches(regex: &Regex, addresses: &[Address]) -> bool {
    addresses
        .iter()
        .any(|address| regex.is_match(&address.to_string()))
}

fn recipient_matches<M: MailMessage + 'static>(
    kind: RecipientType,
    name: &'static str,
    pattern: &str,
) -> Result<Predicate<M>> {
    let regex = compile(pattern)?;
    Ok(Predicate::new(move |m: &M| {
        let recipients = m.recipients(kind).map_err(tagged(name))?;
        Ok(any_address_matches(&regex, &recipients))
    }))
}

/// Matches if any `To` recipient matches.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn to_matches<M: MailMessage + 'static>(pattern: &str) -> Result<Predicate<M>> {
    recipient_matches(RecipientType::To, TO_MATCHES, pattern)
}

/// Matches if any `Cc` recipient matches.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn cc_matches<M: MailMessage + 'static>(pattern: &str) -> Result<Predicate<M>> {
    recipient_matches(RecipientType::Cc, CC_MATCHES, pattern)
}

/// Matches if any `Bcc` recipient matches.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn bcc_matches<M: MailMessage + 'static>(pattern: &str) -> Result<Predicate<M>> {
    recipient_matches(RecipientType::Bcc, BCC_MATCHES, pattern)
}

/// Matches if any `To`, `Cc` or `Bcc` recipient matches.
///
/// Read failures are tagged [`FROM_MATCHES`].
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn any_recipient_matches<M: MailMessage + 'static>(pattern: &str) -> Result<Predicate<M>> {
    let regex = compile(pattern)?;
    Ok(Predicate::new(move |m: &M| {
        let recipients = m.all_recipients().map_err(tagged(FROM_MATCHES))?;
        Ok(any_address_matches(&regex, &recipients))
    }))
}

/// Matches if any value of the header `name` matches.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the pattern does not compile.
pub fn header_matches<M: MailMessage + 'static>(name: &str, pattern: &str) -> Result<Predicate<M>> {
    let regex = compile(pattern)?;
    let name = name.to_string();
    Ok(Predicate::new(move |m: &M| {
        let values = m.header(&name).map_err(tagged(HEADER_MATCHES))?;
        Ok(values.iter().any(|value| regex.is_match(value)))
    }))
}

/// Matches messages with at least one `attachment` part.
#[must_use]
pub fn has_attachment<M: MailMessage + 'static>(include_sub_messages: bool) -> Predicate<M> {
    walker_predicate(
        Arc::new(MimeWalker),
        content::is_attachment(),
        include_sub_messages,
    )
}

/// Matches messages with at least one part satisfying every given criterion.
///
/// `mime_type` accepts a `type/*` wildcard, `disposition` is compared
/// ignoring case and `filename_pattern` must fully match the file name.
/// Omitted criteria accept any part.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the file name pattern does not compile.
pub fn has_part<M: MailMessage + 'static>(
    mime_type: Option<&str>,
    disposition: Option<&str>,
    filename_pattern: Option<&str>,
    include_sub_messages: bool,
) -> Result<Predicate<M>> {
    has_part_with(
        Arc::new(MimeWalker),
        mime_type,
        disposition,
        filename_pattern,
        include_sub_messages,
    )
}

/// Like [`has_part`], traversing parts with a custom walker.
///
/// # Errors
///
/// Returns [`Error::Pattern`] if the file name pattern does not compile.
pub fn has_part_with<M: MailMessage + 'static>(
    walker: Arc<dyn ContentWalker>,
    mime_type: Option<&str>,
    disposition: Option<&str>,
    filename_pattern: Option<&str>,
    include_sub_messages: bool,
) -> Result<Predicate<M>> {
    let mut criteria = Vec::new();
    if let Some(mime_type) = mime_type {
        criteria.push(is_mime_type(mime_type));
    }
    if let Some(disposition) = disposition {
        criteria.push(is_disposition(disposition));
    }
    if let Some(pattern) = filename_pattern {
        criteria.push(content::filename_matches(pattern)?);
    }

    Ok(walker_predicate(
        walker,
        content::all_of(criteria),
        include_sub_messages,
    ))
}

fn walker_predicate<M: MailMessage + 'static>(
    walker: Arc<dyn ContentWalker>,
    part_predicate: PartPredicate,
    include_sub_messages: bool,
) -> Predicate<M> {
    Predicate::new(move |m: &M| {
        let parts = walker.all_parts(m, include_sub_messages, &*part_predicate)?;
        Ok(!parts.is_empty())
    })
}

/// Accepts every message.
#[must_use]
pub fn always_true<M: ?Sized + 'static>() -> Predicate<M> {
    Predicate::new(|_| Ok(true))
}

/// Rejects every message.
#[must_use]
pub fn always_false<M: ?Sized + 'static>() -> Predicate<M> {
    Predicate::new(|_| Ok(false))
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
    use proptest::prelude::*;

    use super::*;
    use crate::message::{Envelope, MimeMessage};

    fn message(headers: &str) -> MimeMessage {
        MimeMessage::parse(format!("{headers}\r\n\r\nbody\r\n").into_bytes()).unwrap()
    }

    /// A message whose envelope cannot be read.
    struct Unreadable;

    impl MailMessage for Unreadable {
        fn envelope(&self) -> Result<&Envelope> {
            Err(Error::Parse("connection lost".into()))
        }

        fn raw(&self) -> Result<Vec<u8>> {
            Err(Error::Parse("connection lost".into()))
        }
    }

    #[test]
    fn test_subject_requires_full_match() {
        let exact = subject_matches::<MimeMessage>("abc").unwrap();
        assert!(exact.test(&message("Subject: abc")).unwrap());
        assert!(exact.test(&message("Subject: ABC")).unwrap());
        assert!(!exact.test(&message("Subject: xabcx")).unwrap());

        let contains = subject_matches::<MimeMessage>(".*abc.*").unwrap();
        assert!(contains.test(&message("Subject: xabcx")).unwrap());
    }

    #[test]
    fn test_absent_subject_is_empty() {
        let message = message("From: a@example.com");
        assert!(subject_matches::<MimeMessage>("").unwrap().test(&message).unwrap());
        assert!(!subject_matches::<MimeMessage>(".+").unwrap().test(&message).unwrap());
    }

    #[test]
    fn test_dot_matches_newline() {
        let regex = compile("line1.line2").unwrap();
        assert!(regex.is_match("line1\nline2"));
        assert!(!regex.is_match("LINE1\r\nline2"));
        assert!(compile("line1..line2").unwrap().is_match("line1\r\nline2"));
    }

    #[test]
    fn test_from_matches_renders_display_name() {
        let message = message("From: Alice Example <alice@example.com>");
        let by_name = from_matches::<MimeMessage>("alice example <.*>").unwrap();
        assert!(by_name.test(&message).unwrap());

        let by_address_only = from_matches::<MimeMessage>("alice@example.com").unwrap();
        assert!(!by_address_only.test(&message).unwrap());
    }

    #[test]
    fn test_from_matches_keeps_last_result() {
        let message = message("From: first@example.com, second@example.com");

        let first = from_matches::<MimeMessage>("first@.*").unwrap();
        assert!(!first.test(&message).unwrap());

        let second = from_matches::<MimeMessage>("second@.*").unwrap();
        assert!(second.test(&message).unwrap());
    }

    #[test]
    fn test_recipient_matchers_accept_any_match() {
        let message = message(
            "To: one@example.com, two@example.com\r\n\
             Cc: Carol <carol@example.com>\r\n\
             Bcc: hidden@example.com",
        );

        assert!(to_matches::<MimeMessage>("one@.*").unwrap().test(&message).unwrap());
        assert!(to_matches::<MimeMessage>("two@.*").unwrap().test(&message).unwrap());
        assert!(!to_matches::<MimeMessage>("carol.*").unwrap().test(&message).unwrap());
        assert!(cc_matches::<MimeMessage>("carol <.*>").unwrap().test(&message).unwrap());
        assert!(bcc_matches::<MimeMessage>("hidden@.*").unwrap().test(&message).unwrap());
        assert!(
            any_recipient_matches::<MimeMessage>("hidden@.*")
                .unwrap()
                .test(&message)
                .unwrap()
        );
        assert!(
            !any_recipient_matches::<MimeMessage>("nobody@.*")
                .unwrap()
                .test(&message)
                .unwrap()
        );
    }

    #[test]
    fn test_header_matches_any_value() {
        let message = message("X-Tag: alpha\r\nX-Tag: beta");
        assert!(
            header_matches::<MimeMessage>("x-tag", "beta")
                .unwrap()
                .test(&message)
                .unwrap()
        );
        assert!(
            !header_matches::<MimeMessage>("X-Missing", ".*")
                .unwrap()
                .test(&message)
                .unwrap()
        );
    }

    #[test]
    fn test_read_failures_are_tagged() {
        let cases: Vec<(Predicate<Unreadable>, &str)> = vec![
            (subject_matches(".*").unwrap(), "predicate:subjectmatches"),
            (from_matches(".*").unwrap(), "predicate:frommatches"),
            (to_matches(".*").unwrap(), "predicate:tomatches"),
            (cc_matches(".*").unwrap(), "predicate:ccmatches"),
            (bcc_matches(".*").unwrap(), "predicate:bccmatches"),
            (any_recipient_matches(".*").unwrap(), "predicate:frommatches"),
            (header_matches("X", ".*").unwrap(), "predicate:headermatches"),
        ];

        for (predicate, code) in cases {
            let err = predicate.test(&Unreadable).unwrap_err();
            assert_eq!(err.code().unwrap(), format!("mailstore:connector:{code}"));
        }
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            subject_matches::<MimeMessage>("[unclosed"),
            Err(Error::Pattern { .. })
        ));
    }

    #[test]
    fn test_combinators() {
        let message = message("Subject: hello\r\nFrom: a@example.com");
        let hello = subject_matches::<MimeMessage>("hello").unwrap();
        let from_b = from_matches::<MimeMessage>("b@.*").unwrap();

        assert!(!hello.clone().and(from_b.clone()).test(&message).unwrap());
        assert!(hello.clone().or(from_b.clone()).test(&message).unwrap());
        assert!(from_b.negate().test(&message).unwrap());
        assert!(always_true::<MimeMessage>().test(&message).unwrap());
        assert!(!always_false::<MimeMessage>().test(&message).unwrap());
    }

    #[test]
    fn test_and_short_circuits() {
        let failing = Predicate::<Unreadable>::new(|_| Err(Error::NoCurrentMessage));
        assert!(!always_false().and(failing.clone()).test(&Unreadable).unwrap());
        assert!(always_true().or(failing).test(&Unreadable).unwrap());
    }

    fn count_matching<M: MailMessage>(filter: &Predicate<M>, messages: &[M]) -> Result<usize> {
        let mut count = 0;
        for message in messages {
            if filter.test(message)? {
                count += 1;
            }
        }
        Ok(count)
    }

    #[test]
    fn test_evaluates_in_generic_context() {
        let messages = [
            message("Subject: report march"),
            message("Subject: lunch"),
            message("Subject: report april"),
        ];
        let reports = subject_matches::<MimeMessage>("report .*").unwrap();
        assert_eq!(count_matching(&reports, &messages).unwrap(), 2);
        assert_eq!(count_matching(&reports.negate(), &messages).unwrap(), 1);
    }

    #[test]
    fn test_part_predicates() {
        let with_attachment = MimeMessage::parse(
            b"Subject: a\r\n\
              Content-Type: multipart/mixed; boundary=\"b\"\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              hi\r\n\
              --b\r\n\
              Content-Type: text/csv\r\n\
              Content-Disposition: attachment; filename=\"data.csv\"\r\n\
              \r\n\
              a,b\r\n\
              --b--\r\n"
                .to_vec(),
        )
        .unwrap();
        let plain = message("Subject: b");

        let any_attachment = has_attachment::<MimeMessage>(false);
        assert!(any_attachment.test(&with_attachment).unwrap());
        assert!(!any_attachment.test(&plain).unwrap());

        let csv = has_part::<MimeMessage>(Some("text/*"), Some("ATTACHMENT"), Some(r".*\.csv"), false)
            .unwrap();
        assert!(csv.test(&with_attachment).unwrap());

        let pdf = has_part::<MimeMessage>(None, None, Some(r".*\.pdf"), false).unwrap();
        assert!(!pdf.test(&with_attachment).unwrap());

        let anything = has_part::<MimeMessage>(None, None, None, false).unwrap();
        assert!(anything.test(&plain).unwrap());
    }

    proptest! {
        #[test]
        fn test_literal_pattern_matches_only_itself(
            word in "[a-z]{1,12}",
            prefix in "[a-z]{1,4}",
        ) {
            let regex = compile(&word).unwrap();
            prop_assert!(regex.is_match(&word));
            prop_assert!(regex.is_match(&word.to_uppercase()));
            let prefixed = format!("{prefix}{word}");
            prop_assert!(!regex.is_match(&prefixed));
            let suffixed = format!("{word}{prefix}");
            prop_assert!(!regex.is_match(&suffixed));
        }
    }
}
