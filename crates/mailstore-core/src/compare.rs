//! Message comparators for the iterator's sort step.
//!
//! Keys that cannot be read sort before every readable key.

use std::cmp::Ordering;

use crate::message::MailMessage;

/// Orders messages by the `Date` header, oldest first.
pub fn by_sent_date<M: MailMessage>() -> impl Fn(&M, &M) -> Ordering {
    |a: &M, b: &M| {
        let key = |m: &M| m.sent_date().ok().flatten();
        key(a).cmp(&key(b))
    }
}

/// Orders messages by the date the store received them, oldest first.
pub fn by_received_date<M: MailMessage>() -> impl Fn(&M, &M) -> Ordering {
    |a: &M, b: &M| {
        let key = |m: &M| m.received_date().ok().flatten();
        key(a).cmp(&key(b))
    }
}

/// Orders messages by subject, ignoring case.
pub fn by_subject<M: MailMessage>() -> impl Fn(&M, &M) -> Ordering {
    |a: &M, b: &M| {
        let key = |m: &M| m.subject().ok().map(|s| s.to_lowercase());
        key(a).cmp(&key(b))
    }
}

/// Reverses a comparator.
pub fn reversed<M>(compare: impl Fn(&M, &M) -> Ordering) -> impl Fn(&M, &M) -> Ordering {
    move |a: &M, b: &M| compare(b, a)
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

    fn message(subject: &str, date: Option<&str>) -> MimeMessage {
        let date = date.map(|d| format!("Date: {d}\r\n")).unwrap_or_default();
        MimeMessage::parse(format!("Subject: {subject}\r\n{date}\r\nbody").into_bytes()).unwrap()
    }

    fn subjects(messages: &[MimeMessage]) -> Vec<String> {
        messages.iter().map(|m| m.subject().unwrap()).collect()
    }

    #[test]
    fn test_by_sent_date() {
        let mut messages = vec![
            message("late", Some("Wed, 2 Jul 2025 08:00:00 +0000")),
            message("undated", None),
            message("early", Some("Tue, 1 Jul 2025 23:00:00 -0300")),
            message("middle", Some("Wed, 2 Jul 2025 07:00:00 +0000")),
        ];
        messages.sort_by(by_sent_date::<MimeMessage>());
        assert_eq!(subjects(&messages), vec!["undated", "early", "middle", "late"]);
    }

    #[test]
    fn test_reversed_subject() {
        let mut messages = vec![message("b", None), message("A", None), message("c", None)];
        messages.sort_by(reversed(by_subject::<MimeMessage>()));
        assert_eq!(subjects(&messages), vec!["c", "b", "A"]);
    }

    #[test]
    fn test_received_date_defaults_to_unknown() {
        let a = message("a", None);
        let b = message("b", None);
        assert_eq!(by_received_date::<MimeMessage>()(&a, &b), Ordering::Equal);
    }
}
