//! Integration tests for the message iterator.
//!
//! These tests run the iterator against an in-memory server to check
//! ordering, deferred moves and deletions, and resource cleanup.

mod common;

use common::{MemoryConnector, MemoryMessage, Server};
use mailstore_core::compare::{by_sent_date, reversed};
use mailstore_core::predicate::subject_matches;
use mailstore_core::{Error, MailMessage, MessageIteratorBuilder, MovingMethod};

fn builder() -> MessageIteratorBuilder<MemoryMessage> {
    MessageIteratorBuilder::new("work", "INBOX")
}

fn seeded() -> Server {
    let server = Server::new();
    server.create("Processed");
    server.create("Failed");
    server.deliver(
        "INBOX",
        "report march",
        "alice@example.com",
        "Mon, 3 Mar 2025 09:00:00 +0000",
    );
    server.deliver(
        "INBOX",
        "lunch",
        "bob@example.com",
        "Sat, 1 Mar 2025 12:00:00 +0000",
    );
    server.deliver(
        "INBOX",
        "report january",
        "carol@example.com",
        "Wed, 1 Jan 2025 08:00:00 +0000",
    );
    server
}

#[test]
fn test_filter_and_sort_order() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .filter(subject_matches("report.*").unwrap())
        .sort_by(by_sent_date::<MemoryMessage>())
        .open(&connector)
        .unwrap();

    assert_eq!(it.len(), 2);
    let mut subjects = Vec::new();
    while it.has_next().unwrap() {
        subjects.push(it.next().unwrap().subject().unwrap());
        it.commit(false, "").unwrap();
    }
    assert_eq!(subjects, vec!["report january", "report march"]);
    assert_eq!(server.fetches(), 1);
}

#[test]
fn test_reversed_sort() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .sort_by(reversed(by_sent_date::<MemoryMessage>()))
        .open(&connector)
        .unwrap();

    assert_eq!(it.next().unwrap().subject().unwrap(), "report march");
    assert_eq!(it.next().unwrap().subject().unwrap(), "lunch");
    it.close().unwrap();
}

#[test]
fn test_exhaustion_closes_once() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder().open(&connector).unwrap();
    assert_eq!(server.open_resources(), 2);

    for _ in 0..3 {
        assert!(it.has_next().unwrap());
        it.next().unwrap();
    }
    assert!(!it.has_next().unwrap());
    assert!(it.is_closed());
    assert_eq!(server.open_resources(), 0);

    assert!(!it.has_next().unwrap());
    it.close().unwrap();
    drop(it);
    assert_eq!(server.events_matching("logout").len(), 1);
}

#[test]
fn test_next_after_exhaustion() {
    let server = Server::new();
    server.deliver(
        "INBOX",
        "only",
        "alice@example.com",
        "Mon, 3 Mar 2025 09:00:00 +0000",
    );
    let connector = MemoryConnector::new(&server);

    let mut it = builder().open(&connector).unwrap();
    it.next().unwrap();
    let err = it.next().unwrap_err();
    assert!(matches!(err, Error::NoSuchElement { index: 1, len: 1 }));
}

#[test]
fn test_empty_folder() {
    let server = Server::new();
    server.create("INBOX");
    let connector = MemoryConnector::new(&server);

    let mut it = builder().open(&connector).unwrap();
    assert!(it.is_empty());
    assert!(!it.has_next().unwrap());
    assert_eq!(server.open_resources(), 0);
}

#[test]
fn test_commit_routes_to_named_destination() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destinations(["Processed", "Failed"])
        .sort_by(by_sent_date::<MemoryMessage>())
        .open(&connector)
        .unwrap();

    it.next().unwrap();
    it.commit(true, "Failed").unwrap();
    it.next().unwrap();
    it.commit(true, "").unwrap();

    assert_eq!(server.subjects("Failed"), vec!["report january"]);
    assert_eq!(server.subjects("Processed"), vec!["lunch"]);
    assert_eq!(server.subjects("INBOX").len(), 3);
    it.close().unwrap();
}

#[test]
fn test_blank_destination_moves_nothing() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destinations(["", "Processed"])
        .delete(true)
        .open(&connector)
        .unwrap();
    assert_eq!(server.open_resources(), 3);

    let uid = it.next().unwrap().uid;
    it.commit(true, "").unwrap();
    it.next().unwrap();
    it.commit(true, "Unknown").unwrap();

    assert!(server.subjects("Processed").is_empty());
    assert_eq!(server.flagged("INBOX").first(), Some(&uid));
    it.close().unwrap();
    assert_eq!(server.subjects("INBOX"), vec!["report january"]);
}

#[test]
fn test_duplicate_destinations_open_once() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let it = builder()
        .destinations(["Processed", "Processed"])
        .open(&connector)
        .unwrap();
    assert_eq!(server.events_matching("open Processed").len(), 1);
    drop(it);
    assert_eq!(server.open_resources(), 0);
}

#[test]
fn test_delete_flagged_when_move_fails() {
    let server = seeded();
    server.fail("append:Processed");
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destination("Processed")
        .delete(true)
        .open(&connector)
        .unwrap();

    let uid = it.next().unwrap().uid;
    let err = it.commit(true, "Processed").unwrap_err();

    assert_eq!(err.code().as_deref(), Some("mailstore:connector:handled"));
    assert!(err.to_string().contains("report march"));
    assert!(matches!(
        &err,
        Error::HandledMessage { source, .. } if matches!(**source, Error::Store(_))
    ));
    assert_eq!(server.flagged("INBOX"), vec![uid]);
    assert!(server.subjects("Processed").is_empty());
    it.close().unwrap();
}

#[test]
fn test_commit_without_current_message() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder().destination("Processed").open(&connector).unwrap();
    let err = it.commit(true, "Processed").unwrap_err();
    assert!(matches!(
        &err,
        Error::HandledMessage { source, .. } if matches!(**source, Error::NoCurrentMessage)
    ));

    it.next().unwrap();
    it.commit(true, "Processed").unwrap();
    let err = it.commit(true, "Processed").unwrap_err();
    assert_eq!(err.code().as_deref(), Some("mailstore:connector:handled"));
    assert_eq!(server.subjects("Processed").len(), 1);
}

#[test]
fn test_unhandled_commit_changes_nothing() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destination("Processed")
        .delete(true)
        .open(&connector)
        .unwrap();
    while it.has_next().unwrap() {
        it.next().unwrap();
        it.commit(false, "Processed").unwrap();
    }

    assert!(server.subjects("Processed").is_empty());
    assert_eq!(server.subjects("INBOX").len(), 3);
    assert!(server.events_matching("delete").is_empty());
}

#[test]
fn test_last_commit_closes_and_expunges() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destination("Processed")
        .delete(true)
        .open(&connector)
        .unwrap();
    for _ in 0..3 {
        it.next().unwrap();
        it.commit(true, "Processed").unwrap();
    }

    assert!(it.is_closed());
    assert_eq!(server.open_resources(), 0);
    assert!(server.subjects("INBOX").is_empty());
    assert_eq!(server.subjects("Processed").len(), 3);
    assert_eq!(
        server.events_matching("close"),
        vec!["close Processed", "close INBOX"]
    );
}

#[test]
fn test_copy_and_append_methods() {
    let server = seeded();
    let connector = MemoryConnector::new(&server).with_moving_method(MovingMethod::Copy);

    let mut it = builder().destination("Processed").open(&connector).unwrap();
    assert_eq!(it.moving_method(), MovingMethod::Copy);
    let uid = it.next().unwrap().uid;
    it.commit(true, "Processed").unwrap();
    it.close().unwrap();
    assert_eq!(
        server.events_matching("copy"),
        vec![format!("copy INBOX->Processed uid={uid}")]
    );
    assert!(server.events_matching("append").is_empty());

    let connector = MemoryConnector::new(&server);
    let mut it = builder().destination("Processed").open(&connector).unwrap();
    let uid = it.next().unwrap().uid;
    it.commit(true, "Processed").unwrap();
    it.close().unwrap();
    assert_eq!(
        server.events_matching("append"),
        vec![format!("append Processed uid={uid}")]
    );
}

#[test]
fn test_construction_failure_releases_resources() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let err = builder()
        .destinations(["Processed", "Archive"])
        .open(&connector)
        .unwrap_err();

    assert_eq!(err.code().as_deref(), Some("mailstore:connector:iterator"));
    assert!(matches!(
        &err,
        Error::IteratorInit(source)
            if matches!(&**source, Error::FolderOpen { folder, source: None } if folder == "Archive")
    ));
    assert_eq!(server.open_resources(), 0);

    server.create("Archive");
    let it = builder()
        .destinations(["Processed", "Archive"])
        .open(&connector)
        .unwrap();
    assert_eq!(server.open_resources(), 4);
    drop(it);
    assert_eq!(server.open_resources(), 0);
}

#[test]
fn test_source_open_failure() {
    let server = seeded();
    server.fail("open:INBOX");
    let connector = MemoryConnector::new(&server);

    let err = builder().open(&connector).unwrap_err();
    assert!(matches!(
        &err,
        Error::IteratorInit(source)
            if matches!(&**source, Error::FolderOpen { source: Some(_), .. })
    ));
    assert_eq!(server.open_resources(), 0);
    assert_eq!(server.events_matching("logout").len(), 1);
}

#[test]
fn test_missing_source_folder() {
    let server = Server::new();
    let connector = MemoryConnector::new(&server);

    let err = builder().open(&connector).unwrap_err();
    assert_eq!(err.code().as_deref(), Some("mailstore:connector:iterator"));
    assert_eq!(server.open_resources(), 0);
}

#[test]
fn test_close_continues_past_failures() {
    let server = seeded();
    server.fail("close:Processed");
    server.fail("store:close");
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destinations(["Processed", "Failed"])
        .open(&connector)
        .unwrap();
    let err = it.close().unwrap_err();

    assert_eq!(err.code().as_deref(), Some("mailstore:connector:close"));
    assert!(err.to_string().contains("close:Processed"));
    assert_eq!(server.open_resources(), 0);
    assert_eq!(
        server.events_matching("close"),
        vec!["close Processed", "close Failed", "close INBOX"]
    );
    assert_eq!(server.events_matching("logout").len(), 1);

    it.close().unwrap();
}

#[test]
fn test_close_failure_on_last_commit_is_handled_error() {
    let server = seeded();
    server.fail("close:INBOX");
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .sort_by(by_sent_date::<MemoryMessage>())
        .open(&connector)
        .unwrap();
    it.next().unwrap();
    it.commit(false, "").unwrap();
    it.next().unwrap();
    it.commit(false, "").unwrap();
    it.next().unwrap();
    let err = it.commit(false, "").unwrap_err();

    assert!(matches!(
        &err,
        Error::HandledMessage { message, source }
            if message == "Message[subject: 'report march']" && matches!(**source, Error::Close(_))
    ));
    assert_eq!(server.open_resources(), 0);
}

#[test]
fn test_drop_closes_unfinished_iterator() {
    let server = seeded();
    let connector = MemoryConnector::new(&server);

    let mut it = builder()
        .destination("Processed")
        .delete(true)
        .open(&connector)
        .unwrap();
    it.next().unwrap();
    it.commit(true, "Processed").unwrap();
    drop(it);

    assert_eq!(server.open_resources(), 0);
    assert_eq!(server.subjects("INBOX").len(), 2);
}
