//! Integration tests for the IMAP store against a scripted server.
//!
//! Each test feeds the client a fixed sequence of server responses and then
//! checks the commands the client sent. Tags are assigned in order starting
//! with `a1` for `LOGIN`.

#![allow(clippy::unwrap_used)]

use std::cell::RefCell;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

use mailstore_core::{
    DebugTrace, FetchProfile, FolderMode, MailFolder, MailMessage, MailStore,
    MessageIteratorBuilder, Result as CoreResult, StoreConnector,
};
use mailstore_imap::{ImapMessage, ImapStore};

struct MockStream {
    input: Cursor<Vec<u8>>,
    sent: Rc<RefCell<Vec<u8>>>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type Sent = Rc<RefCell<Vec<u8>>>;

fn transcript(sent: &Sent) -> String {
    String::from_utf8_lossy(&sent.borrow()).into_owned()
}

/// Logs in and returns a store whose server answers with `responses`.
fn login(responses: &str) -> (ImapStore<MockStream>, Sent) {
    let sent = Rc::new(RefCell::new(Vec::new()));
    let input = format!("* OK IMAP4rev1 ready\r\na1 OK LOGIN completed\r\n{responses}");
    let mut client = imap::Client::new(MockStream {
        input: Cursor::new(input.into_bytes()),
        sent: Rc::clone(&sent),
    });
    client.read_greeting().unwrap();
    let session = client
        .login("ops@example.com", "secret")
        .map_err(|(e, _client)| e)
        .unwrap();
    (
        ImapStore::new("work", session, DebugTrace::new(false)),
        sent,
    )
}

fn literal(text: &str) -> String {
    format!("{{{}}}\r\n{text}", text.len())
}

const MARCH_HEADER: &str = "From: alice@example.com\r\nSubject: report march\r\nDate: Sun, 3 Mar 2024 10:00:00 +0000\r\n\r\n";
const LUNCH_HEADER: &str =
    "From: bob@example.com\r\nSubject: lunch\r\nDate: Fri, 1 Mar 2024 12:00:00 +0000\r\n\r\n";
const MARCH_BODY: &str = "From: alice@example.com\r\nSubject: report march\r\nDate: Sun, 3 Mar 2024 10:00:00 +0000\r\n\r\nnumbers\r\n";

const LISTING: &str = "* 1 FETCH (UID 10 FLAGS (\\Seen) RFC822.SIZE 120 INTERNALDATE \"03-Mar-2024 10:00:05 +0000\")\r\n\
* 2 FETCH (UID 11 FLAGS () RFC822.SIZE 90 INTERNALDATE \"01-Mar-2024 12:00:05 +0000\")\r\n";

fn headers_response(tag: &str) -> String {
    format!(
        "* 1 FETCH (UID 10 BODY[HEADER] {})\r\n* 2 FETCH (UID 11 BODY[HEADER] {})\r\n{tag} OK FETCH completed\r\n",
        literal(MARCH_HEADER),
        literal(LUNCH_HEADER)
    )
}

#[test]
fn test_select_list_and_prefetch() {
    let responses = [
        "* 2 EXISTS\r\n* 0 RECENT\r\na2 OK [READ-WRITE] SELECT completed\r\n".to_string(),
        format!("{LISTING}a3 OK FETCH completed\r\n"),
        headers_response("a4"),
    ]
    .concat();
    let (mut store, sent) = login(&responses);

    let mut inbox = store.folder("INBOX").unwrap();
    inbox.open(FolderMode::ReadWrite).unwrap();
    assert!(inbox.is_selected());
    assert_eq!(store.selected().as_deref(), Some("INBOX"));

    let mut messages = inbox.messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].uid(), 10);
    assert_eq!(messages[0].sequence(), 1);
    assert_eq!(messages[0].size(), Some(120));
    assert!(messages[0].is_seen());
    assert!(!messages[1].is_seen());
    assert!(messages[1].received_date().unwrap().is_some());

    inbox
        .fetch(&mut messages, &FetchProfile::envelope())
        .unwrap();
    assert_eq!(messages[0].subject().unwrap(), "report march");
    assert_eq!(messages[1].subject().unwrap(), "lunch");
    assert_eq!(messages[1].from().unwrap()[0].email, "bob@example.com");

    let sent = transcript(&sent);
    assert!(sent.contains("a2 SELECT \"INBOX\"\r\n"));
    assert!(sent.contains("a3 FETCH 1:* (UID FLAGS RFC822.SIZE INTERNALDATE)\r\n"));
    assert!(sent.contains("a4 UID FETCH 10:11 (UID BODY.PEEK[HEADER])\r\n"));
}

#[test]
fn test_read_only_open_examines() {
    let (mut store, sent) = login("* 0 EXISTS\r\na2 OK [READ-ONLY] EXAMINE completed\r\n");

    let mut inbox = store.folder("INBOX").unwrap();
    inbox.open(FolderMode::ReadOnly).unwrap();
    assert!(inbox.messages().unwrap().is_empty());
    assert!(transcript(&sent).contains("a2 EXAMINE \"INBOX\"\r\n"));
}

#[test]
fn test_envelope_fetched_once_on_demand() {
    let responses = [
        "* 2 EXISTS\r\na2 OK SELECT completed\r\n".to_string(),
        format!("{LISTING}a3 OK FETCH completed\r\n"),
        format!(
            "* 2 FETCH (UID 11 BODY[HEADER] {})\r\na4 OK FETCH completed\r\n",
            literal(LUNCH_HEADER)
        ),
    ]
    .concat();
    let (mut store, sent) = login(&responses);

    let mut inbox = store.folder("INBOX").unwrap();
    inbox.open(FolderMode::ReadWrite).unwrap();
    let messages = inbox.messages().unwrap();

    assert_eq!(messages[1].subject().unwrap(), "lunch");
    assert_eq!(messages[1].subject().unwrap(), "lunch");
    assert_eq!(
        transcript(&sent).matches("BODY.PEEK[HEADER]").count(),
        1
    );
}

#[test]
fn test_target_folder_copy_and_delete() {
    let responses = [
        "* 2 EXISTS\r\na2 OK SELECT completed\r\n".to_string(),
        format!("{LISTING}a3 OK FETCH completed\r\n"),
        "a4 OK COPY completed\r\n".to_string(),
        "a5 OK STORE completed\r\n".to_string(),
        "a6 OK CLOSE completed\r\n".to_string(),
        "a7 OK LOGOUT completed\r\n".to_string(),
    ]
    .concat();
    let (mut store, sent) = login(&responses);

    let mut inbox = store.folder("INBOX").unwrap();
    inbox.open(FolderMode::ReadWrite).unwrap();
    let mut processed = store.folder("Processed").unwrap();
    processed.open(FolderMode::ReadWrite).unwrap();
    assert!(processed.is_open());
    assert!(!processed.is_selected());

    let messages = inbox.messages().unwrap();
    inbox
        .copy_messages(&[&messages[0], &messages[1]], &processed)
        .unwrap();
    inbox.set_deleted(&messages[0]).unwrap();

    processed.close().unwrap();
    inbox.close().unwrap();
    assert!(!inbox.is_open());
    assert_eq!(store.selected(), None);
    store.close().unwrap();
    assert!(!store.is_connected());

    let sent = transcript(&sent);
    assert!(sent.contains("a4 UID COPY 10:11 \"Processed\"\r\n"));
    assert!(sent.contains("a5 UID STORE 10 +FLAGS.SILENT (\\Deleted)\r\n"));
    assert!(sent.contains("a6 CLOSE\r\n"));
    assert!(sent.contains("a7 LOGOUT\r\n"));
    assert!(!sent.contains("SELECT \"Processed\""));
}

#[test]
fn test_folder_names_with_spaces_are_quoted() {
    let responses = [
        "* LIST (\\HasNoChildren) \"/\" \"Sent Items\"\r\na2 OK LIST completed\r\n".to_string(),
        "* 2 EXISTS\r\na3 OK SELECT completed\r\n".to_string(),
        format!("{LISTING}a4 OK FETCH completed\r\n"),
        "a5 OK COPY completed\r\n".to_string(),
    ]
    .concat();
    let (mut store, sent) = login(&responses);

    let mut sent_items = store.folder("Sent Items").unwrap();
    assert!(sent_items.exists().unwrap());

    let mut inbox = store.folder("INBOX").unwrap();
    inbox.open(FolderMode::ReadWrite).unwrap();
    let messages = inbox.messages().unwrap();
    inbox.copy_messages(&[&messages[0]], &sent_items).unwrap();

    let sent = transcript(&sent);
    assert!(sent.contains("a2 LIST \"\" \"Sent Items\"\r\n"));
    assert!(sent.contains("a5 UID COPY 10 \"Sent Items\"\r\n"));
}

#[test]
fn test_unselected_folder_rejects_listing() {
    let (mut store, sent) = login("");

    let mut folder = store.folder("Archive").unwrap();
    let err = folder.messages().unwrap_err();
    assert!(err.to_string().contains("Archive"));
    assert_eq!(transcript(&sent).lines().count(), 1);
}

#[test]
fn test_closed_store() {
    let (mut store, _sent) = login("a2 OK LOGOUT completed\r\n");

    let mut inbox = store.folder("INBOX").unwrap();
    store.close().unwrap();
    store.close().unwrap();

    assert!(store.folder("INBOX").is_err());
    assert!(inbox.exists().is_err());
}

struct ScriptedConnector {
    responses: String,
    sent: RefCell<Option<Sent>>,
}

impl StoreConnector for ScriptedConnector {
    type Store = ImapStore<MockStream>;

    fn open_store(&self, _store: &str) -> CoreResult<Self::Store> {
        let (store, sent) = login(&self.responses);
        *self.sent.borrow_mut() = Some(sent);
        Ok(store)
    }
}

#[test]
fn test_iterator_moves_and_expunges() {
    let responses = [
        "* LIST (\\HasNoChildren) \"/\" INBOX\r\na2 OK LIST completed\r\n".to_string(),
        "* STATUS INBOX (MESSAGES 2 RECENT 0 UNSEEN 1)\r\na3 OK STATUS completed\r\n".to_string(),
        "* 2 EXISTS\r\n* 0 RECENT\r\na4 OK [READ-WRITE] SELECT completed\r\n".to_string(),
        "* LIST (\\HasNoChildren) \"/\" Processed\r\na5 OK LIST completed\r\n".to_string(),
        "* STATUS Processed (MESSAGES 0 RECENT 0 UNSEEN 0)\r\na6 OK STATUS completed\r\n"
            .to_string(),
        format!("{LISTING}a7 OK FETCH completed\r\n"),
        headers_response("a8"),
        format!(
            "* 1 FETCH (UID 10 BODY[] {})\r\na9 OK FETCH completed\r\n",
            literal(MARCH_BODY)
        ),
        "+ Ready for literal data\r\na10 OK APPEND completed\r\n".to_string(),
        "a11 OK STORE completed\r\n".to_string(),
        "a12 OK CLOSE completed\r\n".to_string(),
        "a13 OK LOGOUT completed\r\n".to_string(),
    ]
    .concat();
    let connector = ScriptedConnector {
        responses,
        sent: RefCell::new(None),
    };

    let mut it = MessageIteratorBuilder::<ImapMessage<MockStream>>::new("work", "INBOX")
        .destination("Processed")
        .delete(true)
        .open(&connector)
        .unwrap();
    assert_eq!(it.len(), 2);

    let mut subjects = Vec::new();
    while it.has_next().unwrap() {
        let message = it.next().unwrap();
        let subject = message.subject().unwrap();
        let handled = subject.starts_with("report");
        subjects.push(subject);
        it.commit(handled, "Processed").unwrap();
    }
    assert_eq!(subjects, vec!["report march", "lunch"]);
    assert!(it.is_closed());

    let sent = transcript(connector.sent.borrow().as_ref().unwrap());
    assert!(sent.contains("a9 UID FETCH 10 (UID BODY.PEEK[])\r\n"));
    assert!(sent.contains("APPEND"));
    assert!(sent.contains(MARCH_BODY));
    assert!(sent.contains("a11 UID STORE 10 +FLAGS.SILENT (\\Deleted)\r\n"));
    assert!(sent.contains("a12 CLOSE\r\n"));
    assert!(sent.contains("a13 LOGOUT\r\n"));
    assert!(!sent.contains("UID STORE 11"));
}
