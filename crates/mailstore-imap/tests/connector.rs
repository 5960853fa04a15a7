//! Tests for opening stores over a real socket.
//!
//! A listener on the loopback interface plays a server that greets the
//! client and then refuses the login.

#![allow(clippy::unwrap_used)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use mailstore_core::{CredentialError, Error, MailContext, StoreConnector, Variables};
use mailstore_imap::ImapConnector;

/// Log output collected by the test subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn context(port: u16, password: Option<&str>) -> MailContext {
    let mut vars = Variables::new();
    vars.set("mailstore.work.protocol", "imap");
    vars.set("mailstore.work.host", "127.0.0.1");
    vars.set("mailstore.work.port", port.to_string());
    vars.set("mailstore.work.debug", "true");
    vars.set("mailstore.work.user", "ops@example.com");
    if let Some(password) = password {
        vars.set("mailstore.work.password", password);
    }
    MailContext::new(vars)
}

/// Accepts one client, greets it and rejects its login.
///
/// The handle yields the login line and the number of bytes read after the
/// rejection, once the client has closed its side.
fn rejecting_server(listener: TcpListener) -> JoinHandle<(String, usize)> {
    thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket.write_all(b"* OK IMAP4rev1 ready\r\n").unwrap();

        let mut reader = BufReader::new(socket.try_clone().unwrap());
        let mut login = String::new();
        reader.read_line(&mut login).unwrap();
        socket
            .write_all(b"a1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .unwrap();

        let mut rest = Vec::new();
        let trailing = reader.read_to_end(&mut rest).unwrap();
        (login, trailing)
    })
}

#[test]
fn test_rejected_login_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = rejecting_server(listener);

    let context = context(port, Some("hunter2"));
    let logs = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .finish();

    let result = tracing::subscriber::with_default(subscriber, || {
        ImapConnector::new(&context).open_store("work")
    });
    let Err(err) = result else {
        panic!("login should have been rejected");
    };
    match &err {
        Error::Connection { store, source } => {
            assert_eq!(store, "work");
            assert!(source.to_string().contains("Invalid credentials"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.to_string().contains("hunter2"));

    let (login, trailing) = server.join().unwrap();
    assert!(login.starts_with("a1 LOGIN "));
    assert!(login.contains("hunter2"));
    assert_eq!(trailing, 0);

    let logs = logs.text();
    assert!(logs.contains("S: * OK IMAP4rev1 ready"));
    assert!(logs.contains("C: a1 LOGIN <redacted>"));
    assert!(logs.contains("S: a1 NO [AUTHENTICATIONFAILED] Invalid credentials"));
    assert!(!logs.contains("hunter2"));
}

#[test]
fn test_missing_password_fails_before_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let context = context(port, None);
    let Err(err) = ImapConnector::new(&context).open_store("work") else {
        panic!("store without a password should not open");
    };
    assert!(matches!(
        err,
        Error::Credential(CredentialError::Missing { ref store, key: "password" }) if store == "work"
    ));

    listener.set_nonblocking(true).unwrap();
    assert_eq!(
        listener.accept().unwrap_err().kind(),
        io::ErrorKind::WouldBlock
    );
}
