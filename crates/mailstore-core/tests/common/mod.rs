//! In-memory mail server used by the iterator tests.
//!
//! Every store and folder handle shares one [`Server`] so tests can inspect
//! folder contents, the number of open resources and the order of server
//! side effects. Failures are injected by operation key, for example
//! `"append:Processed"`, `"close:INBOX"`, `"set_deleted"` or `"store:close"`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use mailstore_core::{
    Envelope, Error, FetchProfile, FolderMode, FolderStatus, MailFolder, MailMessage, MailStore,
    MimeMessage, MovingMethod, Result, StoreConnector,
};

#[derive(Default)]
struct State {
    folders: BTreeMap<String, Vec<Stored>>,
    open: usize,
    events: Vec<String>,
    failures: HashSet<String>,
    next_uid: u32,
    fetches: usize,
}

struct Stored {
    uid: u32,
    raw: Vec<u8>,
    deleted: bool,
}

/// Shared server state.
#[derive(Clone, Default)]
pub struct Server {
    state: Rc<RefCell<State>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty folder.
    pub fn create(&self, folder: &str) {
        self.state
            .borrow_mut()
            .folders
            .entry(folder.to_string())
            .or_default();
    }

    /// Appends a message built from a subject, sender and date.
    pub fn deliver(&self, folder: &str, subject: &str, from: &str, date: &str) -> u32 {
        let raw = format!(
            "From: {from}\r\nTo: ops@example.com\r\nSubject: {subject}\r\nDate: {date}\r\n\r\nbody of {subject}\r\n"
        );
        self.deliver_raw(folder, raw.into_bytes())
    }

    pub fn deliver_raw(&self, folder: &str, raw: Vec<u8>) -> u32 {
        let mut state = self.state.borrow_mut();
        state.next_uid += 1;
        let uid = state.next_uid;
        state
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(Stored {
                uid,
                raw,
                deleted: false,
            });
        uid
    }

    /// Makes the operation with this key fail from now on.
    pub fn fail(&self, key: &str) {
        self.state.borrow_mut().failures.insert(key.to_string());
    }

    /// Subjects of the messages in a folder, in server order.
    pub fn subjects(&self, folder: &str) -> Vec<String> {
        self.state
            .borrow()
            .folders
            .get(folder)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| MimeMessage::parse(m.raw.clone()).ok())
                    .filter_map(|m| m.subject().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// UIDs flagged as deleted but not yet expunged.
    pub fn flagged(&self, folder: &str) -> Vec<u32> {
        self.state
            .borrow()
            .folders
            .get(folder)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.deleted)
                    .map(|m| m.uid)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stores and folders currently open.
    pub fn open_resources(&self) -> usize {
        self.state.borrow().open
    }

    /// Number of bulk fetches served.
    pub fn fetches(&self) -> usize {
        self.state.borrow().fetches
    }

    /// Server side effects in order.
    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    /// Events starting with `prefix`.
    pub fn events_matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.state.borrow().failures.contains(key) {
            return Err(Error::store(format!("injected failure: {key}")));
        }
        Ok(())
    }

    fn event(&self, event: String) {
        self.state.borrow_mut().events.push(event);
    }
}

/// Connector handing out stores backed by a [`Server`].
pub struct MemoryConnector {
    pub server: Server,
    pub moving_method: MovingMethod,
}

impl MemoryConnector {
    pub fn new(server: &Server) -> Self {
        Self {
            server: server.clone(),
            moving_method: MovingMethod::Append,
        }
    }

    pub fn with_moving_method(mut self, method: MovingMethod) -> Self {
        self.moving_method = method;
        self
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    fn open_store(&self, _store: &str) -> Result<MemoryStore> {
        self.server.check("store:open")?;
        self.server.state.borrow_mut().open += 1;
        self.server.event("connect".to_string());
        Ok(MemoryStore {
            server: self.server.clone(),
            connected: true,
        })
    }

    fn moving_method(&self, _store: &str) -> Result<MovingMethod> {
        self.server.check("moving_method")?;
        Ok(self.moving_method)
    }
}

pub struct MemoryStore {
    server: Server,
    connected: bool,
}

impl MailStore for MemoryStore {
    type Folder = MemoryFolder;

    fn folder(&mut self, name: &str) -> Result<MemoryFolder> {
        Ok(MemoryFolder {
            server: self.server.clone(),
            name: name.to_string(),
            open: false,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.server.state.borrow_mut().open -= 1;
        self.server.event("logout".to_string());
        self.server.check("store:close")
    }
}

pub struct MemoryFolder {
    server: Server,
    name: String,
    open: bool,
}

impl MailFolder for MemoryFolder {
    type Message = MemoryMessage;

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&mut self) -> Result<bool> {
        Ok(self.server.state.borrow().folders.contains_key(&self.name))
    }

    fn status(&mut self) -> Result<FolderStatus> {
        let state = self.server.state.borrow();
        let messages = state.folders.get(&self.name).map_or(0, Vec::len);
        Ok(FolderStatus {
            messages: u32::try_from(messages).unwrap_or(u32::MAX),
            recent: 0,
            unseen: None,
        })
    }

    fn open(&mut self, _mode: FolderMode) -> Result<()> {
        self.server.check(&format!("open:{}", self.name))?;
        self.open = true;
        self.server.state.borrow_mut().open += 1;
        self.server.event(format!("open {}", self.name));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn messages(&mut self) -> Result<Vec<MemoryMessage>> {
        self.server.check("messages")?;
        let state = self.server.state.borrow();
        let mut messages = Vec::new();
        for stored in state.folders.get(&self.name).into_iter().flatten() {
            messages.push(MemoryMessage {
                uid: stored.uid,
                message: MimeMessage::parse(stored.raw.clone())?,
            });
        }
        Ok(messages)
    }

    fn fetch(&mut self, _messages: &mut [MemoryMessage], _profile: &FetchProfile) -> Result<()> {
        self.server.check("fetch")?;
        self.server.state.borrow_mut().fetches += 1;
        Ok(())
    }

    fn append_messages(&mut self, messages: &[&MemoryMessage]) -> Result<()> {
        self.server.check(&format!("append:{}", self.name))?;
        for message in messages {
            let raw = message.raw()?;
            self.server.deliver_raw(&self.name, raw);
            self.server
                .event(format!("append {} uid={}", self.name, message.uid));
        }
        Ok(())
    }

    fn copy_messages(&mut self, messages: &[&MemoryMessage], destination: &Self) -> Result<()> {
        self.server.check(&format!("copy:{}", destination.name))?;
        for message in messages {
            self.server
                .deliver_raw(&destination.name, message.message.as_bytes().to_vec());
            self.server.event(format!(
                "copy {}->{} uid={}",
                self.name, destination.name, message.uid
            ));
        }
        Ok(())
    }

    fn set_deleted(&mut self, message: &MemoryMessage) -> Result<()> {
        self.server.check("set_deleted")?;
        let mut state = self.server.state.borrow_mut();
        if let Some(stored) = state
            .folders
            .get_mut(&self.name)
            .and_then(|messages| messages.iter_mut().find(|m| m.uid == message.uid))
        {
            stored.deleted = true;
        }
        state
            .events
            .push(format!("delete {} uid={}", self.name, message.uid));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        {
            let mut state = self.server.state.borrow_mut();
            state.open -= 1;
            if let Some(messages) = state.folders.get_mut(&self.name) {
                messages.retain(|m| !m.deleted);
            }
            state.events.push(format!("close {}", self.name));
        }
        self.server.check(&format!("close:{}", self.name))
    }
}

/// A message held by a [`MemoryFolder`].
#[derive(Debug)]
pub struct MemoryMessage {
    pub uid: u32,
    message: MimeMessage,
}

impl MailMessage for MemoryMessage {
    fn envelope(&self) -> Result<&Envelope> {
        self.message.envelope()
    }

    fn raw(&self) -> Result<Vec<u8>> {
        self.message.raw()
    }
}
