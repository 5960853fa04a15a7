//! # mailstore-imap
//!
//! IMAP backend for `mailstore-core`, built on the blocking `imap` client.
//!
//! ## Features
//!
//! - **Transport security**: implicit TLS, STARTTLS without plaintext
//!   fallback, or plain TCP, all over rustls
//! - **Authentication**: `LOGIN` or SASL `XOAUTH2`
//! - **Debug trace**: the connect and login exchange is captured and logged
//!   when the store's `debug` flag is set
//! - **Bulk prefetch**: headers and content for many messages in one
//!   `UID FETCH`, with per-message lazy loading as a fallback
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailstore_core::{MailContext, MessageIteratorBuilder, Variables};
//! use mailstore_imap::{ImapConnector, ImapMessage};
//!
//! let context = MailContext::new(Variables::from_file("config.json")?);
//! let connector = ImapConnector::new(&context);
//!
//! let mut it = MessageIteratorBuilder::<ImapMessage>::new("work", "INBOX")
//!     .destination("Processed")
//!     .delete(true)
//!     .open(&connector)?;
//!
//! while it.has_next()? {
//!     let message = it.next()?;
//!     println!("{}", message.subject()?);
//!     it.commit(true, "Processed")?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connector;
mod error;
pub mod message;
pub mod store;
pub mod stream;

pub use config::{AuthMechanism, ConnectionConfig, Security};
pub use connector::ImapConnector;
pub use error::{Error, Result};
pub use message::ImapMessage;
pub use store::{ImapFolder, ImapStore, sequence_set};
pub use stream::{ImapStream, Traced};
