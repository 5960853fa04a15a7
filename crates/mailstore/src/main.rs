//! `mailstore` - walk a remote folder and move what you handle
//!
//! Loads store settings from a JSON document, opens an IMAP store and runs
//! the move-on-handle iterator over one folder.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgEnum, Parser, Subcommand};
use mailstore_core::compare::{by_received_date, by_sent_date, by_subject, reversed};
use mailstore_core::predicate::{any_recipient_matches, from_matches, has_attachment, subject_matches};
use mailstore_core::{
    ContentWalker, FetchProfile, KeyringCredentialProvider, MailContext, MailMessage,
    MessageIteratorBuilder, MimeWalker, Predicate, Variables, save_message,
};
use mailstore_imap::{ImapConnector, ImapMessage};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    #[clap(short, long, env = "MAILSTORE_CONFIG")]
    /// Path to the JSON configuration document
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Iterates a folder, saving and moving every matching message
    Process(ProcessArgs),

    #[clap(subcommand)]
    /// Manages store passwords in the system keyring
    Password(PasswordCommand),
}

#[derive(clap::Args, Debug)]
struct ProcessArgs {
    /// Store name, as used in `mailstore.<store>.*` variables
    store: String,

    #[clap(short, long, default_value = "INBOX")]
    /// Folder to iterate
    source: String,

    #[clap(short = 't', long = "to")]
    /// Destination folder; repeat for several, the first one is the default
    destinations: Vec<String>,

    #[clap(long)]
    /// Regular expression the whole subject must match
    subject: Option<String>,

    #[clap(long)]
    /// Regular expression a sender address must match
    from: Option<String>,

    #[clap(long)]
    /// Regular expression any recipient address must match
    recipient: Option<String>,

    #[clap(long)]
    /// Only messages with at least one attachment
    attachments: bool,

    #[clap(long, arg_enum)]
    /// Sort key; server order when omitted
    sort: Option<SortKey>,

    #[clap(long, requires = "sort")]
    /// Reverse the sort order
    reverse: bool,

    #[clap(long)]
    /// Flag handled messages as deleted; they are expunged when the folder closes
    delete: bool,

    #[clap(long)]
    /// Prefetch complete messages instead of headers only
    full: bool,

    #[clap(short, long)]
    /// Directory to save handled messages into as `.eml` files
    output: Option<PathBuf>,

    #[clap(long)]
    /// Print each matching message as a JSON line
    json: bool,

    #[clap(long)]
    /// Read the password from the system keyring instead of the configuration
    keyring: bool,

    #[clap(long)]
    /// List matching messages without moving or deleting anything
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum PasswordCommand {
    /// Stores the password for a store
    Set {
        store: String,

        #[clap(env = "MAILSTORE_PASSWORD")]
        password: Option<String>,
    },
    /// Removes the password for a store
    Delete { store: String },
}

#[derive(ArgEnum, Clone, Copy, Debug)]
enum SortKey {
    Sent,
    Received,
    Subject,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailstore=info,mailstore_core=info,mailstore_imap=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Process(process_args) => {
            let variables = load_variables(args.config.as_deref())?;
            process(variables, &process_args)
        }
        Command::Password(PasswordCommand::Set { store, password }) => {
            let Some(password) = password else {
                bail!("No password given; pass it as an argument or set MAILSTORE_PASSWORD");
            };
            KeyringCredentialProvider::store_password(&store, &password)?;
            info!(store = %store, "Stored password in keyring");
            Ok(())
        }
        Command::Password(PasswordCommand::Delete { store }) => {
            KeyringCredentialProvider::delete_password(&store)?;
            info!(store = %store, "Removed password from keyring");
            Ok(())
        }
    }
}

fn load_variables(path: Option<&Path>) -> Result<Variables> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .context("No configuration directory on this platform")?
            .join("mailstore")
            .join("config.json"),
    };
    Variables::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn process(variables: Variables, args: &ProcessArgs) -> Result<()> {
    let mut context = MailContext::new(variables);
    if args.keyring {
        let provider = KeyringCredentialProvider::new(context.shared_variables());
        context.register_credential_provider(&args.store, Arc::new(provider));
    }

    if let Some(dir) = &args.output {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut builder = MessageIteratorBuilder::<ImapMessage>::new(&args.store, &args.source)
        .destinations(&args.destinations)
        .delete(args.delete && !args.dry_run)
        .fetch_profile(if args.full {
            FetchProfile::full()
        } else {
            FetchProfile::envelope()
        });
    if let Some(filter) = build_filter(args)? {
        builder = builder.filter(filter);
    }
    builder = match (args.sort, args.reverse) {
        (None, _) => builder,
        (Some(SortKey::Sent), false) => builder.sort_by(by_sent_date::<ImapMessage>()),
        (Some(SortKey::Sent), true) => builder.sort_by(reversed(by_sent_date::<ImapMessage>())),
        (Some(SortKey::Received), false) => builder.sort_by(by_received_date::<ImapMessage>()),
        (Some(SortKey::Received), true) => {
            builder.sort_by(reversed(by_received_date::<ImapMessage>()))
        }
        (Some(SortKey::Subject), false) => builder.sort_by(by_subject::<ImapMessage>()),
        (Some(SortKey::Subject), true) => builder.sort_by(reversed(by_subject::<ImapMessage>())),
    };

    let connector = ImapConnector::new(&context);
    let mut it = builder.open(&connector)?;
    info!(
        store = it.store_name(),
        folder = %args.source,
        messages = it.len(),
        moving_method = %it.moving_method(),
        "Processing folder"
    );

    let mut handled = 0usize;
    while it.has_next()? {
        let position = it.position() + 1;
        let message = it.next()?;
        let subject = message.subject()?;
        let parts = MimeWalker.all_parts(message, true, &|_| true)?;
        let attachments = parts.iter().filter(|p| p.is_attachment()).count();
        info!(
            position,
            uid = message.uid(),
            subject = %subject,
            attachments,
            "Matched message"
        );

        if args.json {
            let line = serde_json::json!({
                "uid": message.uid(),
                "subject": subject,
                "from": message.from()?.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "parts": parts,
            });
            println!("{line}");
        }

        if let Some(dir) = &args.output {
            let path = dir.join(format!("{position:04}-{}.eml", message.uid()));
            fs::write(&path, save_message(message)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        if args.dry_run {
            it.commit(false, "")?;
        } else {
            it.commit(true, "")?;
            handled += 1;
        }
    }

    if args.destinations.is_empty() && !args.delete && handled > 0 {
        warn!("No destination or delete flag given; handled messages stay in place");
    }
    info!(handled, "Done");
    Ok(())
}

fn build_filter(args: &ProcessArgs) -> Result<Option<Predicate<ImapMessage>>> {
    let mut predicates = Vec::new();
    if let Some(pattern) = &args.subject {
        predicates.push(subject_matches(pattern)?);
    }
    if let Some(pattern) = &args.from {
        predicates.push(from_matches(pattern)?);
    }
    if let Some(pattern) = &args.recipient {
        predicates.push(any_recipient_matches(pattern)?);
    }
    if args.attachments {
        predicates.push(has_attachment(true));
    }
    Ok(predicates.into_iter().reduce(Predicate::and))
}
