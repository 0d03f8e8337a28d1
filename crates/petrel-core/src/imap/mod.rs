//! IMAP4rev1 engine

pub mod cache;
pub mod command;
pub mod fetch;
pub mod handler;
pub mod parser;
pub mod response;
pub mod server;
pub mod session;

pub use command::{Command, FetchItem, SearchKey, SequenceSet, StoreAction, TaggedCommand};
pub use handler::ImapHandler;
pub use server::ImapServer;
pub use session::{ImapSession, ImapState};
