//! Petrel Core - SMTP and IMAP protocol engines
//!
//! The wire-protocol heart of the Petrel mail server: a line/literal stream
//! framer, TLS port personalities (plain, implicit, dual-mode detection),
//! MIME inspection for FETCH, and the two stateful command engines. The
//! engines talk to storage exclusively through the `petrel-storage` traits
//! and emit counter events through `events::EventSink`.

pub mod capability;
pub mod codec;
pub mod conn;
pub mod events;
pub mod imap;
pub mod mime;
pub mod smtp;
pub mod tls;

pub use conn::Conn;
pub use events::{EventSink, ImapEvent, LogOnlyQueue, NullEventSink, OutboundQueue, SmtpEvent};
pub use imap::{ImapHandler, ImapServer};
pub use smtp::{PortKind, SmtpHandler, SmtpServer};
pub use tls::{create_tls_acceptor, TlsMode};
