//! SMTP engine (RFC 5321 server, submission and relay)

pub mod auth;
pub mod handler;
pub mod server;
pub mod session;

pub use handler::SmtpHandler;
pub use server::{PortKind, SmtpServer};
pub use session::{SmtpSession, SmtpState};
