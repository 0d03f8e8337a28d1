//! Petrel Storage - persistence contracts
//!
//! Defines the data model and the `MailRepository` / `BlobStore` traits the
//! protocol engines are written against, plus the in-memory repository used
//! by the standalone server mode and the test suites. A durable backend
//! implements the same traits out of tree.

pub mod blob;
pub mod memory;
pub mod models;
pub mod repository;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use memory::MemoryRepository;
pub use models::{AppendOutcome, MailEntry, Mailbox, Recipient, StoredMessage, User};
pub use repository::MailRepository;
