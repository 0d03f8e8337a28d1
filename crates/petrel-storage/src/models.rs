//! Storage data model

use chrono::{DateTime, Utc};
use petrel_common::types::MailFlags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for mailboxes
pub type MailboxId = Uuid;

/// Unique identifier for mail entries
pub type EntryId = Uuid;

/// Account record. Created out of band; read-only to the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    /// Hex-encoded SHA-256 digest of the password
    pub password_digest: String,
    pub active: bool,
}

/// A user's mailbox. `path` uses `.` as the hierarchy separator; `INBOX` is
/// canonicalized upper-case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub owner: String,
    pub name: String,
    pub path: String,
    /// Next UID to hand out; only ever grows
    pub next_uid: u32,
    /// Assigned at creation, never mutated
    pub uid_validity: u32,
    pub mail_count: u32,
    pub total_size: u64,
}

/// A stored message, shared between every mailbox entry that references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// RFC 5322 Message-ID (synthesized when the header is absent)
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub send_date: DateTime<Utc>,
    pub primary_recipient: String,
    /// Relative path of the raw bytes in the blob store
    pub blob_path: String,
}

/// A mailbox-scoped instance of a stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailEntry {
    pub id: EntryId,
    pub message_id: String,
    pub mailbox_id: MailboxId,
    /// Unique within the mailbox, never reused
    pub uid: u32,
    pub received_at: DateTime<Utc>,
    pub flags: MailFlags,
    pub size: u64,
}

/// Envelope recipient of a stored message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub message_id: String,
    pub email: String,
}

/// Result of an IMAP APPEND
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub message_id: String,
    pub uid_validity: u32,
    pub uid: u32,
}
