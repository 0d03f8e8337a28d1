//! The persistence contract consumed by the protocol engines

use crate::models::{AppendOutcome, EntryId, MailEntry, Mailbox, MailboxId};
use async_trait::async_trait;
use petrel_common::types::MailFlags;
use petrel_common::Result;

/// Mail store backing both protocol engines.
///
/// Implementations are shared across connection tasks and must be internally
/// thread-safe. `next_uid` is the one operation with a cross-session ordering
/// obligation: the read-and-increment must be atomic per mailbox so that
/// concurrent APPEND/COPY/MOVE never hand out the same UID twice.
#[async_trait]
pub trait MailRepository: Send + Sync {
    // ---- accounts ----

    /// Verify a login against the stored hex SHA-256 digest
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool>;

    /// Whether an active account exists for the address
    async fn user_exists(&self, email: &str) -> Result<bool>;

    /// Whether the domain is served locally
    fn domain_is_local(&self, domain: &str) -> bool;

    /// Whether the remote IP may relay without authentication
    fn relay_allowed(&self, remote_ip: &str) -> bool;

    // ---- mailboxes ----

    async fn get_mailbox(&self, owner: &str, path: &str) -> Result<Option<Mailbox>>;

    async fn list_mailboxes(&self, owner: &str) -> Result<Vec<Mailbox>>;

    /// LIST-style lookup: `reference` + `pattern` with `*`/`%` wildcards
    /// matched against stored paths
    async fn list_mailboxes_matching(
        &self,
        owner: &str,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<Mailbox>>;

    async fn create_mailbox(&self, owner: &str, name: &str, path: &str) -> Result<Mailbox>;

    /// Create INBOX, Sent, Drafts, Trash and Junk for a new account
    async fn create_default_mailboxes(&self, owner: &str) -> Result<()>;

    async fn rename_mailbox(&self, owner: &str, old_path: &str, new_path: &str) -> Result<bool>;

    /// Returns false for INBOX and for nonexistent mailboxes
    async fn delete_mailbox(&self, owner: &str, path: &str) -> Result<bool>;

    /// Atomic per-mailbox read-and-increment of the UID counter
    async fn next_uid(&self, mailbox_id: MailboxId) -> Result<u32>;

    // ---- mail entries ----

    /// Live entries of a mailbox in UID-ascending order
    async fn mail_entries(&self, mailbox_id: MailboxId) -> Result<Vec<MailEntry>>;

    async fn entry_by_uid(&self, mailbox_id: MailboxId, uid: u32) -> Result<Option<MailEntry>>;

    async fn mail_count(&self, mailbox_id: MailboxId) -> Result<u32>;

    async fn unread_count(&self, mailbox_id: MailboxId) -> Result<u32>;

    async fn update_flags(&self, entry_id: EntryId, flags: MailFlags) -> Result<()>;

    async fn mark_read(&self, entry_id: EntryId, read: bool) -> Result<()>;

    /// Duplicate an entry into another mailbox with a fresh UID and a cleared
    /// `\Deleted` flag. Returns the new UID.
    async fn copy_mail(&self, src: MailboxId, uid: u32, dst: MailboxId) -> Result<Option<u32>>;

    /// COPY plus `\Deleted` on the source entry. Returns the new UID.
    async fn move_mail(&self, src: MailboxId, uid: u32, dst: MailboxId) -> Result<Option<u32>>;

    /// Remove every entry carrying `\Deleted`; returns the removed UIDs
    async fn expunge(&self, mailbox_id: MailboxId) -> Result<Vec<u32>>;

    /// Remove the given UIDs, still gated on `\Deleted`
    async fn expunge_uids(&self, mailbox_id: MailboxId, uids: &[u32]) -> Result<Vec<u32>>;

    // ---- search ----

    async fn search_by_subject(&self, mailbox_id: MailboxId, keyword: &str)
        -> Result<Vec<MailEntry>>;

    async fn search_by_from(&self, mailbox_id: MailboxId, keyword: &str) -> Result<Vec<MailEntry>>;

    // ---- message intake ----

    /// SMTP DATA completion: store the blob once, record message + envelope
    /// recipients, deliver to each local recipient's INBOX. Returns the
    /// Message-ID.
    async fn process_incoming(
        &self,
        raw: &[u8],
        sender: &str,
        recipients: &[String],
    ) -> Result<String>;

    /// IMAP APPEND: store into the named mailbox of the owner without
    /// re-delivering to INBOX
    async fn append_to_mailbox(
        &self,
        owner: &str,
        path: &str,
        raw: &[u8],
        flags: MailFlags,
    ) -> Result<AppendOutcome>;

    /// Raw bytes of a stored message
    async fn message_blob(&self, message_id: &str) -> Result<Option<Vec<u8>>>;
}
