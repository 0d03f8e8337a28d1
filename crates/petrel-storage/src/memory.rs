//! In-memory `MailRepository` implementation
//!
//! Backs the test suites and the standalone server mode. All state lives
//! behind one async mutex, which also serializes the per-mailbox UID counter
//! (the one cross-session ordering obligation of the contract).

use crate::blob::BlobStore;
use crate::models::{
    AppendOutcome, EntryId, MailEntry, Mailbox, MailboxId, Recipient, StoredMessage, User,
};
use crate::repository::MailRepository;
use async_trait::async_trait;
use chrono::Utc;
use mail_parser::MessageParser;
use petrel_common::types::{strip_angle_brackets, MailFlags};
use petrel_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_MAILBOXES: [&str; 5] = ["INBOX", "Sent", "Drafts", "Trash", "Junk"];

/// Hex-encoded SHA-256 of a password
pub fn sha256_hex(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// `INBOX` is a case-insensitive special name
fn canonical_path(path: &str) -> String {
    if path.eq_ignore_ascii_case("INBOX") {
        "INBOX".to_string()
    } else {
        path.to_string()
    }
}

/// IMAP LIST wildcard match: `*` and `%` both match any run of characters
/// against our flat stored paths.
fn wildcard_match(pattern: &str, path: &str) -> bool {
    fn inner(p: &[u8], s: &[u8]) -> bool {
        match p.split_first() {
            None => s.is_empty(),
            Some((b'*' | b'%', rest)) => {
                (0..=s.len()).any(|skip| inner(rest, &s[skip..]))
            }
            Some((c, rest)) => match s.split_first() {
                Some((sc, srest)) => c.eq_ignore_ascii_case(sc) && inner(rest, srest),
                None => false,
            },
        }
    }
    inner(pattern.as_bytes(), path.as_bytes())
}

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    mailboxes: HashMap<MailboxId, Mailbox>,
    messages: HashMap<String, StoredMessage>,
    recipients: HashSet<Recipient>,
    entries: Vec<MailEntry>,
}

impl State {
    fn mailbox_by_path(&self, owner: &str, path: &str) -> Option<&Mailbox> {
        let path = canonical_path(path);
        self.mailboxes
            .values()
            .find(|m| m.owner.eq_ignore_ascii_case(owner) && m.path == path)
    }

    fn entries_of(&self, mailbox_id: MailboxId) -> Vec<MailEntry> {
        let mut entries: Vec<MailEntry> = self
            .entries
            .iter()
            .filter(|e| e.mailbox_id == mailbox_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.uid);
        entries
    }

    fn take_uid(&mut self, mailbox_id: MailboxId) -> Result<u32> {
        let mailbox = self
            .mailboxes
            .get_mut(&mailbox_id)
            .ok_or_else(|| Error::NotFound(format!("mailbox {}", mailbox_id)))?;
        let uid = mailbox.next_uid;
        mailbox.next_uid += 1;
        Ok(uid)
    }

    fn adjust_counts(&mut self, mailbox_id: MailboxId, entries: i64, bytes: i64) {
        if let Some(mailbox) = self.mailboxes.get_mut(&mailbox_id) {
            mailbox.mail_count = (mailbox.mail_count as i64 + entries).max(0) as u32;
            mailbox.total_size = (mailbox.total_size as i64 + bytes).max(0) as u64;
        }
    }

    fn create_mailbox(&mut self, owner: &str, name: &str, path: &str) -> Mailbox {
        let path = canonical_path(path);
        if let Some(existing) = self.mailbox_by_path(owner, &path) {
            return existing.clone();
        }
        let mailbox = Mailbox {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.to_string(),
            path,
            next_uid: 1,
            uid_validity: Utc::now().timestamp() as u32,
            mail_count: 0,
            total_size: 0,
        };
        self.mailboxes.insert(mailbox.id, mailbox.clone());
        mailbox
    }
}

/// In-memory mail store
pub struct MemoryRepository {
    local_domain: String,
    relay_ips: Vec<String>,
    blobs: Arc<dyn BlobStore>,
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new(local_domain: &str, relay_ips: Vec<String>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            local_domain: local_domain.to_ascii_lowercase(),
            relay_ips,
            blobs,
            state: Mutex::new(State::default()),
        }
    }

    /// Seed an active account. Test and standalone-mode helper.
    pub async fn add_user(&self, email: &str, password: &str) {
        let mut state = self.state.lock().await;
        state.users.insert(
            email.to_ascii_lowercase(),
            User {
                email: email.to_string(),
                password_digest: sha256_hex(password),
                active: true,
            },
        );
    }

    /// Record a stored message for `raw`, reusing an existing record when the
    /// Message-ID was seen before. Returns the Message-ID.
    async fn intern_message(
        &self,
        state: &mut State,
        raw: &[u8],
        sender_fallback: &str,
        primary_recipient: &str,
    ) -> Result<String> {
        let parsed = MessageParser::default().parse(raw);

        let message_id = parsed
            .as_ref()
            .and_then(|m| m.message_id())
            .map(|id| format!("<{}>", id.trim_matches(['<', '>'])))
            .unwrap_or_else(|| format!("<{}@{}>", Uuid::new_v4(), self.local_domain));

        if !state.messages.contains_key(&message_id) {
            let subject = parsed
                .as_ref()
                .and_then(|m| m.subject())
                .unwrap_or("(No Subject)")
                .to_string();
            let sender = parsed
                .as_ref()
                .and_then(|m| m.from())
                .and_then(|a| a.first())
                .and_then(|a| a.address())
                .map(|a| a.to_string())
                .unwrap_or_else(|| sender_fallback.to_string());

            let blob_path = self.blobs.store(raw).await?;
            state.messages.insert(
                message_id.clone(),
                StoredMessage {
                    message_id: message_id.clone(),
                    subject,
                    sender,
                    send_date: Utc::now(),
                    primary_recipient: primary_recipient.to_string(),
                    blob_path,
                },
            );
        }

        Ok(message_id)
    }

    fn deliver(
        state: &mut State,
        mailbox_id: MailboxId,
        message_id: &str,
        size: u64,
        flags: MailFlags,
    ) -> Result<u32> {
        let uid = state.take_uid(mailbox_id)?;
        state.entries.push(MailEntry {
            id: Uuid::new_v4(),
            message_id: message_id.to_string(),
            mailbox_id,
            uid,
            received_at: Utc::now(),
            flags,
            size,
        });
        state.adjust_counts(mailbox_id, 1, size as i64);
        Ok(uid)
    }
}

#[async_trait]
impl MailRepository for MemoryRepository {
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let username = strip_angle_brackets(username).to_ascii_lowercase();
        let state = self.state.lock().await;
        let Some(user) = state.users.get(&username) else {
            debug!(user = %username, "authentication failed: unknown user");
            return Ok(false);
        };
        if !user.active {
            debug!(user = %username, "authentication failed: inactive user");
            return Ok(false);
        }
        Ok(user.password_digest.eq_ignore_ascii_case(&sha256_hex(password)))
    }

    async fn user_exists(&self, email: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .get(&email.to_ascii_lowercase())
            .map(|u| u.active)
            .unwrap_or(false))
    }

    fn domain_is_local(&self, domain: &str) -> bool {
        domain.eq_ignore_ascii_case(&self.local_domain)
    }

    fn relay_allowed(&self, remote_ip: &str) -> bool {
        self.relay_ips.iter().any(|ip| ip == remote_ip)
    }

    async fn get_mailbox(&self, owner: &str, path: &str) -> Result<Option<Mailbox>> {
        let state = self.state.lock().await;
        Ok(state.mailbox_by_path(owner, path).cloned())
    }

    async fn list_mailboxes(&self, owner: &str) -> Result<Vec<Mailbox>> {
        let state = self.state.lock().await;
        let mut mailboxes: Vec<Mailbox> = state
            .mailboxes
            .values()
            .filter(|m| m.owner.eq_ignore_ascii_case(owner))
            .cloned()
            .collect();
        mailboxes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(mailboxes)
    }

    async fn list_mailboxes_matching(
        &self,
        owner: &str,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<Mailbox>> {
        // Some clients use "." as the root reference; stored paths carry no
        // leading dot.
        let reference = if reference == "." { "" } else { reference };
        let full_pattern = format!("{}{}", reference, pattern);

        let state = self.state.lock().await;
        let mut mailboxes: Vec<Mailbox> = state
            .mailboxes
            .values()
            .filter(|m| m.owner.eq_ignore_ascii_case(owner))
            .filter(|m| wildcard_match(&full_pattern, &m.path))
            .cloned()
            .collect();
        mailboxes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(mailboxes)
    }

    async fn create_mailbox(&self, owner: &str, name: &str, path: &str) -> Result<Mailbox> {
        let mut state = self.state.lock().await;
        Ok(state.create_mailbox(owner, name, path))
    }

    async fn create_default_mailboxes(&self, owner: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        for name in DEFAULT_MAILBOXES {
            state.create_mailbox(owner, name, name);
        }
        info!(owner = %owner, "default mailboxes created");
        Ok(())
    }

    async fn rename_mailbox(&self, owner: &str, old_path: &str, new_path: &str) -> Result<bool> {
        if old_path.eq_ignore_ascii_case("INBOX") {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        let Some(id) = state.mailbox_by_path(owner, old_path).map(|m| m.id) else {
            return Ok(false);
        };
        let new_name = new_path.rsplit('.').next().unwrap_or(new_path).to_string();
        if let Some(mailbox) = state.mailboxes.get_mut(&id) {
            mailbox.path = new_path.to_string();
            mailbox.name = new_name;
        }
        Ok(true)
    }

    async fn delete_mailbox(&self, owner: &str, path: &str) -> Result<bool> {
        if path.eq_ignore_ascii_case("INBOX") {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        let Some(id) = state.mailbox_by_path(owner, path).map(|m| m.id) else {
            return Ok(false);
        };
        state.mailboxes.remove(&id);
        state.entries.retain(|e| e.mailbox_id != id);
        Ok(true)
    }

    async fn next_uid(&self, mailbox_id: MailboxId) -> Result<u32> {
        let mut state = self.state.lock().await;
        state.take_uid(mailbox_id)
    }

    async fn mail_entries(&self, mailbox_id: MailboxId) -> Result<Vec<MailEntry>> {
        let state = self.state.lock().await;
        Ok(state.entries_of(mailbox_id))
    }

    async fn entry_by_uid(&self, mailbox_id: MailboxId, uid: u32) -> Result<Option<MailEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .find(|e| e.mailbox_id == mailbox_id && e.uid == uid)
            .cloned())
    }

    async fn mail_count(&self, mailbox_id: MailboxId) -> Result<u32> {
        let state = self.state.lock().await;
        Ok(state.entries_of(mailbox_id).len() as u32)
    }

    async fn unread_count(&self, mailbox_id: MailboxId) -> Result<u32> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.mailbox_id == mailbox_id && !e.flags.seen)
            .count() as u32)
    }

    async fn update_flags(&self, entry_id: EntryId, flags: MailFlags) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == entry_id) {
            entry.flags = flags;
        }
        Ok(())
    }

    async fn mark_read(&self, entry_id: EntryId, read: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == entry_id) {
            entry.flags.seen = read;
        }
        Ok(())
    }

    async fn copy_mail(&self, src: MailboxId, uid: u32, dst: MailboxId) -> Result<Option<u32>> {
        let mut state = self.state.lock().await;
        let Some(source) = state
            .entries
            .iter()
            .find(|e| e.mailbox_id == src && e.uid == uid)
            .cloned()
        else {
            return Ok(None);
        };

        let new_uid = state.take_uid(dst)?;
        let mut flags = source.flags;
        flags.deleted = false;
        state.entries.push(MailEntry {
            id: Uuid::new_v4(),
            message_id: source.message_id.clone(),
            mailbox_id: dst,
            uid: new_uid,
            received_at: source.received_at,
            flags,
            size: source.size,
        });
        state.adjust_counts(dst, 1, source.size as i64);
        Ok(Some(new_uid))
    }

    async fn move_mail(&self, src: MailboxId, uid: u32, dst: MailboxId) -> Result<Option<u32>> {
        let new_uid = self.copy_mail(src, uid, dst).await?;
        if new_uid.is_some() {
            let mut state = self.state.lock().await;
            if let Some(entry) = state
                .entries
                .iter_mut()
                .find(|e| e.mailbox_id == src && e.uid == uid)
            {
                entry.flags.deleted = true;
            }
        }
        Ok(new_uid)
    }

    async fn expunge(&self, mailbox_id: MailboxId) -> Result<Vec<u32>> {
        let mut state = self.state.lock().await;
        let doomed: Vec<MailEntry> = state
            .entries_of(mailbox_id)
            .into_iter()
            .filter(|e| e.flags.deleted)
            .collect();

        let uids: Vec<u32> = doomed.iter().map(|e| e.uid).collect();
        for entry in &doomed {
            state.adjust_counts(mailbox_id, -1, -(entry.size as i64));
        }
        let gone: HashSet<EntryId> = doomed.iter().map(|e| e.id).collect();
        state.entries.retain(|e| !gone.contains(&e.id));
        Ok(uids)
    }

    async fn expunge_uids(&self, mailbox_id: MailboxId, uids: &[u32]) -> Result<Vec<u32>> {
        let mut state = self.state.lock().await;
        let mut expunged = Vec::new();
        for &uid in uids {
            let Some(entry) = state
                .entries
                .iter()
                .find(|e| e.mailbox_id == mailbox_id && e.uid == uid && e.flags.deleted)
                .cloned()
            else {
                continue;
            };
            state.adjust_counts(mailbox_id, -1, -(entry.size as i64));
            state.entries.retain(|e| e.id != entry.id);
            expunged.push(uid);
        }
        Ok(expunged)
    }

    async fn search_by_subject(
        &self,
        mailbox_id: MailboxId,
        keyword: &str,
    ) -> Result<Vec<MailEntry>> {
        let keyword = keyword.to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .entries_of(mailbox_id)
            .into_iter()
            .filter(|e| {
                state
                    .messages
                    .get(&e.message_id)
                    .map(|m| m.subject.to_lowercase().contains(&keyword))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn search_by_from(&self, mailbox_id: MailboxId, keyword: &str) -> Result<Vec<MailEntry>> {
        let keyword = keyword.to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .entries_of(mailbox_id)
            .into_iter()
            .filter(|e| {
                state
                    .messages
                    .get(&e.message_id)
                    .map(|m| m.sender.to_lowercase().contains(&keyword))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn process_incoming(
        &self,
        raw: &[u8],
        sender: &str,
        recipients: &[String],
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        let primary = recipients.first().cloned().unwrap_or_default();
        let message_id = self.intern_message(&mut state, raw, sender, &primary).await?;

        let unique: HashSet<String> = recipients
            .iter()
            .map(|r| r.to_ascii_lowercase())
            .collect();

        for rcpt in &unique {
            state.recipients.insert(Recipient {
                message_id: message_id.clone(),
                email: rcpt.clone(),
            });
        }

        for rcpt in &unique {
            let is_local_user = state
                .users
                .get(rcpt)
                .map(|u| u.active)
                .unwrap_or(false);
            if !is_local_user {
                continue;
            }
            let inbox_id = match state.mailbox_by_path(rcpt, "INBOX") {
                Some(inbox) => inbox.id,
                None => {
                    for name in DEFAULT_MAILBOXES {
                        state.create_mailbox(rcpt, name, name);
                    }
                    state
                        .mailbox_by_path(rcpt, "INBOX")
                        .map(|m| m.id)
                        .ok_or_else(|| Error::Storage("INBOX creation failed".into()))?
                }
            };
            Self::deliver(
                &mut state,
                inbox_id,
                &message_id,
                raw.len() as u64,
                MailFlags::default(),
            )?;
        }

        info!(message_id = %message_id, from = %sender, rcpts = recipients.len(), "mail processed");
        Ok(message_id)
    }

    async fn append_to_mailbox(
        &self,
        owner: &str,
        path: &str,
        raw: &[u8],
        flags: MailFlags,
    ) -> Result<AppendOutcome> {
        let mut state = self.state.lock().await;
        let message_id = self.intern_message(&mut state, raw, owner, owner).await?;

        let mailbox = state
            .mailbox_by_path(owner, path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("mailbox {}", path)))?;

        // APPEND-added messages default to read
        let mut flags = flags;
        flags.seen = true;
        let uid = Self::deliver(&mut state, mailbox.id, &message_id, raw.len() as u64, flags)?;

        info!(owner = %owner, mailbox = %mailbox.path, uid, "mail appended");
        Ok(AppendOutcome {
            message_id,
            uid_validity: mailbox.uid_validity,
            uid,
        })
    }

    async fn message_blob(&self, message_id: &str) -> Result<Option<Vec<u8>>> {
        let blob_path = {
            let state = self.state.lock().await;
            match state.messages.get(message_id) {
                Some(message) => message.blob_path.clone(),
                None => return Ok(None),
            }
        };
        Ok(Some(self.blobs.read(&blob_path).await?))
    }
}
