//! IMAP session handler
//!
//! One handler per connection, strictly sequential: the framer yields one
//! line or literal at a time, and continuation-heavy commands (AUTHENTICATE
//! exchanges, APPEND literals, IDLE) read their follow-up input inline
//! instead of juggling session mode flags.

use super::cache::MailboxView;
use super::command::{Command, FetchItem, SearchKey, SequenceSet, StoreAction, StoreOp};
use super::fetch::{needs_raw, render_fetch};
use super::parser::ImapParser;
use super::response::ImapResponse;
use super::session::{ImapSession, ImapState};
use crate::capability::imap_capabilities;
use crate::codec::FrameReader;
use crate::conn::Conn;
use crate::events::{EventSink, ImapEvent};
use crate::smtp::auth::{decode_auth_plain, decode_base64_line};
use anyhow::Result;
use petrel_common::config::Config;
use petrel_common::types::{strip_angle_brackets, MailFlags};
use petrel_common::Error;
use petrel_storage::{MailEntry, MailRepository};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Per-connection IMAP command processor
pub struct ImapHandler {
    config: Config,
    repo: Arc<dyn MailRepository>,
    events: Arc<dyn EventSink>,
    tls_acceptor: Option<TlsAcceptor>,
    remote_ip: String,
}

impl ImapHandler {
    pub fn new(
        config: Config,
        repo: Arc<dyn MailRepository>,
        events: Arc<dyn EventSink>,
        tls_acceptor: Option<TlsAcceptor>,
        remote_ip: String,
    ) -> Self {
        Self {
            config,
            repo,
            events,
            tls_acceptor,
            remote_ip,
        }
    }

    /// Drive one IMAP session to completion
    pub async fn run<S>(self, mut conn: Conn<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let hostname = self.config.server.advertised_hostname();
        let mut session = ImapSession::new(self.remote_ip.clone(), conn.is_tls());
        let mut reader = FrameReader::new(self.config.imap.max_line_length);
        let timeout = Duration::from_secs(self.config.imap.timeout_secs);

        self.send(
            &mut conn,
            &ImapResponse::greeting(&imap_capabilities(session.tls_active), &hostname),
        )
        .await?;

        loop {
            let line = match tokio::time::timeout(timeout, reader.read_line(&mut conn)).await {
                Err(_) => {
                    info!(ip = %session.remote_ip, "IMAP session timed out");
                    self.send(&mut conn, &ImapResponse::bye("Connection timeout"))
                        .await
                        .ok();
                    break;
                }
                Ok(Ok(None)) => {
                    debug!(ip = %session.remote_ip, "client disconnected");
                    break;
                }
                Ok(Ok(Some(line))) => line,
                Ok(Err(e)) => {
                    warn!(ip = %session.remote_ip, error = %e, "IMAP framing error");
                    break;
                }
            };

            debug!(ip = %session.remote_ip, line = %line.trim(), "IMAP <<");

            let Some(parsed) = ImapParser::parse(&line) else {
                self.send(&mut conn, "* BAD Invalid command format\r\n").await?;
                continue;
            };
            let tag = parsed.tag;

            match parsed.command {
                Command::StartTls => {
                    match self
                        .handle_starttls(conn, &tag, &mut session, &mut reader)
                        .await?
                    {
                        Some(upgraded) => conn = upgraded,
                        None => {
                            info!(ip = %self.remote_ip, "IMAP connection closed");
                            return Ok(());
                        }
                    }
                }
                command => {
                    self.dispatch(&mut conn, &mut reader, &mut session, &tag, command)
                        .await?;
                }
            }

            if session.state == ImapState::Logout {
                break;
            }
        }

        info!(ip = %self.remote_ip, "IMAP connection closed");
        conn.shutdown().await.ok();
        Ok(())
    }

    async fn dispatch<S>(
        &self,
        conn: &mut Conn<S>,
        reader: &mut FrameReader,
        session: &mut ImapSession,
        tag: &str,
        command: Command,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match command {
            Command::Capability => {
                let response = format!(
                    "{}{}",
                    ImapResponse::capability(&imap_capabilities(session.tls_active)),
                    ImapResponse::ok(tag, "CAPABILITY completed")
                );
                self.send(conn, &response).await
            }
            Command::Noop => self.handle_noop(conn, session, tag).await,
            Command::Logout => {
                session.state = ImapState::Logout;
                let hostname = self.config.server.advertised_hostname();
                let response = format!(
                    "{}{}",
                    ImapResponse::bye(&format!("{} IMAP server shutting down connection", hostname)),
                    ImapResponse::ok(tag, "LOGOUT completed")
                );
                self.send(conn, &response).await
            }
            Command::Id => {
                let response = format!(
                    "{}{}",
                    ImapResponse::id(),
                    ImapResponse::ok(tag, "ID completed")
                );
                self.send(conn, &response).await
            }
            Command::Enable => {
                if self.authed_user(session).is_none() {
                    return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
                }
                // accepted but nothing is actually enabled
                let response = format!(
                    "{}{}",
                    ImapResponse::enabled(),
                    ImapResponse::ok(tag, "ENABLE completed")
                );
                self.send(conn, &response).await
            }
            Command::Namespace => {
                let response = format!(
                    "{}{}",
                    ImapResponse::namespace(),
                    ImapResponse::ok(tag, "NAMESPACE completed")
                );
                self.send(conn, &response).await
            }

            Command::Login { username, password } => {
                self.handle_login(conn, session, tag, &username, &password).await
            }
            Command::Authenticate { mechanism, initial } => {
                self.handle_authenticate(conn, reader, session, tag, &mechanism, initial)
                    .await
            }

            Command::Select { mailbox } => {
                self.handle_select(conn, session, tag, &mailbox, false).await
            }
            Command::Examine { mailbox } => {
                self.handle_select(conn, session, tag, &mailbox, true).await
            }
            Command::Create { mailbox } => self.handle_create(conn, session, tag, &mailbox).await,
            Command::Delete { mailbox } => self.handle_delete(conn, session, tag, &mailbox).await,
            Command::Rename { from, to } => {
                self.handle_rename(conn, session, tag, &from, &to).await
            }
            Command::Subscribe { .. } => {
                if self.authed_user(session).is_none() {
                    return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
                }
                // subscriptions are not persisted
                self.send(conn, &ImapResponse::ok(tag, "SUBSCRIBE completed")).await
            }
            Command::Unsubscribe { .. } => {
                if self.authed_user(session).is_none() {
                    return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
                }
                self.send(conn, &ImapResponse::ok(tag, "UNSUBSCRIBE completed")).await
            }
            Command::List {
                reference,
                pattern,
                special_use_only,
            } => {
                self.handle_list(conn, session, tag, "LIST", &reference, &pattern, special_use_only)
                    .await
            }
            Command::Lsub { reference, pattern } => {
                // LSUB answers as LIST; subscription filtering is not implemented
                self.handle_list(conn, session, tag, "LSUB", &reference, &pattern, false)
                    .await
            }
            Command::Status { mailbox, items } => {
                self.handle_status(conn, session, tag, &mailbox, &items).await
            }
            Command::Append {
                mailbox,
                flags,
                date: _,
                literal_len,
                literal_plus,
            } => {
                self.handle_append(conn, reader, session, tag, &mailbox, &flags, literal_len, literal_plus)
                    .await
            }

            Command::Check => {
                if self.selected_or_no(conn, session, tag).await? {
                    self.send(conn, &ImapResponse::ok(tag, "CHECK completed")).await?;
                }
                Ok(())
            }
            Command::Fetch { set, items, uid } => {
                self.handle_fetch(conn, session, tag, &set, &items, uid).await
            }
            Command::Store { set, action, uid } => {
                self.handle_store(conn, session, tag, &set, &action, uid).await
            }
            Command::Search { set, keys, uid } => {
                self.handle_search(conn, session, tag, set, &keys, uid).await
            }
            Command::Copy { set, mailbox, uid } => {
                self.handle_copy(conn, session, tag, &set, &mailbox, uid).await
            }
            Command::Move { set, mailbox, uid } => {
                self.handle_move(conn, session, tag, &set, &mailbox, uid).await
            }
            Command::Expunge { uid_set } => {
                self.handle_expunge(conn, session, tag, uid_set).await
            }
            Command::Close => self.handle_close(conn, session, tag).await,
            Command::Unselect => {
                if self.selected_or_no(conn, session, tag).await? {
                    session.close_mailbox();
                    self.send(conn, &ImapResponse::ok(tag, "UNSELECT completed")).await?;
                }
                Ok(())
            }
            Command::Idle => self.handle_idle(conn, reader, session, tag).await,

            // STARTTLS swaps the stream and is handled by the session loop
            Command::StartTls => Ok(()),
            Command::Invalid(message) => self.send(conn, &ImapResponse::bad(tag, &message)).await,
            Command::Unknown(verb) => {
                self.send(conn, &ImapResponse::bad(tag, &format!("Unknown command: {}", verb)))
                    .await
            }
        }
    }

    // ================================================================
    // Connection-level commands
    // ================================================================

    async fn handle_starttls<S>(
        &self,
        mut conn: Conn<S>,
        tag: &str,
        session: &mut ImapSession,
        reader: &mut FrameReader,
    ) -> Result<Option<Conn<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(acceptor) = self.tls_acceptor.clone() else {
            self.send(&mut conn, &ImapResponse::no(tag, "TLS not available")).await?;
            return Ok(Some(conn));
        };
        if session.tls_active {
            self.send(&mut conn, &ImapResponse::bad(tag, "TLS already active")).await?;
            return Ok(Some(conn));
        }

        self.send(&mut conn, &ImapResponse::ok(tag, "Begin TLS negotiation now"))
            .await?;

        match conn {
            Conn::Plain(stream) => match acceptor.accept(stream).await {
                Ok(tls) => {
                    reader.reset();
                    session.reset_after_tls();
                    info!(ip = %session.remote_ip, "IMAP STARTTLS handshake completed");
                    Ok(Some(Conn::Tls(Box::new(tls))))
                }
                Err(e) => {
                    warn!(ip = %session.remote_ip, error = %e, "IMAP STARTTLS handshake failed");
                    Ok(None)
                }
            },
            tls => Ok(Some(tls)),
        }
    }

    async fn handle_noop<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state == ImapState::Selected {
            if let Some(sel) = session.selected.as_mut() {
                let entries = self.repo.mail_entries(sel.mailbox.id).await?;
                if entries.len() != sel.view.len() {
                    self.send(conn, &ImapResponse::exists(entries.len() as u32)).await?;
                }
                sel.view = MailboxView::new(entries);
            }
        }
        self.send(conn, &ImapResponse::ok(tag, "NOOP completed")).await
    }

    // ================================================================
    // Authentication
    // ================================================================

    async fn handle_login<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        username: &str,
        password: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state != ImapState::NotAuthenticated {
            return self.send(conn, &ImapResponse::bad(tag, "Already authenticated")).await;
        }

        let username = strip_angle_brackets(username);
        if self.repo.authenticate(username, password).await? {
            self.finish_authentication(session, username).await?;
            info!(user = %username, "IMAP login success");
            let message = format!(
                "[CAPABILITY {}] LOGIN completed",
                imap_capabilities(session.tls_active)
            );
            self.send(conn, &ImapResponse::ok(tag, &message)).await
        } else {
            self.events.imap_event(ImapEvent::AuthFailure);
            self.send(
                conn,
                &ImapResponse::no(tag, "[AUTHENTICATIONFAILED] Invalid credentials"),
            )
            .await
        }
    }

    async fn handle_authenticate<S>(
        &self,
        conn: &mut Conn<S>,
        reader: &mut FrameReader,
        session: &mut ImapSession,
        tag: &str,
        mechanism: &str,
        initial: Option<String>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state != ImapState::NotAuthenticated {
            return self.send(conn, &ImapResponse::bad(tag, "Already authenticated")).await;
        }

        match mechanism {
            "PLAIN" => {
                let material = match initial {
                    Some(material) => material,
                    None => {
                        self.send(conn, &ImapResponse::continue_req("")).await?;
                        match reader.read_line(conn).await? {
                            Some(line) => line.trim().to_string(),
                            None => return Ok(()),
                        }
                    }
                };
                if material == "*" {
                    return self.send(conn, &ImapResponse::no(tag, "AUTHENTICATE cancelled")).await;
                }

                match decode_auth_plain(&material) {
                    Some((username, password))
                        if self.repo.authenticate(&username, &password).await? =>
                    {
                        let username = strip_angle_brackets(&username).to_string();
                        self.finish_authentication(session, &username).await?;
                        info!(user = %username, "IMAP authenticate (PLAIN) success");
                        self.send(conn, &ImapResponse::ok(tag, "AUTHENTICATE completed")).await
                    }
                    _ => {
                        self.events.imap_event(ImapEvent::AuthFailure);
                        self.send(
                            conn,
                            &ImapResponse::no(tag, "[AUTHENTICATIONFAILED] Invalid credentials"),
                        )
                        .await
                    }
                }
            }
            "LOGIN" => {
                self.send(conn, &ImapResponse::continue_req("VXNlcm5hbWU6")).await?;
                let Some(username_line) = reader.read_line(conn).await? else {
                    return Ok(());
                };
                if username_line.trim() == "*" {
                    return self.send(conn, &ImapResponse::no(tag, "AUTHENTICATE cancelled")).await;
                }

                self.send(conn, &ImapResponse::continue_req("UGFzc3dvcmQ6")).await?;
                let Some(password_line) = reader.read_line(conn).await? else {
                    return Ok(());
                };
                if password_line.trim() == "*" {
                    return self.send(conn, &ImapResponse::no(tag, "AUTHENTICATE cancelled")).await;
                }

                let username = decode_base64_line(&username_line);
                let password = decode_base64_line(&password_line);
                match (username, password) {
                    (Some(username), Some(password))
                        if self.repo.authenticate(&username, &password).await? =>
                    {
                        let username = strip_angle_brackets(&username).to_string();
                        self.finish_authentication(session, &username).await?;
                        info!(user = %username, "IMAP authenticate (LOGIN) success");
                        self.send(conn, &ImapResponse::ok(tag, "AUTHENTICATE completed")).await
                    }
                    _ => {
                        self.events.imap_event(ImapEvent::AuthFailure);
                        self.send(
                            conn,
                            &ImapResponse::no(tag, "[AUTHENTICATIONFAILED] Invalid credentials"),
                        )
                        .await
                    }
                }
            }
            _ => {
                self.send(conn, &ImapResponse::no(tag, "Unsupported authentication mechanism"))
                    .await
            }
        }
    }

    async fn finish_authentication(&self, session: &mut ImapSession, username: &str) -> Result<()> {
        if self.repo.list_mailboxes(username).await?.is_empty() {
            self.repo.create_default_mailboxes(username).await?;
        }
        session.authenticate(username.to_string());
        self.events.imap_event(ImapEvent::Login);
        Ok(())
    }

    // ================================================================
    // Mailbox commands
    // ================================================================

    async fn handle_select<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        mailbox_name: &str,
        read_only: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };

        let Some(mailbox) = self.repo.get_mailbox(&user, mailbox_name).await? else {
            return self
                .send(
                    conn,
                    &ImapResponse::no(
                        tag,
                        &format!("[NONEXISTENT] Mailbox does not exist: {}", mailbox_name),
                    ),
                )
                .await;
        };

        let entries = self.repo.mail_entries(mailbox.id).await?;
        let view = MailboxView::new(entries);

        let mut response = String::new();
        response.push_str(&ImapResponse::flags_line());
        response.push_str(&ImapResponse::permanent_flags_line());
        response.push_str(&ImapResponse::exists(view.len() as u32));
        response.push_str(&ImapResponse::recent(0));
        if let Some(first_unseen) = view.first_unseen_seq() {
            response.push_str(&ImapResponse::unseen(first_unseen));
        }
        response.push_str(&ImapResponse::uid_validity(mailbox.uid_validity));
        response.push_str(&ImapResponse::uid_next(mailbox.next_uid));
        response.push_str(&ImapResponse::ok(
            tag,
            &format!(
                "[{}] {} completed",
                if read_only { "READ-ONLY" } else { "READ-WRITE" },
                if read_only { "EXAMINE" } else { "SELECT" }
            ),
        ));

        session.select(mailbox, read_only, view);
        self.send(conn, &response).await
    }

    async fn handle_create<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        mailbox_name: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };
        let path = mailbox_name.replace('/', ".");
        self.repo.create_mailbox(&user, mailbox_name, &path).await?;
        self.send(conn, &ImapResponse::ok(tag, "CREATE completed")).await
    }

    async fn handle_delete<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        mailbox_name: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };
        if self.repo.delete_mailbox(&user, mailbox_name).await? {
            self.send(conn, &ImapResponse::ok(tag, "DELETE completed")).await
        } else {
            self.send(conn, &ImapResponse::no(tag, "Cannot delete mailbox")).await
        }
    }

    async fn handle_rename<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        from: &str,
        to: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };
        if self.repo.rename_mailbox(&user, from, to).await? {
            self.send(conn, &ImapResponse::ok(tag, "RENAME completed")).await
        } else {
            self.send(conn, &ImapResponse::no(tag, "Cannot rename mailbox")).await
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_list<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        kind: &str,
        reference: &str,
        pattern: &str,
        special_use_only: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };

        let completed = format!("{} completed", kind);

        // empty pattern: hierarchy delimiter query
        if pattern.is_empty() {
            let response = format!(
                "{}{}",
                ImapResponse::list_delimiter_query(kind),
                ImapResponse::ok(tag, &completed)
            );
            return self.send(conn, &response).await;
        }

        let mailboxes = self
            .repo
            .list_mailboxes_matching(&user, reference, pattern)
            .await?;

        let mut response = String::new();
        for mailbox in mailboxes {
            let special_use = special_use_attr(&mailbox.path);
            if special_use_only && special_use.is_none() {
                continue;
            }
            let attributes = match special_use {
                Some(attr) => format!("\\HasNoChildren {}", attr),
                None => "\\HasNoChildren".to_string(),
            };
            response.push_str(&ImapResponse::list_line(kind, &attributes, &mailbox.path));
        }
        response.push_str(&ImapResponse::ok(tag, &completed));
        self.send(conn, &response).await
    }

    async fn handle_status<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        mailbox_name: &str,
        items: &[String],
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };

        let Some(mailbox) = self.repo.get_mailbox(&user, mailbox_name).await? else {
            return self
                .send(conn, &ImapResponse::no(tag, "[NONEXISTENT] Mailbox does not exist"))
                .await;
        };

        let mut rendered: Vec<(&str, u32)> = Vec::new();
        for item in items {
            match item.as_str() {
                "MESSAGES" => rendered.push(("MESSAGES", self.repo.mail_count(mailbox.id).await?)),
                "UNSEEN" => rendered.push(("UNSEEN", self.repo.unread_count(mailbox.id).await?)),
                "UIDNEXT" => rendered.push(("UIDNEXT", mailbox.next_uid)),
                "UIDVALIDITY" => rendered.push(("UIDVALIDITY", mailbox.uid_validity)),
                "RECENT" => rendered.push(("RECENT", 0)),
                _ => {}
            }
        }

        let response = format!(
            "{}{}",
            ImapResponse::status(mailbox_name, &rendered),
            ImapResponse::ok(tag, "STATUS completed")
        );
        self.send(conn, &response).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_append<S>(
        &self,
        conn: &mut Conn<S>,
        reader: &mut FrameReader,
        session: &mut ImapSession,
        tag: &str,
        mailbox_name: &str,
        flag_tokens: &[String],
        literal_len: usize,
        literal_plus: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(user) = self.authed_user(session) else {
            return self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await;
        };

        if literal_len > self.config.smtp.max_message_size {
            // the stream would desynchronize if the literal were left unread
            warn!(ip = %session.remote_ip, literal_len, "APPEND literal exceeds maximum, closing");
            self.send(conn, &ImapResponse::no(tag, "APPEND literal too large")).await?;
            session.state = ImapState::Logout;
            return Ok(());
        }

        // LITERAL+ clients stream the data without waiting for us
        if !literal_plus {
            self.send(conn, &ImapResponse::continue_req("Ready for literal data"))
                .await?;
        }
        let data = reader.read_literal(conn, literal_len).await?;

        let flags = MailFlags::from_tokens(flag_tokens.iter().map(String::as_str));
        match self.repo.append_to_mailbox(&user, mailbox_name, &data, flags).await {
            Ok(outcome) => {
                let message = format!(
                    "[APPENDUID {} {}] APPEND completed",
                    outcome.uid_validity, outcome.uid
                );
                self.send(conn, &ImapResponse::ok(tag, &message)).await
            }
            Err(Error::NotFound(_)) => {
                self.send(conn, &ImapResponse::no(tag, "[TRYCREATE] Mailbox does not exist"))
                    .await
            }
            Err(e) => {
                warn!(error = %e, mailbox = %mailbox_name, "APPEND failed");
                self.send(conn, &ImapResponse::no(tag, "APPEND failed")).await
            }
        }
    }

    // ================================================================
    // Selected-state commands
    // ================================================================

    async fn handle_fetch<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        set: &SequenceSet,
        items: &[FetchItem],
        uid_mode: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let Some(sel) = session.selected.as_mut() else {
            return Ok(());
        };

        let entries = sel.view.resolve(set, uid_mode);
        let load_raw = needs_raw(items);

        for entry in entries {
            let Some(seq) = sel.view.seq_of_uid(entry.uid) else {
                continue;
            };
            let raw = if load_raw {
                self.repo.message_blob(&entry.message_id).await?
            } else {
                None
            };

            let (response, set_seen) = render_fetch(&entry, seq, items, uid_mode, raw.as_deref());
            self.send_bytes(conn, &response).await?;

            if set_seen && !entry.flags.seen {
                self.repo.mark_read(entry.id, true).await?;
                let mut flags = entry.flags;
                flags.seen = true;
                sel.view.set_flags(entry.uid, flags);
            }
        }

        self.send(conn, &ImapResponse::ok(tag, "FETCH completed")).await
    }

    async fn handle_store<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        set: &SequenceSet,
        action: &StoreAction,
        uid_mode: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let Some(sel) = session.selected.as_mut() else {
            return Ok(());
        };
        if sel.read_only {
            return self.send(conn, &ImapResponse::no(tag, "Mailbox is read-only")).await;
        }

        let entries = sel.view.resolve(set, uid_mode);
        for entry in entries {
            let flags = apply_store(entry.flags, action);
            self.repo.update_flags(entry.id, flags).await?;
            sel.view.set_flags(entry.uid, flags);

            if !action.silent {
                if let Some(seq) = sel.view.seq_of_uid(entry.uid) {
                    let uid = uid_mode.then_some(entry.uid);
                    self.send(conn, &ImapResponse::fetch_flags(seq, uid, flags)).await?;
                }
            }
        }

        self.send(conn, &ImapResponse::ok(tag, "STORE completed")).await
    }

    async fn handle_search<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        set: Option<SequenceSet>,
        keys: &[SearchKey],
        uid_mode: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let Some(sel) = session.selected.as_mut() else {
            return Ok(());
        };

        let mut results: Vec<MailEntry> = match &set {
            Some(set) => sel.view.resolve(set, uid_mode),
            None => sel.view.entries().to_vec(),
        };

        for key in keys {
            match key {
                SearchKey::All => {}
                SearchKey::Deleted => results.retain(|e| e.flags.deleted),
                SearchKey::NotDeleted => results.retain(|e| !e.flags.deleted),
                SearchKey::Seen => results.retain(|e| e.flags.seen),
                SearchKey::NotSeen => results.retain(|e| !e.flags.seen),
                SearchKey::Flagged => results.retain(|e| e.flags.flagged),
                SearchKey::NotFlagged => results.retain(|e| !e.flags.flagged),
                SearchKey::Answered => results.retain(|e| e.flags.answered),
                SearchKey::NotAnswered => results.retain(|e| !e.flags.answered),
                SearchKey::Draft => results.retain(|e| e.flags.draft),
                SearchKey::NotDraft => results.retain(|e| !e.flags.draft),
                SearchKey::Subject(keyword) => {
                    let matches = self.repo.search_by_subject(sel.mailbox.id, keyword).await?;
                    let allowed: HashSet<u32> = matches.iter().map(|e| e.uid).collect();
                    results.retain(|e| allowed.contains(&e.uid));
                }
                SearchKey::From(keyword) => {
                    let matches = self.repo.search_by_from(sel.mailbox.id, keyword).await?;
                    let allowed: HashSet<u32> = matches.iter().map(|e| e.uid).collect();
                    results.retain(|e| allowed.contains(&e.uid));
                }
            }
        }

        let ids: Vec<u32> = if uid_mode {
            results.iter().map(|e| e.uid).collect()
        } else {
            results
                .iter()
                .filter_map(|e| sel.view.seq_of_uid(e.uid))
                .collect()
        };

        let response = format!(
            "{}{}",
            ImapResponse::search(&ids),
            ImapResponse::ok(tag, "SEARCH completed")
        );
        self.send(conn, &response).await
    }

    async fn handle_copy<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        set: &SequenceSet,
        target_name: &str,
        uid_mode: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let user = session.username.clone().unwrap_or_default();

        let Some(target) = self.repo.get_mailbox(&user, target_name).await? else {
            return self
                .send(conn, &ImapResponse::no(tag, "[TRYCREATE] Target mailbox does not exist"))
                .await;
        };

        let Some(sel) = session.selected.as_ref() else {
            return Ok(());
        };
        let entries = sel.view.resolve(set, uid_mode);
        for entry in &entries {
            self.repo.copy_mail(sel.mailbox.id, entry.uid, target.id).await?;
        }

        self.send(conn, &ImapResponse::ok(tag, "COPY completed")).await
    }

    async fn handle_move<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        set: &SequenceSet,
        target_name: &str,
        uid_mode: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let user = session.username.clone().unwrap_or_default();
        if session.selected.as_ref().map(|s| s.read_only).unwrap_or(true) {
            return self.send(conn, &ImapResponse::no(tag, "Mailbox is read-only")).await;
        }

        let Some(target) = self.repo.get_mailbox(&user, target_name).await? else {
            return self
                .send(conn, &ImapResponse::no(tag, "[TRYCREATE] Target mailbox does not exist"))
                .await;
        };

        let Some(sel) = session.selected.as_mut() else {
            return Ok(());
        };
        let source_id = sel.mailbox.id;
        let moved_uids: Vec<u32> = sel
            .view
            .resolve(set, uid_mode)
            .iter()
            .map(|e| e.uid)
            .collect();

        for &uid in &moved_uids {
            self.repo.move_mail(source_id, uid, target.id).await?;
        }
        let expunged = self.repo.expunge_uids(source_id, &moved_uids).await?;

        let mut response = render_expunges(&sel.view, &expunged);
        sel.view = MailboxView::new(self.repo.mail_entries(source_id).await?);
        response.push_str(&ImapResponse::ok(tag, "MOVE completed"));
        self.send(conn, &response).await
    }

    async fn handle_expunge<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
        uid_set: Option<SequenceSet>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let Some(sel) = session.selected.as_mut() else {
            return Ok(());
        };
        if sel.read_only {
            return self.send(conn, &ImapResponse::no(tag, "Mailbox is read-only")).await;
        }

        let source_id = sel.mailbox.id;
        let expunged = match &uid_set {
            Some(set) => {
                let uids: Vec<u32> = sel.view.resolve(set, true).iter().map(|e| e.uid).collect();
                self.repo.expunge_uids(source_id, &uids).await?
            }
            None => self.repo.expunge(source_id).await?,
        };

        let mut response = render_expunges(&sel.view, &expunged);
        sel.view = MailboxView::new(self.repo.mail_entries(source_id).await?);
        response.push_str(&ImapResponse::ok(tag, "EXPUNGE completed"));
        self.send(conn, &response).await
    }

    async fn handle_close<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut ImapSession,
        tag: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }
        let Some(sel) = session.selected.as_ref() else {
            return Ok(());
        };

        // CLOSE expunges silently: no EXPUNGE responses
        if !sel.read_only {
            self.repo.expunge(sel.mailbox.id).await?;
        }
        session.close_mailbox();
        self.send(conn, &ImapResponse::ok(tag, "CLOSE completed")).await
    }

    async fn handle_idle<S>(
        &self,
        conn: &mut Conn<S>,
        reader: &mut FrameReader,
        session: &mut ImapSession,
        tag: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.selected_or_no(conn, session, tag).await? {
            return Ok(());
        }

        self.send(conn, &ImapResponse::continue_req("idling")).await?;

        // no server-imposed ceiling while idling; only DONE ends the mode
        loop {
            match reader.read_line(conn).await {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("DONE") => {
                    return self.send(conn, &ImapResponse::ok(tag, "IDLE terminated")).await;
                }
                Ok(Some(_)) => continue,
                _ => {
                    session.state = ImapState::Logout;
                    return Ok(());
                }
            }
        }
    }

    // ================================================================
    // Helpers
    // ================================================================

    fn authed_user(&self, session: &ImapSession) -> Option<String> {
        if session.is_authenticated() {
            session.username.clone()
        } else {
            None
        }
    }

    /// Send a tagged NO unless a mailbox is selected
    async fn selected_or_no<S>(
        &self,
        conn: &mut Conn<S>,
        session: &ImapSession,
        tag: &str,
    ) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !session.is_authenticated() {
            self.send(conn, &ImapResponse::no(tag, "Not authenticated")).await?;
            return Ok(false);
        }
        if session.state != ImapState::Selected || session.selected.is_none() {
            self.send(conn, &ImapResponse::no(tag, "No mailbox selected")).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn send<S>(&self, conn: &mut Conn<S>, response: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.send_bytes(conn, response.as_bytes()).await
    }

    async fn send_bytes<S>(&self, conn: &mut Conn<S>, response: &[u8]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.write_all(response).await?;
        conn.flush().await?;
        Ok(())
    }
}

/// SPECIAL-USE attribute for conventional mailbox roles
fn special_use_attr(path: &str) -> Option<&'static str> {
    match path.to_ascii_uppercase().as_str() {
        "SENT" => Some("\\Sent"),
        "DRAFTS" => Some("\\Drafts"),
        "TRASH" => Some("\\Trash"),
        "JUNK" => Some("\\Junk"),
        _ => None,
    }
}

/// Apply a STORE action to a flag set
fn apply_store(current: MailFlags, action: &StoreAction) -> MailFlags {
    let requested = MailFlags::from_tokens(action.flags.iter().map(String::as_str));
    match action.op {
        StoreOp::Set => requested,
        StoreOp::Add => MailFlags {
            seen: current.seen || requested.seen,
            answered: current.answered || requested.answered,
            flagged: current.flagged || requested.flagged,
            deleted: current.deleted || requested.deleted,
            draft: current.draft || requested.draft,
        },
        StoreOp::Remove => MailFlags {
            seen: current.seen && !requested.seen,
            answered: current.answered && !requested.answered,
            flagged: current.flagged && !requested.flagged,
            deleted: current.deleted && !requested.deleted,
            draft: current.draft && !requested.draft,
        },
    }
}

/// EXPUNGE responses numbered against the pre-mutation view snapshot.
/// Removed UIDs are sorted into cache order first, so the running offset is
/// correct for arbitrary input orders.
fn render_expunges(view: &MailboxView, expunged_uids: &[u32]) -> String {
    let mut seqs: Vec<u32> = expunged_uids
        .iter()
        .filter_map(|&uid| view.seq_of_uid(uid))
        .collect();
    seqs.sort_unstable();

    let mut response = String::new();
    for (offset, seq) in seqs.iter().enumerate() {
        response.push_str(&ImapResponse::expunge(seq - offset as u32));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_use_attr() {
        assert_eq!(special_use_attr("Sent"), Some("\\Sent"));
        assert_eq!(special_use_attr("TRASH"), Some("\\Trash"));
        assert_eq!(special_use_attr("drafts"), Some("\\Drafts"));
        assert_eq!(special_use_attr("INBOX"), None);
        assert_eq!(special_use_attr("Archive"), None);
    }

    #[test]
    fn test_apply_store() {
        let current = MailFlags {
            seen: true,
            flagged: true,
            ..Default::default()
        };

        let add = StoreAction {
            op: StoreOp::Add,
            silent: false,
            flags: vec!["\\Deleted".to_string()],
        };
        let result = apply_store(current, &add);
        assert!(result.seen && result.flagged && result.deleted);

        let remove = StoreAction {
            op: StoreOp::Remove,
            silent: false,
            flags: vec!["\\Seen".to_string()],
        };
        let result = apply_store(current, &remove);
        assert!(!result.seen && result.flagged);

        let set = StoreAction {
            op: StoreOp::Set,
            silent: false,
            flags: vec!["\\Answered".to_string()],
        };
        let result = apply_store(current, &set);
        assert!(result.answered && !result.seen && !result.flagged);
    }

    #[test]
    fn test_render_expunges_running_offset() {
        use chrono::Utc;
        use petrel_storage::MailEntry;
        use uuid::Uuid;

        let entries: Vec<MailEntry> = [1u32, 2, 3, 4, 5]
            .iter()
            .map(|&uid| MailEntry {
                id: Uuid::new_v4(),
                message_id: format!("<{}@t>", uid),
                mailbox_id: Uuid::nil(),
                uid,
                received_at: Utc::now(),
                flags: Default::default(),
                size: 1,
            })
            .collect();
        let view = MailboxView::new(entries);

        // uids 2 and 4 are sequences 2 and 4; after removing seq 2, the
        // entry with uid 4 sits at sequence 3
        let rendered = render_expunges(&view, &[2, 4]);
        assert_eq!(rendered, "* 2 EXPUNGE\r\n* 3 EXPUNGE\r\n");

        // arbitrary input order produces the same numbering
        let rendered = render_expunges(&view, &[4, 2]);
        assert_eq!(rendered, "* 2 EXPUNGE\r\n* 3 EXPUNGE\r\n");
    }
}
