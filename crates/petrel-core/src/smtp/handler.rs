//! SMTP session handler

use crate::capability::ehlo_extensions;
use crate::codec::FrameReader;
use crate::conn::Conn;
use crate::events::{EventSink, OutboundQueue, SmtpEvent};
use crate::smtp::auth::{
    decode_auth_plain, decode_base64_line, LOGIN_CHALLENGE_PASSWORD, LOGIN_CHALLENGE_USERNAME,
};
use crate::smtp::server::PortKind;
use crate::smtp::session::{SmtpSession, SmtpState};
use anyhow::Result;
use petrel_common::config::Config;
use petrel_common::types::{extract_domain, strip_angle_brackets};
use petrel_storage::MailRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// SMTP command lines are short; DATA lines are bounded by RFC 5322 anyway
const MAX_LINE_LENGTH: usize = 8192;

/// Per-connection SMTP command processor
pub struct SmtpHandler {
    config: Config,
    repo: Arc<dyn MailRepository>,
    queue: Arc<dyn OutboundQueue>,
    events: Arc<dyn EventSink>,
    tls_acceptor: Option<TlsAcceptor>,
    remote_ip: String,
    port: PortKind,
}

impl SmtpHandler {
    pub fn new(
        config: Config,
        repo: Arc<dyn MailRepository>,
        queue: Arc<dyn OutboundQueue>,
        events: Arc<dyn EventSink>,
        tls_acceptor: Option<TlsAcceptor>,
        remote_ip: String,
        port: PortKind,
    ) -> Self {
        Self {
            config,
            repo,
            queue,
            events,
            tls_acceptor,
            remote_ip,
            port,
        }
    }

    /// Drive one SMTP session to completion. The banner is sent immediately:
    /// the listener has already resolved the port personality (implicit TLS
    /// handshake or dual-mode sniff) before handing the stream over.
    pub async fn run<S>(self, mut conn: Conn<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let hostname = self.config.server.advertised_hostname();
        let mut session = SmtpSession::new(self.remote_ip.clone(), conn.is_tls());
        let mut reader = FrameReader::new(MAX_LINE_LENGTH);
        let timeout = Duration::from_secs(self.config.smtp.timeout_secs);

        self.respond(
            &mut conn,
            &format!("220 {} {}", hostname, self.config.smtp.banner),
        )
        .await?;

        loop {
            let line = match tokio::time::timeout(timeout, reader.read_line(&mut conn)).await {
                Err(_) => {
                    info!(ip = %session.remote_ip, "SMTP session timed out");
                    break;
                }
                Ok(Ok(None)) => {
                    debug!(ip = %session.remote_ip, "client disconnected");
                    break;
                }
                Ok(Ok(Some(line))) => line,
                Ok(Err(e)) => {
                    warn!(ip = %session.remote_ip, error = %e, "SMTP framing error");
                    break;
                }
            };

            // DATA mode preserves the original line content (RFC 5321)
            if session.state == SmtpState::Data {
                self.handle_data_line(&mut conn, &mut session, &line).await?;
                continue;
            }

            let trimmed = line.trim();

            // A TLS ClientHello on a plaintext port decodes as binary junk
            if !session.tls_active && is_binary_data(trimmed) {
                warn!(
                    ip = %session.remote_ip,
                    "binary data on plaintext port, likely a stray TLS ClientHello"
                );
                self.respond(
                    &mut conn,
                    &format!(
                        "500 5.5.1 Plain text connection required. Use STARTTLS or connect to port {} for TLS",
                        self.config.smtp.tls_port
                    ),
                )
                .await?;
                break;
            }

            debug!(ip = %session.remote_ip, line = %trimmed, "SMTP <<");

            match session.state {
                SmtpState::AuthPlainInput => {
                    if !self.finish_auth_plain(&mut conn, &mut session, trimmed).await? {
                        break;
                    }
                    continue;
                }
                SmtpState::AuthLoginUsername => {
                    session.auth_login_username = decode_base64_line(trimmed);
                    session.state = SmtpState::AuthLoginPassword;
                    self.respond(&mut conn, &format!("334 {}", LOGIN_CHALLENGE_PASSWORD))
                        .await?;
                    continue;
                }
                SmtpState::AuthLoginPassword => {
                    if !self.finish_auth_login(&mut conn, &mut session, trimmed).await? {
                        break;
                    }
                    continue;
                }
                _ => {}
            }

            let upper = trimmed.to_ascii_uppercase();
            if upper.starts_with("EHLO") || upper.starts_with("HELO") {
                self.handle_ehlo(&mut conn, &mut session, trimmed, &hostname)
                    .await?;
            } else if upper.starts_with("MAIL FROM:") {
                self.handle_mail_from(&mut conn, &mut session, trimmed).await?;
            } else if upper.starts_with("RCPT TO:") {
                self.handle_rcpt_to(&mut conn, &mut session, trimmed).await?;
            } else if upper == "DATA" {
                self.handle_data(&mut conn, &mut session).await?;
            } else if upper.starts_with("AUTH") {
                if !self.handle_auth(&mut conn, &mut session, trimmed).await? {
                    break;
                }
            } else if upper == "STARTTLS" {
                match self.handle_starttls(conn, &mut session, &mut reader).await? {
                    Some(upgraded) => conn = upgraded,
                    None => return Ok(()),
                }
            } else if upper == "RSET" {
                session.reset_transaction();
                self.respond(&mut conn, "250 2.0.0 OK").await?;
            } else if upper == "NOOP" {
                self.respond(&mut conn, "250 2.0.0 OK").await?;
            } else if upper.starts_with("VRFY") {
                self.respond(
                    &mut conn,
                    "252 2.5.2 Cannot VRFY user, but will accept message and attempt delivery",
                )
                .await?;
            } else if upper == "QUIT" {
                self.respond(&mut conn, &format!("221 2.0.0 {} closing connection", hostname))
                    .await?;
                break;
            } else {
                self.respond(&mut conn, "500 5.5.1 Unrecognized command").await?;
            }
        }

        conn.shutdown().await.ok();
        Ok(())
    }

    async fn handle_ehlo<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        line: &str,
        hostname: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut parts = line.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default();
        let client = parts.next().unwrap_or("unknown").trim();
        session.client_hostname = Some(client.to_string());
        session.state = SmtpState::Greeted;

        if verb.eq_ignore_ascii_case("EHLO") {
            let extensions = ehlo_extensions(
                self.config.smtp.max_message_size,
                session.tls_active,
                self.tls_acceptor.is_some(),
                self.port == PortKind::Submission,
            );
            let mut response = format!("250-{} Hello {}\r\n", hostname, client);
            for (i, ext) in extensions.iter().enumerate() {
                if i == extensions.len() - 1 {
                    response.push_str(&format!("250 {}", ext));
                } else {
                    response.push_str(&format!("250-{}\r\n", ext));
                }
            }
            self.respond(conn, &response).await
        } else {
            self.respond(conn, &format!("250 {} Hello {}", hostname, client))
                .await
        }
    }

    async fn handle_auth<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        line: &str,
    ) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state != SmtpState::Greeted {
            self.respond(conn, "503 5.5.1 Bad sequence of commands").await?;
            return Ok(true);
        }

        let mut parts = line.split_whitespace();
        parts.next(); // AUTH
        let Some(mechanism) = parts.next() else {
            self.respond(conn, "501 5.5.4 Syntax: AUTH mechanism [initial-response]")
                .await?;
            return Ok(true);
        };

        match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => {
                if let Some(initial) = parts.next() {
                    self.finish_auth_plain(conn, session, initial).await
                } else {
                    session.state = SmtpState::AuthPlainInput;
                    self.respond(conn, "334 ").await?;
                    Ok(true)
                }
            }
            "LOGIN" => {
                session.state = SmtpState::AuthLoginUsername;
                self.respond(conn, &format!("334 {}", LOGIN_CHALLENGE_USERNAME))
                    .await?;
                Ok(true)
            }
            _ => {
                self.respond(conn, "504 5.5.4 Unrecognized authentication mechanism")
                    .await?;
                Ok(true)
            }
        }
    }

    /// Returns false when the connection must close (failure threshold)
    async fn finish_auth_plain<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        material: &str,
    ) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.state = SmtpState::Greeted;
        match decode_auth_plain(material) {
            Some((username, password)) if self.repo.authenticate(&username, &password).await? => {
                let username = strip_angle_brackets(&username).to_string();
                info!(user = %username, "SMTP AUTH success");
                session.authenticated = true;
                session.authenticated_user = Some(username);
                self.respond(conn, "235 2.7.0 Authentication successful").await?;
                Ok(true)
            }
            _ => self.handle_auth_failure(conn, session).await,
        }
    }

    async fn finish_auth_login<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        material: &str,
    ) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.state = SmtpState::Greeted;
        let username = session.auth_login_username.take();
        let password = decode_base64_line(material);

        match (username, password) {
            (Some(username), Some(password))
                if self.repo.authenticate(&username, &password).await? =>
            {
                let username = strip_angle_brackets(&username).to_string();
                info!(user = %username, "SMTP AUTH success");
                session.authenticated = true;
                session.authenticated_user = Some(username);
                self.respond(conn, "235 2.7.0 Authentication successful").await?;
                Ok(true)
            }
            _ => self.handle_auth_failure(conn, session).await,
        }
    }

    /// Tarpit: delay the negative reply; drop the connection once the
    /// failure threshold is reached. Returns false on close.
    async fn handle_auth_failure<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
    ) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.auth_failures += 1;
        self.events.smtp_event(SmtpEvent::AuthFailure);
        warn!(ip = %session.remote_ip, failures = session.auth_failures, "SMTP AUTH failure");

        if session.auth_failures >= self.config.security.max_auth_failures {
            self.respond(conn, "421 4.7.0 Too many authentication failures, disconnecting")
                .await?;
            return Ok(false);
        }

        tokio::time::sleep(Duration::from_millis(self.config.security.tarpit_delay_ms)).await;
        self.respond(conn, "535 5.7.8 Authentication credentials invalid")
            .await?;
        Ok(true)
    }

    /// STARTTLS: positive reply in plaintext, then the handshake. Returns
    /// the upgraded connection, or `None` when the session must end.
    async fn handle_starttls<S>(
        &self,
        mut conn: Conn<S>,
        session: &mut SmtpSession,
        reader: &mut FrameReader,
    ) -> Result<Option<Conn<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(acceptor) = self.tls_acceptor.clone() else {
            self.respond(&mut conn, "454 4.7.0 TLS not available").await?;
            return Ok(Some(conn));
        };
        if session.tls_active {
            self.respond(&mut conn, "503 5.5.1 TLS already active").await?;
            return Ok(Some(conn));
        }

        self.respond(&mut conn, "220 2.0.0 Ready to start TLS").await?;
        info!(ip = %session.remote_ip, "SMTP STARTTLS initiated");

        match conn {
            Conn::Plain(stream) => match acceptor.accept(stream).await {
                Ok(tls) => {
                    // plaintext buffered before the handshake is meaningless now
                    reader.reset();
                    session.reset_after_tls();
                    info!(ip = %session.remote_ip, "SMTP STARTTLS handshake completed");
                    Ok(Some(Conn::Tls(Box::new(tls))))
                }
                Err(e) => {
                    warn!(ip = %session.remote_ip, error = %e, "SMTP STARTTLS handshake failed");
                    Ok(None)
                }
            },
            tls => Ok(Some(tls)),
        }
    }

    async fn handle_mail_from<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        line: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state != SmtpState::Greeted {
            self.respond(conn, "503 5.5.1 Bad sequence of commands").await?;
            return Ok(());
        }

        // No auth gate here: sender acceptance is unconditional so the
        // same-domain logic in RCPT TO can decide. Relay policy rejects
        // there when credentials are actually required.
        let Some(from) = extract_address(line, "MAIL FROM:") else {
            self.respond(conn, "501 5.1.7 Syntax error in MAIL FROM address")
                .await?;
            return Ok(());
        };

        session.mail_from = Some(strip_angle_brackets(&from).to_string());
        session.state = SmtpState::MailFrom;
        self.respond(conn, "250 2.1.0 OK").await
    }

    async fn handle_rcpt_to<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        line: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state != SmtpState::MailFrom && session.state != SmtpState::RcptTo {
            self.respond(conn, "503 5.5.1 Bad sequence of commands").await?;
            return Ok(());
        }

        if session.recipients.len() >= self.config.smtp.max_recipients {
            self.respond(conn, "452 4.5.3 Too many recipients").await?;
            return Ok(());
        }

        let Some(to) = extract_address(line, "RCPT TO:") else {
            self.respond(conn, "501 5.1.3 Syntax error in RCPT TO address")
                .await?;
            return Ok(());
        };

        let rcpt_email = strip_angle_brackets(&to).to_string();
        let rcpt_domain = extract_domain(&rcpt_email);
        let sender_domain = session.mail_from.as_deref().and_then(extract_domain);

        let same_domain = matches!(
            (&sender_domain, &rcpt_domain),
            (Some(s), Some(r)) if s.eq_ignore_ascii_case(r)
        );
        let rcpt_is_local = rcpt_domain
            .as_deref()
            .map(|d| self.repo.domain_is_local(d))
            .unwrap_or(false);

        // Intra-domain local mail passes without credentials; everything
        // else needs an authenticated session or a trusted relay IP. The
        // submission port can be configured to withhold the intra-domain
        // exception so that all submitted mail is authenticated.
        let intra_domain_exception = same_domain
            && rcpt_is_local
            && !(self.port == PortKind::Submission && self.config.smtp.require_auth_on_submission);
        if !intra_domain_exception
            && !(session.authenticated || self.repo.relay_allowed(&session.remote_ip))
        {
            self.respond(
                conn,
                "550 5.7.1 Relaying denied. Authenticate or use a permitted relay IP.",
            )
            .await?;
            return Ok(());
        }

        if rcpt_is_local && !self.repo.user_exists(&rcpt_email).await? {
            self.respond(conn, &format!("550 5.1.1 Unknown user: {}", rcpt_email))
                .await?;
            return Ok(());
        }

        session.recipients.push(rcpt_email);
        session.state = SmtpState::RcptTo;
        self.respond(conn, "250 2.1.5 OK").await
    }

    async fn handle_data<S>(&self, conn: &mut Conn<S>, session: &mut SmtpSession) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.state != SmtpState::RcptTo {
            self.respond(conn, "503 5.5.1 Bad sequence of commands").await?;
            return Ok(());
        }
        session.state = SmtpState::Data;
        self.respond(conn, "354 Start mail input; end with <CRLF>.<CRLF>")
            .await
    }

    /// One line of the DATA body
    async fn handle_data_line<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
        line: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if line == "." {
            return self.process_received_mail(conn, session).await;
        }

        // undo dot-stuffing: a leading ".." becomes "."
        let data_line = if line.starts_with("..") { &line[1..] } else { line };
        session.data.extend_from_slice(data_line.as_bytes());
        session.data.extend_from_slice(b"\r\n");

        if session.data.len() > self.config.smtp.max_message_size {
            self.respond(conn, "552 5.3.4 Message too large").await?;
            session.reset_transaction();
        }
        Ok(())
    }

    async fn process_received_mail<S>(
        &self,
        conn: &mut Conn<S>,
        session: &mut SmtpSession,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw = std::mem::take(&mut session.data);
        let sender = session.mail_from.clone().unwrap_or_default();
        let recipients = std::mem::take(&mut session.recipients);

        match self.repo.process_incoming(&raw, &sender, &recipients).await {
            Ok(message_id) => {
                for rcpt in &recipients {
                    let external = extract_domain(rcpt)
                        .map(|d| !self.repo.domain_is_local(&d))
                        .unwrap_or(false);
                    if external {
                        if let Err(e) = self.queue.enqueue(&raw, &sender, rcpt).await {
                            warn!(rcpt = %rcpt, error = %e, "outbound enqueue failed");
                        }
                    }
                }

                self.events.smtp_event(SmtpEvent::MailReceived);
                info!(message_id = %message_id, from = %sender, "SMTP mail accepted");
                self.respond(conn, &format!("250 2.0.0 OK: queued as {}", message_id))
                    .await?;
            }
            Err(e) => {
                warn!(error = %e, "failed to process DATA");
                self.respond(conn, "451 4.3.0 Mail processing error").await?;
            }
        }

        session.reset_transaction();
        Ok(())
    }

    async fn respond<S>(&self, conn: &mut Conn<S>, response: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(response = %response, "SMTP >>");
        conn.write_all(response.as_bytes()).await?;
        conn.write_all(b"\r\n").await?;
        conn.flush().await?;
        Ok(())
    }
}

/// Pull the address portion out of `MAIL FROM:` / `RCPT TO:`, dropping any
/// trailing parameters such as `SIZE=12345`.
fn extract_address(line: &str, prefix: &str) -> Option<String> {
    let idx = line.to_ascii_uppercase().find(&prefix.to_ascii_uppercase())?;
    let addr = line[idx + prefix.len()..].trim();
    let addr = addr.split_whitespace().next()?;
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_string())
    }
}

/// A TLS ClientHello on a plaintext port decodes to control bytes
fn is_binary_data(data: &str) -> bool {
    data.chars()
        .take(20)
        .filter(|&c| (c as u32) < 0x20 && c != '\t' && c != '\r' && c != '\n')
        .count()
        > 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_address() {
        assert_eq!(
            extract_address("MAIL FROM:<alice@example.com>", "MAIL FROM:").as_deref(),
            Some("<alice@example.com>")
        );
        assert_eq!(
            extract_address("MAIL FROM:<a@b.com> SIZE=1234", "MAIL FROM:").as_deref(),
            Some("<a@b.com>")
        );
        assert_eq!(
            extract_address("rcpt to: <x@y.org>", "RCPT TO:").as_deref(),
            Some("<x@y.org>")
        );
        assert_eq!(extract_address("MAIL FROM:", "MAIL FROM:"), None);
    }

    #[test]
    fn test_is_binary_data() {
        let hello = "\u{16}\u{3}\u{1}\u{0}\u{5}\u{2}\u{0}\u{0}";
        assert!(is_binary_data(hello));
        assert!(!is_binary_data("EHLO mail.example.com"));
        assert!(!is_binary_data(""));
    }
}
