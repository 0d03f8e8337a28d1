//! SMTP listener
//!
//! One listener task per port personality. The personality decides banner
//! timing: port 25 greets immediately, 465 greets only after the implicit
//! handshake, and 587 waits up to 300 ms for a ClientHello before falling
//! back to a plaintext greeting (mobile clients open 587 with TLS directly,
//! STARTTLS clients wait silently for the banner).

use crate::conn::Conn;
use crate::events::{EventSink, OutboundQueue};
use crate::smtp::handler::SmtpHandler;
use crate::tls::{sniff_first_bytes, SniffOutcome};
use anyhow::Result;
use petrel_common::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// Window in which a dual-mode client may open with a TLS ClientHello
const TLS_DETECTION_WINDOW: Duration = Duration::from_millis(300);

/// SMTP port personality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Port 25: plaintext, STARTTLS upgrade
    Mta,
    /// Port 587: dual-mode TLS detection, STARTTLS fallback
    Submission,
    /// Port 465: implicit TLS
    Smtps,
}

/// SMTP server
pub struct SmtpServer {
    config: Config,
    repo: Arc<dyn petrel_storage::MailRepository>,
    queue: Arc<dyn OutboundQueue>,
    events: Arc<dyn EventSink>,
    tls_acceptor: Option<TlsAcceptor>,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpServer {
    pub fn new(
        config: Config,
        repo: Arc<dyn petrel_storage::MailRepository>,
        queue: Arc<dyn OutboundQueue>,
        events: Arc<dyn EventSink>,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Self {
        let max_connections = config.smtp.max_connections;
        Self {
            config,
            repo,
            queue,
            events,
            tls_acceptor,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Run one listener. Spawn this once per configured personality.
    pub async fn run(self: Arc<Self>, port: PortKind) -> Result<()> {
        let port_number = match port {
            PortKind::Mta => self.config.smtp.port,
            PortKind::Submission => self.config.smtp.submission_port,
            PortKind::Smtps => self.config.smtp.tls_port,
        };
        let addr = format!("{}:{}", self.config.server.bind_address, port_number);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, ?port, "SMTP server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(peer = %peer_addr, "max connections reached, rejecting");
                            continue;
                        }
                    };

                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_connection(stream, peer_addr.ip().to_string(), port).await
                        {
                            error!(peer = %peer_addr, error = %e, "SMTP session error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    /// Resolve the port personality into a plain or TLS stream, then hand
    /// over to the command handler (which sends the banner).
    async fn serve_connection(
        &self,
        stream: TcpStream,
        remote_ip: String,
        port: PortKind,
    ) -> Result<()> {
        info!(ip = %remote_ip, ?port, "SMTP connection accepted");

        let conn = match port {
            PortKind::Mta => Conn::Plain(stream),
            PortKind::Smtps => {
                let Some(acceptor) = self.tls_acceptor.clone() else {
                    warn!(ip = %remote_ip, "implicit TLS port without TLS configured");
                    return Ok(());
                };
                match acceptor.accept(stream).await {
                    Ok(tls) => Conn::Tls(Box::new(tls)),
                    Err(e) => {
                        warn!(ip = %remote_ip, error = %e, "implicit TLS handshake failed");
                        return Ok(());
                    }
                }
            }
            PortKind::Submission => match self.tls_acceptor.clone() {
                Some(acceptor) => {
                    match sniff_first_bytes(&stream, TLS_DETECTION_WINDOW).await {
                        SniffOutcome::TlsClientHello => {
                            info!(ip = %remote_ip, "TLS ClientHello detected, auto-negotiating");
                            match acceptor.accept(stream).await {
                                Ok(tls) => Conn::Tls(Box::new(tls)),
                                Err(e) => {
                                    warn!(ip = %remote_ip, error = %e, "submission TLS handshake failed");
                                    return Ok(());
                                }
                            }
                        }
                        SniffOutcome::Plaintext => {
                            info!(ip = %remote_ip, "plaintext detected, STARTTLS available");
                            Conn::Plain(stream)
                        }
                        SniffOutcome::Silent => {
                            info!(ip = %remote_ip, "no ClientHello within window, greeting in plaintext");
                            Conn::Plain(stream)
                        }
                    }
                }
                None => Conn::Plain(stream),
            },
        };

        let handler = SmtpHandler::new(
            self.config.clone(),
            self.repo.clone(),
            self.queue.clone(),
            self.events.clone(),
            self.tls_acceptor.clone(),
            remote_ip,
            port,
        );
        handler.run(conn).await
    }
}
