//! IMAP listener
//!
//! Two personalities: the plain port greets immediately with STARTTLS in the
//! capability list, the implicit-TLS port completes the handshake before the
//! greeting.

use crate::conn::Conn;
use crate::events::EventSink;
use crate::imap::handler::ImapHandler;
use anyhow::Result;
use petrel_common::config::Config;
use petrel_storage::MailRepository;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// IMAP server
pub struct ImapServer {
    config: Config,
    repo: Arc<dyn MailRepository>,
    events: Arc<dyn EventSink>,
    tls_acceptor: Option<TlsAcceptor>,
    connection_semaphore: Arc<Semaphore>,
}

impl ImapServer {
    pub fn new(
        config: Config,
        repo: Arc<dyn MailRepository>,
        events: Arc<dyn EventSink>,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Self {
        let max_connections = config.imap.max_connections;
        Self {
            config,
            repo,
            events,
            tls_acceptor,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Run one listener; `implicit_tls` selects the 993 personality
    pub async fn run(self: Arc<Self>, implicit_tls: bool) -> Result<()> {
        let port = if implicit_tls {
            self.config.imap.tls_port
        } else {
            self.config.imap.port
        };
        let addr = format!("{}:{}", self.config.server.bind_address, port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, implicit_tls, "IMAP server listening");

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
                        if let Err(e) = server
                            .serve_connection(stream, peer_addr.ip().to_string(), implicit_tls)
                            .await
                        {
                            error!(peer = %peer_addr, error = %e, "IMAP session error");
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

    async fn serve_connection(
        &self,
        stream: TcpStream,
        remote_ip: String,
        implicit_tls: bool,
    ) -> Result<()> {
        info!(ip = %remote_ip, implicit_tls, "IMAP connection accepted");

        let conn = if implicit_tls {
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
        } else {
            Conn::Plain(stream)
        };

        let handler = ImapHandler::new(
            self.config.clone(),
            self.repo.clone(),
            self.events.clone(),
            self.tls_acceptor.clone(),
            remote_ip,
        );
        handler.run(conn).await
    }
}
