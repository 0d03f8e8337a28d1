//! Petrel - mail server entry point

use anyhow::Result;
use petrel_common::config::Config;
use petrel_core::{
    create_tls_acceptor, ImapServer, LogOnlyQueue, NullEventSink, PortKind, SmtpServer,
};
use petrel_storage::{FsBlobStore, MemoryRepository};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config);

    info!("Starting Petrel mail server...");

    let tls_acceptor = match &config.tls {
        Some(tls_config) => match create_tls_acceptor(tls_config) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                warn!(error = %e, "TLS configuration failed, continuing without TLS");
                None
            }
        },
        None => {
            info!("No TLS configured; implicit-TLS ports disabled, STARTTLS unavailable");
            None
        }
    };

    let blobs = Arc::new(FsBlobStore::new(&config.storage)?);
    let repo = Arc::new(MemoryRepository::new(
        &config.server.domain,
        config.security.relay_ips.clone(),
        blobs,
    ));
    let queue = Arc::new(LogOnlyQueue);
    let events = Arc::new(NullEventSink);

    let smtp = Arc::new(SmtpServer::new(
        config.clone(),
        repo.clone(),
        queue,
        events.clone(),
        tls_acceptor.clone(),
    ));

    let mut handles = Vec::new();

    for port in [PortKind::Mta, PortKind::Submission, PortKind::Smtps] {
        if port == PortKind::Smtps && tls_acceptor.is_none() {
            continue;
        }
        let smtp = smtp.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = smtp.run(port).await {
                tracing::error!(?port, error = %e, "SMTP listener error");
            }
        }));
    }

    let imap = Arc::new(ImapServer::new(
        config.clone(),
        repo.clone(),
        events,
        tls_acceptor.clone(),
    ));

    for implicit_tls in [false, true] {
        if implicit_tls && tls_acceptor.is_none() {
            continue;
        }
        let imap = imap.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = imap.run(implicit_tls).await {
                tracing::error!(implicit_tls, error = %e, "IMAP listener error");
            }
        }));
    }

    info!("Petrel started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for handle in handles {
        handle.abort();
    }

    info!("Petrel shutdown complete");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},petrel=debug", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true).with_level(true)).init();
    }
}
