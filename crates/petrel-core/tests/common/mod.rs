//! Shared harness for protocol session tests
//!
//! Each test drives a real handler over an in-memory duplex stream against
//! the in-memory repository, scripting the client side byte for byte.
#![allow(dead_code)]

use petrel_common::config::Config;
use petrel_core::{Conn, ImapHandler, LogOnlyQueue, NullEventSink, PortKind, SmtpHandler};
use petrel_storage::{MemoryBlobStore, MemoryRepository};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const LOCAL_DOMAIN: &str = "example.com";
pub const TRUSTED_IP: &str = "127.0.0.1";
pub const REMOTE_IP: &str = "203.0.113.9";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.hostname = "mx.example.com".to_string();
    config.server.domain = LOCAL_DOMAIN.to_string();
    config.security.tarpit_delay_ms = 10;
    config
}

pub fn test_repo() -> Arc<MemoryRepository> {
    Arc::new(MemoryRepository::new(
        LOCAL_DOMAIN,
        vec![TRUSTED_IP.to_string()],
        Arc::new(MemoryBlobStore::new()),
    ))
}

/// Scripted protocol client over one side of a duplex pipe
pub struct Client {
    stream: DuplexStream,
    buf: Vec<u8>,
}

impl Client {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).await.unwrap();
        self.stream.write_all(b"\r\n").await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Read one CRLF-terminated line
    pub async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8_lossy(&line).to_string();
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed while expecting a line");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read one line and assert its prefix
    pub async fn expect(&mut self, prefix: &str) -> String {
        let line = self.read_line().await;
        assert!(
            line.starts_with(prefix),
            "expected line starting with {:?}, got {:?}",
            prefix,
            line
        );
        line
    }

    /// Read lines up to and including the tagged response for `tag`;
    /// returns everything read.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let done = line.starts_with(&format!("{} ", tag));
            lines.push(line);
            if done {
                return lines;
            }
        }
    }
}

/// Spawn an SMTP handler on the given port personality; returns the scripted
/// client (greeting not yet consumed).
pub fn start_smtp(
    config: Config,
    repo: Arc<MemoryRepository>,
    port: PortKind,
    remote_ip: &str,
) -> (Client, JoinHandle<anyhow::Result<()>>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let handler = SmtpHandler::new(
        config,
        repo,
        Arc::new(LogOnlyQueue),
        Arc::new(NullEventSink),
        None,
        remote_ip.to_string(),
        port,
    );
    let handle = tokio::spawn(handler.run(Conn::Plain(server)));
    (Client::new(client), handle)
}

/// Spawn an IMAP handler; returns the scripted client (greeting not yet
/// consumed).
pub fn start_imap(
    config: Config,
    repo: Arc<MemoryRepository>,
) -> (Client, JoinHandle<anyhow::Result<()>>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let handler = ImapHandler::new(
        config,
        repo,
        Arc::new(NullEventSink),
        None,
        REMOTE_IP.to_string(),
    );
    let handle = tokio::spawn(handler.run(Conn::Plain(server)));
    (Client::new(client), handle)
}
