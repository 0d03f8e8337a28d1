//! TLS support for the protocol listeners
//!
//! Three port personalities exist: plain (STARTTLS upgrade only), implicit
//! (handshake before any protocol byte) and dual (first-byte sniff, used by
//! SMTP submission for clients that open with a ClientHello).

use anyhow::{anyhow, Result};
use petrel_common::config::TlsConfig;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// How a listener treats TLS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// No TLS on connect; STARTTLS available when an acceptor exists
    Plain,
    /// TLS handshake required before any protocol byte
    Implicit,
    /// First-byte sniff: ClientHello gets TLS, anything else is plain
    Dual,
}

/// Outcome of the dual-mode first-byte sniff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffOutcome {
    TlsClientHello,
    Plaintext,
    /// Nothing arrived within the detection window; SMTP is
    /// server-speaks-first, so a waiting STARTTLS client looks like silence
    Silent,
}

/// Load TLS configuration and create an acceptor
pub fn create_tls_acceptor(tls_config: &TlsConfig) -> Result<TlsAcceptor> {
    let cert_file = File::open(&tls_config.cert_path)
        .map_err(|e| anyhow!("Failed to open certificate file: {}", e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Failed to parse certificates: {}", e))?;

    if certs.is_empty() {
        return Err(anyhow!("No certificates found in certificate file"));
    }

    info!("Loaded {} certificate(s)", certs.len());

    let key_file = File::open(&tls_config.key_path)
        .map_err(|e| anyhow!("Failed to open key file: {}", e))?;
    let mut key_reader = BufReader::new(key_file);
    let key = private_key(&mut key_reader)
        .map_err(|e| anyhow!("Failed to read private key: {}", e))?
        .ok_or_else(|| anyhow!("No private key found in key file"))?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow!("Failed to create TLS config: {}", e))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// A TLS record layer header starts `0x16 0x03` for a ClientHello
pub fn looks_like_client_hello(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x16 && bytes[1] == 0x03
}

/// Peek the first bytes of a dual-mode connection without consuming them.
/// Waits at most `window` for the client to speak first.
pub async fn sniff_first_bytes(stream: &TcpStream, window: Duration) -> SniffOutcome {
    let mut probe = [0u8; 2];
    match tokio::time::timeout(window, stream.peek(&mut probe)).await {
        Ok(Ok(n)) if n >= 2 => {
            if looks_like_client_hello(&probe[..n]) {
                SniffOutcome::TlsClientHello
            } else {
                SniffOutcome::Plaintext
            }
        }
        Ok(Ok(_)) => SniffOutcome::Plaintext,
        Ok(Err(_)) | Err(_) => SniffOutcome::Silent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_hello_detection() {
        assert!(looks_like_client_hello(&[0x16, 0x03, 0x01, 0x00]));
        assert!(looks_like_client_hello(&[0x16, 0x03]));
        assert!(!looks_like_client_hello(b"EHLO mail.example.com"));
        assert!(!looks_like_client_hello(&[0x16]));
        assert!(!looks_like_client_hello(&[]));
    }
}
