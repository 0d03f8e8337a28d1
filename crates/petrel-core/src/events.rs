//! Collaborator contracts for metrics and outbound delivery
//!
//! The engines emit counter events and hand off external deliveries through
//! these traits; the shipped implementations are deliberately inert. Metric
//! registries and the real MX transport live outside this repository.

use async_trait::async_trait;
use petrel_common::Result;
use tracing::info;

/// Counter events emitted by the SMTP engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpEvent {
    MailReceived,
    AuthFailure,
}

/// Counter events emitted by the IMAP engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapEvent {
    Login,
    AuthFailure,
}

/// Sink for protocol counter events
pub trait EventSink: Send + Sync {
    fn smtp_event(&self, event: SmtpEvent);
    fn imap_event(&self, event: ImapEvent);
}

/// Discards all events
#[derive(Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn smtp_event(&self, _event: SmtpEvent) {}
    fn imap_event(&self, _event: ImapEvent) {}
}

/// Hand-off point for deliveries to non-local recipients
#[async_trait]
pub trait OutboundQueue: Send + Sync {
    async fn enqueue(&self, raw: &[u8], sender: &str, recipient: &str) -> Result<()>;
}

/// Logs the hand-off and drops the message; a real transport implements
/// `OutboundQueue` out of tree.
#[derive(Default)]
pub struct LogOnlyQueue;

#[async_trait]
impl OutboundQueue for LogOnlyQueue {
    async fn enqueue(&self, raw: &[u8], sender: &str, recipient: &str) -> Result<()> {
        info!(
            from = %sender,
            to = %recipient,
            bytes = raw.len(),
            "external delivery queued (no outbound transport configured)"
        );
        Ok(())
    }
}
