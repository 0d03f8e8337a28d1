//! Capability advertisement
//!
//! Pure functions of the session's TLS state; no hidden state.

/// IMAP capability list for the greeting, CAPABILITY responses and the
/// post-LOGIN response code.
pub fn imap_capabilities(tls_active: bool) -> String {
    let starttls = if tls_active { "" } else { "STARTTLS " };
    format!(
        "IMAP4rev1 {}AUTH=PLAIN AUTH=LOGIN IDLE MOVE UNSELECT UIDPLUS \
         SPECIAL-USE NAMESPACE CHILDREN ID ENABLE LITERAL+",
        starttls
    )
}

/// EHLO extension lines (without the leading greeting line).
///
/// AUTH is hidden on the submission port until TLS is up, which forces
/// mobile clients to upgrade before authenticating. STARTTLS disappears once
/// TLS is active or when no acceptor is configured.
pub fn ehlo_extensions(
    max_message_size: usize,
    tls_active: bool,
    tls_available: bool,
    submission_port: bool,
) -> Vec<String> {
    let mut lines = vec![
        format!("SIZE {}", max_message_size),
        "8BITMIME".to_string(),
        "PIPELINING".to_string(),
        "CHUNKING".to_string(),
    ];
    if tls_active || !submission_port {
        lines.push("AUTH PLAIN LOGIN".to_string());
    }
    if tls_available && !tls_active {
        lines.push("STARTTLS".to_string());
    }
    lines.push("ENHANCEDSTATUSCODES".to_string());
    lines
}
