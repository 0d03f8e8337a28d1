//! SMTP session state

/// SMTP command-processing state. The AUTH_* states are continuation modes:
/// the next client line is SASL material, not a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
    Data,
    AuthPlainInput,
    AuthLoginUsername,
    AuthLoginPassword,
}

/// Per-connection SMTP state
#[derive(Debug)]
pub struct SmtpSession {
    pub state: SmtpState,
    pub remote_ip: String,
    pub tls_active: bool,
    pub authenticated: bool,
    pub authenticated_user: Option<String>,
    pub auth_login_username: Option<String>,
    pub auth_failures: u32,
    pub client_hostname: Option<String>,
    pub mail_from: Option<String>,
    pub recipients: Vec<String>,
    pub data: Vec<u8>,
}

impl SmtpSession {
    pub fn new(remote_ip: String, tls_active: bool) -> Self {
        Self {
            state: SmtpState::Connected,
            remote_ip,
            tls_active,
            authenticated: false,
            authenticated_user: None,
            auth_login_username: None,
            auth_failures: 0,
            client_hostname: None,
            mail_from: None,
            recipients: Vec::new(),
            data: Vec::new(),
        }
    }

    /// RSET / end-of-transaction: drop the envelope and buffered data, keep
    /// greeting and authentication.
    pub fn reset_transaction(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.data.clear();
        if self.state != SmtpState::Connected {
            self.state = SmtpState::Greeted;
        }
    }

    /// Post-STARTTLS reset: the client must EHLO and authenticate again.
    pub fn reset_after_tls(&mut self) {
        self.state = SmtpState::Connected;
        self.tls_active = true;
        self.authenticated = false;
        self.authenticated_user = None;
        self.auth_login_username = None;
        self.client_hostname = None;
        self.mail_from = None;
        self.recipients.clear();
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_transaction() {
        let mut session = SmtpSession::new("10.0.0.1".to_string(), false);
        session.state = SmtpState::RcptTo;
        session.mail_from = Some("a@b.c".to_string());
        session.recipients.push("d@e.f".to_string());
        session.data.extend_from_slice(b"partial");
        session.authenticated = true;

        session.reset_transaction();
        assert_eq!(session.state, SmtpState::Greeted);
        assert!(session.mail_from.is_none());
        assert!(session.recipients.is_empty());
        assert!(session.data.is_empty());
        // auth survives RSET
        assert!(session.authenticated);
    }

    #[test]
    fn test_reset_transaction_before_greeting() {
        let mut session = SmtpSession::new("10.0.0.1".to_string(), false);
        session.reset_transaction();
        assert_eq!(session.state, SmtpState::Connected);
    }

    #[test]
    fn test_reset_after_tls() {
        let mut session = SmtpSession::new("10.0.0.1".to_string(), false);
        session.state = SmtpState::Greeted;
        session.authenticated = true;
        session.client_hostname = Some("client".to_string());

        session.reset_after_tls();
        assert_eq!(session.state, SmtpState::Connected);
        assert!(session.tls_active);
        assert!(!session.authenticated);
        assert!(session.client_hostname.is_none());
    }
}
