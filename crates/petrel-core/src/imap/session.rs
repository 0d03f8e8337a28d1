//! IMAP session state
//!
//! One value per connection. The continuation-heavy modes of the protocol
//! (SASL exchanges, APPEND literals, IDLE) are handled as linear awaits in
//! the handler rather than as session flags, so the state here is just the
//! RFC 3501 state machine plus the selected-mailbox view.

use super::cache::MailboxView;
use petrel_storage::Mailbox;

/// RFC 3501 session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapState {
    NotAuthenticated,
    Authenticated,
    Selected,
    Logout,
}

/// The selected mailbox and its per-session view
#[derive(Debug)]
pub struct SelectedMailbox {
    pub mailbox: Mailbox,
    pub read_only: bool,
    pub view: MailboxView,
}

/// Per-connection IMAP state
#[derive(Debug)]
pub struct ImapSession {
    pub state: ImapState,
    pub remote_ip: String,
    pub tls_active: bool,
    pub username: Option<String>,
    pub selected: Option<SelectedMailbox>,
}

impl ImapSession {
    pub fn new(remote_ip: String, tls_active: bool) -> Self {
        Self {
            state: ImapState::NotAuthenticated,
            remote_ip,
            tls_active,
            username: None,
            selected: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ImapState::Authenticated | ImapState::Selected)
    }

    pub fn authenticate(&mut self, username: String) {
        self.username = Some(username);
        self.state = ImapState::Authenticated;
    }

    pub fn select(&mut self, mailbox: Mailbox, read_only: bool, view: MailboxView) {
        self.selected = Some(SelectedMailbox {
            mailbox,
            read_only,
            view,
        });
        self.state = ImapState::Selected;
    }

    /// CLOSE / UNSELECT: back to AUTHENTICATED
    pub fn close_mailbox(&mut self) {
        self.selected = None;
        self.state = ImapState::Authenticated;
    }

    /// STARTTLS restarts the session in the clear state
    pub fn reset_after_tls(&mut self) {
        self.state = ImapState::NotAuthenticated;
        self.tls_active = true;
        self.username = None;
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut session = ImapSession::new("10.0.0.1".to_string(), false);
        assert_eq!(session.state, ImapState::NotAuthenticated);
        assert!(!session.is_authenticated());

        session.authenticate("bob@example.com".to_string());
        assert_eq!(session.state, ImapState::Authenticated);
        assert!(session.is_authenticated());

        session.close_mailbox();
        assert_eq!(session.state, ImapState::Authenticated);
        assert!(session.selected.is_none());
    }

    #[test]
    fn test_reset_after_tls() {
        let mut session = ImapSession::new("10.0.0.1".to_string(), false);
        session.authenticate("bob@example.com".to_string());
        session.reset_after_tls();
        assert_eq!(session.state, ImapState::NotAuthenticated);
        assert!(session.tls_active);
        assert!(session.username.is_none());
    }
}
