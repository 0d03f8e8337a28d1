//! Common wire-level types for Petrel

use serde::{Deserialize, Serialize};

/// Email address split into local part and domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.split_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Strip a single pair of surrounding angle brackets from an address
pub fn strip_angle_brackets(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(s)
}

/// Domain part of an address, lower-cased
pub fn extract_domain(addr: &str) -> Option<String> {
    let addr = strip_angle_brackets(addr);
    addr.rsplit_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
}

/// IMAP message flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MailFlags {
    pub seen: bool,
    pub answered: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub draft: bool,
}

impl MailFlags {
    /// Parse a whitespace-separated IMAP flag list (parentheses already
    /// stripped). Tokens outside the system five are ignored.
    pub fn from_tokens<'a, I: IntoIterator<Item = &'a str>>(tokens: I) -> Self {
        let mut flags = Self::default();
        for token in tokens {
            match token.to_ascii_uppercase().as_str() {
                "\\SEEN" => flags.seen = true,
                "\\ANSWERED" => flags.answered = true,
                "\\FLAGGED" => flags.flagged = true,
                "\\DELETED" => flags.deleted = true,
                "\\DRAFT" => flags.draft = true,
                _ => {}
            }
        }
        flags
    }

    /// Render as the inner part of an IMAP flag list, e.g. `\Seen \Flagged`
    pub fn to_imap(&self) -> String {
        let mut out = Vec::new();
        if self.seen {
            out.push("\\Seen");
        }
        if self.flagged {
            out.push("\\Flagged");
        }
        if self.answered {
            out.push("\\Answered");
        }
        if self.deleted {
            out.push("\\Deleted");
        }
        if self.draft {
            out.push("\\Draft");
        }
        out.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_address_parse() {
        let email = EmailAddress::parse("user@example.com").unwrap();
        assert_eq!(email.local, "user");
        assert_eq!(email.domain, "example.com");
        assert_eq!(email.to_string(), "user@example.com");
    }

    #[test]
    fn test_email_address_invalid() {
        assert!(EmailAddress::parse("invalid").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("user@").is_none());
    }

    #[test]
    fn test_strip_angle_brackets() {
        assert_eq!(strip_angle_brackets("<a@b.com>"), "a@b.com");
        assert_eq!(strip_angle_brackets("a@b.com"), "a@b.com");
        assert_eq!(strip_angle_brackets(" <a@b.com> "), "a@b.com");
        // unbalanced brackets are left alone
        assert_eq!(strip_angle_brackets("<a@b.com"), "<a@b.com");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("<alice@Example.COM>").as_deref(),
            Some("example.com")
        );
        assert_eq!(extract_domain("no-at-sign"), None);
    }

    #[test]
    fn test_flags_roundtrip() {
        let flags = MailFlags::from_tokens(["\\Seen", "\\deleted", "$Junk"]);
        assert!(flags.seen);
        assert!(flags.deleted);
        assert!(!flags.flagged);
        assert_eq!(flags.to_imap(), "\\Seen \\Deleted");
    }

    #[test]
    fn test_flags_empty() {
        assert_eq!(MailFlags::default().to_imap(), "");
    }
}
