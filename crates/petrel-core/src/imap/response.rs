//! IMAP response formatting
//!
//! Plain-text responses are built as strings; FETCH responses carry
//! byte-counted literals and are assembled as raw bytes in `fetch.rs`.

use chrono::{DateTime, Utc};
use petrel_common::types::MailFlags;

/// IMAP response builder
pub struct ImapResponse;

impl ImapResponse {
    pub fn greeting(capabilities: &str, hostname: &str) -> String {
        format!(
            "* OK [CAPABILITY {}] {} Petrel IMAP Server Ready\r\n",
            capabilities, hostname
        )
    }

    pub fn ok(tag: &str, message: &str) -> String {
        format!("{} OK {}\r\n", tag, message)
    }

    pub fn no(tag: &str, message: &str) -> String {
        format!("{} NO {}\r\n", tag, message)
    }

    pub fn bad(tag: &str, message: &str) -> String {
        format!("{} BAD {}\r\n", tag, message)
    }

    pub fn bye(message: &str) -> String {
        format!("* BYE {}\r\n", message)
    }

    pub fn capability(capabilities: &str) -> String {
        format!("* CAPABILITY {}\r\n", capabilities)
    }

    pub fn continue_req(text: &str) -> String {
        format!("+ {}\r\n", text)
    }

    pub fn exists(count: u32) -> String {
        format!("* {} EXISTS\r\n", count)
    }

    pub fn recent(count: u32) -> String {
        format!("* {} RECENT\r\n", count)
    }

    pub fn expunge(seq: u32) -> String {
        format!("* {} EXPUNGE\r\n", seq)
    }

    pub fn flags_line() -> String {
        "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n".to_string()
    }

    pub fn permanent_flags_line() -> String {
        "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft \\*)] Permanent flags\r\n"
            .to_string()
    }

    pub fn unseen(first_unseen: u32) -> String {
        format!("* OK [UNSEEN {}] First unseen\r\n", first_unseen)
    }

    pub fn uid_validity(validity: u32) -> String {
        format!("* OK [UIDVALIDITY {}] UIDs valid\r\n", validity)
    }

    pub fn uid_next(next: u32) -> String {
        format!("* OK [UIDNEXT {}] Predicted next UID\r\n", next)
    }

    pub fn list_line(kind: &str, attributes: &str, path: &str) -> String {
        format!("* {} ({}) \".\" \"{}\"\r\n", kind, attributes, path)
    }

    pub fn list_delimiter_query(kind: &str) -> String {
        format!("* {} (\\Noselect) \".\" \"\"\r\n", kind)
    }

    pub fn status(mailbox: &str, items: &[(&str, u32)]) -> String {
        let rendered: Vec<String> = items.iter().map(|(k, v)| format!("{} {}", k, v)).collect();
        format!("* STATUS \"{}\" ({})\r\n", mailbox, rendered.join(" "))
    }

    pub fn search(ids: &[u32]) -> String {
        if ids.is_empty() {
            "* SEARCH\r\n".to_string()
        } else {
            let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            format!("* SEARCH {}\r\n", rendered.join(" "))
        }
    }

    pub fn namespace() -> String {
        // single personal namespace, '.' delimiter; no other/shared namespaces
        "* NAMESPACE ((\"\" \".\")) NIL NIL\r\n".to_string()
    }

    pub fn id() -> String {
        "* ID (\"name\" \"Petrel\" \"vendor\" \"petrel-mail\")\r\n".to_string()
    }

    pub fn enabled() -> String {
        "* ENABLED\r\n".to_string()
    }

    /// Unsolicited FETCH carrying a flag update
    pub fn fetch_flags(seq: u32, uid: Option<u32>, flags: MailFlags) -> String {
        match uid {
            Some(uid) => format!("* {} FETCH (UID {} FLAGS ({}))\r\n", seq, uid, flags.to_imap()),
            None => format!("* {} FETCH (FLAGS ({}))\r\n", seq, flags.to_imap()),
        }
    }

    /// INTERNALDATE format: dd-Mon-yyyy HH:mm:ss +zzzz
    pub fn internal_date(dt: &DateTime<Utc>) -> String {
        dt.format("%d-%b-%Y %H:%M:%S %z").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tagged_responses() {
        assert_eq!(ImapResponse::ok("a1", "done"), "a1 OK done\r\n");
        assert_eq!(ImapResponse::no("a1", "nope"), "a1 NO nope\r\n");
        assert_eq!(ImapResponse::bad("a1", "what"), "a1 BAD what\r\n");
    }

    #[test]
    fn test_search_rendering() {
        assert_eq!(ImapResponse::search(&[]), "* SEARCH\r\n");
        assert_eq!(ImapResponse::search(&[1, 4, 9]), "* SEARCH 1 4 9\r\n");
    }

    #[test]
    fn test_internal_date_format() {
        let dt = Utc.with_ymd_and_hms(2024, 7, 1, 9, 5, 3).unwrap();
        assert_eq!(ImapResponse::internal_date(&dt), "01-Jul-2024 09:05:03 +0000");
    }

    #[test]
    fn test_fetch_flags() {
        let flags = MailFlags {
            seen: true,
            ..Default::default()
        };
        assert_eq!(
            ImapResponse::fetch_flags(3, None, flags),
            "* 3 FETCH (FLAGS (\\Seen))\r\n"
        );
        assert_eq!(
            ImapResponse::fetch_flags(3, Some(17), flags),
            "* 3 FETCH (UID 17 FLAGS (\\Seen))\r\n"
        );
    }

    #[test]
    fn test_status() {
        assert_eq!(
            ImapResponse::status("Drafts", &[("MESSAGES", 2), ("UNSEEN", 1)]),
            "* STATUS \"Drafts\" (MESSAGES 2 UNSEEN 1)\r\n"
        );
    }
}
