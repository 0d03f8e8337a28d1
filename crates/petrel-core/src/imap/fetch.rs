//! FETCH data-item assembly
//!
//! Pure assembly: the handler resolves the entries and loads the raw blob
//! when needed; this module renders one `* <seq> FETCH (...)` response with
//! exact byte-counted literals and reports whether the fetch must set
//! `\Seen` (a non-PEEK BODY[] or BODY[TEXT]).

use super::command::{BodySection, FetchItem};
use super::response::ImapResponse;
use crate::mime::{filter_headers, MessageView, SectionSuffix};
use petrel_storage::MailEntry;

/// Whether any requested item needs the raw message bytes
pub fn needs_raw(items: &[FetchItem]) -> bool {
    items.iter().any(|item| {
        matches!(
            item,
            FetchItem::Envelope | FetchItem::BodyStructure | FetchItem::Body { .. }
        )
    })
}

/// Render one FETCH response. Returns the wire bytes and the `\Seen` side
/// effect flag.
pub fn render_fetch(
    entry: &MailEntry,
    seq: u32,
    items: &[FetchItem],
    uid_mode: bool,
    raw: Option<&[u8]>,
) -> (Vec<u8>, bool) {
    let view = raw.map(MessageView::parse);
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut set_seen = false;

    // UID FETCH responses always carry the UID
    if uid_mode && !items.contains(&FetchItem::Uid) {
        chunks.push(format!("UID {}", entry.uid).into_bytes());
    }

    for item in items {
        match item {
            FetchItem::Uid => chunks.push(format!("UID {}", entry.uid).into_bytes()),
            FetchItem::Flags => {
                chunks.push(format!("FLAGS ({})", entry.flags.to_imap()).into_bytes())
            }
            FetchItem::InternalDate => chunks.push(
                format!(
                    "INTERNALDATE \"{}\"",
                    ImapResponse::internal_date(&entry.received_at)
                )
                .into_bytes(),
            ),
            FetchItem::Rfc822Size => {
                chunks.push(format!("RFC822.SIZE {}", entry.size).into_bytes())
            }
            FetchItem::Envelope => {
                let envelope = match &view {
                    Some(view) => view.envelope(&entry.message_id),
                    None => "(NIL NIL NIL NIL NIL NIL NIL NIL NIL NIL)".to_string(),
                };
                chunks.push(format!("ENVELOPE {}", envelope).into_bytes());
            }
            FetchItem::BodyStructure => {
                let structure = match &view {
                    Some(view) => view.body_structure(),
                    None => format!(
                        "(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" {} 0)",
                        entry.size
                    ),
                };
                chunks.push(format!("BODYSTRUCTURE {}", structure).into_bytes());
            }
            FetchItem::Body { section, peek } => {
                let Some(view) = &view else {
                    continue;
                };
                let (name, bytes) = render_section(view, section);
                if !peek && matches!(section, BodySection::Full | BodySection::Text) {
                    set_seen = true;
                }
                chunks.push(literal_chunk(&name, &bytes));
            }
        }
    }

    let mut response = format!("* {} FETCH (", seq).into_bytes();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            response.push(b' ');
        }
        response.extend_from_slice(chunk);
    }
    response.extend_from_slice(b")\r\n");
    (response, set_seen)
}

fn render_section(view: &MessageView<'_>, section: &BodySection) -> (String, Vec<u8>) {
    match section {
        BodySection::Full => ("BODY[]".to_string(), view.raw().to_vec()),
        BodySection::Text => ("BODY[TEXT]".to_string(), view.body_section().to_vec()),
        BodySection::Header => ("BODY[HEADER]".to_string(), view.header_section().to_vec()),
        BodySection::HeaderFields(fields) => {
            // an empty field list answers as BODY[HEADER]
            let name = if fields.is_empty() {
                "BODY[HEADER]".to_string()
            } else {
                format!("BODY[HEADER.FIELDS ({})]", fields.join(" "))
            };
            (name, filter_headers(view.header_section(), fields))
        }
        BodySection::Part { path, suffix } => {
            // an unresolvable section yields an empty literal, not an error
            let bytes = view.section(path, *suffix).unwrap_or_default();
            (part_section_name(path, *suffix), bytes)
        }
    }
}

fn part_section_name(path: &[u32], suffix: Option<SectionSuffix>) -> String {
    let mut name = path
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".");
    match suffix {
        Some(SectionSuffix::Mime) => name.push_str(".MIME"),
        Some(SectionSuffix::Header) => name.push_str(".HEADER"),
        Some(SectionSuffix::Text) => name.push_str(".TEXT"),
        None => {}
    }
    format!("BODY[{}]", name)
}

/// `name {N}\r\n<bytes>` — the declared length always matches the payload
fn literal_chunk(name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut chunk = format!("{} {{{}}}\r\n", name, bytes.len()).into_bytes();
    chunk.extend_from_slice(bytes);
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use petrel_common::types::MailFlags;
    use uuid::Uuid;

    const RAW: &[u8] = b"Message-ID: <f1@example.com>\r\n\
From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: fetch me\r\n\
\r\n\
body line\r\n";

    fn entry() -> MailEntry {
        MailEntry {
            id: Uuid::new_v4(),
            message_id: "<f1@example.com>".to_string(),
            mailbox_id: Uuid::nil(),
            uid: 7,
            received_at: Utc::now(),
            flags: MailFlags::default(),
            size: RAW.len() as u64,
        }
    }

    #[test]
    fn test_flags_and_uid() {
        let (bytes, seen) = render_fetch(
            &entry(),
            1,
            &[FetchItem::Uid, FetchItem::Flags],
            false,
            None,
        );
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "* 1 FETCH (UID 7 FLAGS ())\r\n"
        );
        assert!(!seen);
    }

    #[test]
    fn test_uid_mode_injects_uid() {
        let (bytes, _) = render_fetch(&entry(), 2, &[FetchItem::Flags], true, None);
        assert!(String::from_utf8(bytes)
            .unwrap()
            .starts_with("* 2 FETCH (UID 7 FLAGS"));
    }

    #[test]
    fn test_full_body_literal_exact() {
        let items = [FetchItem::Body {
            section: BodySection::Full,
            peek: false,
        }];
        let (bytes, seen) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        assert!(seen);

        let text = String::from_utf8_lossy(&bytes);
        let declared = format!("BODY[] {{{}}}\r\n", RAW.len());
        assert!(text.contains(&declared));

        // declared length matches the transmitted bytes exactly
        let start = bytes
            .windows(declared.len())
            .position(|w| w == declared.as_bytes())
            .unwrap()
            + declared.len();
        assert_eq!(&bytes[start..start + RAW.len()], RAW);
    }

    #[test]
    fn test_peek_does_not_set_seen() {
        let items = [FetchItem::Body {
            section: BodySection::Full,
            peek: true,
        }];
        let (_, seen) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        assert!(!seen);
    }

    #[test]
    fn test_header_fields_section_name() {
        let items = [FetchItem::Body {
            section: BodySection::HeaderFields(vec!["From".to_string(), "Subject".to_string()]),
            peek: true,
        }];
        let (bytes, seen) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("BODY[HEADER.FIELDS (From Subject)]"));
        assert!(text.contains("From: alice@example.com\r\n"));
        assert!(text.contains("Subject: fetch me\r\n"));
        assert!(!text.contains("To: bob@example.com"));
        // header fetches never set \Seen
        assert!(!seen);
    }

    #[test]
    fn test_empty_header_fields_answers_as_header() {
        let items = [FetchItem::Body {
            section: BodySection::HeaderFields(Vec::new()),
            peek: true,
        }];
        let (bytes, _) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        assert!(String::from_utf8_lossy(&bytes).contains("BODY[HEADER] {"));
    }

    #[test]
    fn test_body_text_sets_seen() {
        let items = [FetchItem::Body {
            section: BodySection::Text,
            peek: false,
        }];
        let (bytes, seen) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        assert!(seen);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("BODY[TEXT] {11}\r\nbody line\r\n"));
    }

    #[test]
    fn test_unresolvable_part_yields_empty_literal() {
        let items = [FetchItem::Body {
            section: BodySection::Part {
                path: vec![9],
                suffix: None,
            },
            peek: true,
        }];
        let (bytes, _) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        assert!(String::from_utf8_lossy(&bytes).contains("BODY[9] {0}\r\n"));
    }

    #[test]
    fn test_envelope_and_structure() {
        let items = [FetchItem::Envelope, FetchItem::BodyStructure];
        let (bytes, _) = render_fetch(&entry(), 1, &items, false, Some(RAW));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("ENVELOPE (NIL \"fetch me\""));
        assert!(text.contains("BODYSTRUCTURE (\"TEXT\" \"PLAIN\""));
    }
}
