//! MIME inspection for FETCH
//!
//! Wraps `mail-parser` with the views the IMAP engine needs: the RFC 3501
//! ENVELOPE tuple, the BODYSTRUCTURE tree, raw header/body splitting and
//! sectional extraction by dotted numeric path. Sections are addressed the
//! IMAP way: for a non-multipart message, section 1 is the message itself;
//! for multipart, section n is the n-th child.

use mail_parser::{Address, GetHeader, HeaderName, Message, MessageParser, PartType};

/// `.MIME` / `.HEADER` / `.TEXT` suffix of a section path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionSuffix {
    Mime,
    Header,
    Text,
}

impl SectionSuffix {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "MIME" => Some(SectionSuffix::Mime),
            "HEADER" => Some(SectionSuffix::Header),
            "TEXT" => Some(SectionSuffix::Text),
            _ => None,
        }
    }
}

/// Parsed view over one stored message
pub struct MessageView<'a> {
    raw: &'a [u8],
    parsed: Option<Message<'a>>,
}

impl<'a> MessageView<'a> {
    pub fn parse(raw: &'a [u8]) -> Self {
        Self {
            raw,
            parsed: MessageParser::default().parse(raw),
        }
    }

    pub fn raw(&self) -> &[u8] {
        self.raw
    }

    /// Bytes up to and including the blank line separating headers and body
    pub fn header_section(&self) -> &[u8] {
        match find_body_start(self.raw) {
            Some(start) => &self.raw[..start],
            None => self.raw,
        }
    }

    /// Bytes after the blank line
    pub fn body_section(&self) -> &[u8] {
        match find_body_start(self.raw) {
            Some(start) => &self.raw[start..],
            None => &[],
        }
    }

    /// Unfolded value of a top-level header, original casing preserved
    pub fn raw_header(&self, name: &str) -> Option<String> {
        raw_header_value(self.header_section(), name)
    }

    /// RFC 3501 ENVELOPE tuple: (date subject from sender reply-to to cc bcc
    /// in-reply-to message-id). `message_id` is the stored id, which may have
    /// been synthesized when the header was missing.
    pub fn envelope(&self, message_id: &str) -> String {
        let Some(message) = &self.parsed else {
            return "(NIL NIL NIL NIL NIL NIL NIL NIL NIL NIL)".to_string();
        };

        let date = self
            .raw_header("Date")
            .map(|d| quoted(&d))
            .unwrap_or_else(nil);
        let subject = message
            .subject()
            .map(quoted)
            .unwrap_or_else(nil);
        let from = address_list(message.from());
        // sender/reply-to default to from when not present
        let sender = message
            .sender()
            .map(|a| format_addresses(a))
            .unwrap_or_else(|| from.clone());
        let reply_to = message
            .reply_to()
            .map(|a| format_addresses(a))
            .unwrap_or_else(|| from.clone());
        let to = address_list(message.to());
        let cc = address_list(message.cc());
        let bcc = address_list(message.bcc());
        let in_reply_to = self
            .raw_header("In-Reply-To")
            .map(|v| quoted(&v))
            .unwrap_or_else(nil);
        let message_id = quoted(message_id);

        format!(
            "({} {} {} {} {} {} {} {} {} {})",
            date, subject, from, sender, reply_to, to, cc, bcc, in_reply_to, message_id
        )
    }

    /// BODYSTRUCTURE computed from the MIME tree
    pub fn body_structure(&self) -> String {
        match &self.parsed {
            Some(message) => {
                let mut out = String::new();
                self.write_structure(message, 0, &mut out);
                out
            }
            None => format!(
                "(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" {} 0)",
                self.body_section().len()
            ),
        }
    }

    fn write_structure(&self, message: &Message<'_>, part_id: usize, out: &mut String) {
        let Some(part) = message.parts.get(part_id) else {
            return;
        };

        if let PartType::Multipart(children) = &part.body {
            out.push('(');
            for &child in children {
                self.write_structure(message, child, out);
            }
            let subtype = part
                .headers
                .header_value(&HeaderName::ContentType)
                .and_then(|h| h.as_content_type())
                .and_then(|ct| ct.subtype())
                .unwrap_or("MIXED")
                .to_ascii_uppercase();
            out.push_str(&format!(" \"{}\" NIL NIL NIL)", subtype));
            return;
        }

        let content_type = part
            .headers
            .header_value(&HeaderName::ContentType)
            .and_then(|h| h.as_content_type());
        let (ctype, subtype) = match &content_type {
            Some(ct) => (
                ct.ctype().to_ascii_uppercase(),
                ct.subtype().unwrap_or("PLAIN").to_ascii_uppercase(),
            ),
            None => ("TEXT".to_string(), "PLAIN".to_string()),
        };
        let charset = content_type
            .as_ref()
            .and_then(|ct| ct.attribute("charset"))
            .unwrap_or("UTF-8")
            .to_ascii_uppercase();
        let encoding = part
            .headers
            .header_value(&HeaderName::ContentTransferEncoding)
            .and_then(|h| h.as_text())
            .unwrap_or("7BIT")
            .to_ascii_uppercase();

        let body = self
            .raw
            .get(part.offset_body..part.offset_end)
            .unwrap_or(&[]);

        out.push_str(&format!(
            "(\"{}\" \"{}\" (\"CHARSET\" \"{}\") NIL NIL \"{}\" {}",
            ctype,
            subtype,
            charset,
            encoding,
            body.len()
        ));
        if ctype == "TEXT" {
            out.push_str(&format!(" {}", count_lines(body)));
        }
        out.push(')');
    }

    /// Extract a section by dotted numeric path with an optional suffix.
    /// `None` when the section does not resolve; the caller turns that into
    /// an empty literal rather than failing the FETCH.
    pub fn section(&self, path: &[u32], suffix: Option<SectionSuffix>) -> Option<Vec<u8>> {
        let message = self.parsed.as_ref()?;
        let part_id = self.navigate(message, path)?;
        let part = message.parts.get(part_id)?;

        let bytes = match suffix {
            Some(SectionSuffix::Mime) | Some(SectionSuffix::Header) => self
                .raw
                .get(part.offset_header..part.offset_body)?
                .to_vec(),
            Some(SectionSuffix::Text) | None => {
                self.raw.get(part.offset_body..part.offset_end)?.to_vec()
            }
        };
        Some(bytes)
    }

    /// Walk the dotted path. For a non-multipart part, index 1 addresses the
    /// part itself.
    fn navigate(&self, message: &Message<'_>, path: &[u32]) -> Option<usize> {
        let mut current = 0usize;
        for &idx in path {
            if idx == 0 {
                return None;
            }
            match &message.parts.get(current)?.body {
                PartType::Multipart(children) => {
                    current = *children.get(idx as usize - 1)?;
                }
                _ => {
                    if idx == 1 {
                        return Some(current);
                    }
                    return None;
                }
            }
        }
        Some(current)
    }
}

fn find_body_start(raw: &[u8]) -> Option<usize> {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 2))
}

fn count_lines(body: &[u8]) -> usize {
    if body.is_empty() {
        return 0;
    }
    body.iter().filter(|&&b| b == b'\n').count()
        + if body.last() == Some(&b'\n') { 0 } else { 1 }
}

fn nil() -> String {
    "NIL".to_string()
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", escape_quoted(s))
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn address_list(address: Option<&Address<'_>>) -> String {
    match address {
        Some(address) => format_addresses(address),
        None => nil(),
    }
}

/// RFC 3501 address list: ((personal NIL mailbox host) ...)
fn format_addresses(address: &Address<'_>) -> String {
    let mut quads = String::new();
    match address {
        Address::List(list) => {
            for addr in list {
                push_quad(&mut quads, addr.name.as_deref(), addr.address.as_deref());
            }
        }
        Address::Group(groups) => {
            for group in groups {
                for addr in &group.addresses {
                    push_quad(&mut quads, addr.name.as_deref(), addr.address.as_deref());
                }
            }
        }
    }
    if quads.is_empty() {
        nil()
    } else {
        format!("({})", quads)
    }
}

fn push_quad(out: &mut String, personal: Option<&str>, address: Option<&str>) {
    let personal = personal
        .map(quoted)
        .unwrap_or_else(nil);
    let (mailbox, host) = match address {
        Some(addr) => match addr.split_once('@') {
            Some((local, domain)) => (local.to_string(), domain.to_string()),
            None => (addr.to_string(), String::new()),
        },
        None => (String::new(), String::new()),
    };
    out.push_str(&format!(
        "({} NIL \"{}\" \"{}\")",
        personal,
        escape_quoted(&mailbox),
        escape_quoted(&host)
    ));
}

/// Unfolded value of a header inside a raw header section
fn raw_header_value(headers: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(headers);
    let mut value: Option<String> = None;

    for line in text.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\r', '\n']);
        if stripped.is_empty() {
            break;
        }
        let continuation = stripped.starts_with(' ') || stripped.starts_with('\t');
        if continuation {
            if let Some(v) = value.as_mut() {
                v.push(' ');
                v.push_str(stripped.trim());
            }
            continue;
        }
        if value.is_some() {
            break;
        }
        if let Some((header_name, header_value)) = stripped.split_once(':') {
            if header_name.trim().eq_ignore_ascii_case(name) {
                value = Some(header_value.trim().to_string());
            }
        }
    }
    value
}

/// Keep only the requested headers, preserving original order and folding.
/// Continuation lines travel with their leading header line. The result ends
/// with the section-terminating blank line.
pub fn filter_headers(headers: &[u8], requested: &[String]) -> Vec<u8> {
    if requested.is_empty() {
        return headers.to_vec();
    }
    let wanted: Vec<String> = requested.iter().map(|f| f.to_ascii_lowercase()).collect();
    let text = String::from_utf8_lossy(headers);

    let mut out = String::new();
    let mut current_block = String::new();
    let mut current_wanted = false;

    for line in text.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\r', '\n']);
        if stripped.is_empty() {
            break;
        }
        let continuation = stripped.starts_with(' ') || stripped.starts_with('\t');
        if continuation {
            if current_wanted {
                current_block.push_str(stripped);
                current_block.push_str("\r\n");
            }
            continue;
        }

        if current_wanted {
            out.push_str(&current_block);
        }
        current_block.clear();
        current_wanted = false;

        if let Some((name, _)) = stripped.split_once(':') {
            if wanted.iter().any(|w| w == &name.trim().to_ascii_lowercase()) {
                current_wanted = true;
                current_block.push_str(stripped);
                current_block.push_str("\r\n");
            }
        }
    }
    if current_wanted {
        out.push_str(&current_block);
    }

    out.push_str("\r\n");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"Date: Mon, 1 Jul 2024 10:00:00 +0000\r\n\
Message-ID: <simple@example.com>\r\n\
From: Alice Example <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: a plain note\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
line one\r\n\
line two\r\n";

    const MULTIPART: &[u8] = b"From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: with attachment\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=us-ascii\r\n\
\r\n\
the text part\r\n\
--XYZ\r\n\
Content-Type: application/octet-stream\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAEC\r\n\
--XYZ--\r\n";

    #[test]
    fn test_header_body_split() {
        let view = MessageView::parse(SIMPLE);
        assert!(view.header_section().ends_with(b"charset=utf-8\r\n\r\n"));
        assert_eq!(view.body_section(), b"line one\r\nline two\r\n");
    }

    #[test]
    fn test_raw_header() {
        let view = MessageView::parse(SIMPLE);
        assert_eq!(
            view.raw_header("date").as_deref(),
            Some("Mon, 1 Jul 2024 10:00:00 +0000")
        );
        assert_eq!(view.raw_header("x-missing"), None);
    }

    #[test]
    fn test_envelope() {
        let view = MessageView::parse(SIMPLE);
        let envelope = view.envelope("<simple@example.com>");
        assert!(envelope.starts_with("(\"Mon, 1 Jul 2024 10:00:00 +0000\""));
        assert!(envelope.contains("\"a plain note\""));
        assert!(envelope.contains("((\"Alice Example\" NIL \"alice\" \"example.com\"))"));
        assert!(envelope.contains("((NIL NIL \"bob\" \"example.com\"))"));
        assert!(envelope.ends_with("NIL \"<simple@example.com>\")"));
    }

    #[test]
    fn test_body_structure_simple() {
        let view = MessageView::parse(SIMPLE);
        let structure = view.body_structure();
        assert!(structure.starts_with("(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\")"));
        assert!(structure.contains("\"7BIT\""));
        // two body lines
        assert!(structure.ends_with(" 2)"));
    }

    #[test]
    fn test_body_structure_multipart() {
        let view = MessageView::parse(MULTIPART);
        let structure = view.body_structure();
        assert!(structure.starts_with("(("));
        assert!(structure.contains("\"TEXT\" \"PLAIN\""));
        assert!(structure.contains("\"APPLICATION\" \"OCTET-STREAM\""));
        assert!(structure.contains("\"BASE64\""));
        assert!(structure.ends_with("\"MIXED\" NIL NIL NIL)"));
    }

    #[test]
    fn test_section_sizes_match_structure() {
        let view = MessageView::parse(MULTIPART);
        let text = view.section(&[1], None).unwrap();
        let structure = view.body_structure();
        assert!(structure.contains(&format!("\"US-ASCII\") NIL NIL \"7BIT\" {}", text.len())));
    }

    #[test]
    fn test_section_navigation() {
        let view = MessageView::parse(MULTIPART);
        assert!(view.section(&[1], None).unwrap().starts_with(b"the text part"));
        assert!(view.section(&[2], None).unwrap().starts_with(b"AAEC"));
        assert!(view.section(&[3], None).is_none());

        let mime = view.section(&[2], Some(SectionSuffix::Mime)).unwrap();
        assert!(mime.starts_with(b"Content-Type: application/octet-stream"));
        assert!(mime.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_section_one_of_non_multipart_is_self() {
        let view = MessageView::parse(SIMPLE);
        assert_eq!(view.section(&[1], None).unwrap(), b"line one\r\nline two\r\n");
        assert!(view.section(&[2], None).is_none());
    }

    #[test]
    fn test_filter_headers_preserves_folding() {
        let headers = b"Subject: folded\r\n over two lines\r\nFrom: a@b.c\r\nTo: d@e.f\r\n\r\n";
        let filtered = filter_headers(headers, &["subject".to_string()]);
        assert_eq!(
            filtered,
            b"Subject: folded\r\n over two lines\r\n\r\n".to_vec()
        );

        let filtered = filter_headers(headers, &["TO".to_string(), "FROM".to_string()]);
        assert_eq!(filtered, b"From: a@b.c\r\nTo: d@e.f\r\n\r\n".to_vec());
    }

    #[test]
    fn test_filter_headers_empty_request_returns_all() {
        let headers = b"From: a@b.c\r\n\r\n";
        assert_eq!(filter_headers(headers, &[]), headers.to_vec());
    }
}
