//! IMAP command parser
//!
//! A small hand-written tokenizer feeds the command parser: atoms, quoted
//! strings, parenthesized lists and literal markers `{N}`/`{N+}` are
//! first-class tokens, and bracketed fetch sections (which may contain
//! spaces, as in `BODY.PEEK[HEADER.FIELDS (From To)]`) ride along inside a
//! single atom. No regexes, no substring scanning.

use super::command::{
    BodySection, Command, FetchItem, SearchKey, SequenceSet, StoreAction, StoreOp, TaggedCommand,
};
use crate::mime::SectionSuffix;

/// Lexical token of an IMAP command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Atom(String),
    Quoted(String),
    List(Vec<Token>),
    Literal { len: usize, plus: bool },
}

impl Token {
    /// Atom or quoted-string payload
    fn as_astring(&self) -> Option<&str> {
        match self {
            Token::Atom(s) | Token::Quoted(s) => Some(s),
            _ => None,
        }
    }
}

/// Cursor tokenizer over one command line
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn bytes(&self) -> &[u8] {
        self.input.as_bytes()
    }

    fn skip_spaces(&mut self) {
        while self.pos < self.input.len() && self.bytes()[self.pos] == b' ' {
            self.pos += 1;
        }
    }

    /// Remaining unparsed input
    pub fn rest(&mut self) -> &'a str {
        self.skip_spaces();
        &self.input[self.pos..]
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_spaces();
        if self.pos >= self.input.len() {
            return None;
        }
        match self.bytes()[self.pos] {
            b'"' => self.read_quoted(),
            b'(' => self.read_list(),
            b'{' => self.read_literal(),
            b')' => None,
            _ => self.read_atom(),
        }
    }

    fn read_quoted(&mut self) -> Option<Token> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        let mut escaped = false;
        while self.pos < self.input.len() {
            let c = self.input[self.pos..].chars().next()?;
            self.pos += c.len_utf8();
            if escaped {
                value.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return Some(Token::Quoted(value));
            } else {
                value.push(c);
            }
        }
        None // unterminated
    }

    fn read_list(&mut self) -> Option<Token> {
        self.pos += 1; // opening paren
        let mut items = Vec::new();
        loop {
            self.skip_spaces();
            if self.pos >= self.input.len() {
                return None; // unterminated
            }
            if self.bytes()[self.pos] == b')' {
                self.pos += 1;
                return Some(Token::List(items));
            }
            items.push(self.next_token()?);
        }
    }

    fn read_literal(&mut self) -> Option<Token> {
        let close = self.input[self.pos..].find('}')? + self.pos;
        let spec = &self.input[self.pos + 1..close];
        let (digits, plus) = match spec.strip_suffix('+') {
            Some(digits) => (digits, true),
            None => (spec, false),
        };
        let len: usize = digits.parse().ok()?;
        self.pos = close + 1;
        Some(Token::Literal { len, plus })
    }

    /// Atoms run to the next space or paren, but a `[` pulls everything
    /// through its matching `]` into the atom, spaces included.
    fn read_atom(&mut self) -> Option<Token> {
        let start = self.pos;
        let mut bracket_depth = 0usize;
        while self.pos < self.input.len() {
            let b = self.bytes()[self.pos];
            match b {
                b'[' => bracket_depth += 1,
                b']' => bracket_depth = bracket_depth.saturating_sub(1),
                b' ' | b'(' | b')' if bracket_depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(Token::Atom(self.input[start..self.pos].to_string()))
        }
    }
}

/// IMAP command parser
pub struct ImapParser;

impl ImapParser {
    /// Parse one client line. `None` means the line has no recognizable
    /// tag/command shape at all (untagged BAD territory).
    pub fn parse(line: &str) -> Option<TaggedCommand> {
        let line = line.trim();
        let (tag, rest) = line.split_once(' ')?;
        if tag.is_empty() {
            return None;
        }
        let mut rest = rest.trim();

        // UID prefix switches FETCH/STORE/SEARCH/COPY/MOVE/EXPUNGE to UIDs
        let mut uid = false;
        if rest
            .get(..4)
            .map(|p| p.eq_ignore_ascii_case("UID "))
            .unwrap_or(false)
        {
            uid = true;
            rest = rest[4..].trim();
        }

        let (verb, args) = match rest.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (rest, ""),
        };

        let command = Self::parse_command(&verb.to_ascii_uppercase(), args, uid);
        Some(TaggedCommand {
            tag: tag.to_string(),
            command,
        })
    }

    fn parse_command(verb: &str, args: &str, uid: bool) -> Command {
        match verb {
            "CAPABILITY" => Command::Capability,
            "NOOP" => Command::Noop,
            "CHECK" => Command::Check,
            "LOGOUT" => Command::Logout,
            "STARTTLS" => Command::StartTls,
            "ID" => Command::Id,
            "ENABLE" => Command::Enable,
            "NAMESPACE" => Command::Namespace,

            "LOGIN" => Self::parse_login(args),
            "AUTHENTICATE" => Self::parse_authenticate(args),

            "SELECT" => Self::mailbox_arg(args, |mailbox| Command::Select { mailbox }),
            "EXAMINE" => Self::mailbox_arg(args, |mailbox| Command::Examine { mailbox }),
            "CREATE" => Self::mailbox_arg(args, |mailbox| Command::Create { mailbox }),
            "DELETE" => Self::mailbox_arg(args, |mailbox| Command::Delete { mailbox }),
            "RENAME" => Self::parse_rename(args),
            "SUBSCRIBE" => Self::mailbox_arg(args, |mailbox| Command::Subscribe { mailbox }),
            "UNSUBSCRIBE" => Self::mailbox_arg(args, |mailbox| Command::Unsubscribe { mailbox }),
            "LIST" => Self::parse_list(args, false),
            "LSUB" => Self::parse_list(args, true),
            "STATUS" => Self::parse_status(args),
            "APPEND" => Self::parse_append(args),

            "FETCH" => Self::parse_fetch(args, uid),
            "STORE" => Self::parse_store(args, uid),
            "SEARCH" => Self::parse_search(args, uid),
            "COPY" => Self::parse_copy_move(args, uid, true),
            "MOVE" => Self::parse_copy_move(args, uid, false),
            "EXPUNGE" => Self::parse_expunge(args, uid),
            "CLOSE" => Command::Close,
            "UNSELECT" => Command::Unselect,
            "IDLE" => Command::Idle,

            _ => Command::Unknown(verb.to_string()),
        }
    }

    fn mailbox_arg(args: &str, build: impl FnOnce(String) -> Command) -> Command {
        let mut tokens = Tokenizer::new(args);
        match tokens.next_token().as_ref().and_then(Token::as_astring) {
            Some(mailbox) if !mailbox.is_empty() => build(mailbox.to_string()),
            _ => Command::Invalid("Missing mailbox name".to_string()),
        }
    }

    fn parse_login(args: &str) -> Command {
        let mut tokens = Tokenizer::new(args);
        let username = tokens.next_token();
        let password = tokens.next_token();
        match (
            username.as_ref().and_then(Token::as_astring),
            password.as_ref().and_then(Token::as_astring),
        ) {
            (Some(username), Some(password)) => Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => Command::Invalid("Syntax error in LOGIN arguments".to_string()),
        }
    }

    fn parse_authenticate(args: &str) -> Command {
        let mut tokens = Tokenizer::new(args);
        let Some(mechanism) = tokens.next_token().as_ref().and_then(Token::as_astring).map(str::to_string)
        else {
            return Command::Invalid("Syntax error in AUTHENTICATE arguments".to_string());
        };
        let initial = {
            let rest = tokens.rest().trim();
            if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            }
        };
        Command::Authenticate {
            mechanism: mechanism.to_ascii_uppercase(),
            initial,
        }
    }

    fn parse_rename(args: &str) -> Command {
        let mut tokens = Tokenizer::new(args);
        let from = tokens.next_token();
        let to = tokens.next_token();
        match (
            from.as_ref().and_then(Token::as_astring),
            to.as_ref().and_then(Token::as_astring),
        ) {
            (Some(from), Some(to)) => Command::Rename {
                from: from.to_string(),
                to: to.to_string(),
            },
            _ => Command::Invalid("Syntax error in RENAME arguments".to_string()),
        }
    }

    /// LIST / LSUB with RFC 6154 extended syntax: an optional leading
    /// selection-option list and an optional trailing `RETURN (...)`.
    /// Malformed option lists degrade to an unfiltered LIST.
    fn parse_list(args: &str, lsub: bool) -> Command {
        let mut tokens = Tokenizer::new(args);
        let mut special_use_only = false;

        let mut first = tokens.next_token();
        if let Some(Token::List(options)) = &first {
            special_use_only = options
                .iter()
                .filter_map(Token::as_astring)
                .any(|o| o.eq_ignore_ascii_case("SPECIAL-USE"));
            first = tokens.next_token();
        }

        let Some(reference) = first.as_ref().and_then(Token::as_astring).map(str::to_string) else {
            return Command::Invalid("Syntax error in LIST arguments".to_string());
        };
        let Some(pattern) = tokens
            .next_token()
            .as_ref()
            .and_then(Token::as_astring)
            .map(str::to_string)
        else {
            return Command::Invalid("Syntax error in LIST arguments".to_string());
        };

        // RETURN (SPECIAL-USE)
        if let Some(Token::Atom(atom)) = tokens.next_token() {
            if atom.eq_ignore_ascii_case("RETURN") {
                if let Some(Token::List(options)) = tokens.next_token() {
                    special_use_only |= options
                        .iter()
                        .filter_map(Token::as_astring)
                        .any(|o| o.eq_ignore_ascii_case("SPECIAL-USE"));
                }
            }
        }

        if lsub {
            Command::Lsub { reference, pattern }
        } else {
            Command::List {
                reference,
                pattern,
                special_use_only,
            }
        }
    }

    fn parse_status(args: &str) -> Command {
        let mut tokens = Tokenizer::new(args);
        let Some(mailbox) = tokens
            .next_token()
            .as_ref()
            .and_then(Token::as_astring)
            .map(str::to_string)
        else {
            return Command::Invalid("Syntax error in STATUS arguments".to_string());
        };
        let Some(Token::List(items)) = tokens.next_token() else {
            return Command::Invalid("Syntax error in STATUS arguments".to_string());
        };
        Command::Status {
            mailbox,
            items: items
                .iter()
                .filter_map(Token::as_astring)
                .map(|s| s.to_ascii_uppercase())
                .collect(),
        }
    }

    /// APPEND mailbox [(flags)] ["date"] {N[+]}
    fn parse_append(args: &str) -> Command {
        let mut tokens = Tokenizer::new(args);
        let Some(mailbox) = tokens
            .next_token()
            .as_ref()
            .and_then(Token::as_astring)
            .map(str::to_string)
        else {
            return Command::Invalid("Syntax error in APPEND arguments".to_string());
        };

        let mut flags = Vec::new();
        let mut date = None;
        loop {
            match tokens.next_token() {
                Some(Token::List(list)) => {
                    flags = list
                        .iter()
                        .filter_map(Token::as_astring)
                        .map(str::to_string)
                        .collect();
                }
                Some(Token::Quoted(d)) => date = Some(d),
                Some(Token::Literal { len, plus }) => {
                    return Command::Append {
                        mailbox,
                        flags,
                        date,
                        literal_len: len,
                        literal_plus: plus,
                    };
                }
                _ => return Command::Invalid("Missing literal size in APPEND".to_string()),
            }
        }
    }

    fn parse_fetch(args: &str, uid: bool) -> Command {
        let mut tokens = Tokenizer::new(args);
        let Some(Token::Atom(set_token)) = tokens.next_token() else {
            return Command::Invalid("Missing sequence set in FETCH".to_string());
        };
        let Some(set) = SequenceSet::parse(&set_token) else {
            return Command::Invalid("Bad sequence set in FETCH".to_string());
        };

        let mut items = Vec::new();
        let item_tokens = match tokens.next_token() {
            Some(Token::List(list)) => list,
            Some(token) => vec![token],
            None => return Command::Invalid("Missing fetch data items".to_string()),
        };
        for token in item_tokens {
            if let Some(item) = token.as_astring() {
                Self::push_fetch_item(item, &mut items);
            }
        }
        Command::Fetch { set, items, uid }
    }

    /// Parse one data-item atom, expanding the ALL/FAST/FULL macros.
    /// Unrecognized items are ignored.
    fn push_fetch_item(item: &str, items: &mut Vec<FetchItem>) {
        let upper = item.to_ascii_uppercase();
        match upper.as_str() {
            "UID" => items.push(FetchItem::Uid),
            "FLAGS" => items.push(FetchItem::Flags),
            "INTERNALDATE" => items.push(FetchItem::InternalDate),
            "RFC822.SIZE" => items.push(FetchItem::Rfc822Size),
            "ENVELOPE" => items.push(FetchItem::Envelope),
            "BODYSTRUCTURE" | "BODY" => items.push(FetchItem::BodyStructure),
            "RFC822" => items.push(FetchItem::Body {
                section: BodySection::Full,
                peek: false,
            }),
            "ALL" => items.extend([
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
            ]),
            "FAST" => items.extend([
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
            ]),
            "FULL" => items.extend([
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
                FetchItem::BodyStructure,
            ]),
            _ => {
                let (peek, inner) = if let Some(inner) = strip_section(&upper, item, "BODY.PEEK[") {
                    (true, inner)
                } else if let Some(inner) = strip_section(&upper, item, "BODY[") {
                    (false, inner)
                } else {
                    return;
                };
                if let Some(section) = Self::parse_section(inner) {
                    items.push(FetchItem::Body { section, peek });
                }
            }
        }
    }

    fn parse_section(inner: &str) -> Option<BodySection> {
        let inner = inner.trim();
        if inner.is_empty() {
            return Some(BodySection::Full);
        }
        let upper = inner.to_ascii_uppercase();
        if upper == "TEXT" {
            return Some(BodySection::Text);
        }
        if upper == "HEADER" {
            return Some(BodySection::Header);
        }
        if upper.starts_with("HEADER.FIELDS") {
            let open = inner.find('(')?;
            let close = inner.rfind(')')?;
            let fields = inner[open + 1..close]
                .split_whitespace()
                .map(|f| f.trim_matches(['"', '\\']).to_string())
                .filter(|f| !f.is_empty())
                .collect();
            return Some(BodySection::HeaderFields(fields));
        }

        // dotted numeric path with optional .MIME/.HEADER/.TEXT suffix
        let mut parts: Vec<&str> = inner.split('.').collect();
        let mut suffix = None;
        if let Some(last) = parts.last() {
            if let Some(parsed) = SectionSuffix::parse(last) {
                suffix = Some(parsed);
                parts.pop();
            }
        }
        let path: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
        let path = path?;
        if path.is_empty() {
            return None;
        }
        Some(BodySection::Part { path, suffix })
    }

    fn parse_store(args: &str, uid: bool) -> Command {
        let mut tokens = Tokenizer::new(args);
        let Some(Token::Atom(set_token)) = tokens.next_token() else {
            return Command::Invalid("Syntax error in STORE arguments".to_string());
        };
        let Some(set) = SequenceSet::parse(&set_token) else {
            return Command::Invalid("Bad sequence set in STORE".to_string());
        };
        let Some(Token::Atom(action)) = tokens.next_token() else {
            return Command::Invalid("Syntax error in STORE arguments".to_string());
        };

        let upper = action.to_ascii_uppercase();
        let silent = upper.ends_with(".SILENT");
        let base = upper.strip_suffix(".SILENT").unwrap_or(&upper);
        let op = match base {
            "FLAGS" => StoreOp::Set,
            "+FLAGS" => StoreOp::Add,
            "-FLAGS" => StoreOp::Remove,
            _ => return Command::Invalid("Bad STORE action".to_string()),
        };

        let flags = match tokens.next_token() {
            Some(Token::List(list)) => list
                .iter()
                .filter_map(Token::as_astring)
                .map(str::to_string)
                .collect(),
            Some(Token::Atom(flag)) => {
                let mut flags = vec![flag];
                while let Some(Token::Atom(flag)) = tokens.next_token() {
                    flags.push(flag);
                }
                flags
            }
            _ => Vec::new(),
        };

        Command::Store {
            set,
            action: StoreAction { op, silent, flags },
            uid,
        }
    }

    fn parse_search(args: &str, uid: bool) -> Command {
        let mut tokens = Tokenizer::new(args);
        let mut set = None;
        let mut keys = Vec::new();
        let mut pending_not = false;

        let mut first = true;
        while let Some(token) = tokens.next_token() {
            let Some(word) = token.as_astring().map(str::to_string) else {
                continue;
            };
            if first && SequenceSet::looks_like(&word) {
                set = SequenceSet::parse(&word);
                first = false;
                continue;
            }
            first = false;

            let upper = word.to_ascii_uppercase();
            let key = match upper.as_str() {
                "NOT" => {
                    pending_not = true;
                    continue;
                }
                "ALL" => Some(SearchKey::All),
                "DELETED" => Some(if pending_not {
                    SearchKey::NotDeleted
                } else {
                    SearchKey::Deleted
                }),
                "UNDELETED" => Some(SearchKey::NotDeleted),
                "SEEN" => Some(if pending_not {
                    SearchKey::NotSeen
                } else {
                    SearchKey::Seen
                }),
                "UNSEEN" => Some(SearchKey::NotSeen),
                "FLAGGED" => Some(if pending_not {
                    SearchKey::NotFlagged
                } else {
                    SearchKey::Flagged
                }),
                "UNFLAGGED" => Some(SearchKey::NotFlagged),
                "ANSWERED" => Some(if pending_not {
                    SearchKey::NotAnswered
                } else {
                    SearchKey::Answered
                }),
                "UNANSWERED" => Some(SearchKey::NotAnswered),
                "DRAFT" => Some(if pending_not {
                    SearchKey::NotDraft
                } else {
                    SearchKey::Draft
                }),
                "UNDRAFT" => Some(SearchKey::NotDraft),
                "SUBJECT" => tokens
                    .next_token()
                    .as_ref()
                    .and_then(Token::as_astring)
                    .map(|s| SearchKey::Subject(s.to_string())),
                "FROM" => tokens
                    .next_token()
                    .as_ref()
                    .and_then(Token::as_astring)
                    .map(|s| SearchKey::From(s.to_string())),
                // unrecognized criteria are ignored
                _ => None,
            };
            if let Some(key) = key {
                keys.push(key);
            }
            pending_not = false;
        }

        Command::Search { set, keys, uid }
    }

    fn parse_copy_move(args: &str, uid: bool, copy: bool) -> Command {
        let mut tokens = Tokenizer::new(args);
        let Some(Token::Atom(set_token)) = tokens.next_token() else {
            return Command::Invalid("Syntax error".to_string());
        };
        let Some(set) = SequenceSet::parse(&set_token) else {
            return Command::Invalid("Bad sequence set".to_string());
        };
        let Some(mailbox) = tokens
            .next_token()
            .as_ref()
            .and_then(Token::as_astring)
            .map(str::to_string)
        else {
            return Command::Invalid("Missing target mailbox".to_string());
        };
        if copy {
            Command::Copy { set, mailbox, uid }
        } else {
            Command::Move { set, mailbox, uid }
        }
    }

    fn parse_expunge(args: &str, uid: bool) -> Command {
        if uid {
            let args = args.trim();
            if args.is_empty() {
                return Command::Invalid("Missing UID set in UID EXPUNGE".to_string());
            }
            match SequenceSet::parse(args) {
                Some(set) => Command::Expunge { uid_set: Some(set) },
                None => Command::Invalid("Bad UID set in UID EXPUNGE".to_string()),
            }
        } else {
            Command::Expunge { uid_set: None }
        }
    }
}

fn strip_section<'a>(upper: &str, original: &'a str, prefix: &str) -> Option<&'a str> {
    if upper.starts_with(prefix) && upper.ends_with(']') {
        Some(&original[prefix.len()..original.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> TaggedCommand {
        ImapParser::parse(line).unwrap()
    }

    #[test]
    fn test_parse_capability() {
        let cmd = parse("A001 CAPABILITY");
        assert_eq!(cmd.tag, "A001");
        assert_eq!(cmd.command, Command::Capability);
    }

    #[test]
    fn test_parse_no_tag() {
        assert!(ImapParser::parse("CAPABILITY").is_none());
        assert!(ImapParser::parse("").is_none());
    }

    #[test]
    fn test_parse_login_quoted() {
        let cmd = parse(r#"a1 LOGIN "user@example.com" "pass word""#);
        assert_eq!(
            cmd.command,
            Command::Login {
                username: "user@example.com".to_string(),
                password: "pass word".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_login_atoms() {
        let cmd = parse("a1 login bob@example.com secret");
        assert_eq!(
            cmd.command,
            Command::Login {
                username: "bob@example.com".to_string(),
                password: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_select() {
        assert_eq!(
            parse("a2 SELECT INBOX").command,
            Command::Select {
                mailbox: "INBOX".to_string()
            }
        );
        assert_eq!(
            parse(r#"a2 SELECT "My Folder""#).command,
            Command::Select {
                mailbox: "My Folder".to_string()
            }
        );
    }

    #[test]
    fn test_parse_uid_fetch() {
        let cmd = parse("a3 UID FETCH 1:* (FLAGS UID)");
        let Command::Fetch { set, items, uid } = cmd.command else {
            panic!("expected FETCH");
        };
        assert!(uid);
        assert_eq!(set, SequenceSet::parse("1:*").unwrap());
        assert_eq!(items, vec![FetchItem::Flags, FetchItem::Uid]);
    }

    #[test]
    fn test_parse_fetch_body_sections() {
        let cmd = parse("a4 FETCH 1 (UID BODY.PEEK[HEADER.FIELDS (From To Subject)])");
        let Command::Fetch { items, .. } = cmd.command else {
            panic!("expected FETCH");
        };
        assert_eq!(items[0], FetchItem::Uid);
        assert_eq!(
            items[1],
            FetchItem::Body {
                section: BodySection::HeaderFields(vec![
                    "From".to_string(),
                    "To".to_string(),
                    "Subject".to_string()
                ]),
                peek: true,
            }
        );
    }

    #[test]
    fn test_parse_fetch_part_sections() {
        let cmd = parse("a5 FETCH 2 BODY[1.2.MIME]");
        let Command::Fetch { items, .. } = cmd.command else {
            panic!("expected FETCH");
        };
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: BodySection::Part {
                    path: vec![1, 2],
                    suffix: Some(SectionSuffix::Mime),
                },
                peek: false,
            }
        );
    }

    #[test]
    fn test_parse_fetch_full_body() {
        let cmd = parse("a6 FETCH 1 BODY[]");
        let Command::Fetch { items, .. } = cmd.command else {
            panic!("expected FETCH");
        };
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: BodySection::Full,
                peek: false
            }
        );
    }

    #[test]
    fn test_parse_fetch_macros() {
        let Command::Fetch { items, .. } = parse("a7 FETCH 1 ALL").command else {
            panic!("expected FETCH");
        };
        assert_eq!(items.len(), 4);
        assert_eq!(items[3], FetchItem::Envelope);
    }

    #[test]
    fn test_parse_store() {
        let cmd = parse("a8 STORE 1:3 +FLAGS.SILENT (\\Seen \\Deleted)");
        let Command::Store { set, action, uid } = cmd.command else {
            panic!("expected STORE");
        };
        assert!(!uid);
        assert_eq!(set, SequenceSet::parse("1:3").unwrap());
        assert_eq!(action.op, StoreOp::Add);
        assert!(action.silent);
        assert_eq!(action.flags, vec!["\\Seen", "\\Deleted"]);
    }

    #[test]
    fn test_parse_store_bare_flags() {
        let cmd = parse("a9 STORE 2 -FLAGS \\Seen");
        let Command::Store { action, .. } = cmd.command else {
            panic!("expected STORE");
        };
        assert_eq!(action.op, StoreOp::Remove);
        assert!(!action.silent);
        assert_eq!(action.flags, vec!["\\Seen"]);
    }

    #[test]
    fn test_parse_search() {
        let cmd = parse("a10 SEARCH 1:5 NOT DELETED UNSEEN SUBJECT \"hello world\"");
        let Command::Search { set, keys, uid } = cmd.command else {
            panic!("expected SEARCH");
        };
        assert!(!uid);
        assert_eq!(set, SequenceSet::parse("1:5"));
        assert_eq!(
            keys,
            vec![
                SearchKey::NotDeleted,
                SearchKey::NotSeen,
                SearchKey::Subject("hello world".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_search_ignores_unknown() {
        let cmd = parse("a11 SEARCH SINCE 01-Jan-2024 FLAGGED");
        let Command::Search { keys, .. } = cmd.command else {
            panic!("expected SEARCH");
        };
        assert_eq!(keys, vec![SearchKey::Flagged]);
    }

    #[test]
    fn test_parse_append() {
        let cmd = parse("a12 APPEND Drafts (\\Seen) {310}");
        assert_eq!(
            cmd.command,
            Command::Append {
                mailbox: "Drafts".to_string(),
                flags: vec!["\\Seen".to_string()],
                date: None,
                literal_len: 310,
                literal_plus: false,
            }
        );
    }

    #[test]
    fn test_parse_append_literal_plus_with_date() {
        let cmd = parse(r#"a13 APPEND "Sent" (\Seen) "01-Jul-2024 10:00:00 +0000" {14+}"#);
        assert_eq!(
            cmd.command,
            Command::Append {
                mailbox: "Sent".to_string(),
                flags: vec!["\\Seen".to_string()],
                date: Some("01-Jul-2024 10:00:00 +0000".to_string()),
                literal_len: 14,
                literal_plus: true,
            }
        );
    }

    #[test]
    fn test_parse_list_extended() {
        let cmd = parse(r#"a14 LIST (SPECIAL-USE) "" "*""#);
        assert_eq!(
            cmd.command,
            Command::List {
                reference: String::new(),
                pattern: "*".to_string(),
                special_use_only: true,
            }
        );

        let cmd = parse(r#"a15 LIST "" "*" RETURN (SPECIAL-USE)"#);
        assert_eq!(
            cmd.command,
            Command::List {
                reference: String::new(),
                pattern: "*".to_string(),
                special_use_only: true,
            }
        );

        let cmd = parse(r#"a16 LIST "" "%""#);
        assert_eq!(
            cmd.command,
            Command::List {
                reference: String::new(),
                pattern: "%".to_string(),
                special_use_only: false,
            }
        );
    }

    #[test]
    fn test_parse_status() {
        let cmd = parse("a17 STATUS Drafts (MESSAGES unseen)");
        assert_eq!(
            cmd.command,
            Command::Status {
                mailbox: "Drafts".to_string(),
                items: vec!["MESSAGES".to_string(), "UNSEEN".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_uid_expunge() {
        assert_eq!(
            parse("a18 UID EXPUNGE 4:7").command,
            Command::Expunge {
                uid_set: Some(SequenceSet::parse("4:7").unwrap())
            }
        );
        assert_eq!(parse("a19 EXPUNGE").command, Command::Expunge { uid_set: None });
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse("a20 XFROBNICATE now").command,
            Command::Unknown("XFROBNICATE".to_string())
        );
    }
}
