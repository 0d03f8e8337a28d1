//! IMAP command definitions

use crate::mime::SectionSuffix;

/// One endpoint of a sequence-set range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqNum {
    Value(u32),
    /// `*`: the highest UID (UID mode) or the cache size (sequence mode)
    Star,
}

/// One comma-separated element of a sequence set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqItem {
    Single(SeqNum),
    Range(SeqNum, SeqNum),
}

/// RFC 3501 sequence set: `2`, `4:7`, `1,3:5,*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet {
    pub items: Vec<SeqItem>,
}

impl SequenceSet {
    pub fn parse(s: &str) -> Option<Self> {
        let mut items = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            if let Some((start, end)) = part.split_once(':') {
                items.push(SeqItem::Range(parse_seq_num(start)?, parse_seq_num(end)?));
            } else {
                items.push(SeqItem::Single(parse_seq_num(part)?));
            }
        }
        if items.is_empty() {
            None
        } else {
            Some(Self { items })
        }
    }

    /// Whether a token even looks like a sequence set (digits, `*`, `:`, `,`)
    pub fn looks_like(token: &str) -> bool {
        !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_digit() || c == '*' || c == ':' || c == ',')
    }
}

fn parse_seq_num(s: &str) -> Option<SeqNum> {
    let s = s.trim();
    if s == "*" {
        Some(SeqNum::Star)
    } else {
        s.parse().ok().map(SeqNum::Value)
    }
}

/// A `BODY[...]` section specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySection {
    /// `BODY[]` — the whole raw message
    Full,
    /// `BODY[TEXT]` — bytes after the first blank line
    Text,
    /// `BODY[HEADER]` — bytes up to and including the blank line
    Header,
    /// `BODY[HEADER.FIELDS (F1 F2 ...)]`
    HeaderFields(Vec<String>),
    /// `BODY[n.m...]` with optional `.MIME` / `.HEADER` / `.TEXT`
    Part {
        path: Vec<u32>,
        suffix: Option<SectionSuffix>,
    },
}

/// FETCH data item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Uid,
    Flags,
    InternalDate,
    Rfc822Size,
    Envelope,
    BodyStructure,
    Body {
        section: BodySection,
        peek: bool,
    },
}

/// STORE flag operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Set,
    Add,
    Remove,
}

/// Parsed STORE action: `FLAGS`, `+FLAGS`, `-FLAGS`, optionally `.SILENT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAction {
    pub op: StoreOp,
    pub silent: bool,
    pub flags: Vec<String>,
}

/// SEARCH predicate subset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    All,
    Deleted,
    NotDeleted,
    Seen,
    NotSeen,
    Flagged,
    NotFlagged,
    Answered,
    NotAnswered,
    Draft,
    NotDraft,
    Subject(String),
    From(String),
}

/// IMAP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // any state
    Capability,
    Noop,
    Logout,
    StartTls,
    Id,
    Enable,
    Namespace,

    // not authenticated
    Login {
        username: String,
        password: String,
    },
    Authenticate {
        mechanism: String,
        initial: Option<String>,
    },

    // authenticated
    Select {
        mailbox: String,
    },
    Examine {
        mailbox: String,
    },
    Create {
        mailbox: String,
    },
    Delete {
        mailbox: String,
    },
    Rename {
        from: String,
        to: String,
    },
    Subscribe {
        mailbox: String,
    },
    Unsubscribe {
        mailbox: String,
    },
    List {
        reference: String,
        pattern: String,
        special_use_only: bool,
    },
    Lsub {
        reference: String,
        pattern: String,
    },
    Status {
        mailbox: String,
        items: Vec<String>,
    },
    Append {
        mailbox: String,
        flags: Vec<String>,
        date: Option<String>,
        literal_len: usize,
        literal_plus: bool,
    },

    // selected
    Check,
    Fetch {
        set: SequenceSet,
        items: Vec<FetchItem>,
        uid: bool,
    },
    Store {
        set: SequenceSet,
        action: StoreAction,
        uid: bool,
    },
    Search {
        set: Option<SequenceSet>,
        keys: Vec<SearchKey>,
        uid: bool,
    },
    Copy {
        set: SequenceSet,
        mailbox: String,
        uid: bool,
    },
    Move {
        set: SequenceSet,
        mailbox: String,
        uid: bool,
    },
    Expunge {
        uid_set: Option<SequenceSet>,
    },
    Close,
    Unselect,
    Idle,

    /// Recognized verb with malformed arguments
    Invalid(String),
    /// Unrecognized verb
    Unknown(String),
}

/// A parsed client line: tag plus command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCommand {
    pub tag: String,
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_set_parse() {
        assert_eq!(
            SequenceSet::parse("1").unwrap().items,
            vec![SeqItem::Single(SeqNum::Value(1))]
        );
        assert_eq!(
            SequenceSet::parse("*").unwrap().items,
            vec![SeqItem::Single(SeqNum::Star)]
        );
        assert_eq!(
            SequenceSet::parse("2:4").unwrap().items,
            vec![SeqItem::Range(SeqNum::Value(2), SeqNum::Value(4))]
        );
        assert_eq!(
            SequenceSet::parse("1,3:*").unwrap().items,
            vec![
                SeqItem::Single(SeqNum::Value(1)),
                SeqItem::Range(SeqNum::Value(3), SeqNum::Star),
            ]
        );
        assert!(SequenceSet::parse("").is_none());
        assert!(SequenceSet::parse("a:b").is_none());
    }

    #[test]
    fn test_looks_like() {
        assert!(SequenceSet::looks_like("1:3"));
        assert!(SequenceSet::looks_like("*"));
        assert!(SequenceSet::looks_like("1,2,5:9"));
        assert!(!SequenceSet::looks_like("DELETED"));
        assert!(!SequenceSet::looks_like(""));
    }
}
