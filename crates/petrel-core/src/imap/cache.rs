//! Per-session ordered view of the selected mailbox
//!
//! Sequence numbers are 1-based positions in the UID-ascending ordering of
//! live entries; they shift on EXPUNGE while UIDs stay put. The view is a
//! snapshot owned by one connection, rebuilt on SELECT and after any
//! mutation that removes entries.

use super::command::{SeqItem, SeqNum, SequenceSet};
use petrel_storage::MailEntry;
use std::collections::HashMap;

/// UID-ascending entry list with a UID → position index
#[derive(Debug, Default)]
pub struct MailboxView {
    entries: Vec<MailEntry>,
    by_uid: HashMap<u32, usize>,
}

impl MailboxView {
    pub fn new(mut entries: Vec<MailEntry>) -> Self {
        entries.sort_by_key(|e| e.uid);
        let by_uid = entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.uid, idx))
            .collect();
        Self { entries, by_uid }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MailEntry] {
        &self.entries
    }

    /// Entry at a 1-based sequence number
    pub fn by_seq(&self, seq: u32) -> Option<&MailEntry> {
        if seq == 0 {
            return None;
        }
        self.entries.get(seq as usize - 1)
    }

    pub fn by_uid(&self, uid: u32) -> Option<&MailEntry> {
        self.by_uid.get(&uid).map(|&idx| &self.entries[idx])
    }

    /// 1-based sequence number of a UID
    pub fn seq_of_uid(&self, uid: u32) -> Option<u32> {
        self.by_uid.get(&uid).map(|&idx| idx as u32 + 1)
    }

    pub fn max_uid(&self) -> u32 {
        self.entries.last().map(|e| e.uid).unwrap_or(0)
    }

    /// Sequence number of the first unseen entry
    pub fn first_unseen_seq(&self) -> Option<u32> {
        self.entries
            .iter()
            .position(|e| !e.flags.seen)
            .map(|idx| idx as u32 + 1)
    }

    /// Propagate a flag update into the snapshot
    pub fn set_flags(&mut self, uid: u32, flags: petrel_common::types::MailFlags) {
        if let Some(&idx) = self.by_uid.get(&uid) {
            self.entries[idx].flags = flags;
        }
    }

    /// Resolve a sequence set against this view. `*` is the highest UID in
    /// UID mode and the view size in sequence mode; reversed ranges are
    /// swapped; numbers that address nothing resolve to nothing.
    pub fn resolve(&self, set: &SequenceSet, uid_mode: bool) -> Vec<MailEntry> {
        let mut result: Vec<MailEntry> = Vec::new();
        let mut seen_uids = std::collections::HashSet::new();

        for item in &set.items {
            match item {
                SeqItem::Single(num) => {
                    let value = self.resolve_num(*num, uid_mode);
                    let entry = if uid_mode {
                        self.by_uid(value)
                    } else {
                        self.by_seq(value)
                    };
                    if let Some(entry) = entry {
                        if seen_uids.insert(entry.uid) {
                            result.push(entry.clone());
                        }
                    }
                }
                SeqItem::Range(a, b) => {
                    let mut start = self.resolve_num(*a, uid_mode);
                    let mut end = self.resolve_num(*b, uid_mode);
                    if start > end {
                        std::mem::swap(&mut start, &mut end);
                    }
                    for (idx, entry) in self.entries.iter().enumerate() {
                        let value = if uid_mode { entry.uid } else { idx as u32 + 1 };
                        if value >= start && value <= end && seen_uids.insert(entry.uid) {
                            result.push(entry.clone());
                        }
                    }
                }
            }
        }

        result.sort_by_key(|e| e.uid);
        result
    }

    fn resolve_num(&self, num: SeqNum, uid_mode: bool) -> u32 {
        match num {
            SeqNum::Value(v) => v,
            SeqNum::Star => {
                if uid_mode {
                    self.max_uid()
                } else {
                    self.len() as u32
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use petrel_common::types::MailFlags;
    use uuid::Uuid;

    fn entry(uid: u32) -> MailEntry {
        MailEntry {
            id: Uuid::new_v4(),
            message_id: format!("<{}@test>", uid),
            mailbox_id: Uuid::nil(),
            uid,
            received_at: Utc::now(),
            flags: MailFlags::default(),
            size: 100,
        }
    }

    fn view() -> MailboxView {
        // deliberately unsorted input: uids 10, 20, 30
        MailboxView::new(vec![entry(30), entry(10), entry(20)])
    }

    #[test]
    fn test_ordering_and_lookup() {
        let view = view();
        assert_eq!(view.len(), 3);
        assert_eq!(view.by_seq(1).unwrap().uid, 10);
        assert_eq!(view.by_seq(3).unwrap().uid, 30);
        assert!(view.by_seq(0).is_none());
        assert!(view.by_seq(4).is_none());
        assert_eq!(view.seq_of_uid(20), Some(2));
        assert_eq!(view.max_uid(), 30);
    }

    #[test]
    fn test_resolve_sequence_mode() {
        let view = view();
        let set = SequenceSet::parse("1:2").unwrap();
        let uids: Vec<u32> = view.resolve(&set, false).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![10, 20]);

        let set = SequenceSet::parse("*").unwrap();
        let uids: Vec<u32> = view.resolve(&set, false).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![30]);
    }

    #[test]
    fn test_resolve_uid_mode() {
        let view = view();
        let set = SequenceSet::parse("10,30").unwrap();
        let uids: Vec<u32> = view.resolve(&set, true).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![10, 30]);

        // range covers uids that do not exist: they resolve to nothing
        let set = SequenceSet::parse("15:25").unwrap();
        let uids: Vec<u32> = view.resolve(&set, true).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![20]);
    }

    #[test]
    fn test_resolve_swapped_range() {
        let view = view();
        let set = SequenceSet::parse("30:10").unwrap();
        let uids: Vec<u32> = view.resolve(&set, true).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![10, 20, 30]);
    }

    #[test]
    fn test_resolve_star_range_uid_mode() {
        let view = view();
        let set = SequenceSet::parse("20:*").unwrap();
        let uids: Vec<u32> = view.resolve(&set, true).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![20, 30]);
    }

    #[test]
    fn test_resolve_dedup() {
        let view = view();
        let set = SequenceSet::parse("1,1:2").unwrap();
        let uids: Vec<u32> = view.resolve(&set, false).iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![10, 20]);
    }

    #[test]
    fn test_undefined_numbers_resolve_empty() {
        let view = view();
        let set = SequenceSet::parse("99").unwrap();
        assert!(view.resolve(&set, true).is_empty());
        assert!(view.resolve(&set, false).is_empty());
    }

    #[test]
    fn test_first_unseen() {
        let mut entries = vec![entry(1), entry(2)];
        entries[0].flags.seen = true;
        let view = MailboxView::new(entries);
        assert_eq!(view.first_unseen_seq(), Some(2));
    }
}
