//! Undo/redo history with boundary-aware grouping.
//!
//! Consecutive typing is merged into one undo step until a word character is
//! followed by whitespace or punctuation; cut, paste and other whole-range
//! operations always get a step of their own.

use std::collections::VecDeque;

/// Maximum number of undo steps retained; the oldest is dropped first.
pub const MAX_UNDO_DEPTH: usize = 1_000;

/// A single recorded change. Positions are char indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Insert { pos: usize, text: String },
    Delete { pos: usize, text: String },
}

impl Edit {
    fn pos(&self) -> usize {
        match self {
            Edit::Insert { pos, .. } | Edit::Delete { pos, .. } => *pos,
        }
    }

    fn text(&self) -> &str {
        match self {
            Edit::Insert { text, .. } | Edit::Delete { text, .. } => text,
        }
    }
}

/// What produced an edit; decides whether it may merge with its neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Keystrokes inserting text.
    Typing,
    /// Keystrokes removing text (backspace/delete).
    Deletion,
    Cut,
    Paste,
    /// Whole-document replacement or a programmatic change recorded on request.
    Bulk,
}

impl EditKind {
    /// Kinds that always form their own undo step.
    pub fn is_isolated(self) -> bool {
        matches!(self, EditKind::Cut | EditKind::Paste | EditKind::Bulk)
    }
}

/// Edits that are undone and redone together.
#[derive(Debug, Clone)]
pub struct UndoGroup {
    pub kind: EditKind,
    pub edits: Vec<Edit>,
    /// A sealed group never accepts further edits.
    pub sealed: bool,
}

impl UndoGroup {
    fn new(kind: EditKind) -> Self {
        Self {
            kind,
            edits: Vec::new(),
            sealed: kind.is_isolated(),
        }
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Moving from a word character to anything else opens a new undo step.
fn opens_boundary(prev: char, next: char) -> bool {
    is_word_char(prev) && !is_word_char(next)
}

/// Decides whether a new edit joins the most recent undo group.
#[derive(Debug)]
pub struct UndoGrouper {
    max_group_edits: usize,
}

impl Default for UndoGrouper {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoGrouper {
    /// Upper bound on keystrokes merged into a single step.
    const MAX_GROUP_EDITS: usize = 100;

    pub fn new() -> Self {
        Self {
            max_group_edits: Self::MAX_GROUP_EDITS,
        }
    }

    pub fn should_group(&self, last: &UndoGroup, edit: &Edit, kind: EditKind) -> bool {
        if kind.is_isolated() || last.sealed || last.kind != kind {
            return false;
        }
        if last.edits.len() >= self.max_group_edits {
            return false;
        }
        let Some(prev) = last.edits.last() else {
            return false;
        };

        match (prev, edit) {
            (Edit::Insert { pos: p, text: pt }, Edit::Insert { pos: c, text: ct }) => {
                if *c != *p + pt.chars().count() {
                    return false;
                }
                match (pt.chars().last(), ct.chars().next()) {
                    (Some(prev_ch), Some(next_ch)) => !opens_boundary(prev_ch, next_ch),
                    _ => false,
                }
            }
            (Edit::Delete { pos: p, text: pt }, Edit::Delete { pos: c, text: ct }) => {
                let backspace = *c + ct.chars().count() == *p;
                let forward = *c == *p;
                if !(backspace || forward) {
                    return false;
                }
                // Order in which the characters were removed.
                let (removed_before, removed_now) = if backspace {
                    (pt.chars().next(), ct.chars().last())
                } else {
                    (pt.chars().last(), ct.chars().next())
                };
                match (removed_before, removed_now) {
                    (Some(prev_ch), Some(next_ch)) => !opens_boundary(prev_ch, next_ch),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// Undo and redo stacks.
#[derive(Debug, Default)]
pub struct History {
    undo: VecDeque<UndoGroup>,
    redo: Vec<UndoGroup>,
    grouper: UndoGrouper,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one edit, merging it into the open group when allowed.
    pub fn record(&mut self, edit: Edit, kind: EditKind) {
        self.redo.clear();
        if let Some(last) = self.undo.back_mut()
            && self.grouper.should_group(last, &edit, kind)
        {
            last.edits.push(edit);
            return;
        }
        let mut group = UndoGroup::new(kind);
        group.edits.push(edit);
        self.push_group(group);
    }

    /// Records several edits as one isolated step.
    pub fn record_group(&mut self, edits: Vec<Edit>, kind: EditKind) {
        if edits.is_empty() {
            return;
        }
        self.redo.clear();
        let mut group = UndoGroup::new(kind);
        group.sealed = true;
        group.edits = edits;
        self.push_group(group);
    }

    fn push_group(&mut self, group: UndoGroup) {
        if self.undo.len() >= MAX_UNDO_DEPTH {
            self.undo.pop_front();
        }
        self.undo.push_back(group);
    }

    /// Closes the open group so the next edit starts a new step.
    pub fn seal(&mut self) {
        if let Some(last) = self.undo.back_mut() {
            last.sealed = true;
        }
    }

    pub(crate) fn take_undo(&mut self) -> Option<UndoGroup> {
        self.undo.pop_back()
    }

    pub(crate) fn take_redo(&mut self) -> Option<UndoGroup> {
        self.redo.pop()
    }

    pub(crate) fn push_redo(&mut self, mut group: UndoGroup) {
        group.sealed = true;
        self.redo.push(group);
    }

    pub(crate) fn push_undo_after_redo(&mut self, mut group: UndoGroup) {
        group.sealed = true;
        self.push_group(group);
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn last_group(&self) -> Option<&UndoGroup> {
        self.undo.back()
    }
}

/// Char span an edit covers once applied; used when reverting.
pub(crate) fn edit_span(edit: &Edit) -> (usize, usize) {
    let start = edit.pos();
    (start, start + edit.text().chars().count())
}
