//! Rope-backed text buffer.
//!
//! Every content-changing transaction bumps [`TextBuffer::revision`], whether
//! or not it lands in the undo history and whether or not listeners are told
//! about it. The revision is what document metadata compares against its
//! baseline to decide dirtiness.

use std::ops::Range;

use ropey::Rope;

use crate::history::{Edit, EditKind, History, edit_span};

/// How a primitive mutation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOptions {
    /// Notify change listeners.
    pub emit_change: bool,
    /// Record the change as an undoable step.
    pub add_to_history: bool,
}

impl EditOptions {
    /// A user-visible edit: recorded and announced.
    pub const INTERACTIVE: Self = Self {
        emit_change: true,
        add_to_history: true,
    };

    /// Bulk programmatic work such as loading: silent and not undoable.
    pub const PROGRAMMATIC: Self = Self {
        emit_change: false,
        add_to_history: false,
    };
}

impl Default for EditOptions {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// Payload delivered to change listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocChanged {
    pub revision: u64,
}

/// Callback invoked after an announced mutation.
pub type ChangeListener = Box<dyn Fn(DocChanged) + Send + Sync>;

/// The live editable document.
pub struct TextBuffer {
    rope: Rope,
    revision: u64,
    history: History,
    listeners: Vec<ChangeListener>,
    attached: bool,
    wrap_enabled: bool,
    large_line_safe_mode: bool,
}

impl std::fmt::Debug for TextBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextBuffer")
            .field("len_chars", &self.rope.len_chars())
            .field("revision", &self.revision)
            .field("attached", &self.attached)
            .field("large_line_safe_mode", &self.large_line_safe_mode)
            .finish_non_exhaustive()
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextBuffer {
    /// Creates an empty, attached buffer at revision 0.
    pub fn new() -> Self {
        Self {
            rope: Rope::new(),
            revision: 0,
            history: History::new(),
            listeners: Vec::new(),
            attached: true,
            wrap_enabled: true,
            large_line_safe_mode: false,
        }
    }

    /// Creates a buffer with initial content at revision 0 and no history.
    pub fn with_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            ..Self::new()
        }
    }

    /// Registers a change listener.
    pub fn on_change(&mut self, listener: ChangeListener) {
        self.listeners.push(listener);
    }

    // ==================== Host attachment ====================

    /// Detaches the buffer from its host widget; mutations become no-ops.
    pub fn detach(&mut self) {
        self.attached = false;
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    // ==================== Read side ====================

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    /// Returns the chars in `from..to`, clamped to the document.
    pub fn slice(&self, from: usize, to: usize) -> String {
        let len = self.rope.len_chars();
        let end = to.min(len);
        let start = from.min(end);
        self.rope.slice(start..end).to_string()
    }

    /// Cheap copy of the current content (ropes share structure).
    pub fn snapshot(&self) -> Rope {
        self.rope.clone()
    }

    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    pub fn len_bytes(&self) -> usize {
        self.rope.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    // ==================== Layout flags ====================

    pub fn set_wrap_enabled(&mut self, enabled: bool) {
        self.wrap_enabled = enabled;
    }

    /// Suppresses soft wrapping for documents with pathological line lengths.
    pub fn set_large_line_safe_mode(&mut self, enabled: bool) {
        if self.large_line_safe_mode != enabled {
            tracing::debug!(enabled, "large-line safe mode changed");
        }
        self.large_line_safe_mode = enabled;
    }

    pub fn large_line_safe_mode(&self) -> bool {
        self.large_line_safe_mode
    }

    /// Whether the renderer should soft-wrap lines right now.
    pub fn effective_wrap(&self) -> bool {
        self.wrap_enabled && !self.large_line_safe_mode
    }

    // ==================== Programmatic primitives ====================

    /// Appends `text` at the end of the document.
    ///
    /// A non-history append keeps existing undo steps: nothing before the
    /// end of the document moves.
    pub fn append(&mut self, text: &str, options: EditOptions) -> bool {
        if !self.attached {
            return false;
        }
        if text.is_empty() {
            return true;
        }
        let pos = self.rope.len_chars();
        self.rope.insert(pos, text);
        if options.add_to_history {
            self.history.record(
                Edit::Insert {
                    pos,
                    text: text.to_string(),
                },
                EditKind::Bulk,
            );
        }
        self.commit(options);
        true
    }

    /// Empties the document.
    pub fn reset(&mut self, options: EditOptions) -> bool {
        self.replace_all("", options)
    }

    /// Replaces the whole document with `text`.
    ///
    /// Without history the undo and redo stacks are dropped, since their
    /// positions no longer describe the content.
    pub fn replace_all(&mut self, text: &str, options: EditOptions) -> bool {
        if !self.attached {
            return false;
        }
        if self.rope.len_chars() == 0 && text.is_empty() {
            if !options.add_to_history {
                self.history.clear();
            }
            return true;
        }
        let previous = std::mem::replace(&mut self.rope, Rope::from_str(text));
        if options.add_to_history {
            let mut edits = Vec::with_capacity(2);
            if previous.len_chars() > 0 {
                edits.push(Edit::Delete {
                    pos: 0,
                    text: previous.to_string(),
                });
            }
            if !text.is_empty() {
                edits.push(Edit::Insert {
                    pos: 0,
                    text: text.to_string(),
                });
            }
            self.history.record_group(edits, EditKind::Bulk);
        } else {
            self.history.clear();
        }
        self.commit(options);
        true
    }

    // ==================== Interactive edits ====================

    /// Inserts typed text at `pos`.
    pub fn type_text(&mut self, pos: usize, text: &str) -> bool {
        self.insert_recorded(pos, text, EditKind::Typing)
    }

    /// Inserts pasted text at `pos` as its own undo step.
    pub fn paste(&mut self, pos: usize, text: &str) -> bool {
        self.insert_recorded(pos, text, EditKind::Paste)
    }

    /// Removes `range` as a keystroke deletion.
    pub fn delete_range(&mut self, range: Range<usize>) -> bool {
        self.remove_recorded(range, EditKind::Deletion).is_some()
    }

    /// Removes `range` and returns the removed text for the clipboard.
    pub fn cut(&mut self, range: Range<usize>) -> Option<String> {
        self.remove_recorded(range, EditKind::Cut)
    }

    /// Returns the text in `range`, or `None` for an empty selection.
    pub fn copy(&self, range: Range<usize>) -> Option<String> {
        let text = self.slice(range.start, range.end);
        (!text.is_empty()).then_some(text)
    }

    /// Closes the current undo step (e.g. when the caret jumps elsewhere).
    pub fn break_undo_group(&mut self) {
        self.history.seal();
    }

    fn insert_recorded(&mut self, pos: usize, text: &str, kind: EditKind) -> bool {
        if !self.attached || text.is_empty() {
            return false;
        }
        let pos = pos.min(self.rope.len_chars());
        self.rope.insert(pos, text);
        self.history.record(
            Edit::Insert {
                pos,
                text: text.to_string(),
            },
            kind,
        );
        self.commit(EditOptions::INTERACTIVE);
        true
    }

    fn remove_recorded(&mut self, range: Range<usize>, kind: EditKind) -> Option<String> {
        if !self.attached {
            return None;
        }
        let len = self.rope.len_chars();
        let end = range.end.min(len);
        let start = range.start.min(end);
        if start == end {
            return None;
        }
        let removed = self.rope.slice(start..end).to_string();
        self.rope.remove(start..end);
        self.history.record(
            Edit::Delete {
                pos: start,
                text: removed.clone(),
            },
            kind,
        );
        self.commit(EditOptions::INTERACTIVE);
        Some(removed)
    }

    // ==================== Undo / Redo ====================

    /// Reverts the most recent undo step.
    pub fn undo(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        let Some(group) = self.history.take_undo() else {
            return false;
        };
        for edit in group.edits.iter().rev() {
            self.revert(edit);
        }
        self.history.push_redo(group);
        self.commit(EditOptions::INTERACTIVE);
        true
    }

    /// Re-applies the most recently undone step.
    pub fn redo(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        let Some(group) = self.history.take_redo() else {
            return false;
        };
        for edit in &group.edits {
            self.apply(edit);
        }
        self.history.push_undo_after_redo(group);
        self.commit(EditOptions::INTERACTIVE);
        true
    }

    fn apply(&mut self, edit: &Edit) {
        match edit {
            Edit::Insert { pos, text } => self.rope.insert(*pos, text),
            Edit::Delete { .. } => {
                let (start, end) = edit_span(edit);
                self.rope.remove(start..end);
            }
        }
    }

    fn revert(&mut self, edit: &Edit) {
        match edit {
            Edit::Insert { .. } => {
                let (start, end) = edit_span(edit);
                self.rope.remove(start..end);
            }
            Edit::Delete { pos, text } => self.rope.insert(*pos, text),
        }
    }

    fn commit(&mut self, options: EditOptions) {
        self.revision += 1;
        if options.emit_change {
            let event = DocChanged {
                revision: self.revision,
            };
            for listener in &self.listeners {
                listener(event);
            }
        }
    }
}
