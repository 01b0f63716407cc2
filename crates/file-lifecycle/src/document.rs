use std::sync::{Arc, Mutex, PoisonError};

use wisty_buffer::{DocChanged, TextBuffer};
use wisty_document::{DocumentState, DocumentStore};

/// A text buffer paired with the metadata that tracks it.
///
/// Every change notification from the buffer is forwarded to
/// [`DocumentStore::set_revision`]; silent programmatic edits are reconciled
/// by whoever made them.
pub struct EditorDocument {
    buffer: Mutex<TextBuffer>,
    meta: Arc<DocumentStore>,
}

impl Default for EditorDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorDocument {
    pub fn new() -> Self {
        Self::with_buffer_and_store(TextBuffer::new(), Arc::new(DocumentStore::new()))
    }

    /// Wires `buffer` to `meta`, syncing `meta` to the buffer's revision.
    pub fn with_buffer_and_store(mut buffer: TextBuffer, meta: Arc<DocumentStore>) -> Self {
        let listener_meta = Arc::clone(&meta);
        buffer.on_change(Box::new(move |DocChanged { revision }| {
            listener_meta.set_revision(revision);
        }));
        meta.mark_clean_at(buffer.revision());
        Self {
            buffer: Mutex::new(buffer),
            meta,
        }
    }

    /// Runs `f` with exclusive access to the buffer.
    ///
    /// The lock is synchronous and released before `f`'s result is returned,
    /// so it can never be held across an `.await`.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut TextBuffer) -> R) -> R {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut buffer)
    }

    pub fn metadata(&self) -> &Arc<DocumentStore> {
        &self.meta
    }

    pub fn text(&self) -> String {
        self.with_buffer(|b| b.text())
    }

    pub fn revision(&self) -> u64 {
        self.with_buffer(|b| b.revision())
    }

    pub fn state(&self) -> DocumentState {
        self.meta.snapshot()
    }
}
