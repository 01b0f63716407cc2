//! Document metadata: which file a buffer belongs to and whether it is dirty.
//!
//! Dirtiness is never stored. It is always derived by comparing the buffer
//! revision last reported through [`DocumentStore::set_revision`] against the
//! baseline recorded by [`DocumentStore::mark_clean_at`].

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

/// Display name used when no file path is attached.
pub const UNTITLED: &str = "Untitled";

/// Derives a display name from a path, accepting both separator styles.
pub fn file_name_from_path(file_path: &str) -> String {
    file_path
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(UNTITLED)
        .to_string()
}

/// Returns the parent directory of `file_path`, or an empty string for bare
/// names and root-level files.
pub fn directory_of(file_path: &str) -> String {
    let normalized = file_path.replace('\\', "/");
    match normalized.rfind('/') {
        Some(idx) if idx > 0 => normalized[..idx].to_string(),
        _ => String::new(),
    }
}

/// The four states a document can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentStatus {
    UntitledClean,
    UntitledDirty,
    NamedClean,
    NamedDirty,
}

/// Serializable view of the metadata, handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub file_path: Option<String>,
    pub file_name: String,
    pub is_dirty: bool,
    pub current_revision: u64,
    pub baseline_revision: u64,
}

/// Thread-safe metadata store for one document.
#[derive(Debug)]
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    file_path: Option<String>,
    current_revision: u64,
    baseline_revision: u64,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Creates an untitled, clean document at revision 0.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                file_path: None,
                current_revision: 0,
                baseline_revision: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the buffer's latest revision.
    ///
    /// Revisions only move forward; an older value is ignored.
    pub fn set_revision(&self, revision: u64) {
        let mut s = self.write();
        if revision < s.current_revision {
            tracing::debug!(
                revision,
                current = s.current_revision,
                "ignoring out-of-order revision"
            );
            return;
        }
        s.current_revision = revision;
    }

    /// Declares the content at `revision` persisted (or freshly loaded).
    pub fn mark_clean_at(&self, revision: u64) {
        let mut s = self.write();
        s.current_revision = revision;
        s.baseline_revision = revision;
    }

    /// Records that the content at `revision` was written out.
    ///
    /// Unlike [`mark_clean_at`](Self::mark_clean_at) the current revision is
    /// kept if it is newer, so edits made while saving stay dirty.
    pub fn mark_saved_at(&self, revision: u64) {
        let mut s = self.write();
        s.baseline_revision = revision;
        s.current_revision = s.current_revision.max(revision);
    }

    /// Attaches the document to `file_path`.
    pub fn set_file_path(&self, file_path: impl Into<String>) {
        let file_path = file_path.into();
        let mut s = self.write();
        s.file_path = if file_path.is_empty() {
            None
        } else {
            Some(file_path)
        };
    }

    /// Detaches the document from any file.
    pub fn set_untitled(&self) {
        self.write().file_path = None;
    }

    pub fn is_dirty(&self) -> bool {
        let s = self.read();
        s.current_revision != s.baseline_revision
    }

    pub fn file_path(&self) -> Option<String> {
        self.read().file_path.clone()
    }

    pub fn file_name(&self) -> String {
        self.read()
            .file_path
            .as_deref()
            .map(file_name_from_path)
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    pub fn current_revision(&self) -> u64 {
        self.read().current_revision
    }

    pub fn baseline_revision(&self) -> u64 {
        self.read().baseline_revision
    }

    pub fn status(&self) -> DocumentStatus {
        let s = self.read();
        let dirty = s.current_revision != s.baseline_revision;
        match (s.file_path.is_some(), dirty) {
            (false, false) => DocumentStatus::UntitledClean,
            (false, true) => DocumentStatus::UntitledDirty,
            (true, false) => DocumentStatus::NamedClean,
            (true, true) => DocumentStatus::NamedDirty,
        }
    }

    /// Returns a consistent copy of every field.
    pub fn snapshot(&self) -> DocumentState {
        let s = self.read();
        DocumentState {
            file_name: s
                .file_path
                .as_deref()
                .map(file_name_from_path)
                .unwrap_or_else(|| UNTITLED.to_string()),
            file_path: s.file_path.clone(),
            is_dirty: s.current_revision != s.baseline_revision,
            current_revision: s.current_revision,
            baseline_revision: s.baseline_revision,
        }
    }
}
