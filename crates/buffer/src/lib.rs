//! Text buffer adapter: the live editable document.
//!
//! Programmatic bulk operations (loading, resetting) and interactive edits
//! share one rope and one revision counter but differ in how they are
//! recorded: bulk work takes explicit [`EditOptions`] and normally bypasses
//! both undo history and change notification, while interactive edits are
//! grouped into undo steps by [`UndoGrouper`].

mod buffer;
pub mod history;

pub use buffer::{ChangeListener, DocChanged, EditOptions, TextBuffer};
pub use history::{Edit, EditKind, History, MAX_UNDO_DEPTH, UndoGroup, UndoGrouper};

/// Re-exported so callers can hold buffer snapshots without a direct dependency.
pub use ropey::Rope;
