//! Chunked load/save engine and the file lifecycle verbs built on it.
//!
//! [`TransferEngine`] moves text between a [`wisty_transfer::ChunkSource`] or
//! [`wisty_transfer::SaveSink`] and an [`EditorDocument`], with cooperative
//! cancellation and stale-session detection. [`FileLifecycle`] adds the size
//! gate, launch-argument handling and path bookkeeping.

pub mod config;
mod document;
mod engine;
pub mod error;
mod lifecycle;

pub use config::TransferTuning;
pub use document::EditorDocument;
pub use engine::{LoadReport, SaveReport, TransferEngine, TransferEvent, TransferOutcome};
pub use error::{ErrorCode, FileError, ReportedError};
pub use lifecycle::{AutoConfirm, FileLifecycle, OpenOutcome, OpenPrompt, SaveOutcome};
