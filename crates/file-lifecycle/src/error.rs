//! File lifecycle error types.

use serde::Serialize;
use wisty_transfer::TransferError;

/// Errors produced while opening or saving a document.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// The user cancelled, or a newer transfer replaced this one.
    #[error("cancelled")]
    Cancelled,

    #[error("{path} is {size} bytes, at or above the {limit} byte limit")]
    SizeRejected { path: String, size: u64, limit: u64 },

    #[error("transfer of {path} failed: {source}")]
    TransferFailed {
        path: String,
        #[source]
        source: TransferError,
    },

    #[error("buffer operation failed at batch {batch_index} (byte offset {byte_offset}): {reason}")]
    BufferOpFailed {
        batch_index: usize,
        byte_offset: u64,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    pub(crate) fn transfer(path: &str, source: TransferError) -> Self {
        FileError::TransferFailed {
            path: path.to_string(),
            source,
        }
    }

    /// Cancellation is silent: callers return to the editor without a dialog.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FileError::Cancelled)
    }

    /// Classifies the error, using `operation` for everything but cancellation.
    pub fn code(&self, operation: ErrorCode) -> ErrorCode {
        if self.is_cancelled() {
            ErrorCode::Cancelled
        } else {
            operation
        }
    }

    /// Builds the user-facing form of this error.
    pub fn report(&self, operation: ErrorCode, context: impl Into<String>) -> ReportedError {
        ReportedError {
            code: self.code(operation),
            context: context.into(),
            message: self.to_string(),
        }
    }
}

/// Stable codes the UI layer switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    OpenFailed,
    SaveFailed,
    LaunchOpenFailed,
    Cancelled,
}

/// Serializable error handed to the error dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub code: ErrorCode,
    pub context: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_overrides_operation_code() {
        assert_eq!(FileError::Cancelled.code(ErrorCode::OpenFailed), ErrorCode::Cancelled);
        assert!(FileError::Cancelled.is_cancelled());
    }

    #[test]
    fn transfer_failure_keeps_path_and_source() {
        let err = FileError::transfer(
            "/a.txt",
            TransferError::Io(std::io::Error::other("disk gone")),
        );
        assert!(!err.is_cancelled());
        let msg = err.to_string();
        assert!(msg.contains("/a.txt"));
        assert!(msg.contains("disk gone"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn report_serializes_code() {
        let err = FileError::SizeRejected {
            path: "/big.log".into(),
            size: 2,
            limit: 1,
        };
        let report = err.report(ErrorCode::LaunchOpenFailed, "Failed to open launch file");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["code"], "LAUNCH_OPEN_FAILED");
        assert_eq!(json["context"], "Failed to open launch file");
        assert!(json["message"].as_str().unwrap().contains("/big.log"));
    }

    #[test]
    fn buffer_op_failure_names_batch() {
        let err = FileError::BufferOpFailed {
            batch_index: 3,
            byte_offset: 4096,
            reason: "buffer detached".into(),
        };
        assert_eq!(
            err.to_string(),
            "buffer operation failed at batch 3 (byte offset 4096): buffer detached"
        );
    }
}
