use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::progress::ThroughputMeter;

/// One record produced by a chunk source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChunkRead {
    /// Decoded text plus cumulative byte progress.
    #[serde(rename_all = "camelCase")]
    Chunk {
        text: String,
        bytes_read_total: u64,
        total_bytes: Option<u64>,
    },
    /// End of stream.
    #[serde(rename_all = "camelCase")]
    Eof {
        bytes_read_total: u64,
        total_bytes: Option<u64>,
    },
}

/// Handle returned when a cross-boundary read stream is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_id: String,
    pub file_path: String,
    pub file_size_bytes: u64,
}

/// Handle returned when a cross-boundary write stream is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStreamStart {
    pub stream_id: String,
    pub file_path: String,
}

/// File named on the command line when the editor was launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchFileArg {
    pub path: String,
    pub exists: bool,
    pub file_size_bytes: Option<u64>,
}

impl LaunchFileArg {
    /// Probes `path` on the local filesystem.
    pub async fn probe(path: impl Into<String>) -> Self {
        let path = path.into();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Self {
                path,
                exists: true,
                file_size_bytes: Some(meta.len()),
            },
            _ => Self {
                path,
                exists: false,
                file_size_bytes: None,
            },
        }
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Load,
    Save,
}

/// Lifecycle phase of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    Idle,
    Loading,
    Saving,
    Cancelling,
    Error,
}

impl TransferPhase {
    fn running(kind: TransferKind) -> Self {
        match kind {
            TransferKind::Load => TransferPhase::Loading,
            TransferKind::Save => TransferPhase::Saving,
        }
    }
}

/// Immutable identity of one transfer, captured when it starts.
///
/// Every asynchronous step carries its token and compares it against the
/// session's active id; a mismatch means a newer transfer took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken {
    pub id: u64,
    pub kind: TransferKind,
}

impl SessionToken {
    pub fn new(id: u64, kind: TransferKind) -> Self {
        Self { id, kind }
    }

    /// Pure staleness check.
    pub fn is_current(self, active_id: Option<u64>) -> bool {
        active_id == Some(self.id)
    }
}

/// Point-in-time view of a session for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: u64,
    pub kind: TransferKind,
    pub phase: TransferPhase,
    pub file_path: String,
    pub transferred: u64,
    pub total: Option<u64>,
    pub safe_mode_engaged: bool,
    pub cancel_requested: bool,
    pub overlay_visible: bool,
    pub elapsed_ms: u64,
    pub bytes_per_second: f64,
}

/// The observable slot for one direction of transfer (thread-safe).
///
/// At most one session is active at a time; [`begin`](Self::begin) replaces
/// whatever was running, and every mutator ignores ids that are no longer
/// active.
pub struct TransferSession {
    kind: TransferKind,
    inner: RwLock<SessionInner>,
    throughput: ThroughputMeter,
}

struct SessionInner {
    id: u64,
    phase: TransferPhase,
    file_path: String,
    transferred: u64,
    total: Option<u64>,
    safe_mode_engaged: bool,
    overlay_visible: bool,
    cancel: CancellationToken,
    started_at: Option<Instant>,
}

impl SessionInner {
    fn idle() -> Self {
        Self {
            id: 0,
            phase: TransferPhase::Idle,
            file_path: String::new(),
            transferred: 0,
            total: None,
            safe_mode_engaged: false,
            overlay_visible: false,
            cancel: CancellationToken::new(),
            started_at: None,
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.id == id && self.phase != TransferPhase::Idle
    }
}

impl TransferSession {
    /// Creates an idle slot.
    pub fn new(kind: TransferKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(SessionInner::idle()),
            throughput: ThroughputMeter::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Starts session `id`, superseding any running one.
    ///
    /// Returns the new session's cancellation token.
    pub fn begin(&self, id: u64, file_path: &str, total: Option<u64>) -> CancellationToken {
        let mut s = self.write();
        // Wake anything still awaiting the superseded session.
        s.cancel.cancel();
        let cancel = CancellationToken::new();
        *s = SessionInner {
            id,
            phase: TransferPhase::running(self.kind),
            file_path: file_path.to_string(),
            transferred: 0,
            total,
            safe_mode_engaged: false,
            overlay_visible: false,
            cancel: cancel.clone(),
            started_at: Some(Instant::now()),
        };
        drop(s);
        self.throughput.reset();
        cancel
    }

    /// Id of the running session, if any.
    pub fn active_id(&self) -> Option<u64> {
        let s = self.read();
        (s.phase != TransferPhase::Idle).then_some(s.id)
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.read().is_current(id)
    }

    /// Flags the running session for cancellation. Nothing stops here; the
    /// transfer notices at its next checkpoint.
    pub fn request_cancel(&self) -> bool {
        let mut s = self.write();
        if !matches!(s.phase, TransferPhase::Loading | TransferPhase::Saving) {
            return false;
        }
        s.cancel.cancel();
        s.phase = TransferPhase::Cancelling;
        true
    }

    /// Updates progress. `total` only overwrites when newly learned.
    pub fn record_progress(&self, id: u64, transferred: u64, total: Option<u64>) -> bool {
        let mut s = self.write();
        if !s.is_current(id) {
            return false;
        }
        s.transferred = transferred;
        if total.is_some() {
            s.total = total;
        }
        drop(s);
        self.throughput.record(transferred);
        true
    }

    /// Engages safe mode; returns `true` only on the first engagement.
    pub fn engage_safe_mode(&self, id: u64) -> bool {
        let mut s = self.write();
        if !s.is_current(id) || s.safe_mode_engaged {
            return false;
        }
        s.safe_mode_engaged = true;
        true
    }

    /// Makes the progress overlay visible; returns `true` if it was hidden.
    pub fn show_overlay(&self, id: u64) -> bool {
        let mut s = self.write();
        if !s.is_current(id) || s.overlay_visible {
            return false;
        }
        s.overlay_visible = true;
        true
    }

    pub fn mark_failed(&self, id: u64) -> bool {
        let mut s = self.write();
        if !s.is_current(id) {
            return false;
        }
        s.phase = TransferPhase::Error;
        true
    }

    /// Drops whatever session is running, cancelling its token.
    ///
    /// The abandoned transfer sees a stale id at its next checkpoint and
    /// bails without touching anything. Returns the abandoned id.
    pub fn abandon(&self) -> Option<u64> {
        let mut s = self.write();
        if s.phase == TransferPhase::Idle {
            return None;
        }
        let id = s.id;
        s.cancel.cancel();
        *s = SessionInner::idle();
        Some(id)
    }

    /// Clears the slot back to idle if `id` still owns it.
    pub fn finish(&self, id: u64) -> bool {
        let mut s = self.write();
        if s.id != id || s.phase == TransferPhase::Idle {
            return false;
        }
        *s = SessionInner::idle();
        true
    }

    pub fn phase(&self) -> TransferPhase {
        self.read().phase
    }

    pub fn safe_mode_engaged(&self) -> bool {
        self.read().safe_mode_engaged
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.read();
        SessionSnapshot {
            id: s.id,
            kind: self.kind,
            phase: s.phase,
            file_path: s.file_path.clone(),
            transferred: s.transferred,
            total: s.total,
            safe_mode_engaged: s.safe_mode_engaged,
            cancel_requested: s.cancel.is_cancelled() && s.phase != TransferPhase::Idle,
            overlay_visible: s.overlay_visible,
            elapsed_ms: s
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            bytes_per_second: self.throughput.bytes_per_second(),
        }
    }
}
