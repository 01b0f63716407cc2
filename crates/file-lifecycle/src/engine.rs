//! Cancellable, batched load and save of a document.
//!
//! A load drains a [`ChunkSource`] into the buffer in bounded batches,
//! yielding to the runtime after every flush. A save walks a snapshot of the
//! buffer into a [`SaveSink`] in bounded slices. Both are tracked by a
//! [`TransferSession`] whose id is the only thing that decides whether a step
//! may still touch the document.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wisty_buffer::EditOptions;
use wisty_transfer::{
    ChunkRead, ChunkSource, SaveSink, SessionSnapshot, SessionToken, TransferKind, TransferPhase,
    TransferSession,
};

use crate::config::TransferTuning;
use crate::document::EditorDocument;
use crate::error::FileError;

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    Completed,
    Cancelled,
    /// A newer transfer took over.
    Superseded,
    Failed,
}

/// Best-effort notifications for the UI layer.
///
/// Delivery is lossy; [`TransferEngine::load_session`] and
/// [`TransferEngine::save_session`] are authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    PhaseChanged {
        kind: TransferKind,
        id: u64,
        phase: TransferPhase,
    },
    Progress {
        kind: TransferKind,
        id: u64,
        transferred: u64,
        total: Option<u64>,
    },
    OverlayShown {
        kind: TransferKind,
        id: u64,
    },
    SafeModeEngaged {
        id: u64,
    },
    Finished {
        kind: TransferKind,
        id: u64,
        outcome: TransferOutcome,
    },
}

/// Result of a completed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub file_path: String,
    pub bytes_read: u64,
    pub batches: usize,
    pub safe_mode: bool,
}

/// Result of a completed save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub file_path: String,
    pub chars_written: u64,
    pub bytes_written: u64,
}

/// Why a transfer stopped early.
enum Interrupt {
    Superseded,
    Cancelled,
    Failed(FileError),
}

impl From<Interrupt> for FileError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Superseded | Interrupt::Cancelled => FileError::Cancelled,
            Interrupt::Failed(e) => e,
        }
    }
}

/// Yields owed to the runtime after an append that took `elapsed`.
fn yields_after_append(elapsed: Duration, slow: Duration) -> usize {
    if elapsed >= slow { 2 } else { 1 }
}

fn emit(events: &mpsc::Sender<TransferEvent>, event: TransferEvent) {
    // A full or closed channel only drops a notification.
    let _ = events.try_send(event);
}

// ---------------------------------------------------------------------------
// Session teardown
// ---------------------------------------------------------------------------

/// Owns the overlay timer of one session and clears the session on drop.
struct SessionGuard {
    session: Arc<TransferSession>,
    token: SessionToken,
    events: mpsc::Sender<TransferEvent>,
    timer: CancellationToken,
}

impl SessionGuard {
    fn start(
        session: Arc<TransferSession>,
        token: SessionToken,
        events: mpsc::Sender<TransferEvent>,
        overlay_delay: Duration,
    ) -> Self {
        let timer = CancellationToken::new();
        let stop = timer.clone();
        let timer_session = Arc::clone(&session);
        let timer_events = events.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(overlay_delay) => {
                    if timer_session.show_overlay(token.id) {
                        debug!(session = token.id, kind = ?token.kind, "showing progress overlay");
                        emit(
                            &timer_events,
                            TransferEvent::OverlayShown {
                                kind: token.kind,
                                id: token.id,
                            },
                        );
                    }
                }
            }
        });
        Self {
            session,
            token,
            events,
            timer,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.timer.cancel();
        if self.session.finish(self.token.id) {
            emit(
                &self.events,
                TransferEvent::PhaseChanged {
                    kind: self.token.kind,
                    id: self.token.id,
                    phase: TransferPhase::Idle,
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// TransferEngine
// ---------------------------------------------------------------------------

/// Drives loads and saves for one document.
pub struct TransferEngine {
    document: Arc<EditorDocument>,
    tuning: TransferTuning,
    next_id: AtomicU64,
    /// Generation of the document's current content, bumped by every load
    /// and replacement; a save only rebaselines if it did not move.
    last_load_id: AtomicU64,
    load: Arc<TransferSession>,
    save: Arc<TransferSession>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl TransferEngine {
    pub fn new(document: Arc<EditorDocument>, tuning: TransferTuning) -> Self {
        let (events_tx, events_rx) = mpsc::channel(tuning.event_capacity.max(1));
        Self {
            document,
            tuning,
            next_id: AtomicU64::new(1),
            last_load_id: AtomicU64::new(0),
            load: Arc::new(TransferSession::new(TransferKind::Load)),
            save: Arc::new(TransferSession::new(TransferKind::Save)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn document(&self) -> &Arc<EditorDocument> {
        &self.document
    }

    pub fn tuning(&self) -> &TransferTuning {
        &self.tuning
    }

    pub fn load_session(&self) -> SessionSnapshot {
        self.load.snapshot()
    }

    pub fn save_session(&self) -> SessionSnapshot {
        self.save.snapshot()
    }

    /// Asks the running load to stop at its next checkpoint.
    pub fn request_cancel(&self) -> bool {
        self.request_cancel_on(&self.load)
    }

    /// Asks the running save to stop at its next checkpoint.
    pub fn request_cancel_save(&self) -> bool {
        self.request_cancel_on(&self.save)
    }

    fn request_cancel_on(&self, session: &TransferSession) -> bool {
        let Some(id) = session.active_id() else {
            return false;
        };
        if !session.request_cancel() {
            return false;
        }
        info!(session = id, kind = ?session.kind(), "cancel requested");
        self.emit(TransferEvent::PhaseChanged {
            kind: session.kind(),
            id,
            phase: TransferPhase::Cancelling,
        });
        true
    }

    fn emit(&self, event: TransferEvent) {
        emit(&self.events_tx, event);
    }

    fn next_token(&self, kind: TransferKind) -> SessionToken {
        SessionToken::new(self.next_id.fetch_add(1, Ordering::SeqCst), kind)
    }

    /// Bails if `token` is stale or its session was cancelled.
    fn checkpoint(
        session: &TransferSession,
        token: SessionToken,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        if !token.is_current(session.active_id()) {
            return Err(Interrupt::Superseded);
        }
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    /// Empties the document and leaves it untitled and clean.
    ///
    /// Returns `false` when the buffer rejects the reset (detached); the
    /// metadata is then left alone so it keeps describing the buffer.
    pub fn reset_document(&self, safe_mode: bool) -> bool {
        let reset = self.document.with_buffer(|b| {
            if !b.reset(EditOptions::PROGRAMMATIC) {
                return None;
            }
            b.set_large_line_safe_mode(safe_mode);
            Some(b.revision())
        });
        let Some(revision) = reset else {
            warn!("buffer rejected reset, keeping document metadata");
            return false;
        };
        let meta = self.document.metadata();
        meta.set_untitled();
        meta.mark_clean_at(revision);
        true
    }

    /// Replaces the document with an empty one, optionally named
    /// `file_path`.
    ///
    /// A running load is abandoned rather than cancelled, so it can no longer
    /// revert the new document, and a running save will not commit.
    pub fn replace_document(&self, file_path: Option<&str>) -> bool {
        if let Some(id) = self.load.abandon() {
            info!(session = id, "load abandoned for new document");
            self.emit(TransferEvent::PhaseChanged {
                kind: TransferKind::Load,
                id,
                phase: TransferPhase::Idle,
            });
            self.emit(TransferEvent::Finished {
                kind: TransferKind::Load,
                id,
                outcome: TransferOutcome::Superseded,
            });
        }
        // A fresh generation makes any in-flight save skip its commit.
        let generation = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.last_load_id.store(generation, Ordering::SeqCst);

        if !self.reset_document(false) {
            return false;
        }
        if let Some(path) = file_path {
            self.document.metadata().set_file_path(path);
        }
        true
    }

    // ==================== Load ====================

    /// Replaces the document with the contents of `source`.
    ///
    /// On success the document is named `file_path` and clean. On
    /// cancellation or failure it is left empty, untitled and clean. A load
    /// superseded by a newer one returns [`FileError::Cancelled`] without
    /// touching anything. The source is always closed exactly once.
    pub async fn begin_load(
        &self,
        source: &mut dyn ChunkSource,
        file_path: &str,
        expected_total: Option<u64>,
    ) -> Result<LoadReport, FileError> {
        let token = self.next_token(TransferKind::Load);
        self.last_load_id.store(token.id, Ordering::SeqCst);
        let cancel = self.load.begin(token.id, file_path, expected_total);
        let _guard = SessionGuard::start(
            Arc::clone(&self.load),
            token,
            self.events_tx.clone(),
            self.tuning.overlay_delay(),
        );
        info!(session = token.id, path = file_path, expected_total = ?expected_total, "load started");
        self.emit(TransferEvent::PhaseChanged {
            kind: TransferKind::Load,
            id: token.id,
            phase: TransferPhase::Loading,
        });

        // Provisional state: a failed load never looks dirty or named.
        self.reset_document(false);

        let result = self.run_load(source, token, &cancel, file_path).await;

        if result.is_err()
            && let Err(e) = source.cancel().await
        {
            warn!(session = token.id, path = source.describe(), error = %e, "source cancel failed");
        }
        if let Err(e) = source.close().await {
            warn!(session = token.id, path = source.describe(), error = %e, "source close failed");
        }

        let outcome = match &result {
            Ok(report) => {
                info!(
                    session = token.id,
                    path = file_path,
                    bytes = report.bytes_read,
                    batches = report.batches,
                    safe_mode = report.safe_mode,
                    "load finished"
                );
                TransferOutcome::Completed
            }
            Err(Interrupt::Superseded) => {
                debug!(session = token.id, path = file_path, "load superseded");
                TransferOutcome::Superseded
            }
            Err(Interrupt::Cancelled) => {
                // A load started while the source was closing owns the buffer.
                if self.load.is_current(token.id) {
                    self.reset_document(self.load.safe_mode_engaged());
                }
                info!(session = token.id, path = file_path, "load cancelled");
                TransferOutcome::Cancelled
            }
            Err(Interrupt::Failed(e)) => {
                if self.load.is_current(token.id) {
                    self.reset_document(self.load.safe_mode_engaged());
                    self.load.mark_failed(token.id);
                    self.emit(TransferEvent::PhaseChanged {
                        kind: TransferKind::Load,
                        id: token.id,
                        phase: TransferPhase::Error,
                    });
                }
                error!(session = token.id, path = file_path, error = %e, "load failed");
                TransferOutcome::Failed
            }
        };
        self.emit(TransferEvent::Finished {
            kind: TransferKind::Load,
            id: token.id,
            outcome,
        });

        result.map_err(FileError::from)
    }

    async fn run_load(
        &self,
        source: &mut dyn ChunkSource,
        token: SessionToken,
        cancel: &CancellationToken,
        file_path: &str,
    ) -> Result<LoadReport, Interrupt> {
        let mut pending = String::new();
        let mut batches = 0usize;
        let mut applied_bytes = 0u64;
        let mut decoded_bytes = 0u64;
        let mut seen_newline = false;
        let mut safe_mode = false;

        loop {
            let read = source.next_chunk().await;
            Self::checkpoint(&self.load, token, cancel)?;
            let read = read.map_err(|e| Interrupt::Failed(FileError::transfer(file_path, e)))?;

            match read {
                ChunkRead::Chunk {
                    text,
                    bytes_read_total,
                    total_bytes,
                } => {
                    self.record_load_progress(token, bytes_read_total, total_bytes);

                    if !seen_newline {
                        let newline_at = text.find('\n').map(|idx| decoded_bytes + idx as u64);
                        let unbroken = newline_at.unwrap_or(decoded_bytes + text.len() as u64);
                        if unbroken >= self.tuning.safe_mode_probe_bytes {
                            safe_mode = true;
                            self.engage_safe_mode(token, file_path, unbroken);
                        }
                        seen_newline = newline_at.is_some();
                    }
                    decoded_bytes += text.len() as u64;

                    pending.push_str(&text);
                    if pending.len() >= self.tuning.batch_threshold(safe_mode) {
                        self.flush_batch(&mut pending, token, batches, applied_bytes)
                            .await?;
                        batches += 1;
                        applied_bytes = decoded_bytes;
                    }
                }
                ChunkRead::Eof {
                    bytes_read_total,
                    total_bytes,
                } => {
                    self.record_load_progress(token, bytes_read_total, total_bytes);
                    if !pending.is_empty() {
                        self.flush_batch(&mut pending, token, batches, applied_bytes)
                            .await?;
                        batches += 1;
                    }
                    // A cancel requested during the final flush still wins.
                    Self::checkpoint(&self.load, token, cancel)?;

                    let revision = self.document.with_buffer(|b| b.revision());
                    let meta = self.document.metadata();
                    meta.mark_clean_at(revision);
                    meta.set_file_path(file_path);

                    return Ok(LoadReport {
                        file_path: file_path.to_string(),
                        bytes_read: bytes_read_total,
                        batches,
                        safe_mode,
                    });
                }
            }
        }
    }

    fn record_load_progress(&self, token: SessionToken, transferred: u64, total: Option<u64>) {
        if self.load.record_progress(token.id, transferred, total) {
            self.emit(TransferEvent::Progress {
                kind: TransferKind::Load,
                id: token.id,
                transferred,
                total,
            });
        }
    }

    fn engage_safe_mode(&self, token: SessionToken, file_path: &str, unbroken: u64) {
        if !self.load.engage_safe_mode(token.id) {
            return;
        }
        self.document
            .with_buffer(|b| b.set_large_line_safe_mode(true));
        info!(
            session = token.id,
            path = file_path,
            bytes = unbroken,
            "no newline within probe window, engaging large-line safe mode"
        );
        self.emit(TransferEvent::SafeModeEngaged { id: token.id });
    }

    /// Appends the pending batch silently, then yields to the runtime.
    async fn flush_batch(
        &self,
        pending: &mut String,
        token: SessionToken,
        batch_index: usize,
        byte_offset: u64,
    ) -> Result<(), Interrupt> {
        let started = Instant::now();
        let appended = self
            .document
            .with_buffer(|b| b.append(pending, EditOptions::PROGRAMMATIC));
        if !appended {
            return Err(Interrupt::Failed(FileError::BufferOpFailed {
                batch_index,
                byte_offset,
                reason: "buffer rejected append (detached)".into(),
            }));
        }
        let elapsed = started.elapsed();
        debug!(
            session = token.id,
            batch = batch_index,
            bytes = pending.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "flushed batch"
        );
        pending.clear();

        for _ in 0..yields_after_append(elapsed, self.tuning.slow_append()) {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    // ==================== Save ====================

    /// Writes the document into `sink` and rebaselines it at the revision
    /// that was written.
    ///
    /// On cancellation or failure the sink is cancelled and the document's
    /// metadata is left untouched.
    pub async fn begin_save(
        &self,
        sink: &mut dyn SaveSink,
        file_path: &str,
    ) -> Result<SaveReport, FileError> {
        let token = self.next_token(TransferKind::Save);
        let load_id = self.last_load_id.load(Ordering::SeqCst);
        let (snapshot, revision) = self.document.with_buffer(|b| (b.snapshot(), b.revision()));
        let total_chars = snapshot.len_chars() as u64;

        let cancel = self.save.begin(token.id, file_path, Some(total_chars));
        let _guard = SessionGuard::start(
            Arc::clone(&self.save),
            token,
            self.events_tx.clone(),
            self.tuning.overlay_delay(),
        );
        info!(session = token.id, path = file_path, chars = total_chars, revision, "save started");
        self.emit(TransferEvent::PhaseChanged {
            kind: TransferKind::Save,
            id: token.id,
            phase: TransferPhase::Saving,
        });

        let result = self
            .run_save(sink, &snapshot, token, &cancel, file_path)
            .await
            .and_then(|bytes_written| {
                // A newer save, or a load that started meanwhile, owns the
                // document now.
                if !self.save.is_current(token.id)
                    || self.last_load_id.load(Ordering::SeqCst) != load_id
                {
                    return Err(Interrupt::Superseded);
                }
                let meta = self.document.metadata();
                meta.mark_saved_at(revision);
                meta.set_file_path(file_path);
                Ok(SaveReport {
                    file_path: file_path.to_string(),
                    chars_written: total_chars,
                    bytes_written,
                })
            });

        let outcome = match &result {
            Ok(report) => {
                info!(
                    session = token.id,
                    path = file_path,
                    bytes = report.bytes_written,
                    "save finished"
                );
                TransferOutcome::Completed
            }
            Err(interrupt) => {
                if let Err(e) = sink.cancel().await {
                    warn!(session = token.id, path = file_path, error = %e, "sink cancel failed");
                }
                match interrupt {
                    Interrupt::Superseded => {
                        debug!(session = token.id, path = file_path, "save superseded");
                        TransferOutcome::Superseded
                    }
                    Interrupt::Cancelled => {
                        info!(session = token.id, path = file_path, "save cancelled");
                        TransferOutcome::Cancelled
                    }
                    Interrupt::Failed(e) => {
                        if self.save.mark_failed(token.id) {
                            self.emit(TransferEvent::PhaseChanged {
                                kind: TransferKind::Save,
                                id: token.id,
                                phase: TransferPhase::Error,
                            });
                        }
                        error!(session = token.id, path = file_path, error = %e, "save failed");
                        TransferOutcome::Failed
                    }
                }
            }
        };
        self.emit(TransferEvent::Finished {
            kind: TransferKind::Save,
            id: token.id,
            outcome,
        });

        result.map_err(FileError::from)
    }

    async fn run_save(
        &self,
        sink: &mut dyn SaveSink,
        snapshot: &wisty_buffer::Rope,
        token: SessionToken,
        cancel: &CancellationToken,
        file_path: &str,
    ) -> Result<u64, Interrupt> {
        let total_chars = snapshot.len_chars();
        let slice_chars = self.tuning.save_slice_chars.max(1);
        let mut written = 0usize;

        while written < total_chars {
            Self::checkpoint(&self.save, token, cancel)?;
            let end = (written + slice_chars).min(total_chars);
            let slice = snapshot.slice(written..end).to_string();
            sink.write(&slice)
                .await
                .map_err(|e| Interrupt::Failed(FileError::transfer(file_path, e)))?;
            written = end;

            if self
                .save
                .record_progress(token.id, written as u64, Some(total_chars as u64))
            {
                self.emit(TransferEvent::Progress {
                    kind: TransferKind::Save,
                    id: token.id,
                    transferred: written as u64,
                    total: Some(total_chars as u64),
                });
            }
            tokio::task::yield_now().await;
        }

        Self::checkpoint(&self.save, token, cancel)?;
        let bytes_written = sink
            .finish()
            .await
            .map_err(|e| Interrupt::Failed(FileError::transfer(file_path, e)))?;
        Ok(bytes_written)
    }
}
