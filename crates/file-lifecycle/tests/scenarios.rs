//! End-to-end load/save scenarios against the public API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use wisty_file_lifecycle::{
    AutoConfirm, EditorDocument, FileError, FileLifecycle, OpenOutcome, SaveOutcome,
    TransferEngine, TransferEvent, TransferTuning,
};
use wisty_transfer::{
    ChunkRead, ChunkSource, SaveSink, TransferError, TransferFuture, TransferPhase,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Calls {
    cancels: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

/// Chunk source fed by the test through a channel.
struct ChannelSource {
    rx: mpsc::UnboundedReceiver<ChunkRead>,
    calls: Calls,
}

fn channel_source() -> (mpsc::UnboundedSender<ChunkRead>, ChannelSource, Calls) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calls = Calls::default();
    (
        tx,
        ChannelSource {
            rx,
            calls: calls.clone(),
        },
        calls,
    )
}

impl ChunkSource for ChannelSource {
    fn next_chunk(&mut self) -> TransferFuture<'_, ChunkRead> {
        Box::pin(async move { self.rx.recv().await.ok_or(TransferError::StreamClosed) })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        self.calls.cancels.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> TransferFuture<'_, ()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> &str {
        "channel"
    }
}

/// Replays a fixed list of chunks, then EOF.
struct VecSource {
    chunks: std::vec::IntoIter<String>,
    total: u64,
}

impl VecSource {
    fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .into_iter(),
            total: 0,
        }
    }
}

impl ChunkSource for VecSource {
    fn next_chunk(&mut self) -> TransferFuture<'_, ChunkRead> {
        Box::pin(async move {
            Ok(match self.chunks.next() {
                Some(text) => {
                    self.total += text.len() as u64;
                    chunk(&text, self.total)
                }
                None => eof(self.total),
            })
        })
    }

    fn close(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> &str {
        "vec"
    }
}

/// Sink whose writes each wait for a permit from the test.
struct GatedSink {
    permits: mpsc::UnboundedReceiver<()>,
    written: Arc<Mutex<String>>,
    cancelled: Arc<AtomicBool>,
}

impl SaveSink for GatedSink {
    fn write<'a>(&'a mut self, text: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            self.permits.recv().await.ok_or(TransferError::StreamClosed)?;
            let mut written = self.written.lock().unwrap();
            written.push_str(text);
            Ok(written.len() as u64)
        })
    }

    fn finish(&mut self) -> TransferFuture<'_, u64> {
        Box::pin(async move { Ok(self.written.lock().unwrap().len() as u64) })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        self.cancelled.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Sink that writes freely but holds `finish` until the test releases it.
struct FinishGatedSink {
    release: mpsc::UnboundedReceiver<()>,
    finishing: Arc<AtomicBool>,
    bytes: u64,
}

impl SaveSink for FinishGatedSink {
    fn write<'a>(&'a mut self, text: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            self.bytes += text.len() as u64;
            Ok(self.bytes)
        })
    }

    fn finish(&mut self) -> TransferFuture<'_, u64> {
        Box::pin(async move {
            self.finishing.store(true, Ordering::SeqCst);
            self.release.recv().await.ok_or(TransferError::StreamClosed)?;
            Ok(self.bytes)
        })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Sink that accepts everything immediately.
#[derive(Default)]
struct OpenSink {
    bytes: u64,
}

impl SaveSink for OpenSink {
    fn write<'a>(&'a mut self, text: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            self.bytes += text.len() as u64;
            Ok(self.bytes)
        })
    }

    fn finish(&mut self) -> TransferFuture<'_, u64> {
        Box::pin(async move { Ok(self.bytes) })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

fn chunk(text: &str, total: u64) -> ChunkRead {
    ChunkRead::Chunk {
        text: text.to_string(),
        bytes_read_total: total,
        total_bytes: None,
    }
}

fn eof(total: u64) -> ChunkRead {
    ChunkRead::Eof {
        bytes_read_total: total,
        total_bytes: Some(total),
    }
}

fn engine_with(tuning: TransferTuning) -> Arc<TransferEngine> {
    Arc::new(TransferEngine::new(Arc::new(EditorDocument::new()), tuning))
}

fn drain(events: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn wait_for_phase(engine: &TransferEngine, phase: TransferPhase) {
    while engine.load_session().phase != phase && engine.save_session().phase != phase {
        tokio::task::yield_now().await;
    }
}

fn path_str(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_small_three_line_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_str(&dir.path().join("three.txt"));
    let line = "x".repeat(681);
    let content = format!("{line}\n{line}\n{line}\n");
    assert_eq!(content.len(), 2046);
    std::fs::write(&path, &content).unwrap();

    let engine = engine_with(TransferTuning::default());
    let mut events = engine.take_events().unwrap();
    let lifecycle = FileLifecycle::new(Arc::clone(&engine));
    assert_eq!(engine.load_session().phase, TransferPhase::Idle);

    let outcome = lifecycle.open_path(&path, &AutoConfirm(true)).await.unwrap();
    let report = match outcome {
        OpenOutcome::Opened(report) => report,
        other => panic!("expected Opened, got {other:?}"),
    };
    assert!(!report.safe_mode);

    let phases: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            TransferEvent::PhaseChanged { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![TransferPhase::Loading, TransferPhase::Idle]);

    let document = engine.document();
    assert_eq!(document.text(), content);
    let state = document.state();
    assert!(!state.is_dirty);
    assert_eq!(state.file_name, "three.txt");
    assert!(!engine.load_session().safe_mode_engaged);
    document.with_buffer(|b| assert_eq!(b.line_count(), 4));
}

#[tokio::test]
async fn open_single_line_file_engages_safe_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_str(&dir.path().join("one-line.txt"));
    let content = "a".repeat(20 * 1024 * 1024);
    std::fs::write(&path, &content).unwrap();

    let engine = engine_with(TransferTuning::default());
    let mut events = engine.take_events().unwrap();
    let lifecycle = FileLifecycle::new(Arc::clone(&engine));

    let outcome = lifecycle.open_path(&path, &AutoConfirm(true)).await.unwrap();
    let report = match outcome {
        OpenOutcome::Opened(report) => report,
        other => panic!("expected Opened, got {other:?}"),
    };
    assert!(report.safe_mode);
    assert_eq!(report.bytes_read, content.len() as u64);

    let engaged = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, TransferEvent::SafeModeEngaged { .. }))
        .count();
    assert_eq!(engaged, 1);

    let document = engine.document();
    assert_eq!(document.text().len(), content.len());
    assert!(document.text() == content);
    document.with_buffer(|b| {
        assert!(b.large_line_safe_mode());
        assert_eq!(b.line_count(), 1);
    });
    assert!(!document.state().is_dirty);
}

#[tokio::test]
async fn cancel_mid_load_reverts_to_untitled() {
    let engine = engine_with(TransferTuning {
        batch_bytes: 4,
        ..TransferTuning::default()
    });
    engine.document().with_buffer(|b| b.type_text(0, "previous"));
    let (tx, source, calls) = channel_source();

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine
                .begin_load(&mut source, "/data/huge.log", Some(500 * 1024 * 1024))
                .await
        })
    };

    tx.send(chunk("partial content", 15)).unwrap();
    while engine.load_session().transferred < 15 {
        tokio::task::yield_now().await;
    }
    assert!(engine.request_cancel());
    let snapshot = engine.load_session();
    assert_eq!(snapshot.phase, TransferPhase::Cancelling);
    assert!(snapshot.cancel_requested);

    // The in-flight read still lands before cancellation is observed.
    tx.send(chunk("more", 19)).unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());

    let document = engine.document();
    assert_eq!(document.text(), "");
    let state = document.state();
    assert_ne!(state.file_path.as_deref(), Some("/data/huge.log"));
    assert!(state.file_path.is_none());
    assert!(!state.is_dirty);
    assert_eq!(calls.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
    assert_eq!(engine.load_session().phase, TransferPhase::Idle);
}

#[tokio::test]
async fn stale_session_chunk_is_dropped() {
    let engine = engine_with(TransferTuning::default());
    let (tx, source, calls) = channel_source();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine.begin_load(&mut source, "/a.txt", None).await
        })
    };
    wait_for_phase(&engine, TransferPhase::Loading).await;
    let first_id = engine.load_session().id;

    let mut second = VecSource::new(&["fresh"]);
    engine.begin_load(&mut second, "/b.txt", None).await.unwrap();
    assert_ne!(engine.load_session().id, first_id);

    // Session 1 finally receives data; it must not reach the buffer.
    tx.send(chunk("stale", 5)).unwrap();
    tx.send(eof(5)).unwrap();
    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());

    let document = engine.document();
    assert_eq!(document.text(), "fresh");
    assert_eq!(document.state().file_path.as_deref(), Some("/b.txt"));
    assert!(!document.state().is_dirty);
    assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batches_apply_in_source_order() {
    let engine = engine_with(TransferTuning {
        batch_bytes: 1024,
        ..TransferTuning::default()
    });
    let mut source = VecSource::new(&["AB", "CD", "EF"]);
    let report = engine.begin_load(&mut source, "/abc.txt", None).await.unwrap();
    assert_eq!(engine.document().text(), "ABCDEF");
    assert_eq!(report.batches, 1);
}

#[tokio::test]
async fn load_then_save_round_trips_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input = path_str(&dir.path().join("in.txt"));
    let output = path_str(&dir.path().join("out.txt"));
    let content = "héllo wörld € 😀 ünïcödé\r\n".repeat(4000);
    std::fs::write(&input, &content).unwrap();

    let engine = engine_with(TransferTuning {
        read_chunk_bytes: 4096,
        batch_bytes: 8192,
        save_slice_chars: 1000,
        ..TransferTuning::default()
    });
    let lifecycle = FileLifecycle::new(Arc::clone(&engine));

    lifecycle.open_path(&input, &AutoConfirm(true)).await.unwrap();
    let outcome = lifecycle.save_as(&output).await.unwrap();
    let report = match outcome {
        SaveOutcome::Saved(report) => report,
        other => panic!("expected Saved, got {other:?}"),
    };
    assert_eq!(report.bytes_written, content.len() as u64);
    assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&output).unwrap());
    assert_eq!(engine.document().state().file_path.as_deref(), Some(output.as_str()));
}

#[tokio::test(start_paused = true)]
async fn overlay_appears_only_for_slow_loads() {
    let engine = engine_with(TransferTuning::default());
    let mut events = engine.take_events().unwrap();

    // Fast load: finishes before the delay, no overlay.
    let mut fast = VecSource::new(&["quick"]);
    engine.begin_load(&mut fast, "/fast.txt", None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, TransferEvent::OverlayShown { .. }))
    );

    // Slow load: still running when the delay elapses.
    let (tx, source, _calls) = channel_source();
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine.begin_load(&mut source, "/slow.txt", None).await
        })
    };
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!engine.load_session().overlay_visible);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(engine.load_session().overlay_visible);

    tx.send(chunk("slow", 4)).unwrap();
    tx.send(eof(4)).unwrap();
    task.await.unwrap().unwrap();

    assert!(!engine.load_session().overlay_visible);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, TransferEvent::OverlayShown { .. }))
    );
}

#[tokio::test]
async fn cancelled_save_leaves_document_dirty() {
    let engine = engine_with(TransferTuning {
        save_slice_chars: 2,
        ..TransferTuning::default()
    });
    let document = Arc::clone(engine.document());
    document.with_buffer(|b| b.type_text(0, "abcdef"));
    assert!(document.state().is_dirty);

    let (permits, permit_rx) = mpsc::unbounded_channel();
    let written = Arc::new(Mutex::new(String::new()));
    let cancelled = Arc::new(AtomicBool::new(false));
    let sink = GatedSink {
        permits: permit_rx,
        written: Arc::clone(&written),
        cancelled: Arc::clone(&cancelled),
    };

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut sink = sink;
            engine.begin_save(&mut sink, "/out.txt").await
        })
    };
    wait_for_phase(&engine, TransferPhase::Saving).await;
    assert!(engine.request_cancel_save());
    assert_eq!(engine.save_session().phase, TransferPhase::Cancelling);

    // Let the in-flight write finish; the next checkpoint stops the save.
    permits.send(()).unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, FileError::Cancelled));

    assert_eq!(written.lock().unwrap().as_str(), "ab");
    assert!(cancelled.load(Ordering::SeqCst));
    let state = document.state();
    assert!(state.is_dirty);
    assert!(state.file_path.is_none());
}

#[tokio::test]
async fn edits_during_save_stay_dirty() {
    let engine = engine_with(TransferTuning {
        save_slice_chars: 3,
        ..TransferTuning::default()
    });
    let document = Arc::clone(engine.document());
    document.with_buffer(|b| b.type_text(0, "abcdef"));

    let (permits, permit_rx) = mpsc::unbounded_channel();
    let written = Arc::new(Mutex::new(String::new()));
    let sink = GatedSink {
        permits: permit_rx,
        written: Arc::clone(&written),
        cancelled: Arc::new(AtomicBool::new(false)),
    };
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut sink = sink;
            engine.begin_save(&mut sink, "/out.txt").await
        })
    };
    wait_for_phase(&engine, TransferPhase::Saving).await;

    document.with_buffer(|b| b.type_text(6, "g"));
    permits.send(()).unwrap();
    permits.send(()).unwrap();
    let report = task.await.unwrap().unwrap();

    // The snapshot taken at the start was written, not the later edit.
    assert_eq!(written.lock().unwrap().as_str(), "abcdef");
    assert_eq!(report.chars_written, 6);
    let state = document.state();
    assert_eq!(state.file_path.as_deref(), Some("/out.txt"));
    assert!(state.is_dirty);
}

#[tokio::test]
async fn revisions_never_decrease() {
    let engine = engine_with(TransferTuning {
        batch_bytes: 2,
        ..TransferTuning::default()
    });
    let document = Arc::clone(engine.document());
    let mut seen = vec![document.state().current_revision];
    let record = |seen: &mut Vec<u64>| {
        let state = document.state();
        assert_eq!(
            state.is_dirty,
            state.current_revision != state.baseline_revision
        );
        seen.push(state.current_revision);
    };

    document.with_buffer(|b| b.type_text(0, "abc"));
    record(&mut seen);
    let mut source = VecSource::new(&["12", "34"]);
    engine.begin_load(&mut source, "/n.txt", None).await.unwrap();
    record(&mut seen);
    document.with_buffer(|b| b.paste(0, "x"));
    record(&mut seen);
    document.with_buffer(|b| b.undo());
    record(&mut seen);
    engine.reset_document(false);
    record(&mut seen);

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
}

#[tokio::test]
async fn missing_file_opened_during_load_keeps_its_name() {
    let engine = engine_with(TransferTuning::default());
    let lifecycle = FileLifecycle::new(Arc::clone(&engine));
    let (tx, source, calls) = channel_source();

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine.begin_load(&mut source, "/data/old.log", None).await
        })
    };
    wait_for_phase(&engine, TransferPhase::Loading).await;

    lifecycle.open_missing_at("/home/u/new.txt");
    assert_eq!(engine.load_session().phase, TransferPhase::Idle);

    // The abandoned load wakes up with data and must bail untouched.
    tx.send(chunk("late", 4)).unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());

    let document = engine.document();
    assert_eq!(document.text(), "");
    let state = document.state();
    assert_eq!(state.file_path.as_deref(), Some("/home/u/new.txt"));
    assert!(!state.is_dirty);
    assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_file_during_load_stays_untitled_and_empty() {
    let engine = engine_with(TransferTuning::default());
    let lifecycle = FileLifecycle::new(Arc::clone(&engine));
    let (tx, source, _calls) = channel_source();

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine.begin_load(&mut source, "/data/old.log", None).await
        })
    };
    tx.send(chunk("first", 5)).unwrap();
    while engine.load_session().transferred < 5 {
        tokio::task::yield_now().await;
    }

    lifecycle.new_file();
    document_typed(&engine, "draft");
    tx.send(chunk("second", 11)).unwrap();
    tx.send(eof(11)).unwrap();
    assert!(task.await.unwrap().unwrap_err().is_cancelled());

    // The user's typing in the new document survives the stale load.
    assert_eq!(engine.document().text(), "draft");
    let state = engine.document().state();
    assert!(state.file_path.is_none());
    assert!(state.is_dirty);
}

fn document_typed(engine: &TransferEngine, text: &str) {
    engine.document().with_buffer(|b| {
        let end = b.len_chars();
        b.type_text(end, text);
    });
}

#[tokio::test]
async fn superseded_save_does_not_commit() {
    let engine = engine_with(TransferTuning::default());
    let document = Arc::clone(engine.document());
    document_typed(&engine, "content");

    let (release, release_rx) = mpsc::unbounded_channel();
    let finishing = Arc::new(AtomicBool::new(false));
    let sink = FinishGatedSink {
        release: release_rx,
        finishing: Arc::clone(&finishing),
        bytes: 0,
    };
    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut sink = sink;
            engine.begin_save(&mut sink, "/first.txt").await
        })
    };
    while !finishing.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }

    let mut second = OpenSink::default();
    engine.begin_save(&mut second, "/second.txt").await.unwrap();
    assert_eq!(document.state().file_path.as_deref(), Some("/second.txt"));

    release.send(()).unwrap();
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, FileError::Cancelled));

    let state = document.state();
    assert_eq!(state.file_path.as_deref(), Some("/second.txt"));
    assert!(!state.is_dirty);
}

#[tokio::test]
async fn cancelled_load_keeps_safe_mode_on_revert() {
    let engine = engine_with(TransferTuning {
        safe_mode_probe_bytes: 8,
        batch_bytes: 4,
        safe_mode_batch_bytes: 2,
        ..TransferTuning::default()
    });
    let (tx, source, _calls) = channel_source();
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine.begin_load(&mut source, "/wide.txt", None).await
        })
    };

    tx.send(chunk("0123456789", 10)).unwrap();
    while !engine.load_session().safe_mode_engaged {
        tokio::task::yield_now().await;
    }
    assert!(engine.request_cancel());
    // A newline now changes nothing; safe mode is sticky.
    tx.send(chunk("\nrest", 15)).unwrap();
    assert!(task.await.unwrap().unwrap_err().is_cancelled());

    let document = engine.document();
    assert_eq!(document.text(), "");
    assert!(document.state().file_path.is_none());
    document.with_buffer(|b| {
        assert!(b.large_line_safe_mode());
        assert!(!b.effective_wrap());
    });
}

#[tokio::test]
async fn cancel_during_final_flush_lets_flush_finish() {
    let engine = engine_with(TransferTuning::default());
    let (tx, source, calls) = channel_source();
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut source = source;
            engine.begin_load(&mut source, "/tail.txt", None).await
        })
    };

    tx.send(chunk("whole tail", 10)).unwrap();
    tx.send(eof(10)).unwrap();
    // The final batch lands in one piece while the load is yielding after it.
    while engine.document().text() != "whole tail" {
        tokio::task::yield_now().await;
    }
    assert!(engine.request_cancel());

    assert!(task.await.unwrap().unwrap_err().is_cancelled());
    let document = engine.document();
    assert_eq!(document.text(), "");
    let state = document.state();
    assert!(state.file_path.is_none());
    assert!(!state.is_dirty);
    assert_eq!(calls.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
}
