use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};
use wisty_document::directory_of;
use wisty_transfer::{
    ChunkSource, HandleChunkSource, HandleSaveSink, LaunchFileArg, LaunchStreamPort,
    LocalChunkSource, LocalSaveSink, SaveSink, SaveStreamPort, SizeDecision,
};

use crate::engine::{LoadReport, SaveReport, TransferEngine};
use crate::error::FileError;

/// UI collaborator consulted by the size gate.
pub trait OpenPrompt: Send + Sync {
    /// Asks whether a file above the soft limit should be opened anyway.
    fn confirm_large_file<'a>(
        &'a self,
        path: &'a str,
        size: u64,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Tells the user a file is above the hard limit.
    fn file_too_large(&self, path: &str, size: u64, limit: u64);
}

/// Answers every confirmation the same way; for headless use.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl OpenPrompt for AutoConfirm {
    fn confirm_large_file<'a>(
        &'a self,
        path: &'a str,
        size: u64,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            info!(path, size, accepted = self.0, "large file confirmation");
            self.0
        })
    }

    fn file_too_large(&self, path: &str, size: u64, limit: u64) {
        warn!(path, size, limit, "file too large to open");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OpenOutcome {
    Opened(LoadReport),
    /// The launch path does not exist; the document is empty and named.
    #[serde(rename_all = "camelCase")]
    Created { file_path: String },
    /// The user declined a large-file confirmation.
    Declined,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SaveOutcome {
    Saved(SaveReport),
    /// Untitled document; the caller should ask for a path and use `save_as`.
    NeedsPath,
    Cancelled,
}

/// New/open/save verbs on top of a [`TransferEngine`].
pub struct FileLifecycle {
    engine: Arc<TransferEngine>,
    launch_port: Option<Arc<dyn LaunchStreamPort>>,
    save_port: Option<Arc<dyn SaveStreamPort>>,
    last_directory: Mutex<Option<String>>,
}

impl FileLifecycle {
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self {
            engine,
            launch_port: None,
            save_port: None,
            last_directory: Mutex::new(None),
        }
    }

    /// Routes launch-argument opens through `port` instead of the local
    /// filesystem.
    pub fn with_launch_port(mut self, port: Arc<dyn LaunchStreamPort>) -> Self {
        self.launch_port = Some(port);
        self
    }

    /// Routes saves through `port` instead of the local filesystem.
    pub fn with_save_port(mut self, port: Arc<dyn SaveStreamPort>) -> Self {
        self.save_port = Some(port);
        self
    }

    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    /// Directory of the last file opened or saved.
    pub fn last_directory(&self) -> Option<String> {
        self.last_directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_directory(&self, file_path: &str) {
        let dir = directory_of(file_path);
        if !dir.is_empty() {
            *self
                .last_directory
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(dir);
        }
    }

    /// Starts an empty untitled document, abandoning any running load.
    pub fn new_file(&self) {
        if self.engine.replace_document(None) {
            info!("new document");
        }
    }

    /// Makes an empty, clean document named `file_path` without reading it.
    pub fn open_missing_at(&self, file_path: &str) {
        if self.engine.replace_document(Some(file_path)) {
            self.remember_directory(file_path);
            info!(path = file_path, "opened missing file as empty document");
        }
    }

    /// Applies the soft/hard size limits. `Ok(false)` means declined.
    async fn size_gate(
        &self,
        file_path: &str,
        size: u64,
        prompt: &dyn OpenPrompt,
    ) -> Result<bool, FileError> {
        let policy = self.engine.tuning().size_policy();
        match policy.evaluate(size) {
            SizeDecision::Accept => Ok(true),
            SizeDecision::Confirm => Ok(prompt.confirm_large_file(file_path, size).await),
            SizeDecision::Reject => {
                prompt.file_too_large(file_path, size, policy.hard_limit_bytes);
                Err(FileError::SizeRejected {
                    path: file_path.to_string(),
                    size,
                    limit: policy.hard_limit_bytes,
                })
            }
        }
    }

    /// Opens a local file after checking its size.
    pub async fn open_path(
        &self,
        file_path: &str,
        prompt: &dyn OpenPrompt,
    ) -> Result<OpenOutcome, FileError> {
        let size = tokio::fs::metadata(file_path).await?.len();
        if !self.size_gate(file_path, size, prompt).await? {
            return Ok(OpenOutcome::Declined);
        }
        let mut source = LocalChunkSource::open(file_path, self.engine.tuning().read_chunk_bytes)
            .await
            .map_err(|e| FileError::transfer(file_path, e))?;
        self.load_from(&mut source, file_path, Some(size)).await
    }

    /// Opens the file the editor was launched with.
    pub async fn open_launch_arg(
        &self,
        arg: &LaunchFileArg,
        prompt: &dyn OpenPrompt,
    ) -> Result<OpenOutcome, FileError> {
        if !arg.exists {
            self.open_missing_at(&arg.path);
            return Ok(OpenOutcome::Created {
                file_path: arg.path.clone(),
            });
        }
        let size = arg.file_size_bytes.unwrap_or(0);
        if !self.size_gate(&arg.path, size, prompt).await? {
            return Ok(OpenOutcome::Declined);
        }

        let read_chunk = self.engine.tuning().read_chunk_bytes;
        match &self.launch_port {
            Some(port) => {
                let mut source = HandleChunkSource::start(Arc::clone(port), &arg.path, read_chunk)
                    .await
                    .map_err(|e| FileError::transfer(&arg.path, e))?;
                self.load_from(&mut source, &arg.path, arg.file_size_bytes)
                    .await
            }
            None => {
                let mut source = LocalChunkSource::open(&arg.path, read_chunk)
                    .await
                    .map_err(|e| FileError::transfer(&arg.path, e))?;
                self.load_from(&mut source, &arg.path, arg.file_size_bytes)
                    .await
            }
        }
    }

    async fn load_from(
        &self,
        source: &mut dyn ChunkSource,
        file_path: &str,
        expected_total: Option<u64>,
    ) -> Result<OpenOutcome, FileError> {
        match self.engine.begin_load(source, file_path, expected_total).await {
            Ok(report) => {
                self.remember_directory(file_path);
                Ok(OpenOutcome::Opened(report))
            }
            Err(e) if e.is_cancelled() => Ok(OpenOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Saves to the document's current path.
    pub async fn save(&self) -> Result<SaveOutcome, FileError> {
        match self.engine.document().metadata().file_path() {
            Some(path) => self.save_as(&path).await,
            None => Ok(SaveOutcome::NeedsPath),
        }
    }

    /// Saves to `file_path` and attaches the document to it.
    pub async fn save_as(&self, file_path: &str) -> Result<SaveOutcome, FileError> {
        let result = match &self.save_port {
            Some(port) => {
                let mut sink = HandleSaveSink::start(Arc::clone(port), file_path)
                    .await
                    .map_err(|e| FileError::transfer(file_path, e))?;
                self.save_into(&mut sink, file_path).await
            }
            None => {
                let mut sink = LocalSaveSink::create(file_path)
                    .await
                    .map_err(|e| FileError::transfer(file_path, e))?;
                self.save_into(&mut sink, file_path).await
            }
        };
        match result {
            Ok(report) => {
                self.remember_directory(file_path);
                Ok(SaveOutcome::Saved(report))
            }
            Err(e) if e.is_cancelled() => Ok(SaveOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    async fn save_into(
        &self,
        sink: &mut dyn SaveSink,
        file_path: &str,
    ) -> Result<SaveReport, FileError> {
        self.engine.begin_save(sink, file_path).await
    }
}
