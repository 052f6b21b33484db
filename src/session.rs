//! A log session: the set of opened files, their merged index, and the find,
//! filter and follow state layered on top.
//!
//! `Session::open` validates the files and returns immediately. A background
//! coordinator scans every file in parallel, publishes the merged index, and
//! then hands each file to a polling task that keeps its index current.
//!
//! Locks guard index metadata only. When two are held together the merged
//! index is always taken before a file index. Line bytes are read with no
//! lock held, through a shared handle.

pub mod events;
pub mod tail;
mod tasks;

pub use events::{EventBus, EventReceiver, SessionEvent};
pub use tail::{PointerState, TailController, TailState};

use crate::config::{OpenOptions, SessionConfig};
use crate::error::{LogtailError, Result};
use crate::extract::{default_recognizer, Timestamp, TimestampRecognizer};
use crate::file_handler::reader::{read_record_bytes, read_record_text};
use crate::file_handler::{
    validate_file_path, FileId, LineIndex, LineReader, LineRecord, LineScanner,
    LineText, LogFile, ScanState, TextOptions,
};
use crate::merged::MergedIndex;
use crate::search::{
    self, catch_up, FilterEngine, LineMatcher, LineSource, SearchDirection, SearchOptions,
    SearchOutcome,
};
use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Resolution of a global line number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpan {
    pub file: LogFile,
    pub local_line: u64,
    pub record: LineRecord,
}

/// Per-file state shared by the session and its background tasks
#[derive(Debug)]
pub(crate) struct FileSlot {
    pub(crate) file: LogFile,
    pub(crate) index: RwLock<LineIndex>,
    pub(crate) reader: LineReader,
    /// Present while the initial scan runs
    pub(crate) scan_state: Mutex<Option<ScanState>>,
    /// Why the file is unusable, if it is
    pub(crate) failure: Mutex<Option<String>>,
}

impl FileSlot {
    pub(crate) fn fail(&self, message: String) {
        *self.scan_state.lock() = None;
        *self.failure.lock() = Some(message);
    }
}

pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) options: OpenOptions,
    pub(crate) scanner: LineScanner,
    pub(crate) files: Vec<FileSlot>,
    pub(crate) merged: RwLock<MergedIndex>,
    pub(crate) filter: Mutex<FilterEngine>,
    pub(crate) find: Mutex<Option<LineMatcher>>,
    pub(crate) tail: Mutex<TailController>,
    pub(crate) events: EventBus,
    pub(crate) cancel: CancellationToken,
    /// Mirror of `cancel` polled by blocking scans between chunks
    pub(crate) scan_cancel: Arc<AtomicBool>,
    pub(crate) closed: AtomicBool,
    pub(crate) ready: AtomicBool,
    pub(crate) ready_notify: Notify,
    pub(crate) watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(LogtailError::SessionClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn publish(&self, events: Vec<SessionEvent>) {
        self.events.publish_all(events);
    }

    pub(crate) fn slot(&self, file: FileId) -> Result<&FileSlot> {
        self.files
            .get(file)
            .ok_or_else(|| LogtailError::invalid_argument(format!("unknown file id {}", file)))
    }

    fn resolve(&self, global_line: u64) -> Result<(FileId, u64, LineRecord)> {
        let merged = self.merged.read();
        let (file, local) = merged
            .locate(global_line)
            .ok_or(LogtailError::LineOutOfRange {
                line: global_line,
                len: merged.len(),
            })?;
        let record = self.slot(file)?.index.read().get(local).ok_or_else(|| {
            LogtailError::other(format!("line {} of file {} is not indexed", local, file))
        })?;
        Ok((file, local, record))
    }

    /// Bring the filter up to date with the merged index
    pub(crate) async fn refresh_filter(&self) -> Result<()> {
        catch_up(&self.filter, self, self.config.filter_batch_lines as u64).await
    }

    async fn wait_ready(&self) -> Result<()> {
        loop {
            let notified = self.ready_notify.notified();
            self.ensure_open()?;
            if self.ready.load(Ordering::Acquire) {
                return Ok(());
            }
            notified.await;
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
        self.ready_notify.notify_waiters();
    }
}

#[async_trait]
impl LineSource for Shared {
    fn line_count(&self) -> u64 {
        self.merged.read().len()
    }

    async fn read_lines(&self, range: Range<u64>) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        let mut wanted: Vec<(FileId, LineRecord)> = Vec::new();
        {
            let merged = self.merged.read();
            for (file, local) in merged.locate_range(range) {
                let Some(record) = self.files[file].index.read().get(local) else {
                    break;
                };
                wanted.push((file, record));
            }
        }
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut handles = Vec::with_capacity(self.files.len());
        for slot in &self.files {
            handles.push(slot.reader.handle().ok());
        }
        let lines = tokio::task::spawn_blocking(move || {
            wanted
                .iter()
                .map(|(file, record)| match &handles[*file] {
                    Some(handle) => read_record_bytes(handle, record),
                    None => Ok(Vec::new()),
                })
                .collect::<std::io::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| LogtailError::other(format!("line read task failed: {}", e)))?
        .map_err(|e| LogtailError::io("Failed to read lines", e))?;

        self.ensure_open()?;
        Ok(lines)
    }
}

/// An open set of log files
pub struct Session {
    shared: Arc<Shared>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("files", &self.files())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl Session {
    /// Open `paths` with the default configuration and timestamp recognizers.
    ///
    /// Files that cannot be read are reported with `ScanFailed` and stay empty;
    /// the session only fails if `paths` is empty.
    pub async fn open<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
        options: OpenOptions,
    ) -> Result<(Session, EventReceiver)> {
        Self::open_with(paths, options, SessionConfig::default(), default_recognizer()).await
    }

    pub async fn open_with<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
        options: OpenOptions,
        config: SessionConfig,
        recognizer: Arc<dyn TimestampRecognizer>,
    ) -> Result<(Session, EventReceiver)> {
        config.validate()?;
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            return Err(LogtailError::invalid_argument("no log files given"));
        }

        let events = EventBus::new(config.event_queue_capacity);
        let receiver = events.subscribe();

        let mut files = Vec::with_capacity(paths.len());
        let mut identities = Vec::with_capacity(paths.len());
        let mut failures = Vec::new();
        for (id, path) in paths.into_iter().enumerate() {
            let opened = validate_file_path(&path).and_then(|identity| {
                LineReader::open(&path, config.text_cache_lines).map(|reader| (identity, reader))
            });
            let (slot, identity) = match opened {
                Ok((identity, reader)) => (
                    FileSlot {
                        file: LogFile {
                            id,
                            path,
                            size_at_open: identity.len,
                        },
                        index: RwLock::new(LineIndex::new(id)),
                        reader,
                        scan_state: Mutex::new(Some(ScanState::default())),
                        failure: Mutex::new(None),
                    },
                    Some(identity),
                ),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    failures.push(SessionEvent::ScanFailed {
                        file: id,
                        message: e.to_string(),
                    });
                    (
                        FileSlot {
                            reader: LineReader::unavailable(&path),
                            file: LogFile {
                                id,
                                path,
                                size_at_open: 0,
                            },
                            index: RwLock::new(LineIndex::new(id)),
                            scan_state: Mutex::new(None),
                            failure: Mutex::new(Some(e.to_string())),
                        },
                        None,
                    )
                }
            };
            files.push(slot);
            identities.push(identity);
        }

        let scanner = LineScanner::new(config.chunk_size, recognizer)
            .with_probe_bytes(config.timestamp_probe_bytes)
            .with_progress_interval(config.progress_interval());

        info!(
            "Opening session over {} file(s), tail {}",
            files.len(),
            if options.can_tail { "enabled" } else { "disabled" }
        );

        let shared = Arc::new(Shared {
            filter: Mutex::new(FilterEngine::new(options.min_level)),
            tail: Mutex::new(TailController::new(options.can_tail)),
            config,
            options,
            scanner,
            files,
            merged: RwLock::new(MergedIndex::new()),
            find: Mutex::new(None),
            events,
            cancel: CancellationToken::new(),
            scan_cancel: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            ready_notify: Notify::new(),
            watchers: Mutex::new(Vec::new()),
        });
        shared.publish(failures);

        let coordinator = tokio::spawn(tasks::run_session(Arc::clone(&shared), identities));
        Ok((
            Session {
                shared,
                coordinator: Mutex::new(Some(coordinator)),
            },
            receiver,
        ))
    }

    /// Additional receiver for events published from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn files(&self) -> Vec<LogFile> {
        self.shared.files.iter().map(|slot| slot.file.clone()).collect()
    }

    /// Why a file could not be indexed, if it could not
    pub fn file_error(&self, file: FileId) -> Option<String> {
        self.shared.files.get(file)?.failure.lock().clone()
    }

    /// Initial scan progress of a file; `None` once the scan is over
    pub fn scan_state(&self, file: FileId) -> Option<ScanState> {
        *self.shared.files.get(file)?.scan_state.lock()
    }

    /// Whether the merged index has been published
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Wait for the initial merged index
    pub async fn wait_ready(&self) -> Result<()> {
        self.shared.wait_ready().await
    }

    /// Lines in the merged index
    pub fn len(&self) -> u64 {
        self.shared.merged.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_to_span(&self, global_line: u64) -> Result<LineSpan> {
        self.shared.ensure_open()?;
        let (file, local_line, record) = self.shared.resolve(global_line)?;
        Ok(LineSpan {
            file: self.shared.slot(file)?.file.clone(),
            local_line,
            record,
        })
    }

    pub fn get_timestamp(&self, global_line: u64) -> Result<Option<Timestamp>> {
        self.shared.ensure_open()?;
        Ok(self.shared.resolve(global_line)?.2.timestamp)
    }

    /// Text of a global line.
    ///
    /// With `block` the call waits for the initial index instead of failing
    /// with `LineOutOfRange` while scanning. With `abbreviate` the text is cut
    /// at `max_line_length` (or the configured default) and flagged.
    pub async fn get_text(&self, global_line: u64, options: TextOptions) -> Result<LineText> {
        self.shared.ensure_open()?;
        if options.block {
            self.shared.wait_ready().await?;
        }
        let (file, local, record) = self.shared.resolve(global_line)?;
        let slot = self.shared.slot(file)?;
        let cap = options
            .abbreviate
            .then(|| options.max_line_length.unwrap_or(self.shared.config.max_line_length));

        if let Some(text) = slot.reader.cached(local, &record) {
            if cap.map_or(true, |cap| text.line.len() <= cap) {
                return Ok(text);
            }
        }

        let handle = slot.reader.handle()?;
        let text = tokio::task::spawn_blocking(move || read_record_text(&handle, &record, cap))
            .await
            .map_err(|e| LogtailError::other(format!("line read task failed: {}", e)))?
            .map_err(|e| LogtailError::file_access(&slot.file.path, "Failed to read line", e))?;

        self.shared.ensure_open()?;
        slot.reader.remember(local, &text);
        Ok(text)
    }

    /// Set the find pattern used by `advance_search`. An empty pattern
    /// clears it; an invalid one is rejected and the previous pattern kept.
    pub fn set_find(&self, pattern: &str, is_regex: bool, case_sensitive: bool) -> Result<()> {
        self.shared.ensure_open()?;
        let matcher = if pattern.is_empty() {
            None
        } else {
            Some(LineMatcher::new(
                pattern,
                SearchOptions::new(is_regex, case_sensitive),
            )?)
        };
        *self.shared.find.lock() = matcher;
        Ok(())
    }

    pub fn clear_find(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.find.lock().take();
        Ok(())
    }

    /// Move the cursor to the next line matching the find pattern.
    ///
    /// The search wraps once. On `NotFound` the cursor is unchanged.
    pub async fn advance_search(&self, direction: SearchDirection) -> Result<SearchOutcome> {
        self.shared.ensure_open()?;
        let matcher = self
            .shared
            .find
            .lock()
            .clone()
            .ok_or_else(|| LogtailError::invalid_argument("no active find pattern"))?;
        let from = self.shared.tail.lock().pointer().current_line;

        let outcome = search::advance_search(
            self.shared.as_ref(),
            &matcher,
            from,
            direction,
            self.shared.config.filter_batch_lines as u64,
        )
        .await?;

        if let SearchOutcome::Found(line) = outcome {
            let total = self.len();
            let events = self.shared.tail.lock().goto(line, total)?;
            self.shared.publish(events);
        }
        Ok(outcome)
    }

    /// Restrict the filtered view to lines matching `pattern`, recomputing it
    /// over the whole index. An empty pattern removes the text predicate.
    ///
    /// An invalid pattern is rejected and the current filter stays in effect.
    pub async fn set_filter(
        &self,
        pattern: &str,
        is_regex: bool,
        case_sensitive: bool,
    ) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared
            .filter
            .lock()
            .set_predicate(pattern, SearchOptions::new(is_regex, case_sensitive))?;
        self.shared.refresh_filter().await
    }

    pub async fn clear_filter(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.filter.lock().clear_predicate();
        self.shared.refresh_filter().await
    }

    /// Wait until the filtered view covers every indexed line
    pub async fn refresh_filter(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.refresh_filter().await
    }

    /// Lines in the filtered view; the whole index when no filter is active.
    ///
    /// Counts only lines evaluated so far; see [`Session::refresh_filter`].
    pub fn filtered_len(&self) -> Result<u64> {
        self.shared.ensure_open()?;
        let total = self.len();
        Ok(self.shared.filter.lock().visible_len(total))
    }

    /// Global line at position `index` of the filtered view
    pub fn filtered_line(&self, index: u64) -> Result<Option<u64>> {
        self.shared.ensure_open()?;
        let total = self.len();
        Ok(self.shared.filter.lock().visible_line(index, total))
    }

    /// Matching global lines of the active filter, ascending
    pub fn filter_matches(&self) -> Result<Vec<u64>> {
        self.shared.ensure_open()?;
        Ok(self.shared.filter.lock().matches().to_vec())
    }

    pub fn set_tail(&self, enable: bool) -> Result<()> {
        self.shared.ensure_open()?;
        let total = self.len();
        let events = self.shared.tail.lock().set_tail(enable, total)?;
        self.shared.publish(events);
        Ok(())
    }

    pub fn goto(&self, global_line: u64) -> Result<()> {
        self.shared.ensure_open()?;
        let total = self.len();
        let events = self.shared.tail.lock().goto(global_line, total)?;
        self.shared.publish(events);
        Ok(())
    }

    pub fn clear_pointer(&self) -> Result<()> {
        self.shared.ensure_open()?;
        let events = self.shared.tail.lock().clear_pointer();
        self.shared.publish(events);
        Ok(())
    }

    pub fn pointer(&self) -> Result<PointerState> {
        self.shared.ensure_open()?;
        Ok(self.shared.tail.lock().pointer())
    }

    pub fn tail_state(&self) -> TailState {
        self.shared.tail.lock().state()
    }

    /// Lines appended while not following
    pub fn pending_lines(&self) -> u64 {
        self.shared.tail.lock().pending_lines()
    }

    /// Stop every background task and release the file handles.
    ///
    /// Every later query fails with `SessionClosed`. Calling it twice is a no-op.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing session");
        self.shared.scan_cancel.store(true, Ordering::Release);
        self.shared.cancel.cancel();
        self.shared.ready_notify.notify_waiters();

        let coordinator = self.coordinator.lock().take();
        if let Some(handle) = coordinator {
            let _ = handle.await;
        }
        let watchers = std::mem::take(&mut *self.shared.watchers.lock());
        join_all(watchers).await;

        for slot in &self.shared.files {
            slot.reader.close();
        }
        let events = self.shared.tail.lock().close();
        self.shared.publish(events);
        self.shared.events.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.scan_cancel.store(true, Ordering::Release);
        self.shared.cancel.cancel();
    }
}
