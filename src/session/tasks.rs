//! Background work of a session: initial scans, the merge, and per-file
//! polling.
//!
//! Each file has a single writer at any time. Its initial scan runs on the
//! blocking pool; once every scan is done the coordinator publishes the merged
//! index and spawns one polling task per file, which then owns all further
//! updates of that file's index.

use super::{SessionEvent, Shared};
use crate::error::{LogtailError, Result};
use crate::file_handler::line_index::FINGERPRINT_BYTES;
use crate::file_handler::reader::read_bytes_before;
use crate::file_handler::{
    FileChange, FileId, FileIdentity, FileWatcher, LineRecord, ScanOutput, ScanState,
};
use crate::merged::MergedIndex;
use futures::future::join_all;
use log::{debug, info, warn};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

/// Scan every file, publish the merged index, then start the watchers.
pub(super) async fn run_session(shared: Arc<Shared>, identities: Vec<Option<FileIdentity>>) {
    let scans = identities
        .iter()
        .enumerate()
        .filter(|(_, identity)| identity.is_some())
        .map(|(file, _)| initial_scan(Arc::clone(&shared), file));
    let scanned = join_all(scans).await;

    if shared.cancel.is_cancelled() {
        debug!("Session closed during the initial scan");
        return;
    }

    let total = publish_merged_index(&shared);
    info!("Merged index ready with {} lines", total);
    shared.publish(vec![SessionEvent::IndexReady { total_lines: total }]);

    if let Err(e) = shared.refresh_filter().await {
        warn!("Initial filter pass failed: {}", e);
    }

    let events = shared.tail.lock().on_scan_complete(total);
    shared.publish(events);
    // Waiters observe the settled follow state
    shared.mark_ready();

    if !shared.options.can_tail || shared.cancel.is_cancelled() {
        return;
    }

    let mut watchers = shared.watchers.lock();
    for file in scanned.into_iter().flatten() {
        let Some(identity) = identities[file] else {
            continue;
        };
        let watcher = FileWatcher::new(&shared.files[file].file.path, identity);
        watchers.push(tokio::spawn(watch_file(Arc::clone(&shared), file, watcher)));
    }
}

/// Initial scan of one file; returns the file id when it was indexed.
async fn initial_scan(shared: Arc<Shared>, file: FileId) -> Option<FileId> {
    let task_shared = Arc::clone(&shared);
    let result = tokio::task::spawn_blocking(move || -> Result<(ScanOutput, Vec<u8>)> {
        let shared = task_shared;
        let slot = &shared.files[file];
        let name = slot.file.name();
        let finalize = !shared.options.can_tail;

        let output = shared.scanner.scan_file(
            &slot.file.path,
            file,
            0,
            finalize,
            &shared.scan_cancel,
            |progress| {
                *slot.scan_state.lock() = Some(ScanState {
                    lines_scanned: progress.lines_scanned,
                    bytes_scanned: progress.bytes_scanned,
                    complete: progress.complete,
                });
                shared.events.publish(SessionEvent::ScanProgress {
                    file,
                    bytes: progress.bytes_scanned,
                    lines: progress.lines_scanned,
                    message: progress.message(&name),
                });
            },
        )?;
        let fingerprint = fingerprint_at(&slot.file.path, output.resume_offset)?;
        Ok((output, fingerprint))
    })
    .await
    .map_err(|e| LogtailError::other(format!("scan task failed: {}", e)))
    .and_then(|result| result);

    let slot = &shared.files[file];
    let (output, fingerprint) = match result {
        Ok(scanned) => scanned,
        Err(e) => {
            warn!("Failed to scan {}: {}", slot.file.path.display(), e);
            slot.fail(e.to_string());
            shared.publish(vec![SessionEvent::ScanFailed {
                file,
                message: e.to_string(),
            }]);
            return None;
        }
    };
    if output.cancelled {
        return None;
    }

    let lines = output.records.len();
    {
        let mut index = slot.index.write();
        index.extend(output.records, output.resume_offset);
        index.set_fingerprint(fingerprint);
    }
    *slot.scan_state.lock() = None;
    debug!("Scanned {} ({} lines)", slot.file.path.display(), lines);
    shared.publish(vec![SessionEvent::ScanComplete { file }]);
    Some(file)
}

fn publish_merged_index(shared: &Shared) -> u64 {
    let mut merged = {
        let indexes: Vec<_> = shared.files.iter().map(|slot| slot.index.read()).collect();
        let records: Vec<&[LineRecord]> = indexes.iter().map(|index| index.records()).collect();
        MergedIndex::build(&records)
    };
    if let Some(max_lines) = shared.options.max_lines {
        merged.retain_last(max_lines);
    }
    let total = merged.len();
    *shared.merged.write() = merged;
    total
}

/// Poll one file until the session is cancelled
async fn watch_file(shared: Arc<Shared>, file: FileId, mut watcher: FileWatcher) {
    let mut interval = tokio::time::interval(shared.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("Watching {}", watcher.path().display());

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let change = match watcher.poll() {
            Ok(change) => change,
            Err(e) => {
                warn!("Failed to poll {}: {}", watcher.path().display(), e);
                continue;
            }
        };
        let result = match change {
            FileChange::Unchanged => Ok(()),
            FileChange::Missing => {
                debug!("{} is missing, waiting for it to reappear", watcher.path().display());
                Ok(())
            }
            FileChange::Grew { from, to } => {
                debug!("{} grew from {} to {} bytes", watcher.path().display(), from, to);
                append_new_lines(&shared, file).await
            }
            FileChange::Truncated { .. } => reindex(&shared, file, false).await,
            FileChange::Rotated => reindex(&shared, file, true).await,
        };

        match result {
            Ok(()) => watcher.commit(),
            Err(_) if shared.is_closed() => break,
            // Left uncommitted, so the next poll reports the change again
            Err(e) => warn!("Failed to update {}: {}", watcher.path().display(), e),
        }
    }
    debug!("Stopped watching {}", watcher.path().display());
}

/// Bytes identifying the indexed prefix of `path`, which ends at `end`
fn fingerprint_at(path: &Path, end: u64) -> Result<Vec<u8>> {
    let file = File::open(path)
        .map_err(|e| LogtailError::file_access(path, "Failed to open file", e))?;
    read_bytes_before(&file, end, FINGERPRINT_BYTES)
        .map_err(|e| LogtailError::file_access(path, "Failed to read file", e))
}

/// Scan `file` from `start_offset`; `None` when the bytes before
/// `start_offset` no longer match `expected`.
async fn rescan(
    shared: &Arc<Shared>,
    file: FileId,
    start_offset: u64,
    expected: Option<Vec<u8>>,
) -> Result<Option<(ScanOutput, Vec<u8>)>> {
    let task_shared = Arc::clone(shared);
    tokio::task::spawn_blocking(move || -> Result<Option<(ScanOutput, Vec<u8>)>> {
        let slot = &task_shared.files[file];
        let path = &slot.file.path;
        if let Some(expected) = expected {
            if fingerprint_at(path, start_offset)? != expected {
                return Ok(None);
            }
        }
        let output = task_shared.scanner.scan_file(
            path,
            file,
            start_offset,
            false,
            &task_shared.scan_cancel,
            |_| {},
        )?;
        let fingerprint = fingerprint_at(path, output.resume_offset)?;
        Ok(Some((output, fingerprint)))
    })
    .await
    .map_err(|e| LogtailError::other(format!("scan task failed: {}", e)))?
}

/// Index lines appended since the last scan and notify the tail controller.
///
/// A file whose indexed prefix was rewritten while it grew is re-indexed
/// instead.
async fn append_new_lines(shared: &Arc<Shared>, file: FileId) -> Result<()> {
    let slot = shared.slot(file)?;
    let (start, expected) = {
        let index = slot.index.read();
        (index.indexed_byte_count(), index.fingerprint().to_vec())
    };
    let Some((output, fingerprint)) = rescan(shared, file, start, Some(expected)).await? else {
        debug!("{} was rewritten while growing", slot.file.name());
        return reindex(shared, file, false).await;
    };
    if output.cancelled {
        return Ok(());
    }

    let count = output.records.len() as u64;
    // The file index grows first so every merged entry has a record behind it
    let local_start = {
        let mut index = slot.index.write();
        let local_start = index.extend(output.records, output.resume_offset);
        index.set_fingerprint(fingerprint);
        local_start
    };
    if count == 0 {
        return Ok(());
    }
    let total = {
        let mut merged = shared.merged.write();
        merged.append(file, local_start, count);
        merged.len()
    };
    debug!("Indexed {} new line(s) of {}", count, slot.file.name());

    if let Err(e) = shared.refresh_filter().await {
        warn!("Filter update failed: {}", e);
    }
    let events = shared.tail.lock().on_pending(count, total);
    shared.publish(events);
    Ok(())
}

/// Re-index a truncated or replaced file.
///
/// A truncated file keeps the records that still match its new boundaries; a
/// replaced file (`rotated`) is a different file and keeps none.
async fn reindex(shared: &Arc<Shared>, file: FileId, rotated: bool) -> Result<()> {
    let slot = shared.slot(file)?;
    warn!("{} was truncated or rotated, re-indexing", slot.file.path.display());
    slot.reader.reopen()?;
    let Some((output, fingerprint)) = rescan(shared, file, 0, None).await? else {
        return Ok(());
    };
    if output.cancelled {
        return Ok(());
    }

    let (divergence, first_removed, appended, total) = {
        let mut merged = shared.merged.write();
        let mut index = slot.index.write();
        let divergence = if rotated {
            0
        } else {
            index.divergence_point(&output.records)
        };
        index.replace_from(divergence, output.records, output.resume_offset);
        index.set_fingerprint(fingerprint);
        let (first_removed, added) = merged.reindex_file(file, divergence, index.len());
        (divergence, first_removed, added.end - added.start, merged.len())
    };
    slot.reader.invalidate_from(divergence);
    info!(
        "Re-indexed {} from line {} ({} line(s) appended)",
        slot.file.name(),
        divergence,
        appended
    );

    if let Some(first_removed) = first_removed {
        shared.filter.lock().invalidate_from(first_removed);
    }
    if let Err(e) = shared.refresh_filter().await {
        warn!("Filter update failed: {}", e);
    }

    let mut events = vec![SessionEvent::RotationDetected { file }];
    {
        let mut tail = shared.tail.lock();
        events.extend(tail.clamp(total));
        events.extend(tail.on_pending(appended, total));
    }
    shared.publish(events);
    Ok(())
}
