//! The write-ahead edit log.
//!
//! `log_edit` assigns the next txid and appends to the in-memory double
//! buffer; it never waits for disk. Flushing swaps the buffers and
//! migrates the previously-active records to an immutable on-disk
//! segment file named `{start}_{end}.editlog`. Records within a segment
//! are `[4-byte LE length][bincode record]` so segments can be parsed
//! without an index.

use crate::buffer::DoubleBuffer;
use crate::record::{EditOp, EditRecord};
use parking_lot::Mutex;
use ridgefs_common::{AttrMap, Error, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Extension of on-disk edit log segments.
const SEGMENT_EXT: &str = "editlog";

/// An on-disk segment and the txid range it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentFile {
    pub start_tx_id: u64,
    pub end_tx_id: u64,
    pub path: PathBuf,
}

impl SegmentFile {
    /// Parse `{start}_{end}.editlog` into a segment descriptor.
    fn from_path(path: &Path) -> Option<Self> {
        if path.extension()?.to_str()? != SEGMENT_EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (start, end) = stem.split_once('_')?;
        Some(Self {
            start_tx_id: start.parse().ok()?,
            end_tx_id: end.parse().ok()?,
            path: path.to_path_buf(),
        })
    }
}

/// List segment files in `dir`, sorted ascending by start txid.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentFile>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(segment) = SegmentFile::from_path(&entry.path()) {
            segments.push(segment);
        }
    }
    segments.sort_by_key(|s| s.start_tx_id);
    Ok(segments)
}

/// Read every parseable record from a segment file.
///
/// A record whose payload fails to decode is skipped with a warning and
/// reading continues at the next length prefix. A truncated tail (length
/// prefix promising more bytes than remain) ends the segment.
pub fn read_segment(path: &Path) -> Result<Vec<EditRecord>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap_or([0; 4])) as usize;
        offset += 4;
        if offset + len > bytes.len() {
            warn!(
                path = %path.display(),
                "segment truncated mid-record; dropping tail"
            );
            break;
        }
        match EditRecord::from_bytes(&bytes[offset..offset + len]) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                "skipping malformed edit record: {e}"
            ),
        }
        offset += len;
    }
    Ok(records)
}

/// The edit log: txid assignment, double-buffered appends, segment
/// flushing, and the read-only fetch cursor for standby pulls.
pub struct EditLog {
    dir: PathBuf,
    next_tx_id: AtomicU64,
    buffers: Mutex<DoubleBuffer>,
    /// Serializes flushers; held across segment I/O so the syncing side
    /// is idle whenever anyone else swaps.
    flush_lock: Mutex<()>,
    flush_threshold_bytes: usize,
}

impl EditLog {
    /// Open the log rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>, flush_threshold_bytes: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        // Discard temp files from flushes that died mid-write; their
        // records were never acknowledged as flushed.
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                warn!(path = %path.display(), "removing abandoned segment temp file");
                fs::remove_file(&path)?;
            }
        }
        Ok(Self {
            dir,
            next_tx_id: AtomicU64::new(0),
            buffers: Mutex::new(DoubleBuffer::new()),
            flush_lock: Mutex::new(()),
            flush_threshold_bytes,
        })
    }

    /// Assign the next txid to the mutation and buffer its record.
    ///
    /// Returns once the in-memory append completes. If the active buffer
    /// has crossed the flush threshold, the caller pays for a forced
    /// synchronous flush before returning, bounding worst-case loss and
    /// standby lag.
    pub fn log_edit(&self, op: EditOp, path: &str, attributes: &AttrMap) -> Result<u64> {
        let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = EditRecord::new(tx_id, op, path, attributes.clone());
        let encoded_len = record.encoded_len()?;

        let force_flush = {
            let mut buffers = self.buffers.lock();
            buffers.append(record, encoded_len + 4);
            buffers.active_bytes() >= self.flush_threshold_bytes
        };
        if force_flush {
            self.flush()?;
        }
        Ok(tx_id)
    }

    /// Migrate buffered records to a new immutable segment file.
    ///
    /// Returns the `(start, end)` txid range written, or `None` if there
    /// was nothing to flush.
    pub fn flush(&self) -> Result<Option<(u64, u64)>> {
        let _guard = self.flush_lock.lock();

        let pending = {
            let mut buffers = self.buffers.lock();
            buffers.swap_and_take()
        };
        if pending.is_empty() {
            return Ok(None);
        }

        let start = pending[0].tx_id;
        let end = pending[pending.len() - 1].tx_id;
        match self.write_segment(&pending, start, end) {
            Ok(()) => {
                self.buffers.lock().recycle(pending);
                debug!(start, end, "flushed edit log segment");
                Ok(Some((start, end)))
            }
            Err(e) => {
                // The buffer is the only copy of these acknowledged
                // edits; hand them back so the next flush retries.
                let bytes = pending
                    .iter()
                    .map(|r| r.encoded_len().map_or(0, |n| n + 4))
                    .sum();
                self.buffers.lock().restore(pending, bytes);
                warn!(start, end, "segment write failed, records kept for retry: {e}");
                Err(e)
            }
        }
    }

    /// Write records to a temporary file, then rename it to its final
    /// segment name. A failure mid-write never leaves a partial file at
    /// a name the segment reader trusts.
    fn write_segment(&self, records: &[EditRecord], start: u64, end: u64) -> Result<()> {
        let path = self.dir.join(format!("{start}_{end}.{SEGMENT_EXT}"));
        let tmp = self.dir.join(format!("{start}_{end}.{SEGMENT_EXT}.tmp"));
        let mut file = File::create(&tmp)?;
        for record in records {
            let payload = record.to_bytes()?;
            let len = u32::try_from(payload.len())
                .map_err(|_| Error::Serialization("edit record exceeds u32 length".into()))?;
            file.write_all(&len.to_le_bytes())?;
            file.write_all(&payload)?;
        }
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read-only cursor for a standby pull: every record with txid
    /// greater than `from_tx_id`, from flushed segments first and then
    /// the still-unflushed buffer. Mutates neither.
    pub fn fetch_from(&self, from_tx_id: u64) -> Result<Vec<EditRecord>> {
        // Hold the flush lock so no record is mid-migration between the
        // buffer and a segment while we assemble the view.
        let _guard = self.flush_lock.lock();

        let mut out = Vec::new();
        for segment in list_segments(&self.dir)? {
            if segment.end_tx_id <= from_tx_id {
                continue;
            }
            out.extend(
                read_segment(&segment.path)?
                    .into_iter()
                    .filter(|r| r.tx_id > from_tx_id),
            );
        }
        out.extend(
            self.buffers
                .lock()
                .unflushed()
                .into_iter()
                .filter(|r| r.tx_id > from_tx_id),
        );
        out.sort_by_key(|r| r.tx_id);
        Ok(out)
    }

    /// Highest txid assigned so far (0 before the first edit).
    #[must_use]
    pub fn last_assigned_tx_id(&self) -> u64 {
        self.next_tx_id.load(Ordering::SeqCst)
    }

    /// Seed the txid counter after recovery so new edits continue past
    /// the replayed history.
    pub fn seed_tx_id(&self, last_tx_id: u64) {
        self.next_tx_id.fetch_max(last_tx_id, Ordering::SeqCst);
    }

    /// Directory holding this log's segment files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
