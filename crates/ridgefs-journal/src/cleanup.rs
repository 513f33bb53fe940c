//! Fsimage and segment retirement.
//!
//! Re-scans images newest-first; the first valid one found is retained
//! and its max txid becomes the safe truncation cursor. Every other
//! image, valid or not, is deleted. On the log-owning side, segments
//! fully covered by the cursor are deleted too. Disk usage stays
//! monotonic and there is a single source of truth for how far the log
//! may be truncated.

use crate::image::{list_images_newest_first, parse_image_file};
use crate::log::list_segments;
use ridgefs_common::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What a cleanup pass kept and removed.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// The retained image, if any candidate validated.
    pub retained_image: Option<PathBuf>,
    /// Txid cursor of the retained image.
    pub retained_tx_id: u64,
    pub images_deleted: usize,
    pub segments_deleted: usize,
}

/// Run one cleanup pass over `image_dir`, and over `editlog_dir` when
/// this node owns the log.
///
/// If no image validates at all, invalid candidates are still removed
/// but no segment is: without a retained cursor there is no safe
/// truncation point.
pub fn run_image_cleanup(image_dir: &Path, editlog_dir: Option<&Path>) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if !image_dir.exists() {
        return Ok(report);
    }

    for path in list_images_newest_first(image_dir)? {
        if report.retained_image.is_none() {
            match parse_image_file(&path) {
                Ok(image) => {
                    report.retained_tx_id = image.max_tx_id;
                    report.retained_image = Some(path);
                    continue;
                }
                Err(e) => warn!("cleanup: invalid fsimage candidate: {e}"),
            }
        }
        match fs::remove_file(&path) {
            Ok(()) => report.images_deleted += 1,
            Err(e) => warn!(path = %path.display(), "cleanup: failed to delete image: {e}"),
        }
    }

    if let Some(log_dir) = editlog_dir
        && report.retained_image.is_some()
    {
        for segment in list_segments(log_dir)? {
            if segment.end_tx_id <= report.retained_tx_id {
                match fs::remove_file(&segment.path) {
                    Ok(()) => report.segments_deleted += 1,
                    Err(e) => warn!(
                        path = %segment.path.display(),
                        "cleanup: failed to delete segment: {e}"
                    ),
                }
            }
        }
    }

    if report.images_deleted > 0 || report.segments_deleted > 0 {
        info!(
            retained_tx_id = report.retained_tx_id,
            images_deleted = report.images_deleted,
            segments_deleted = report.segments_deleted,
            "image cleanup pass complete"
        );
    }
    Ok(report)
}
