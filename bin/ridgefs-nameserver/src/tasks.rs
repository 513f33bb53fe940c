//! Periodic background tasks owned by the nameserver.

use ridgefs_common::{PeriodicTask, Result};
use ridgefs_journal::{EditLog, do_checkpoint, run_image_cleanup};
use ridgefs_namespace::NamespaceTree;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Periodic edit log flush (the scheduled half of the durability
/// policy; the threshold half happens inline in `log_edit`).
pub struct FlushTask {
    log: Arc<EditLog>,
}

impl FlushTask {
    pub fn new(log: Arc<EditLog>) -> Self {
        Self { log }
    }
}

impl PeriodicTask for FlushTask {
    fn name(&self) -> &'static str {
        "editlog-flush"
    }

    fn run_once(&self) -> Result<()> {
        self.log.flush()?;
        Ok(())
    }
}

/// Periodic fsimage checkpoint of the live tree.
pub struct CheckpointTask {
    tree: Arc<NamespaceTree>,
    log: Arc<EditLog>,
    image_dir: PathBuf,
}

impl CheckpointTask {
    pub fn new(tree: Arc<NamespaceTree>, log: Arc<EditLog>, image_dir: PathBuf) -> Self {
        Self {
            tree,
            log,
            image_dir,
        }
    }
}

impl PeriodicTask for CheckpointTask {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn run_once(&self) -> Result<()> {
        // Read the cursor before snapshotting: edits racing past it end
        // up both in the image and in replayable records, which replay
        // tolerates; the reverse order could lose them.
        let cursor = self.log.last_assigned_tx_id();
        let root = self.tree.snapshot_root();
        let path = do_checkpoint(&root, cursor, &self.image_dir)?;
        debug!(cursor, path = %path.display(), "checkpoint complete");
        Ok(())
    }
}

/// Periodic image/segment retirement.
pub struct CleanupTask {
    image_dir: PathBuf,
    /// Set on the log-owning (primary) side only.
    editlog_dir: Option<PathBuf>,
}

impl CleanupTask {
    pub fn new(image_dir: PathBuf, editlog_dir: Option<PathBuf>) -> Self {
        Self {
            image_dir,
            editlog_dir,
        }
    }
}

impl PeriodicTask for CleanupTask {
    fn name(&self) -> &'static str {
        "image-cleanup"
    }

    fn run_once(&self) -> Result<()> {
        run_image_cleanup(&self.image_dir, self.editlog_dir.as_deref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgefs_common::AttrMap;
    use ridgefs_journal::{EditOp, scan_latest_valid};
    use tempfile::tempdir;

    #[test]
    fn test_checkpoint_then_cleanup_single_iteration() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("editlog");
        let image_dir = dir.path().join("fsimage");

        let tree = Arc::new(NamespaceTree::new());
        let log = Arc::new(EditLog::open(&log_dir, 1024 * 1024).unwrap());
        assert!(tree.create_file("/a/f", &AttrMap::new()));
        log.log_edit(EditOp::CreateFile, "/a/f", &AttrMap::new())
            .unwrap();

        FlushTask::new(Arc::clone(&log)).run_once().unwrap();
        CheckpointTask::new(Arc::clone(&tree), Arc::clone(&log), image_dir.clone())
            .run_once()
            .unwrap();
        CleanupTask::new(image_dir.clone(), Some(log_dir.clone()))
            .run_once()
            .unwrap();

        // One image retained, covered segment pruned.
        let image = scan_latest_valid(&image_dir).unwrap().unwrap();
        assert_eq!(image.max_tx_id, 1);
        assert!(
            std::fs::read_dir(&log_dir)
                .unwrap()
                .next()
                .is_none()
        );
    }
}
