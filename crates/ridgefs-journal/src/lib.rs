//! RidgeFS Journal - metadata durability
//!
//! The write-ahead edit log with double-buffered asynchronous flushing,
//! the fsimage checkpoint/validation/cleanup lifecycle, and the startup
//! recovery path that stitches the two together.

pub mod buffer;
pub mod cleanup;
pub mod image;
pub mod log;
pub mod record;
pub mod recovery;

pub use cleanup::{CleanupReport, run_image_cleanup};
pub use image::{FsImage, do_checkpoint, parse_image_file, scan_latest_valid};
pub use log::{EditLog, SegmentFile};
pub use record::{EditOp, EditRecord};
pub use recovery::{RecoveredState, recover};
