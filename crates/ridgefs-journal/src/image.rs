//! Fsimage checkpoints.
//!
//! A checkpoint serializes the whole namespace tree plus its txid cursor
//! into one file:
//!
//! ```text
//! +-------------+----------+--------------+
//! | Total length| MaxTxId  | Tree payload |
//! | 4B LE       | 8B LE    | bincode      |
//! +-------------+----------+--------------+
//! ```
//!
//! A file is valid iff the declared total length equals its actual byte
//! length on disk, which rejects images truncated by a crash mid-save.
//! Files are named `fsimage_{millis}` so candidates order
//! chronologically.

use ridgefs_common::{Error, Result};
use ridgefs_namespace::{NamespaceNode, NamespaceTree};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Image file name prefix.
const IMAGE_PREFIX: &str = "fsimage_";

/// Length + max_tx_id header bytes.
const IMAGE_HEADER_LEN: usize = 12;

/// A parsed, validated fsimage.
#[derive(Clone, Debug)]
pub struct FsImage {
    /// Highest txid reflected in this image.
    pub max_tx_id: u64,
    /// Deserialized tree root.
    pub root: NamespaceNode,
    /// File the image was parsed from.
    pub path: PathBuf,
}

impl FsImage {
    /// Swap this image's tree in as the live namespace.
    pub fn apply(self, tree: &NamespaceTree) {
        tree.replace_root(self.root);
    }
}

/// Millisecond timestamp embedded in an image file name, if it is one.
#[must_use]
pub fn image_timestamp(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(IMAGE_PREFIX)?.parse().ok()
}

/// Serialize `root` (reflecting edits up to `max_tx_id`) into a new
/// timestamped image file under `dir`. Returns the written path.
pub fn do_checkpoint(root: &NamespaceNode, max_tx_id: u64, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let payload = bincode::serialize(root)?;
    let total_len = u32::try_from(IMAGE_HEADER_LEN + payload.len())
        .map_err(|_| Error::Serialization("fsimage exceeds u32 length".into()))?;

    // Bump the timestamp if two checkpoints land in the same millisecond
    // so names stay unique and ordered.
    let mut millis = now_millis();
    let mut path = dir.join(format!("{IMAGE_PREFIX}{millis}"));
    while path.exists() {
        millis += 1;
        path = dir.join(format!("{IMAGE_PREFIX}{millis}"));
    }

    let mut file = File::create(&path)?;
    file.write_all(&total_len.to_le_bytes())?;
    file.write_all(&max_tx_id.to_le_bytes())?;
    file.write_all(&payload)?;
    file.sync_all()?;

    info!(max_tx_id, path = %path.display(), "wrote fsimage checkpoint");
    Ok(path)
}

/// Parse and fully validate one image file.
///
/// Validity walks: header read → length check → payload decode. Any
/// failure yields an error the scan treats as "this candidate is
/// invalid", never as fatal.
pub fn parse_image_file(path: &Path) -> Result<FsImage> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    if bytes.len() < IMAGE_HEADER_LEN {
        return Err(Error::image_invalid(format!(
            "{}: shorter than header",
            path.display()
        )));
    }
    let declared_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap_or([0; 4])) as usize;
    if declared_len != bytes.len() {
        return Err(Error::image_invalid(format!(
            "{}: declared length {} but file is {} bytes",
            path.display(),
            declared_len,
            bytes.len()
        )));
    }
    let max_tx_id = u64::from_le_bytes(bytes[4..12].try_into().unwrap_or([0; 8]));
    let root: NamespaceNode = bincode::deserialize(&bytes[IMAGE_HEADER_LEN..])
        .map_err(|e| Error::image_invalid(format!("{}: payload: {e}", path.display())))?;

    Ok(FsImage {
        max_tx_id,
        root,
        path: path.to_path_buf(),
    })
}

/// List image files in `dir`, newest first by embedded timestamp.
pub fn list_images_newest_first(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(ts) = image_timestamp(&path) {
            images.push((ts, path));
        }
    }
    images.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(images.into_iter().map(|(_, p)| p).collect())
}

/// The newest image in `dir` that passes validation, or `None`.
///
/// Corrupt or truncated candidates are skipped with a warning; an older
/// complete image is still authoritative.
pub fn scan_latest_valid(dir: &Path) -> Result<Option<FsImage>> {
    if !dir.exists() {
        return Ok(None);
    }
    for path in list_images_newest_first(dir)? {
        match parse_image_file(&path) {
            Ok(image) => return Ok(Some(image)),
            Err(e) => warn!("ignoring invalid fsimage candidate: {e}"),
        }
    }
    Ok(None)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
