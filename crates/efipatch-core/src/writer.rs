//! Image writer: folds the requested patches over one working copy of the
//! image and persists the result.
//!
//! The original image is never modified. Operations run in a fixed order
//! (ME insertion, NVRAM clear, serial substitution, checksum rewrite, lock
//! removal) because the checksum depends on the substituted block. A skipped
//! operation only drops itself; a checksum rewrite is dropped along with the
//! substitution it depends on.

use crate::checksum::crc32;
use crate::error::{Error, Result};
use crate::patch::{PatchKind, PatchOutcome, PatchRequest, PatchStatus};
use crate::region::RegionModel;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Output of a patch run
#[derive(Debug)]
pub struct PatchReport {
    /// The patched image
    pub image: Vec<u8>,
    /// One entry per requested operation, in write order
    pub outcomes: Vec<PatchOutcome>,
    /// New `Fsys` CRC if the checksum was rewritten
    pub checksum: Option<u32>,
}

impl PatchReport {
    /// Outcome of a given operation, if it was requested
    pub fn outcome(&self, kind: PatchKind) -> Option<&PatchOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }

    /// Number of operations that wrote to the image
    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    /// Errors from operations that were skipped
    pub fn skipped(&self) -> impl Iterator<Item = (PatchKind, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error().map(|e| (o.kind, e)))
    }
}

/// Applies the requested patches to a copy of `image`.
pub fn apply_patches(image: &[u8], model: &RegionModel, request: &PatchRequest) -> PatchReport {
    let mut working = image.to_vec();
    let mut outcomes = Vec::new();
    let mut applied = HashSet::new();

    for op in request.operations() {
        let kind = op.kind();

        if let Some(prerequisite) = op.requires() {
            if !applied.contains(&prerequisite) {
                debug!("Dropping {}: {} was not applied", kind, prerequisite);
                continue;
            }
        }

        let status = match op.apply(&mut working, image, model) {
            Ok(range) => {
                applied.insert(kind);
                PatchStatus::Applied(range)
            }
            Err(e) => {
                warn!("{} skipped: {}", kind, e);
                PatchStatus::Skipped(e)
            }
        };
        outcomes.push(PatchOutcome { kind, status });
    }

    let checksum = applied
        .contains(&PatchKind::Checksum)
        .then(|| crc32(&working[model.data_block.checksummed_range()]));

    info!(
        "Patch run complete: {} of {} operations applied",
        applied.len(),
        outcomes.len()
    );

    PatchReport {
        image: working,
        outcomes,
        checksum,
    }
}

/// Writes an image to `path`, replacing any existing file.
///
/// The bytes go to a temporary file in the same directory which is renamed
/// over the destination once complete, so a failed write never leaves a
/// partial image at `path`.
pub fn write_image(path: impl AsRef<Path>, image: &[u8]) -> Result<()> {
    let path = path.as_ref();
    write_atomic(path, image)?;
    debug!("Wrote {} bytes to {}", image.len(), path.display());
    Ok(())
}

/// Replaces `path` with `bytes` through a temporary file in the same directory.
///
/// An existing destination keeps its permissions. A new file gets the mode
/// any newly created file would get under the current umask.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let existing = std::fs::metadata(path).ok().map(|m| m.permissions());

    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }

    let mut file = builder
        .tempfile_in(dir)
        .map_err(|e| Error::file_write(path, e))?;
    if let Some(permissions) = existing {
        file.as_file()
            .set_permissions(permissions)
            .map_err(|e| Error::file_write(path, e))?;
    }
    file.write_all(bytes)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|e| Error::file_write(path, e))?;
    file.persist(path)
        .map_err(|e| Error::file_write(path, e.error))?;
    Ok(())
}
