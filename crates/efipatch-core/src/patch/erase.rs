use super::{PatchKind, PatchOperation};
use crate::error::{Error, Result};
use crate::region::{RegionKind, RegionModel};
use crate::scanner::signature::{ERASED_BYTE, STORE_HEADER_LEN};
use std::ops::Range;
use tracing::info;

/// Overwrites a store with `0xFF`, keeping the 16 bytes after its start marker.
#[derive(Debug, Clone, Copy)]
pub struct FillErasure {
    kind: RegionKind,
}

impl FillErasure {
    /// Creates an erasure of the given store
    pub fn new(kind: RegionKind) -> Self {
        Self { kind }
    }
}

impl PatchOperation for FillErasure {
    fn kind(&self) -> PatchKind {
        match self.kind {
            RegionKind::FirmwareLock => PatchKind::RemoveLock,
            _ => PatchKind::ClearNvram,
        }
    }

    fn apply(
        &self,
        image: &mut Vec<u8>,
        _original: &[u8],
        model: &RegionModel,
    ) -> Result<Range<usize>> {
        let span = model
            .region(self.kind)
            .span()
            .ok_or_else(|| Error::region_not_found(self.kind))?;

        let fill_start = span.start + STORE_HEADER_LEN;
        if fill_start > span.end {
            return Err(Error::RegionTooSmall {
                kind: self.kind,
                start: span.start,
                end: span.end,
                header: STORE_HEADER_LEN,
            });
        }

        image[fill_start..span.end].fill(ERASED_BYTE);
        info!(
            "Erased {} at {:#x}..{:#x} ({} bytes)",
            self.kind,
            fill_start,
            span.end,
            span.end - fill_start
        );
        Ok(fill_start..span.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumField;
    use crate::region::{DataBlock, Region};
    use pretty_assertions::assert_eq;

    fn model(nvram: Region) -> RegionModel {
        RegionModel {
            me: Region::missing(RegionKind::ManagementEngine),
            me_version: None,
            nvram,
            data_block: DataBlock::new(0, 4, Vec::new(), ChecksumField::new(8, [0; 4])),
            lock: Region::missing(RegionKind::FirmwareLock),
        }
    }

    #[test]
    fn test_erase_preserves_header_and_surroundings() {
        let original: Vec<u8> = (0..96u8).collect();
        let mut image = original.clone();
        let model = model(Region::new(RegionKind::Nvram, Some(10), Some(60)));

        let written = FillErasure::new(RegionKind::Nvram)
            .apply(&mut image, &original, &model)
            .unwrap();

        assert_eq!(written, 26..60);
        assert!(image[26..60].iter().all(|&b| b == 0xFF));
        assert_eq!(&image[..26], &original[..26]);
        assert_eq!(&image[60..], &original[60..]);
    }

    #[test]
    fn test_erase_missing_end_marker() {
        let original = vec![0u8; 64];
        let mut image = original.clone();
        let model = model(Region::new(RegionKind::Nvram, Some(10), None));

        let err = FillErasure::new(RegionKind::Nvram)
            .apply(&mut image, &original, &model)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RegionNotFound {
                kind: RegionKind::Nvram
            }
        ));
        assert_eq!(image, original);
    }

    #[test]
    fn test_erase_region_inside_header() {
        let original = vec![0u8; 64];
        let mut image = original.clone();
        let model = model(Region::new(RegionKind::Nvram, Some(10), Some(20)));

        assert!(matches!(
            FillErasure::new(RegionKind::Nvram).apply(&mut image, &original, &model),
            Err(Error::RegionTooSmall { header: 16, .. })
        ));
    }

    #[test]
    fn test_erase_lock_kind() {
        assert_eq!(
            FillErasure::new(RegionKind::FirmwareLock).kind(),
            PatchKind::RemoveLock
        );
    }
}
