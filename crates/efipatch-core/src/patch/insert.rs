use super::{PatchKind, PatchOperation};
use crate::error::{Error, Result};
use crate::region::{RegionKind, RegionModel};
use std::ops::Range;
use tracing::info;

/// Copies a replacement ME region over the matched ME header.
///
/// The block is written verbatim at the header offset. Its length is not
/// checked against the space available: a block longer than the old region
/// overwrites whatever follows it, and one running past the end of the image
/// grows the image, as writing past the end of a file would.
#[derive(Debug, Clone, Copy)]
pub struct BlockInsertion<'a> {
    block: &'a [u8],
}

impl<'a> BlockInsertion<'a> {
    /// Creates an insertion of `block`
    pub fn new(block: &'a [u8]) -> Self {
        Self { block }
    }
}

impl PatchOperation for BlockInsertion<'_> {
    fn kind(&self) -> PatchKind {
        PatchKind::InsertMeRegion
    }

    fn apply(
        &self,
        image: &mut Vec<u8>,
        _original: &[u8],
        model: &RegionModel,
    ) -> Result<Range<usize>> {
        let offset = model
            .me
            .start()
            .ok_or_else(|| Error::region_not_found(RegionKind::ManagementEngine))?;
        let end = offset + self.block.len();

        if end > image.len() {
            image.resize(end, 0);
        }
        image[offset..end].copy_from_slice(self.block);

        info!(
            "Inserted {} byte ME region at {:#x} ({:?} header)",
            self.block.len(),
            offset,
            model.me_version
        );
        Ok(offset..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumField;
    use crate::region::{DataBlock, MeHeaderVersion, Region};

    fn model(me: Option<usize>) -> RegionModel {
        RegionModel {
            me: Region::new(RegionKind::ManagementEngine, me, None),
            me_version: me.map(|_| MeHeaderVersion::V1),
            nvram: Region::missing(RegionKind::Nvram),
            data_block: DataBlock::new(0, 4, Vec::new(), ChecksumField::new(8, [0; 4])),
            lock: Region::missing(RegionKind::FirmwareLock),
        }
    }

    #[test]
    fn test_insert_at_header() {
        let original = vec![0xAA; 32];
        let mut image = original.clone();
        let written = BlockInsertion::new(&[1, 2, 3, 4])
            .apply(&mut image, &original, &model(Some(8)))
            .unwrap();

        assert_eq!(written, 8..12);
        assert_eq!(&image[6..14], &[0xAA, 0xAA, 1, 2, 3, 4, 0xAA, 0xAA]);
        assert_eq!(image.len(), 32);
    }

    #[test]
    fn test_insert_past_end_grows_image() {
        let original = vec![0xAA; 10];
        let mut image = original.clone();
        BlockInsertion::new(&[7; 6])
            .apply(&mut image, &original, &model(Some(8)))
            .unwrap();
        assert_eq!(image.len(), 14);
        assert_eq!(&image[8..], &[7; 6]);
    }

    #[test]
    fn test_insert_without_header() {
        let original = vec![0xAA; 10];
        let mut image = original.clone();
        let err = BlockInsertion::new(&[1])
            .apply(&mut image, &original, &model(None))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RegionNotFound {
                kind: RegionKind::ManagementEngine
            }
        ));
        assert_eq!(image, original);
    }
}
