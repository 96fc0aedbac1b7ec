use super::{PatchKind, PatchOperation};
use crate::checksum::{crc32, encode_checksum, CHECKSUM_LEN};
use crate::error::{Error, Result};
use crate::region::{FieldTag, RegionModel};
use std::ops::Range;
use tracing::{debug, info};

/// Number of characters in a serial number
pub const SERIAL_LEN: usize = 12;

/// Number of trailing serial characters forming the hardware code
pub const CODE_LEN: usize = 4;

/// A validated replacement serial and the hardware code derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSerial {
    serial: [u8; SERIAL_LEN],
}

impl NewSerial {
    /// Validates a serial: exactly 12 ASCII characters, stored upper-cased
    pub fn parse(serial: &str) -> Result<Self> {
        let length = serial.chars().count();
        if length != SERIAL_LEN {
            return Err(Error::SerialLength { length });
        }
        if !serial.is_ascii() {
            return Err(Error::SerialNotAscii);
        }

        let mut out = [0u8; SERIAL_LEN];
        out.copy_from_slice(serial.to_ascii_uppercase().as_bytes());
        Ok(Self { serial: out })
    }

    /// Serial bytes
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Hardware code: the last four serial characters
    pub fn code(&self) -> &[u8] {
        &self.serial[SERIAL_LEN - CODE_LEN..]
    }

    /// Hardware code as a string
    pub fn code_str(&self) -> &str {
        std::str::from_utf8(self.code()).unwrap_or_default()
    }

    /// Serial as a string
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.serial).unwrap_or_default()
    }
}

/// Replaces every non-overlapping occurrence of `from` with `to`, scanning left to right.
///
/// Both patterns must have the same length. Returns the number of replacements.
pub fn replace_all(haystack: &mut [u8], from: &[u8], to: &[u8]) -> usize {
    debug_assert_eq!(from.len(), to.len());
    if from.is_empty() || from.len() != to.len() {
        return 0;
    }

    let mut count = 0;
    let mut position = 0;
    while position + from.len() <= haystack.len() {
        if &haystack[position..position + from.len()] == from {
            haystack[position..position + from.len()].copy_from_slice(to);
            position += from.len();
            count += 1;
        } else {
            position += 1;
        }
    }
    count
}

/// Replaces the serial numbers and hardware codes in the `Fsys` block.
///
/// The block is taken from the unpatched image, so writes made by earlier
/// operations over the same bytes (an erased store enclosing `Fsys`) are
/// replaced by the patched block. Every present variant is replaced in turn
/// on a running copy of the block, each replacement covering all occurrences
/// of that variant's original value, so values left behind by earlier
/// serializers are normalized too.
#[derive(Debug, Clone)]
pub struct SerialSubstitution<'a> {
    serial: &'a str,
}

impl<'a> SerialSubstitution<'a> {
    /// Creates a substitution writing `serial`
    pub fn new(serial: &'a str) -> Self {
        Self { serial }
    }
}

impl PatchOperation for SerialSubstitution<'_> {
    fn kind(&self) -> PatchKind {
        PatchKind::Serial
    }

    fn apply(
        &self,
        image: &mut Vec<u8>,
        original: &[u8],
        model: &RegionModel,
    ) -> Result<Range<usize>> {
        let new = NewSerial::parse(self.serial)?;
        let block = &model.data_block;

        let substitutions = [
            (FieldTag::SerialUpper, new.serial()),
            (FieldTag::SerialLower, new.serial()),
            (FieldTag::CodeUpper, new.code()),
            (FieldTag::CodeLower, new.code()),
        ];
        if substitutions.iter().all(|(tag, _)| block.field(*tag).is_none()) {
            return Err(Error::SerialFieldsMissing);
        }

        let range = block.checksummed_range();
        let mut running = original[range.clone()].to_vec();
        let mut replaced = 0;

        for (tag, replacement) in substitutions {
            if let Some(field) = block.field(tag) {
                let count = replace_all(&mut running, &field.value, replacement);
                debug!(
                    "Replaced {} occurrence(s) of {:?} value '{}'",
                    count,
                    tag,
                    field.as_str()
                );
                replaced += count;
            }
        }

        if replaced == 0 {
            return Err(Error::SerialValuesNotFound);
        }

        image[range.clone()].copy_from_slice(&running);
        info!(
            "Patched Fsys serial to {} (hardware code {})",
            new.as_str(),
            new.code_str()
        );
        Ok(range)
    }
}

/// Recomputes the `Fsys` checksum from the working image and stores it.
///
/// Runs only after [`SerialSubstitution`], which has rewritten the whole
/// checksummed range of the working image by then.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumRewrite;

impl PatchOperation for ChecksumRewrite {
    fn kind(&self) -> PatchKind {
        PatchKind::Checksum
    }

    fn requires(&self) -> Option<PatchKind> {
        Some(PatchKind::Serial)
    }

    fn apply(
        &self,
        image: &mut Vec<u8>,
        _original: &[u8],
        model: &RegionModel,
    ) -> Result<Range<usize>> {
        let block = &model.data_block;
        let value = crc32(&image[block.checksummed_range()]);
        let offset = block.checksum().offset;

        image[offset..offset + CHECKSUM_LEN].copy_from_slice(&encode_checksum(value)?);
        info!("Patched Fsys checksum to {:08X} at {:#x}", value, offset);
        Ok(offset..offset + CHECKSUM_LEN)
    }
}
