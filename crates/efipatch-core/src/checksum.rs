//! Checksum engine for the `Fsys` block.
//!
//! The block is protected by a CRC-32 stored in a 4-byte field somewhere
//! after the `EOF` marker. There is no length field pointing at it: the gap
//! between the marker and the checksum is zero padding of variable length.
//! Locating the field is delegated to a [`ChecksumLocator`] so the padding
//! heuristic can be replaced without touching the patch logic.
//!
//! ## On-disk encoding
//!
//! The CRC is rendered as 8 hex digits, split into 2-digit groups, and the
//! group order is reversed before the digits are decoded back into bytes:
//!
//! ```text
//! 0x12345678 -> "12345678" -> "78563412" -> [0x78, 0x56, 0x34, 0x12]
//! ```

use crate::error::{Error, Result};
use crate::region::RegionModel;
use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::{debug, trace, warn};

/// CRC-32 as used by zlib (reflected, polynomial 0x04C11DB7)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Size of the checksum field
pub const CHECKSUM_LEN: usize = 4;

/// Computes the CRC-32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Reverses the order of 2-character groups in a hex string.
///
/// Applying it twice returns the input.
pub fn reverse_hex_pairs(hex: &str) -> Result<String> {
    if hex.len() % 2 != 0 {
        return Err(Error::invalid_hex(hex, "odd number of digits"));
    }
    if !hex.is_ascii() {
        return Err(Error::invalid_hex(hex, "non-ASCII characters"));
    }

    Ok(hex
        .as_bytes()
        .chunks(2)
        .rev()
        .flat_map(|pair| pair.iter().map(|&b| b as char))
        .collect())
}

/// Encodes a CRC value into its on-disk byte representation.
pub fn encode_checksum(value: u32) -> Result<[u8; CHECKSUM_LEN]> {
    let reversed = reverse_hex_pairs(&format!("{:08x}", value))?;
    let mut out = [0u8; CHECKSUM_LEN];
    hex::decode_to_slice(&reversed, &mut out)
        .map_err(|e| Error::invalid_hex(&reversed, e.to_string()))?;
    Ok(out)
}

/// Decodes an on-disk checksum field back into the CRC value it stores.
pub fn decode_checksum(stored: [u8; CHECKSUM_LEN]) -> Result<u32> {
    let reversed = reverse_hex_pairs(&hex::encode(stored))?;
    u32::from_str_radix(&reversed, 16).map_err(|e| Error::invalid_hex(&reversed, e.to_string()))
}

/// Strategy for finding the checksum field after the `Fsys` block
pub trait ChecksumLocator: Send + Sync {
    /// Returns the offset of the checksum field, searching from `from`
    /// (the first byte after the `EOF` marker).
    fn locate(&self, image: &[u8], from: usize) -> Result<usize>;
}

/// Skips zero padding: the first non-zero byte after the marker starts the field.
///
/// This misplaces the field if the checksum itself begins with a zero byte;
/// existing images are written this way so readers must do the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroPadLocator;

impl ChecksumLocator for ZeroPadLocator {
    fn locate(&self, image: &[u8], from: usize) -> Result<usize> {
        let padding = image
            .get(from..)
            .unwrap_or_default()
            .iter()
            .position(|&b| b != 0x00)
            .ok_or(Error::ChecksumFieldNotFound { from })?;

        trace!("Skipped {} bytes of zero padding after {:#x}", padding, from);
        Ok(from + padding)
    }
}

/// The 4-byte checksum field as found in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumField {
    /// Absolute offset of the field
    pub offset: usize,
    /// Field bytes in file order
    pub stored: [u8; CHECKSUM_LEN],
}

impl ChecksumField {
    /// Creates a checksum field descriptor
    pub fn new(offset: usize, stored: [u8; CHECKSUM_LEN]) -> Self {
        Self { offset, stored }
    }

    /// Reads the field at `offset`
    pub fn read(image: &[u8], offset: usize) -> Result<Self> {
        let bytes = image
            .get(offset..offset + CHECKSUM_LEN)
            .ok_or(Error::ChecksumFieldTruncated {
                offset,
                available: image.len().saturating_sub(offset),
            })?;

        let mut stored = [0u8; CHECKSUM_LEN];
        stored.copy_from_slice(bytes);
        Ok(Self::new(offset, stored))
    }

    /// The CRC value the field encodes
    pub fn stored_value(&self) -> Result<u32> {
        decode_checksum(self.stored)
    }
}

/// Outcome of verifying the original checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Field bytes in file order
    pub stored: [u8; CHECKSUM_LEN],
    /// CRC-32 computed over the block
    pub computed: u32,
    /// Whether the stored bytes equal the encoding of `computed`
    pub matches: bool,
}

impl ChecksumReport {
    /// The value the stored bytes encode
    pub fn stored_value(&self) -> Result<u32> {
        decode_checksum(self.stored)
    }

    /// Returns the advisory mismatch error, if any
    pub fn mismatch(&self) -> Option<Error> {
        if self.matches {
            return None;
        }
        Some(Error::ChecksumMismatch {
            stored: self.stored_value().unwrap_or_default(),
            computed: self.computed,
        })
    }
}

/// Recomputes the `Fsys` checksum and compares it with the field stored in `image`.
///
/// Offsets come from `model`; both the covered bytes and the field are read
/// from `image`, so a patched copy can be checked against the original model.
pub fn verify_checksum(image: &[u8], model: &RegionModel) -> Result<ChecksumReport> {
    let block = &model.data_block;
    let field = ChecksumField::read(image, block.checksum().offset)?;
    let computed = crc32(&image[block.checksummed_range()]);
    let matches = encode_checksum(computed)? == field.stored;

    debug!(
        "Fsys checksum at {:#x}: stored {}, computed {:08X}, match: {}",
        field.offset,
        hex::encode_upper(field.stored),
        computed,
        matches
    );
    if !matches {
        warn!(
            "Fsys checksum mismatch: stored {}, computed {:08X}",
            hex::encode_upper(field.stored),
            computed
        );
    }

    Ok(ChecksumReport {
        stored: field.stored,
        computed,
        matches,
    })
}
