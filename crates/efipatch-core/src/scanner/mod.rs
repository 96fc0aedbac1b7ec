//! Signature scanning for firmware image regions.
//!
//! The image format carries no structural headers or length fields for the
//! regions the patcher cares about, so every region is located by searching
//! for fixed byte signatures.
//!
//! ## Algorithm Overview
//!
//! 1. Find `Fsys`, then the first `EOF` after it; both are required
//! 2. Find each named field tag between the two markers
//! 3. Skip the zero padding after `EOF` to find the checksum field
//! 4. Find the first and second `$VSS` (NVRAM) and `$SVS` (lock) markers
//! 5. Try the ME header signatures in priority order
//!
//! ## Extensibility
//!
//! The checksum field discovery is pluggable through
//! [`ChecksumLocator`](crate::checksum::ChecksumLocator):
//!
//! ```no_run
//! use efipatch_core::checksum::ChecksumLocator;
//! use efipatch_core::{Result, Scanner};
//!
//! struct FixedGap;
//!
//! impl ChecksumLocator for FixedGap {
//!     fn locate(&self, _image: &[u8], from: usize) -> Result<usize> {
//!         Ok(from + 13)
//!     }
//! }
//!
//! let scanner = Scanner::with_locator(FixedGap);
//! # let _ = scanner;
//! ```

pub mod signature;

use crate::checksum::{ChecksumField, ChecksumLocator, ZeroPadLocator};
use crate::error::{Error, Result};
use crate::region::{DataBlock, Field, FieldTag, Region, RegionKind, RegionModel};
use signature::{DATA_BLOCK_END, DATA_BLOCK_START, LOCK_MARKER, ME_HEADERS, NVRAM_MARKER};
use std::ops::Range;
use tracing::{debug, trace};

/// Builds a [`RegionModel`] from a raw image
#[derive(Debug, Clone, Default)]
pub struct Scanner<L = ZeroPadLocator> {
    locator: L,
}

impl Scanner {
    /// Creates a scanner using the zero-padding checksum heuristic
    pub fn new() -> Self {
        Self {
            locator: ZeroPadLocator,
        }
    }
}

impl<L: ChecksumLocator> Scanner<L> {
    /// Creates a scanner with a custom checksum locator
    pub fn with_locator(locator: L) -> Self {
        Self { locator }
    }

    /// Locates every known region in the image.
    ///
    /// Fails only if the `Fsys` block or its checksum cannot be located;
    /// the other regions are recorded as missing instead.
    pub fn scan(&self, image: &[u8]) -> Result<RegionModel> {
        debug!("Starting scan of {} bytes", image.len());

        let data_block = self.scan_data_block(image)?;

        let (me_version, me_offset) = match find_first_of(image, &ME_HEADERS) {
            Some((version, offset)) => {
                debug!("Found ME region header {:?} at {:#x}", version, offset);
                (Some(version), Some(offset))
            }
            None => (None, None),
        };

        let nvram = scan_store(image, RegionKind::Nvram, NVRAM_MARKER);
        let lock = scan_store(image, RegionKind::FirmwareLock, LOCK_MARKER);

        Ok(RegionModel {
            me: Region::new(RegionKind::ManagementEngine, me_offset, None),
            me_version,
            nvram,
            data_block,
            lock,
        })
    }

    fn scan_data_block(&self, image: &[u8]) -> Result<DataBlock> {
        let start = find(image, DATA_BLOCK_START).ok_or(Error::DataBlockNotFound)?;
        let end = find_after(image, DATA_BLOCK_START, start, DATA_BLOCK_END)
            .ok_or(Error::DataBlockUnterminated { start })?;
        debug!("Found Fsys block at {:#x}..{:#x}", start, end);

        let body = start + DATA_BLOCK_START.len()..end;
        let fields = FieldTag::ALL
            .iter()
            .filter_map(|&tag| read_field(image, tag, body.clone()))
            .collect();

        let offset = self.locator.locate(image, end + DATA_BLOCK_END.len())?;
        let checksum = ChecksumField::read(image, offset)?;
        debug!("Found Fsys checksum field at {:#x}", offset);

        Ok(DataBlock::new(start, end, fields, checksum))
    }
}

/// Finds a marker pair delimiting a store: the first occurrence and the next one after it
fn scan_store(image: &[u8], kind: RegionKind, marker: &[u8]) -> Region {
    let start = find(image, marker);
    let end = start.and_then(|s| find_after(image, marker, s, marker));

    match (start, end) {
        (Some(s), Some(e)) => debug!("Found {} at {:#x}..{:#x}", kind, s, e),
        (Some(s), None) => debug!("Found {} start at {:#x} but no end marker", kind, s),
        _ => trace!("No {} marker present", kind),
    }

    Region::new(kind, start, end)
}

/// Locates a tagged field whose value lies entirely inside `body`
fn read_field(image: &[u8], tag: FieldTag, body: Range<usize>) -> Option<Field> {
    let offset = find_in(image, tag.marker(), body.clone())?;
    let value_start = offset + Field::VALUE_SKIP;
    let value_end = value_start + tag.value_len();

    if value_end > body.end {
        trace!("Field {:?} at {:#x} runs past the EOF marker", tag, offset);
        return None;
    }

    trace!("Found field {:?} at {:#x}", tag, offset);
    Some(Field {
        tag,
        offset,
        value: image[value_start..value_end].to_vec(),
    })
}

/// Finds the first occurrence of `needle` in `haystack`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Finds the first occurrence of `needle` lying entirely inside `range`.
///
/// Returns an absolute offset. The range is clamped to the haystack.
pub fn find_in(haystack: &[u8], needle: &[u8], range: Range<usize>) -> Option<usize> {
    let end = range.end.min(haystack.len());
    if range.start >= end {
        return None;
    }
    find(&haystack[range.start..end], needle).map(|pos| range.start + pos)
}

/// Finds `needle` after a previous match of `previous` at `at`.
///
/// The search resumes at `at + previous.len()` so a marker never matches
/// itself twice.
pub fn find_after(haystack: &[u8], previous: &[u8], at: usize, needle: &[u8]) -> Option<usize> {
    find_in(haystack, needle, at + previous.len()..haystack.len())
}

/// Evaluates alternative signatures in order and returns the first that matched
pub fn find_first_of<T: Copy>(haystack: &[u8], candidates: &[(T, &[u8])]) -> Option<(T, usize)> {
    candidates
        .iter()
        .find_map(|&(id, needle)| find(haystack, needle).map(|offset| (id, offset)))
}

/// Reads a file and scans it.
///
/// Returns the image bytes alongside the region model.
pub fn scan_file(path: impl AsRef<std::path::Path>) -> Result<(Vec<u8>, RegionModel)> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    let model = Scanner::new().scan(&data)?;
    Ok((data, model))
}
