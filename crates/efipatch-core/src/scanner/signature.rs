//! Marker signatures of the firmware image format.
//!
//! All values are matched byte for byte.

use crate::region::MeHeaderVersion;

/// Start of the `Fsys` block
pub const DATA_BLOCK_START: &[u8] = b"Fsys";

/// End of the `Fsys` block
pub const DATA_BLOCK_END: &[u8] = b"EOF";

/// NVRAM variable store marker (start and end)
pub const NVRAM_MARKER: &[u8] = b"$VSS";

/// Firmware lock store marker (start and end)
pub const LOCK_MARKER: &[u8] = b"$SVS";

/// Bytes after a store's start marker left untouched by fill-erasure
pub const STORE_HEADER_LEN: usize = 16;

/// Filler written over erased stores
pub const ERASED_BYTE: u8 = 0xFF;

const ME_HEADER_V1: [u8; 20] = [
    0x20, 0x20, 0x80, 0x0F, 0x40, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x24, 0x46, 0x50, 0x54,
];

const ME_HEADER_V2: [u8; 20] = [
    0x20, 0x20, 0x80, 0x0F, 0x40, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x24, 0x46, 0x50, 0x54,
];

const ME_HEADER_V3: [u8; 20] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x24, 0x46, 0x50, 0x54,
];

/// ME region headers in priority order; the first one present wins
pub const ME_HEADERS: [(MeHeaderVersion, &[u8]); 3] = [
    (MeHeaderVersion::V1, &ME_HEADER_V1),
    (MeHeaderVersion::V2, &ME_HEADER_V2),
    (MeHeaderVersion::V3, &ME_HEADER_V3),
];
