//! Error types for the efipatch-core library.
//!
//! Every failure mode of a patch run is its own variant so that callers can
//! match on the exact condition. [`Error::severity`] maps each variant onto
//! the run-level policy: fatal conditions abort the run, skipped ones only
//! drop the operation that raised them, advisory ones are reported and
//! otherwise ignored.

use crate::region::RegionKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for efipatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// How an error affects the rest of a patch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The whole run must stop
    Fatal,
    /// Only the operation that produced the error is dropped
    Skipped,
    /// Reported, never blocks processing
    Advisory,
}

/// Comprehensive error type for all efipatch operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The `Fsys` start marker is absent from the image
    #[error("unable to locate Fsys block inside image")]
    DataBlockNotFound,

    /// The `Fsys` start marker was found but no `EOF` marker follows it
    #[error("Fsys block at offset {start:#x} has no EOF marker")]
    DataBlockUnterminated {
        /// Offset of the start marker
        start: usize,
    },

    /// Only zero bytes follow the data block, so the checksum cannot be located
    #[error("no checksum field found after offset {from:#x}: image ends in zero padding")]
    ChecksumFieldNotFound {
        /// Offset where the padding scan started
        from: usize,
    },

    /// The checksum field starts too close to the end of the image
    #[error("checksum field at offset {offset:#x} is truncated: {available} of 4 bytes available")]
    ChecksumFieldTruncated {
        /// Offset of the checksum field
        offset: usize,
        /// Bytes left in the image from that offset
        available: usize,
    },

    /// A patch targets a region that was not found by the scanner
    #[error("unable to locate {kind} offsets")]
    RegionNotFound {
        /// Region the patch needed
        kind: RegionKind,
    },

    /// A region's end marker sits inside its fixed header
    #[error("{kind} region {start:#x}..{end:#x} is smaller than its {header}-byte header")]
    RegionTooSmall {
        /// Region being erased
        kind: RegionKind,
        /// Start marker offset
        start: usize,
        /// End marker offset
        end: usize,
        /// Header length preserved by the fill
        header: usize,
    },

    /// Replacement serial has the wrong length
    #[error("serial length incorrect: expected 12 characters, got {length}")]
    SerialLength {
        /// Length of the rejected serial
        length: usize,
    },

    /// Replacement serial contains non-ASCII characters
    #[error("serial must contain only ASCII characters")]
    SerialNotAscii,

    /// Neither serial nor hardware code fields exist in the data block
    #[error("no serial or hardware code fields present in Fsys block")]
    SerialFieldsMissing,

    /// None of the field values recorded by the scan occur in the data block
    #[error("serial and hardware code values not found in Fsys block")]
    SerialValuesNotFound,

    /// The stored checksum does not match the data block contents
    #[error("Fsys checksum mismatch: stored {stored:08X}, computed {computed:08X}")]
    ChecksumMismatch {
        /// Value decoded from the checksum field
        stored: u32,
        /// CRC-32 of the data block
        computed: u32,
    },

    /// A hex string could not be decoded
    #[error("invalid hex string '{value}': {details}")]
    InvalidHex {
        /// The offending string
        value: String,
        /// Description of the issue
        details: String,
    },

    /// Failed to parse or serialize the model database
    #[error("model database error: {0}")]
    Database(#[from] serde_json::Error),

    /// The remote identifier service could not answer
    #[error("identifier lookup for '{code}' failed: {details}")]
    Lookup {
        /// Hardware code that was looked up
        code: String,
        /// Description of the failure
        details: String,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new region-not-found error
    pub fn region_not_found(kind: RegionKind) -> Self {
        Self::RegionNotFound { kind }
    }

    /// Creates a new invalid hex error
    pub fn invalid_hex(value: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidHex {
            value: value.into(),
            details: details.into(),
        }
    }

    /// Creates a new lookup error
    pub fn lookup(code: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Lookup {
            code: code.into(),
            details: details.into(),
        }
    }

    /// Classifies this error according to the run policy
    pub fn severity(&self) -> Severity {
        match self {
            Self::FileRead { .. }
            | Self::FileWrite { .. }
            | Self::DataBlockNotFound
            | Self::DataBlockUnterminated { .. }
            | Self::ChecksumFieldNotFound { .. }
            | Self::ChecksumFieldTruncated { .. }
            | Self::InvalidHex { .. }
            | Self::Database(_) => Severity::Fatal,
            Self::RegionNotFound { .. }
            | Self::RegionTooSmall { .. }
            | Self::SerialLength { .. }
            | Self::SerialNotAscii
            | Self::SerialFieldsMissing
            | Self::SerialValuesNotFound
            | Self::Lookup { .. } => Severity::Skipped,
            Self::ChecksumMismatch { .. } => Severity::Advisory,
        }
    }

    /// Returns true if the run can continue after this error
    pub fn is_recoverable(&self) -> bool {
        self.severity() != Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SerialLength { length: 11 };
        assert!(err.to_string().contains("expected 12"));
        assert!(err.to_string().contains("11"));

        let err = Error::region_not_found(RegionKind::Nvram);
        assert_eq!(err.to_string(), "unable to locate NVRAM offsets");
    }

    #[test]
    fn test_severity() {
        assert_eq!(Error::DataBlockNotFound.severity(), Severity::Fatal);
        assert_eq!(
            Error::ChecksumFieldNotFound { from: 0 }.severity(),
            Severity::Fatal
        );
        assert_eq!(
            Error::region_not_found(RegionKind::FirmwareLock).severity(),
            Severity::Skipped
        );
        assert_eq!(Error::lookup("ABCD", "timeout").severity(), Severity::Skipped);
        assert_eq!(Error::SerialValuesNotFound.severity(), Severity::Skipped);
        assert_eq!(
            Error::ChecksumMismatch {
                stored: 1,
                computed: 2
            }
            .severity(),
            Severity::Advisory
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::SerialLength { length: 3 }.is_recoverable());
        assert!(!Error::DataBlockNotFound.is_recoverable());
    }
}
