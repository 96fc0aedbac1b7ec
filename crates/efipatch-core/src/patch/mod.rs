//! Patch operations applied to a working copy of the image.
//!
//! Each operation checks its own preconditions against the
//! [`RegionModel`] and either writes into the working buffer or reports why
//! it was skipped. Operations never touch the region model itself.
//!
//! ## Extensibility
//!
//! The [`PatchOperation`] trait is the unit the
//! [`apply_patches`](crate::writer::apply_patches) fold works on. The
//! built-in operations are:
//!
//! - [`BlockInsertion`]: copies a replacement ME region over the old one
//! - [`FillErasure`]: resets the NVRAM or firmware lock store to `0xFF`
//! - [`SerialSubstitution`]: swaps serial numbers and hardware codes
//! - [`ChecksumRewrite`]: re-derives the `Fsys` checksum after substitution

mod erase;
mod insert;
mod serial;

use crate::error::{Error, Result};
use crate::region::{RegionKind, RegionModel};
use std::fmt;
use std::ops::Range;

pub use erase::FillErasure;
pub use insert::BlockInsertion;
pub use serial::{
    replace_all, ChecksumRewrite, NewSerial, SerialSubstitution, CODE_LEN, SERIAL_LEN,
};

/// Identifies an operation in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchKind {
    /// ME region block insertion
    InsertMeRegion,
    /// NVRAM fill-erasure
    ClearNvram,
    /// Serial and hardware code substitution
    Serial,
    /// `Fsys` checksum rewrite
    Checksum,
    /// Firmware lock fill-erasure
    RemoveLock,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchKind::InsertMeRegion => "ME region insertion",
            PatchKind::ClearNvram => "NVRAM clear",
            PatchKind::Serial => "serial patch",
            PatchKind::Checksum => "checksum rewrite",
            PatchKind::RemoveLock => "firmware lock removal",
        })
    }
}

/// A transformation of the working image
pub trait PatchOperation {
    /// Which operation this is
    fn kind(&self) -> PatchKind;

    /// Another operation that must have been applied first, if any.
    ///
    /// When the prerequisite was skipped this operation is dropped silently.
    fn requires(&self) -> Option<PatchKind> {
        None
    }

    /// Applies the operation and returns the byte range it wrote.
    ///
    /// `image` is the working copy earlier operations have already written
    /// to; `original` is the unpatched image the `model` was scanned from.
    fn apply(
        &self,
        image: &mut Vec<u8>,
        original: &[u8],
        model: &RegionModel,
    ) -> Result<Range<usize>>;
}

/// The set of independently optional patches requested for one run
#[derive(Debug, Clone, Default)]
pub struct PatchRequest {
    /// Serial number to write into the `Fsys` block
    pub new_serial: Option<String>,
    /// Replacement ME region
    pub insert_block: Option<Vec<u8>>,
    /// Reset the NVRAM store
    pub clear_nvram: bool,
    /// Erase the firmware lock store
    pub remove_lock: bool,
}

impl PatchRequest {
    /// Creates an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the serial number to write
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.new_serial = Some(serial.into());
        self
    }

    /// Sets the ME region to insert
    pub fn insert_block(mut self, block: impl Into<Vec<u8>>) -> Self {
        self.insert_block = Some(block.into());
        self
    }

    /// Sets whether to clear NVRAM
    pub fn clear_nvram(mut self, clear: bool) -> Self {
        self.clear_nvram = clear;
        self
    }

    /// Sets whether to remove the firmware lock
    pub fn remove_lock(mut self, remove: bool) -> Self {
        self.remove_lock = remove;
        self
    }

    /// True if nothing was requested
    pub fn is_empty(&self) -> bool {
        self.new_serial.is_none()
            && self.insert_block.is_none()
            && !self.clear_nvram
            && !self.remove_lock
    }

    /// Builds the operations in their fixed write order
    pub fn operations(&self) -> Vec<Box<dyn PatchOperation + '_>> {
        let mut ops: Vec<Box<dyn PatchOperation + '_>> = Vec::new();

        if let Some(block) = &self.insert_block {
            ops.push(Box::new(BlockInsertion::new(block)));
        }
        if self.clear_nvram {
            ops.push(Box::new(FillErasure::new(RegionKind::Nvram)));
        }
        if let Some(serial) = &self.new_serial {
            ops.push(Box::new(SerialSubstitution::new(serial)));
            ops.push(Box::new(ChecksumRewrite));
        }
        if self.remove_lock {
            ops.push(Box::new(FillErasure::new(RegionKind::FirmwareLock)));
        }

        ops
    }
}

/// Result of one requested operation
#[derive(Debug)]
pub enum PatchStatus {
    /// Bytes in the range were written
    Applied(Range<usize>),
    /// The operation did not run
    Skipped(Error),
}

/// Outcome of one operation in a patch run
#[derive(Debug)]
pub struct PatchOutcome {
    /// Which operation
    pub kind: PatchKind,
    /// What happened
    pub status: PatchStatus,
}

impl PatchOutcome {
    /// True if the operation wrote to the image
    pub fn is_applied(&self) -> bool {
        matches!(self.status, PatchStatus::Applied(_))
    }

    /// The error that caused a skip
    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            PatchStatus::Skipped(e) => Some(e),
            PatchStatus::Applied(_) => None,
        }
    }
}
