//! In-memory description of the regions located inside a firmware image.
//!
//! A [`RegionModel`] is built once by the [`Scanner`](crate::Scanner) and
//! then passed by shared reference to every later stage. Nothing downstream
//! mutates it; patch operations only read offsets from it.

use crate::checksum::ChecksumField;
use std::fmt;
use std::ops::Range;

/// The structural regions the patcher knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Intel Management Engine region (located by header signature)
    ManagementEngine,
    /// `$VSS` variable store
    Nvram,
    /// `Fsys` block holding serial, hardware code and model
    DataBlock,
    /// `$SVS` firmware lock store
    FirmwareLock,
}

impl RegionKind {
    /// Whether the region is delimited by both a start and an end marker
    pub fn is_bounded(&self) -> bool {
        !matches!(self, RegionKind::ManagementEngine)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegionKind::ManagementEngine => "ME region",
            RegionKind::Nvram => "NVRAM",
            RegionKind::DataBlock => "Fsys",
            RegionKind::FirmwareLock => "firmware lock",
        })
    }
}

/// Location of one region inside the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    kind: RegionKind,
    start: Option<usize>,
    end: Option<usize>,
}

impl Region {
    /// Creates a region descriptor from scanner results
    pub fn new(kind: RegionKind, start: Option<usize>, end: Option<usize>) -> Self {
        Self { kind, start, end }
    }

    /// Creates a descriptor for a region that was not located
    pub fn missing(kind: RegionKind) -> Self {
        Self::new(kind, None, None)
    }

    /// The kind of region this describes
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Offset of the start marker
    pub fn start(&self) -> Option<usize> {
        self.start
    }

    /// Offset of the end marker, if the region has one
    pub fn end(&self) -> Option<usize> {
        self.end
    }

    /// True when every marker the region needs was located
    pub fn is_found(&self) -> bool {
        self.start.is_some() && (self.end.is_some() || !self.kind.is_bounded())
    }

    /// `start..end` of a bounded region when both markers were found
    pub fn span(&self) -> Option<Range<usize>> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(start..end),
            _ => None,
        }
    }
}

/// Alternative ME region header layouts, in match priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeHeaderVersion {
    /// Flash descriptor with 0x10 region base
    V1,
    /// Flash descriptor with 0x24 region base
    V2,
    /// Zero-padded `$FPT` header
    V3,
}

/// Named fields inside the `Fsys` block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldTag {
    /// `ssn` serial number
    SerialLower,
    /// `SSN` serial number
    SerialUpper,
    /// `hwc` hardware code
    CodeLower,
    /// `HWC` hardware code
    CodeUpper,
    /// `son` model number
    Model,
}

impl FieldTag {
    /// All tags, in the order fields are reported
    pub const ALL: [FieldTag; 5] = [
        FieldTag::SerialUpper,
        FieldTag::SerialLower,
        FieldTag::CodeUpper,
        FieldTag::CodeLower,
        FieldTag::Model,
    ];

    /// Tag bytes as they appear in the image
    pub fn marker(&self) -> &'static [u8] {
        match self {
            FieldTag::SerialLower => b"ssn",
            FieldTag::SerialUpper => b"SSN",
            FieldTag::CodeLower => b"hwc",
            FieldTag::CodeUpper => b"HWC",
            FieldTag::Model => b"son",
        }
    }

    /// Length of the field value
    pub fn value_len(&self) -> usize {
        match self {
            FieldTag::SerialLower | FieldTag::SerialUpper => 12,
            FieldTag::CodeLower | FieldTag::CodeUpper => 4,
            FieldTag::Model => 9,
        }
    }
}

/// A field located inside the `Fsys` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Which field this is
    pub tag: FieldTag,
    /// Offset of the tag bytes
    pub offset: usize,
    /// Field value as read from the original image
    pub value: Vec<u8>,
}

impl Field {
    /// Offset of the value bytes (tag plus a two byte length prefix)
    pub const VALUE_SKIP: usize = 5;

    /// Absolute range of the value bytes
    pub fn value_range(&self) -> Range<usize> {
        let start = self.offset + Self::VALUE_SKIP;
        start..start + self.value.len()
    }

    /// Value decoded for display
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// The `Fsys` block together with its fields and checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    region: Region,
    start: usize,
    end: usize,
    fields: Vec<Field>,
    checksum: ChecksumField,
}

impl DataBlock {
    /// Creates a data block descriptor. Both markers must have been found.
    pub fn new(start: usize, end: usize, fields: Vec<Field>, checksum: ChecksumField) -> Self {
        Self {
            region: Region::new(RegionKind::DataBlock, Some(start), Some(end)),
            start,
            end,
            fields,
            checksum,
        }
    }

    /// Region descriptor of the block
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Offset of the `Fsys` marker
    pub fn start(&self) -> usize {
        self.start
    }

    /// Offset of the `EOF` marker
    pub fn end(&self) -> usize {
        self.end
    }

    /// Bytes covered by the checksum: from `Fsys` up to the checksum field
    pub fn checksummed_range(&self) -> Range<usize> {
        self.start()..self.checksum.offset
    }

    /// The checksum field following the block
    pub fn checksum(&self) -> &ChecksumField {
        &self.checksum
    }

    /// All fields that were found
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by tag
    pub fn field(&self, tag: FieldTag) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// `SSN` serial
    pub fn serial_upper(&self) -> Option<&Field> {
        self.field(FieldTag::SerialUpper)
    }

    /// `ssn` serial
    pub fn serial_lower(&self) -> Option<&Field> {
        self.field(FieldTag::SerialLower)
    }

    /// `HWC` hardware code
    pub fn code_upper(&self) -> Option<&Field> {
        self.field(FieldTag::CodeUpper)
    }

    /// `hwc` hardware code
    pub fn code_lower(&self) -> Option<&Field> {
        self.field(FieldTag::CodeLower)
    }

    /// `son` model number
    pub fn model(&self) -> Option<&Field> {
        self.field(FieldTag::Model)
    }

    /// Hardware code used for identifier lookup, preferring the lowercase field
    pub fn hardware_code(&self) -> Option<String> {
        self.code_lower().or_else(|| self.code_upper()).map(Field::as_str)
    }
}

/// Every region located by one scan of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionModel {
    /// ME region (start only)
    pub me: Region,
    /// Which ME header layout matched
    pub me_version: Option<MeHeaderVersion>,
    /// NVRAM variable store
    pub nvram: Region,
    /// `Fsys` block, always present in a successfully scanned image
    pub data_block: DataBlock,
    /// Firmware lock store
    pub lock: Region,
}

impl RegionModel {
    /// Returns the region descriptor for a kind
    pub fn region(&self, kind: RegionKind) -> &Region {
        match kind {
            RegionKind::ManagementEngine => &self.me,
            RegionKind::Nvram => &self.nvram,
            RegionKind::DataBlock => self.data_block.region(),
            RegionKind::FirmwareLock => &self.lock,
        }
    }
}
