//! # efipatch-core
//!
//! A library for locating, verifying and patching regions of EFI firmware images.
//!
//! This crate provides the core functionality for:
//! - Scanning an image for the `Fsys` block, NVRAM and firmware lock stores and the ME region
//! - Verifying and recomputing the `Fsys` CRC-32
//! - Replacing serial numbers and hardware codes, clearing stores and inserting an ME region
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scanner`]: Signature search and [`RegionModel`] construction
//! - [`checksum`]: Checksum field discovery, CRC-32 and the on-disk encoding
//! - [`region`]: Region descriptors shared by every stage
//! - [`patch`]: The individual patch operations
//! - [`writer`]: Folding patches over a working copy and writing the result
//! - [`lookup`]: Hardware code to model name resolution
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use efipatch_core::{apply_patches, verify_checksum, write_image, PatchRequest, Scanner};
//! use std::fs;
//!
//! let image = fs::read("firmware.bin")?;
//! let model = Scanner::new().scan(&image)?;
//!
//! let report = verify_checksum(&image, &model)?;
//! println!("checksum valid: {}", report.matches);
//!
//! let request = PatchRequest::new().serial("C02XK0AAJGH5").clear_nvram(true);
//! let patched = apply_patches(&image, &model, &request);
//! write_image("patched.bin", &patched.image)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides several traits for customization:
//!
//! - [`ChecksumLocator`]: Customize how the checksum field is found
//! - [`PatchOperation`]: Add operations to the patch fold
//! - [`IdentifierService`]: Plug in a remote model name source
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod checksum;
pub mod error;
pub mod lookup;
pub mod patch;
pub mod region;
pub mod scanner;
pub mod writer;

// Re-export primary types for convenience
pub use checksum::{verify_checksum, ChecksumLocator, ChecksumReport, ZeroPadLocator};
pub use error::{Error, Result, Severity};
pub use lookup::{IdentifierService, LookupSource, ModelDatabase, ModelResolver};
pub use patch::{PatchKind, PatchOperation, PatchOutcome, PatchRequest, PatchStatus};
pub use region::{DataBlock, Field, FieldTag, MeHeaderVersion, Region, RegionKind, RegionModel};
pub use scanner::{scan_file, Scanner};
pub use writer::{apply_patches, write_image, PatchReport};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
