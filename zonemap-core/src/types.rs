// vim: tw=80
//! Common type definitions used throughout zonemap

use thiserror::Error;
use std::io;

/// Indexes a device sector.  Sectors are always 512 bytes.
pub type SectorT = u64;

/// Indexes a device's zones.  Zone numbering starts at 1; zone 0 is never
/// emitted.
pub type ZoneT = u32;

/// Indexes a filesystem allocation segment.  Segment identity is purely
/// positional: `physical_block >> segment_shift`.
pub type SegmentT = u64;

/// log2 of the sector size.
pub const SECTOR_SHIFT: u32 = 9;

/// zonemap's error type.
///
/// Every variant is fatal for the file under analysis.  The pipeline never
/// substitutes a default or skips a malformed extent; doing so would corrupt
/// the zone/segment grouping invariants.
#[derive(Debug, Error)]
pub enum Error {
    /// A collaborator ioctl or device query failed.
    #[error("device query failed: {0}")]
    DeviceQuery(#[from] nix::Error),
    /// An input value violated a precondition, e.g. a raw physical block
    /// below the address-space offset or a zero-length extent.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Reading device or filesystem metadata from the kernel failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The extent query returned an empty mapped set before reaching the
    /// file's last extent.
    #[error("no extents are mapped")]
    NoMappedExtents,
    /// Non-power-of-two zone size, or a device layout this tool does not
    /// understand.
    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// LCOV_EXCL_STOP
