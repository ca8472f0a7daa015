// vim: tw=80
//! Builds the ordered extent list for a file from raw extent mappings

#[cfg(test)] use mockall::automock;
use serde_derive::Serialize;
use std::{
    fs,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use tracing::trace;

use crate::{
    addrspace::AddrSpace,
    types::*,
    zone::zone_number,
};

#[doc(hidden)]
#[allow(non_camel_case_types)]
pub mod ffi {
    use nix::ioctl_readwrite;

    pub const FIEMAP_FLAG_SYNC: u32 = 0x1;
    pub const FIEMAP_EXTENT_LAST: u32 = 0x1;

    /// Per `linux/fiemap.h`
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default)]
    pub struct fiemap_extent {
        pub fe_logical:    u64,
        pub fe_physical:   u64,
        pub fe_length:     u64,
        pub fe_reserved64: [u64; 2],
        pub fe_flags:      u32,
        pub fe_reserved:   [u32; 3],
    }

    /// A `fiemap` request with room for exactly one extent, so mappings can
    /// be walked one at a time.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default)]
    pub struct fiemap_one {
        pub fm_start:          u64,
        pub fm_length:         u64,
        pub fm_flags:          u32,
        pub fm_mapped_extents: u32,
        pub fm_extent_count:   u32,
        pub fm_reserved:       u32,
        pub fm_extents:        [fiemap_extent; 1],
    }

    ioctl_readwrite! {
        /// `FS_IOC_FIEMAP`
        #[doc(hidden)]
        fs_ioc_fiemap, b'f', 11, fiemap_one
    }
}

/// One raw mapping as returned by the extent-query interface, in bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawExtent {
    pub logical:  u64,
    pub physical: u64,
    pub length:   u64,
    /// The file has no further mapped extents after this one.
    pub last:     bool,
}

/// One FIEMAP-style query for the first mapped extent at or after `start`.
///
/// Returns `None` when the kernel reports no mapped extents for the range.
#[cfg_attr(test, automock)]
pub trait ExtentQuery {
    fn query(&self, start: u64, length: u64) -> Result<Option<RawExtent>>;
}

/// [`ExtentQuery`] implementation over `FS_IOC_FIEMAP` on an open file.
#[derive(Debug)]
pub struct FiemapQuery<'a> {
    file: &'a fs::File,
}

impl<'a> FiemapQuery<'a> {
    pub fn new(file: &'a fs::File) -> Self {
        FiemapQuery { file }
    }
}

impl ExtentQuery for FiemapQuery<'_> {
    fn query(&self, start: u64, length: u64) -> Result<Option<RawExtent>> {
        let mut fm = ffi::fiemap_one {
            fm_start: start,
            fm_length: length,
            fm_flags: ffi::FIEMAP_FLAG_SYNC,
            fm_extent_count: 1,     // get extents individually
            ..Default::default()
        };
        unsafe { ffi::fs_ioc_fiemap(self.file.as_raw_fd(), &mut fm) }?;
        if fm.fm_mapped_extents == 0 {
            return Ok(None);
        }
        let fe = fm.fm_extents[0];
        Ok(Some(RawExtent {
            logical:  fe.fe_logical,
            physical: fe.fe_physical,
            length:   fe.fe_length,
            last:     fe.fe_flags & ffi::FIEMAP_EXTENT_LAST != 0,
        }))
    }
}

/// One contiguous mapped run of a file, in zoned-device-local sectors.
///
/// Immutable once constructed; `zone` is computed exactly once, during
/// collection.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Extent {
    pub file:           PathBuf,
    pub logical_block:  SectorT,
    pub physical_block: SectorT,
    pub len:            SectorT,
    pub zone:           ZoneT,
    pub zone_size:      SectorT,
}

impl Extent {
    /// One past the extent's final sector.
    pub fn end(&self) -> SectorT {
        self.physical_block + self.len
    }
}

/// Collect the ordered sequence of extents covering `file`.
///
/// Walks the extent query from logical offset 0 until it marks an extent as
/// the file's last, translating each physical address through `addr` and
/// tagging it with its owning zone.  `length_bytes` is the file's allocated
/// length, from `st_blocks`.
pub fn collect(
    file: &Path,
    query: &dyn ExtentQuery,
    addr: AddrSpace,
    zone_size: SectorT,
    length_bytes: u64,
) -> Result<Vec<Extent>>
{
    let mut extents = Vec::new();
    let mut start = 0u64;
    loop {
        let raw = query.query(start, length_bytes)?
            .ok_or(Error::NoMappedExtents)?;
        if raw.length == 0 {
            return Err(Error::InvalidInput(format!(
                "zero-length extent at logical {:#x} of {}",
                raw.logical, file.display()
            )));
        }
        let physical_block = addr.translate(raw.physical >> SECTOR_SHIFT)?;
        let zone = zone_number(physical_block, zone_size);
        trace!(physical_block, zone, len = raw.length >> SECTOR_SHIFT,
            "mapped extent");
        extents.push(Extent {
            file:          file.to_path_buf(),
            logical_block: raw.logical >> SECTOR_SHIFT,
            physical_block,
            len:           raw.length >> SECTOR_SHIFT,
            zone,
            zone_size,
        });
        if raw.last {
            break;
        }
        start = raw.logical + raw.length;
    }
    Ok(extents)
}

/// Order extents by ascending zone number.
///
/// Ties within a zone are broken by physical block, so report output is
/// deterministic.
pub fn sort_extents(extents: &mut [Extent]) {
    extents.sort_by_key(|e| (e.zone, e.physical_block));
}

// LCOV_EXCL_STOP
