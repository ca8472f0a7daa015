// vim: tw=80
//! Block device descriptors and the kernel interfaces used to probe them

#[cfg(test)] use mockall::automock;
use serde_derive::Serialize;
use std::{
    fs,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::types::*;

/// FFI definitions that don't belong in libc.  The ioctls can't go in libc
/// because they use Nix's macros.  The structs shouldn't go in libc either,
/// because they're not really intended to be a stable interface.
#[doc(hidden)]
#[allow(non_camel_case_types)]
pub mod ffi {
    use nix::{ioctl_read, ioctl_readwrite};

    /// One entry of a `BLKREPORTZONE` reply, per `linux/blkzoned.h`.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default)]
    pub struct blk_zone {
        pub start:    u64,
        pub len:      u64,
        pub wp:       u64,
        pub type_:    u8,
        pub cond:     u8,
        pub non_seq:  u8,
        pub reset:    u8,
        pub resv:     [u8; 4],
        pub capacity: u64,
        pub reserved: [u8; 24],
    }

    /// A `blk_zone_report` header with room for exactly one zone.  The
    /// kernel interface is variable-length; this tool only ever asks for
    /// one zone at a time.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default)]
    pub struct blk_zone_report_one {
        pub sector:   u64,
        pub nr_zones: u32,
        pub flags:    u32,
        pub zones:    [blk_zone; 1],
    }

    ioctl_read! {
        /// `BLKGETSIZE64`: device size in bytes
        #[doc(hidden)]
        blkgetsize64, 0x12, 114, u64
    }

    ioctl_read! {
        /// `BLKGETZONESZ`: zone size in 512-byte sectors
        #[doc(hidden)]
        blkgetzonesz, 0x12, 132, u32
    }

    ioctl_read! {
        /// `BLKGETNRZONES`: number of zones on the device
        #[doc(hidden)]
        blkgetnrzones, 0x12, 133, u32
    }

    ioctl_readwrite! {
        /// `BLKREPORTZONE` with a single-entry reply buffer
        #[doc(hidden)]
        blkreportzone, 0x12, 130, blk_zone_report_one
    }
}

/// Raw zone descriptor as reported by the device, all fields in sectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawZone {
    pub start:    SectorT,
    pub len:      SectorT,
    pub capacity: SectorT,
    pub wp:       SectorT,
    pub cond:     u8,
}

/// The raw device interfaces the pipeline depends on.
///
/// Everything behind this trait is a blocking kernel call; the engine itself
/// never opens a device node.
#[cfg_attr(test, automock)]
pub trait BlockQuery {
    /// Total device capacity in bytes.
    fn size_bytes(&self, path: &Path) -> Result<u64>;

    /// Zone size in sectors.  Assumed equal for all zones.
    fn zone_size_sectors(&self, path: &Path) -> Result<SectorT>;

    /// Number of zones on the device.
    fn nr_zones(&self, path: &Path) -> Result<u32>;

    /// Whether the device is zoned at all.
    fn is_zoned(&self, path: &Path) -> bool;

    /// Report the zone beginning at `start_sector`.
    fn report_zone(&self, path: &Path, start_sector: SectorT)
        -> Result<RawZone>;
}

/// [`BlockQuery`] implementation backed by the Linux block ioctls.
///
/// Opens the device node read-only for each query, like the rest of this
/// tool it requires sufficient privileges to open raw devices.
#[derive(Debug, Default)]
pub struct SysBlockQuery {}

impl BlockQuery for SysBlockQuery {
    fn size_bytes(&self, path: &Path) -> Result<u64> {
        let f = fs::File::open(path)?;
        let mut size = 0u64;
        unsafe { ffi::blkgetsize64(f.as_raw_fd(), &mut size) }?;
        Ok(size)
    }

    fn zone_size_sectors(&self, path: &Path) -> Result<SectorT> {
        let f = fs::File::open(path)?;
        let mut zsz = 0u32;
        unsafe { ffi::blkgetzonesz(f.as_raw_fd(), &mut zsz) }?;
        Ok(SectorT::from(zsz))
    }

    fn nr_zones(&self, path: &Path) -> Result<u32> {
        let f = fs::File::open(path)?;
        let mut nr = 0u32;
        unsafe { ffi::blkgetnrzones(f.as_raw_fd(), &mut nr) }?;
        Ok(nr)
    }

    fn is_zoned(&self, path: &Path) -> bool {
        // BLKREPORTZONE fails with ENOTTY on conventional devices
        self.report_zone(path, 0).is_ok()
    }

    fn report_zone(&self, path: &Path, start_sector: SectorT)
        -> Result<RawZone>
    {
        let f = fs::File::open(path)?;
        let mut hdr = ffi::blk_zone_report_one {
            sector: start_sector,
            nr_zones: 1,
            ..Default::default()
        };
        unsafe { ffi::blkreportzone(f.as_raw_fd(), &mut hdr) }?;
        if hdr.nr_zones == 0 {
            return Err(Error::InvalidInput(format!(
                "no zone at sector {start_sector:#x} on {}", path.display()
            )));
        }
        let z = hdr.zones[0];
        Ok(RawZone {
            start:    z.start,
            len:      z.len,
            capacity: z.capacity,
            wp:       z.wp,
            cond:     z.cond,
        })
    }
}

/// Immutable description of a probed block device.
#[derive(Clone, Debug, Serialize)]
pub struct Device {
    /// Kernel name, e.g. "nvme0n2"
    pub name:         String,
    /// Device node path, e.g. "/dev/nvme0n2"
    pub path:         PathBuf,
    pub is_zoned:     bool,
    /// Zone size in sectors.  Always a power of two; 0 on conventional
    /// devices.
    pub zone_size:    SectorT,
    /// `!(zone_size - 1)`
    pub zone_mask:    SectorT,
    pub nr_zones:     u32,
    pub sector_shift: u32,
}

impl Device {
    /// Probe the named device and build its descriptor.
    ///
    /// Zoned devices must report a power-of-two zone size; anything else is
    /// an accepted limitation of this tool, reported as
    /// [`Error::UnsupportedGeometry`] rather than silently handled.
    pub fn probe(name: &str, query: &dyn BlockQuery) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/{name}"));
        let is_zoned = query.is_zoned(&path);
        let (zone_size, zone_mask, nr_zones) = if is_zoned {
            let zone_size = query.zone_size_sectors(&path)?;
            if zone_size == 0 || !zone_size.is_power_of_two() {
                return Err(Error::UnsupportedGeometry(format!(
                    "{name}: zone size {zone_size:#x} is not a power of two"
                )));
            }
            (zone_size, !(zone_size - 1), query.nr_zones(&path)?)
        } else {
            (0, 0, 0)
        };
        debug!(name, is_zoned, zone_size, nr_zones, "probed device");
        Ok(Device {
            name: name.to_string(),
            path,
            is_zoned,
            zone_size,
            zone_mask,
            nr_zones,
            sector_shift: SECTOR_SHIFT,
        })
    }

    /// Capacity of the device in sectors, for the address-space offset of a
    /// conventional device preceding a zoned one.
    pub fn size_sectors(&self, query: &dyn BlockQuery) -> Result<SectorT> {
        Ok(query.size_bytes(&self.path)? >> SECTOR_SHIFT)
    }
}

/// Resolve a device name from a `st_dev` major:minor pair through sysfs.
pub fn resolve_dev_name(major: u64, minor: u64) -> Result<String> {
    let path = format!("/sys/dev/block/{major}:{minor}/uevent");
    let uevent = fs::read_to_string(&path)?;
    parse_uevent(&uevent).ok_or_else(|| Error::InvalidInput(
        format!("no DEVNAME in {path}")
    ))
}

fn parse_uevent(uevent: &str) -> Option<String> {
    uevent.lines()
        .find_map(|l| l.strip_prefix("DEVNAME="))
        .map(|name| name.trim_end().to_string())
}

// LCOV_EXCL_STOP
