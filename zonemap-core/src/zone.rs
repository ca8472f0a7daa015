// vim: tw=80
//! Zone arithmetic and zone descriptors

use serde_derive::Serialize;

use crate::{
    device::{BlockQuery, Device},
    types::*,
};

/// Calculate the zone number (starting with zone 1) owning an LBA.
///
/// Assumes a uniform, power-of-two zone size across the device, which
/// [`Device::probe`] enforces.  Real devices may have a final undersized
/// zone; that is an accepted limitation, not silently handled.
pub fn zone_number(lba: SectorT, zone_size: SectorT) -> ZoneT {
    debug_assert!(zone_size.is_power_of_two());
    let zone_mask = !(zone_size - 1);
    let slba = lba & zone_mask;
    if slba == 0 {
        1
    } else {
        (slba / zone_size + 1) as ZoneT
    }
}

/// Zone condition, per `linux/blkzoned.h` `blk_zone_cond`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ZoneCond {
    NotWritePointer,
    Empty,
    ImplicitOpen,
    ExplicitOpen,
    Closed,
    ReadOnly,
    Full,
    Offline,
    Unknown,
}

impl From<u8> for ZoneCond {
    fn from(cond: u8) -> Self {
        match cond {
            0x0 => ZoneCond::NotWritePointer,
            0x1 => ZoneCond::Empty,
            0x2 => ZoneCond::ImplicitOpen,
            0x3 => ZoneCond::ExplicitOpen,
            0x4 => ZoneCond::Closed,
            0xd => ZoneCond::ReadOnly,
            0xe => ZoneCond::Full,
            0xf => ZoneCond::Offline,
            _ => ZoneCond::Unknown,
        }
    }
}

/// Descriptor of one zone, fetched on demand and not cached.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Zone {
    /// 1-based zone number
    pub number:        ZoneT,
    /// First sector of the zone
    pub start:         SectorT,
    /// Usable capacity in sectors; may be less than `size`
    pub capacity:      SectorT,
    /// Current write pointer
    pub write_pointer: SectorT,
    /// Total size in sectors
    pub size:          SectorT,
    pub condition:     ZoneCond,
}

impl Zone {
    /// Fetch the descriptor for zone `number` of `dev`.
    pub fn fetch(dev: &Device, query: &dyn BlockQuery, number: ZoneT)
        -> Result<Self>
    {
        debug_assert!(number >= 1);
        let start_sector = dev.zone_size * (SectorT::from(number) - 1);
        let raw = query.report_zone(&dev.path, start_sector)?;
        Ok(Zone {
            number,
            start:         raw.start,
            capacity:      raw.capacity,
            write_pointer: raw.wp,
            size:          raw.len,
            condition:     ZoneCond::from(raw.cond),
        })
    }
}

// LCOV_EXCL_STOP
