// vim: tw=80
//! Translation from the filesystem's combined address space into
//! zoned-device-local coordinates

use crate::types::*;

/// F2FS treats all of its devices as one contiguous address space.  With a
/// conventional device in front of a zoned one, extent mappings on the zoned
/// device are offset by the conventional device's capacity.  Zone and
/// segment arithmetic is only valid in zoned-device-local coordinates, so
/// that offset must be subtracted before anything else looks at an address.
///
/// Only a single conventional device preceding a single zoned device is
/// supported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AddrSpace {
    offset: SectorT,
}

impl AddrSpace {
    /// An address space preceded by `offset` sectors of conventional
    /// storage.
    pub fn new(offset: SectorT) -> Self {
        AddrSpace { offset }
    }

    /// The zoned device stands alone; addresses are already local.
    pub fn identity() -> Self {
        AddrSpace { offset: 0 }
    }

    pub fn offset(&self) -> SectorT {
        self.offset
    }

    /// Translate a combined-address-space sector into a device-local one.
    ///
    /// A raw address below the offset does not belong to the zoned region
    /// under analysis, which is fatal for the file being mapped.
    pub fn translate(&self, raw: SectorT) -> Result<SectorT> {
        raw.checked_sub(self.offset).ok_or_else(|| Error::InvalidInput(
            format!("physical block {raw:#x} precedes the zoned device \
                    (address-space offset {:#x})", self.offset)
        ))
    }
}

// LCOV_EXCL_STOP
