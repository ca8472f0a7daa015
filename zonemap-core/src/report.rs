// vim: tw=80
//! Groups decomposed extents by zone and by segment for reporting

use serde_derive::Serialize;
use std::path::PathBuf;
use tracing::debug;

use crate::{
    device::{BlockQuery, Device},
    extent::Extent,
    segment::{decompose, SegmentGeometry, SegmentInfoQuery, SegmentType},
    types::*,
    zone::Zone,
};

/// One extent (or sub-extent) attributed to a segment, in sectors.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExtentRecord {
    pub logical_block:  SectorT,
    pub physical_block: SectorT,
    pub len:            SectorT,
}

/// One segment touched by the file, with everything the file keeps in it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SegmentReport {
    pub id:            SegmentT,
    pub seg_type:      SegmentType,
    /// Valid block count of the whole segment, in sectors
    pub valid_sectors: SectorT,
    pub extents:       Vec<ExtentRecord>,
}

/// One zone touched by the file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ZoneReport {
    pub zone:     Zone,
    pub segments: Vec<SegmentReport>,
}

/// The zone → segment → extent view of one file, restricted to a zone
/// window.  Serializable to whatever structured format the renderer wants;
/// this module has no opinion on output encoding.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Report {
    pub file:         PathBuf,
    /// Number of extents the file maps, before decomposition and windowing
    pub extent_count: u32,
    pub zones:        Vec<ZoneReport>,
}

/// Build the report for a zone-sorted extent list.
///
/// Walks the sorted stream once.  A zone descriptor is fetched the first
/// time its number appears; a current-segment cursor avoids redundant
/// metadata lookups when consecutive spans share a segment.  Spans whose
/// start falls outside the `[start_zone, end_zone]` sector bounds are
/// skipped.
pub fn aggregate(
    dev: &Device,
    extents: &[Extent],
    zone_range: (ZoneT, ZoneT),
    geom: &SegmentGeometry,
    blocks: &dyn BlockQuery,
    segments: &dyn SegmentInfoQuery,
) -> Result<Report>
{
    let (start_zone, end_zone) = zone_range;
    if start_zone == 0 || start_zone > end_zone {
        return Err(Error::InvalidInput(format!(
            "bad zone range [{start_zone}, {end_zone}]"
        )));
    }
    let start_lba = SectorT::from(start_zone - 1) * dev.zone_size;
    let end_lba = SectorT::from(end_zone) * dev.zone_size;
    debug!(start_lba, end_lba, "aggregating {} extents", extents.len());

    let mut zones: Vec<ZoneReport> = Vec::new();
    let mut cur_zone: Option<ZoneT> = None;
    let mut cur_seg: Option<SegmentT> = None;
    for e in extents {
        debug_assert!(cur_zone.map_or(true, |cz| e.zone >= cz),
            "extent list is not zone-sorted");
        for span in decompose(e, geom)? {
            if span.physical_block < start_lba || span.physical_block >= end_lba
            {
                continue;
            }
            if cur_zone != Some(e.zone) {
                zones.push(ZoneReport {
                    zone: Zone::fetch(dev, blocks, e.zone)?,
                    segments: Vec::new(),
                });
                cur_zone = Some(e.zone);
                cur_seg = None;
            }
            let segs = &mut zones.last_mut().unwrap().segments;
            if cur_seg != Some(span.id) {
                let info = segments.query(span.id)?;
                segs.push(SegmentReport {
                    id: span.id,
                    seg_type: info.seg_type,
                    valid_sectors: info.valid_sectors(),
                    extents: Vec::new(),
                });
                cur_seg = Some(span.id);
            }
            segs.last_mut().unwrap().extents.push(ExtentRecord {
                logical_block:  span.logical_block,
                physical_block: span.physical_block,
                len:            span.len,
            });
        }
    }
    let file = extents.first()
        .map(|e| e.file.clone())
        .unwrap_or_default();
    Ok(Report {
        file,
        extent_count: extents.len() as u32,
        zones,
    })
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use mockall::predicate::*;
use pretty_assertions::assert_eq;
use super::*;
use crate::{
    device::{MockBlockQuery, RawZone},
    segment::{MockSegmentInfoQuery, SegmentInfo},
};

fn zoned_device() -> Device {
    let mut q = MockBlockQuery::default();
    q.expect_is_zoned().return_const(true);
    q.expect_zone_size_sectors().returning(|_| Ok(0x8000));
    q.expect_nr_zones().returning(|_| Ok(16));
    Device::probe("nvme0n2", &q).unwrap()
}

fn block_query() -> MockBlockQuery {
    let mut q = MockBlockQuery::default();
    q.expect_report_zone()
        .returning(|_, start| Ok(RawZone {
            start,
            len: 0x8000,
            capacity: 0x8000,
            wp: start + 0x4000,
            cond: 0x2,
        }));
    q
}

fn seg_query() -> MockSegmentInfoQuery {
    let mut q = MockSegmentInfoQuery::default();
    q.expect_query()
        .returning(|_| Ok(SegmentInfo {
            seg_type: SegmentType::WarmData,
            valid_blocks: 512,
        }));
    q
}

fn extent(logical_block: SectorT, physical_block: SectorT, len: SectorT)
    -> Extent
{
    Extent {
        file: PathBuf::from("/mnt/f"),
        logical_block,
        physical_block,
        len,
        zone: crate::zone::zone_number(physical_block, 0x8000),
        zone_size: 0x8000,
    }
}

#[test]
fn groups_by_zone_and_segment() {
    let dev = zoned_device();
    let geom = SegmentGeometry::default();
    let extents = vec![
        extent(0, 0x8100, 0x100),       // zone 2, segment 8
        extent(0x100, 0x8200, 0x100),   // zone 2, segment 8
        extent(0x200, 0x9000, 0x100),   // zone 2, segment 9
        extent(0x300, 0x10000, 0x100),  // zone 3, segment 16
    ];
    // the current-segment cursor must coalesce the two lookups of segment 8
    let mut segs = MockSegmentInfoQuery::default();
    for id in [8u64, 9, 16] {
        segs.expect_query()
            .with(eq(id))
            .times(1)
            .returning(|_| Ok(SegmentInfo {
                seg_type: SegmentType::WarmData,
                valid_blocks: 512,
            }));
    }
    let report = aggregate(&dev, &extents, (1, 16), &geom, &block_query(),
        &segs).unwrap();

    assert_eq!(report.extent_count, 4);
    assert_eq!(report.zones.len(), 2);
    assert_eq!(report.zones[0].zone.number, 2);
    assert_eq!(report.zones[0].zone.start, 0x8000);
    assert_eq!(report.zones[0].segments.len(), 2);
    assert_eq!(report.zones[0].segments[0].id, 8);
    assert_eq!(report.zones[0].segments[0].extents.len(), 2);
    assert_eq!(report.zones[0].segments[1].id, 9);
    assert_eq!(report.zones[1].zone.number, 3);
    assert_eq!(report.zones[1].segments[0].id, 16);
    assert_eq!(report.zones[1].segments[0].valid_sectors, 0x1000);
}

#[test]
fn splits_boundary_extent_across_segments() {
    let dev = zoned_device();
    let geom = SegmentGeometry::default();
    let extents = vec![extent(0, 0x8f00, 0x200)];
    let report = aggregate(&dev, &extents, (1, 16), &geom, &block_query(),
        &seg_query()).unwrap();
    let segs = &report.zones[0].segments;
    assert_eq!(segs.len(), 2);
    assert_eq!(segs[0].id, 8);
    assert_eq!(segs[0].extents[0].len, 0x100);
    assert_eq!(segs[1].id, 9);
    assert_eq!(segs[1].extents[0].physical_block, 0x9000);
    assert_eq!(segs[1].extents[0].len, 0x100);
}

#[test]
fn restricts_to_zone_window() {
    let dev = zoned_device();
    let geom = SegmentGeometry::default();
    let extents = vec![
        extent(0, 0x100, 0x100),        // zone 1
        extent(0x100, 0x8100, 0x100),   // zone 2
        extent(0x200, 0x10100, 0x100),  // zone 3
    ];
    let report = aggregate(&dev, &extents, (2, 2), &geom, &block_query(),
        &seg_query()).unwrap();
    assert_eq!(report.zones.len(), 1);
    assert_eq!(report.zones[0].zone.number, 2);
    // windowing doesn't change the file's total extent count
    assert_eq!(report.extent_count, 3);
}

#[test]
fn rejects_bad_zone_range() {
    let dev = zoned_device();
    let geom = SegmentGeometry::default();
    let e = aggregate(&dev, &[], (0, 4), &geom, &block_query(),
        &seg_query()).unwrap_err();
    assert!(matches!(e, Error::InvalidInput(_)));
    let e = aggregate(&dev, &[], (5, 4), &geom, &block_query(),
        &seg_query()).unwrap_err();
    assert!(matches!(e, Error::InvalidInput(_)));
}

#[test]
fn deterministic() {
    let dev = zoned_device();
    let geom = SegmentGeometry::default();
    let extents = vec![
        extent(0, 0x8100, 0x100),
        extent(0x100, 0x9000, 0x2100),
    ];
    let a = aggregate(&dev, &extents, (1, 16), &geom, &block_query(),
        &seg_query()).unwrap();
    let b = aggregate(&dev, &extents, (1, 16), &geom, &block_query(),
        &seg_query()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn zone_query_failure_is_fatal() {
    let dev = zoned_device();
    let geom = SegmentGeometry::default();
    let mut blocks = MockBlockQuery::default();
    blocks.expect_report_zone()
        .returning(|_, _| Err(Error::from(nix::errno::Errno::EIO)));
    let extents = vec![extent(0, 0x8100, 0x100)];
    let e = aggregate(&dev, &extents, (1, 16), &geom, &blocks, &seg_query())
        .unwrap_err();
    assert!(matches!(e, Error::DeviceQuery(_)));
}
}
// LCOV_EXCL_STOP
