// vim: tw=80
//! Decomposes extents onto the filesystem's fixed-size allocation segments

#[cfg(test)] use mockall::automock;
use serde_derive::Serialize;
use std::{fs, path::Path};

use crate::{extent::Extent, types::*};

/// log2 of the F2FS block size
pub const F2FS_BLOCK_SHIFT: u32 = 12;

/// Fixed segment geometry of the filesystem under analysis.
///
/// Segment identity is purely positional: a segment is not a stored entity,
/// just the key `physical_block >> shift`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentGeometry {
    /// log2 of the segment size in sectors
    pub shift:        u32,
    /// `!(size_sectors - 1)`
    pub mask:         SectorT,
    pub size_sectors: SectorT,
}

impl SegmentGeometry {
    /// Build a geometry from a power-of-two segment size in sectors.
    pub fn from_size_sectors(size_sectors: SectorT) -> Result<Self> {
        if size_sectors == 0 || !size_sectors.is_power_of_two() {
            return Err(Error::UnsupportedGeometry(format!(
                "segment size {size_sectors:#x} sectors is not a power of \
                two"
            )));
        }
        Ok(SegmentGeometry {
            shift: size_sectors.trailing_zeros(),
            mask: !(size_sectors - 1),
            size_sectors,
        })
    }

    /// The segment id owning `lba`.
    pub fn segment_of(&self, lba: SectorT) -> SegmentT {
        (lba & self.mask) >> self.shift
    }
}

impl Default for SegmentGeometry {
    /// The standard F2FS segment: 2 MiB, i.e. 4096 sectors.
    fn default() -> Self {
        SegmentGeometry {
            shift: 12,
            mask: !0xfff,
            size_sectors: 0x1000,
        }
    }
}

/// F2FS log classification of a segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum SegmentType {
    HotData,
    WarmData,
    ColdData,
    HotNode,
    WarmNode,
    ColdNode,
    Unclassified,
}

impl SegmentType {
    /// From the numeric code used by `/proc/fs/f2fs/<dev>/segment_info`.
    pub fn from_f2fs(code: u32) -> Self {
        match code {
            0 => SegmentType::HotData,
            1 => SegmentType::WarmData,
            2 => SegmentType::ColdData,
            3 => SegmentType::HotNode,
            4 => SegmentType::WarmNode,
            5 => SegmentType::ColdNode,
            _ => SegmentType::Unclassified,
        }
    }
}

/// Classification of one segment, from filesystem metadata.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct SegmentInfo {
    pub seg_type:     SegmentType,
    /// Valid block count in filesystem blocks
    pub valid_blocks: u32,
}

impl SegmentInfo {
    pub const UNCLASSIFIED: SegmentInfo = SegmentInfo {
        seg_type: SegmentType::Unclassified,
        valid_blocks: 0,
    };

    /// Valid block count expressed in sectors.
    pub fn valid_sectors(&self) -> SectorT {
        (SectorT::from(self.valid_blocks) << F2FS_BLOCK_SHIFT) >> SECTOR_SHIFT
    }
}

/// Lookup of per-segment classification, keyed by segment id.
///
/// The backing metadata is filesystem-specific and opaque to the engine.
#[cfg_attr(test, automock)]
pub trait SegmentInfoQuery {
    fn query(&self, id: SegmentT) -> Result<SegmentInfo>;
}

/// Segment metadata source for filesystems whose metadata is unreachable.
/// Every segment comes back unclassified.
#[derive(Debug, Default)]
pub struct UnknownSegments {}

impl SegmentInfoQuery for UnknownSegments {
    fn query(&self, _id: SegmentT) -> Result<SegmentInfo> {
        Ok(SegmentInfo::UNCLASSIFIED)
    }
}

/// [`SegmentInfoQuery`] over a parsed `/proc/fs/f2fs/<dev>/segment_info`
/// table.
///
/// Segment ids beyond the table (or on filesystems that never exposed one)
/// are unclassified rather than an error: the table covers the main area
/// only, and classification is advisory.
#[derive(Debug)]
pub struct F2fsSegmentInfo {
    table: Vec<SegmentInfo>,
}

impl F2fsSegmentInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(F2fsSegmentInfo { table: parse_segment_info(&text)? })
    }
}

impl SegmentInfoQuery for F2fsSegmentInfo {
    fn query(&self, id: SegmentT) -> Result<SegmentInfo> {
        Ok(self.table.get(id as usize)
            .copied()
            .unwrap_or(SegmentInfo::UNCLASSIFIED))
    }
}

/// Parse the kernel's segment_info format: two header lines, then rows of
/// up to ten `type|valid_blocks` entries, each row prefixed with its base
/// segment number.
fn parse_segment_info(text: &str) -> Result<Vec<SegmentInfo>> {
    let mut table = Vec::new();
    for line in text.lines() {
        if line.starts_with("format:") || line.starts_with("segment_type(") {
            continue;
        }
        for token in line.split_whitespace() {
            let Some((t, vb)) = token.split_once('|') else {
                // row prefix: the base segment number
                continue;
            };
            let code = t.parse::<u32>().map_err(|_| Error::InvalidInput(
                format!("bad segment type {t:?} in segment_info")
            ))?;
            let valid_blocks = vb.parse::<u32>()
                .map_err(|_| Error::InvalidInput(
                    format!("bad valid block count {vb:?} in segment_info")
                ))?;
            table.push(SegmentInfo {
                seg_type: SegmentType::from_f2fs(code),
                valid_blocks,
            });
        }
    }
    Ok(table)
}

/// The part of one extent that falls within a single segment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SegmentSpan {
    pub id:             SegmentT,
    pub physical_block: SectorT,
    pub logical_block:  SectorT,
    pub len:            SectorT,
}

/// Split an extent into per-segment spans.
///
/// An extent entirely inside one segment yields a single span.  An extent
/// crossing segment boundaries yields a leading partial span, full interior
/// spans, and a trailing partial span.  Span ids are strictly ascending and
/// span lengths sum to the extent length.
pub fn decompose(extent: &Extent, geom: &SegmentGeometry)
    -> Result<Vec<SegmentSpan>>
{
    if extent.len == 0 {
        return Err(Error::InvalidInput(format!(
            "zero-length extent at {:#x}", extent.physical_block
        )));
    }
    let first = geom.segment_of(extent.physical_block);
    let last = geom.segment_of(extent.end() - 1);
    let mut spans = Vec::with_capacity((last - first + 1) as usize);
    let mut pos = extent.physical_block;
    let mut logical = extent.logical_block;
    let mut remaining = extent.len;
    for id in first..=last {
        let seg_end = (id + 1) << geom.shift;
        let take = remaining.min(seg_end - pos);
        spans.push(SegmentSpan {
            id,
            physical_block: pos,
            logical_block: logical,
            len: take,
        });
        pos += take;
        logical += take;
        remaining -= take;
    }
    debug_assert_eq!(remaining, 0);
    Ok(spans)
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::path::PathBuf;
use super::*;

fn extent(physical_block: SectorT, len: SectorT) -> Extent {
    Extent {
        file: PathBuf::from("/mnt/f"),
        logical_block: 0x40,
        physical_block,
        len,
        zone: 1,
        zone_size: 0x8000,
    }
}

mod geometry {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn f2fs_default() {
        let geom = SegmentGeometry::default();
        assert_eq!(geom, SegmentGeometry::from_size_sectors(0x1000).unwrap());
        assert_eq!(geom.segment_of(0x8000), 8);
        assert_eq!(geom.segment_of(0x8fff), 8);
    }

    #[rstest]
    #[case(0)]
    #[case(0xfff)]
    #[case(0x1001)]
    fn rejects_non_power_of_two(#[case] size: SectorT) {
        let e = SegmentGeometry::from_size_sectors(size).unwrap_err();
        assert!(matches!(e, Error::UnsupportedGeometry(_)));
    }
}

mod decompose {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_segment() {
        let geom = SegmentGeometry::default();
        let spans = decompose(&extent(0x8100, 0x200), &geom).unwrap();
        assert_eq!(spans, vec![SegmentSpan {
            id: 8,
            physical_block: 0x8100,
            logical_block: 0x40,
            len: 0x200,
        }]);
    }

    #[test]
    fn precisely_fills_one_segment() {
        let geom = SegmentGeometry::default();
        let spans = decompose(&extent(0x8000, 0x1000), &geom).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].id, 8);
        assert_eq!(spans[0].len, 0x1000);
    }

    #[test]
    fn spans_two_segments() {
        let geom = SegmentGeometry::default();
        let spans = decompose(&extent(0x1f00, 0x300), &geom).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].id, 1);
        assert_eq!(spans[0].physical_block, 0x1f00);
        assert_eq!(spans[0].len, 0x100);
        assert_eq!(spans[1].id, 2);
        assert_eq!(spans[1].physical_block, 0x2000);
        assert_eq!(spans[1].logical_block, 0x140);
        assert_eq!(spans[1].len, 0x200);
        let total: SectorT = spans.iter().map(|s| s.len).sum();
        assert_eq!(total, 0x300);
    }

    #[test]
    fn interior_segments_are_full() {
        let geom = SegmentGeometry::default();
        // crosses 3 boundaries: partial, full, full, partial
        let spans = decompose(&extent(0xf00, 0x2200), &geom).unwrap();
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0].len, 0x100);
        assert_eq!(spans[1].len, 0x1000);
        assert_eq!(spans[2].len, 0x1000);
        assert_eq!(spans[3].len, 0x100);
        // ids strictly ascending, no id twice
        for w in spans.windows(2) {
            assert!(w[0].id < w[1].id);
        }
        let total: SectorT = spans.iter().map(|s| s.len).sum();
        assert_eq!(total, 0x2200);
    }

    // for an extent spanning k segment boundaries, the span count is k + 1
    #[rstest]
    #[case(0x8100, 0x200, 1)]
    #[case(0x8f00, 0x200, 2)]
    #[case(0x8000, 0x3000, 3)]
    fn segment_count_law(#[case] pba: SectorT, #[case] len: SectorT,
                         #[case] want: usize)
    {
        let geom = SegmentGeometry::default();
        assert_eq!(decompose(&extent(pba, len), &geom).unwrap().len(), want);
    }

    #[test]
    fn zero_length_extent() {
        let geom = SegmentGeometry::default();
        let e = decompose(&extent(0x8000, 0), &geom).unwrap_err();
        assert!(matches!(e, Error::InvalidInput(_)));
    }
}

mod info {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse() {
        let text = "format: segment_type|valid_blocks\n\
            segment_type(0:HD, 1:WD, 2:CD, 3:HN, 4:WN, 5:CN)\n\
            0         1|512 1|512 2|0   4|3   0|17  1|512 1|512 1|512 1|512 \
            1|512\n\
            10        5|1   1|0\n";
        let table = parse_segment_info(text).unwrap();
        assert_eq!(table.len(), 12);
        assert_eq!(table[0], SegmentInfo {
            seg_type: SegmentType::WarmData,
            valid_blocks: 512,
        });
        assert_eq!(table[2].seg_type, SegmentType::ColdData);
        assert_eq!(table[3].valid_blocks, 3);
        assert_eq!(table[10].seg_type, SegmentType::ColdNode);
    }

    #[test]
    fn parse_garbage() {
        let e = parse_segment_info("0  x|y\n").unwrap_err();
        assert!(matches!(e, Error::InvalidInput(_)));
    }

    #[test]
    fn load_from_file() {
        use std::io::Write;

        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "format: segment_type|valid_blocks\n\
            segment_type(0:HD, 1:WD, 2:CD, 3:HN, 4:WN, 5:CN)\n\
            0         1|512 2|7\n").unwrap();
        let src = F2fsSegmentInfo::load(f.path()).unwrap();
        assert_eq!(src.query(1).unwrap(), SegmentInfo {
            seg_type: SegmentType::ColdData,
            valid_blocks: 7,
        });
    }

    #[test]
    fn out_of_table_is_unclassified() {
        let src = F2fsSegmentInfo { table: vec![] };
        assert_eq!(src.query(99).unwrap(), SegmentInfo::UNCLASSIFIED);
    }

    #[test]
    fn valid_sectors() {
        let si = SegmentInfo {
            seg_type: SegmentType::WarmData,
            valid_blocks: 512,
        };
        // 512 4k blocks == 4096 sectors
        assert_eq!(si.valid_sectors(), 0x1000);
    }
}
}
// LCOV_EXCL_STOP
