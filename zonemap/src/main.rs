// vim: tw=80
//! Map a file's extents onto the zones and allocation segments of a zoned
//! block device.

use clap::Parser;
use nix::{sys::stat, unistd};
use std::{
    fs,
    io::{self, Write},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use zonemap_core::{
    addrspace::AddrSpace,
    device::{self, Device, SysBlockQuery},
    extent::{collect, sort_extents, FiemapQuery},
    report::{aggregate, Report},
    segment::{
        F2fsSegmentInfo,
        SegmentGeometry,
        SegmentInfoQuery,
        UnknownSegments,
    },
    types::*,
};

#[derive(Debug, Parser)]
#[command(version, about = "Correlate a file's extents with the zones and \
    segments of a zoned block device")]
struct Cli {
    /// Emit the report as JSON instead of text
    #[arg(short = 'j', long)]
    json:         bool,
    /// Restrict the report to a zone range
    #[arg(short = 'z', long, value_name = "START[:END]")]
    zones:        Option<String>,
    /// Filesystem segment size in bytes (power of two)
    #[arg(short = 's', long, default_value_t = 2 * 1024 * 1024)]
    segment_size: u64,
    /// Name of the zoned device (e.g. nvme0n2), required when the file's
    /// own device is the conventional half of a conventional+ZNS pair
    #[arg(long, value_name = "DEV")]
    zoned:        Option<String>,
    /// File to map
    file:         PathBuf,
}

/// Parse "START" or "START:END" into an inclusive 1-based zone range.
fn parse_zone_range(s: &str) -> Result<(ZoneT, ZoneT)> {
    let bad = || Error::InvalidInput(format!("bad zone range {s:?}"));
    let (start, end) = match s.split_once(':') {
        Some((a, b)) => (
            a.parse::<ZoneT>().map_err(|_| bad())?,
            b.parse::<ZoneT>().map_err(|_| bad())?,
        ),
        None => {
            let z = s.parse::<ZoneT>().map_err(|_| bad())?;
            (z, z)
        }
    };
    if start == 0 || start > end {
        return Err(bad());
    }
    Ok((start, end))
}

fn run(cli: &Cli) -> Result<Report> {
    let f = fs::File::open(&cli.file)?;
    // flush dirty pages so the extent map is current
    unistd::fsync(f.as_raw_fd())?;
    let st = stat::fstat(f.as_raw_fd())?;

    let query = SysBlockQuery::default();
    let home_name = device::resolve_dev_name(
        stat::major(st.st_dev), stat::minor(st.st_dev))?;
    let home = Device::probe(&home_name, &query)?;

    let (dev, addr) = if home.is_zoned {
        (home, AddrSpace::identity())
    } else {
        let name = cli.zoned.as_deref().ok_or_else(|| Error::InvalidInput(
            format!("{home_name} is not a zoned device; if it is the \
                conventional half of an F2FS pair, pass --zoned with the \
                ZNS device that follows it")
        ))?;
        let dev = Device::probe(name, &query)?;
        if !dev.is_zoned {
            return Err(Error::InvalidInput(
                format!("{name} is not a zoned device")
            ));
        }
        let offset = home.size_sectors(&query)?;
        (dev, AddrSpace::new(offset))
    };

    let geom = SegmentGeometry::from_size_sectors(
        cli.segment_size >> SECTOR_SHIFT)?;
    let seg_path = format!("/proc/fs/f2fs/{home_name}/segment_info");
    let segments: Box<dyn SegmentInfoQuery> =
        match F2fsSegmentInfo::load(Path::new(&seg_path)) {
            Ok(s) => Box::new(s),
            Err(e) => {
                warn!("no segment metadata at {seg_path} ({e}); segments \
                    will be unclassified");
                Box::new(UnknownSegments::default())
            }
        };

    let fiemap = FiemapQuery::new(&f);
    let length_bytes = (st.st_blocks as u64) << SECTOR_SHIFT;
    let mut extents = collect(&cli.file, &fiemap, addr, dev.zone_size,
        length_bytes)?;
    sort_extents(&mut extents);

    let range = match cli.zones.as_deref() {
        Some(s) => parse_zone_range(s)?,
        None => (1, dev.nr_zones.max(1)),
    };
    aggregate(&dev, &extents, range, &geom, &query, segments.as_ref())
}

fn render_text(report: &Report, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", report.file.display())?;
    writeln!(out, "Total Number of Extents: {}", report.extent_count)?;
    let mut extent_nr = 0u32;
    for z in &report.zones {
        let zone = &z.zone;
        writeln!(out, "\n#### ZONE {} ####", zone.number)?;
        writeln!(out,
            "LBAS: {:#08x}  LBAE: {:#08x}  CAP: {:#08x}  WP: {:#08x}  \
            SIZE: {:#08x}  COND: {:?}",
            zone.start, zone.start + zone.capacity, zone.capacity,
            zone.write_pointer, zone.size, zone.condition)?;
        for s in &z.segments {
            writeln!(out,
                "SEGMENT {:#06x}  TYPE: {:?}  VALID SECTORS: {:#06x}",
                s.id, s.seg_type, s.valid_sectors)?;
            for e in &s.extents {
                extent_nr += 1;
                writeln!(out,
                    "  EXTENT {extent_nr}:  PBAS: {:#08x}  PBAE: {:#08x}  \
                    SIZE: {:#08x}",
                    e.physical_block, e.physical_block + e.len, e.len)?;
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(report) => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if cli.json {
                let json = serde_json::to_string_pretty(&report).unwrap();
                writeln!(out, "{json}").unwrap();
            } else {
                render_text(&report, &mut out).unwrap();
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit(1);
        }
    }
}

// LCOV_EXCL_STOP
