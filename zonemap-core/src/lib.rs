// vim: tw=80
//! Correlates a file's physical extents with the zone and segment geometry
//! of a zoned block device.
//!
//! The pipeline is: collect extents ([`extent`]), normalize their physical
//! addresses into zoned-device-local coordinates ([`addrspace`]), tag each
//! extent with its owning zone ([`zone`]), sort by zone, decompose onto
//! fixed-size allocation segments ([`segment`]), and aggregate into a
//! zone → segment → extent report ([`report`]).  Device probing and all
//! kernel interfaces live behind the seams in [`device`].

pub mod addrspace;
pub mod device;
pub mod extent;
pub mod report;
pub mod segment;
pub mod types;
pub mod zone;

pub use crate::types::*;
