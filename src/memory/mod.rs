//! Physical memory bus: block-indexed address space with A20 gating.
//!
//! `bus` holds the one surviving module from the teacher's memory
//! subsystem after segmentation (`crate::segment`) was promoted to its
//! own top-level module and paging/MMIO-region dispatch were dropped —
//! this CPU family has no MMU and treats RAM/ROM/device ranges
//! uniformly as installed block vtables (§4.1).

pub mod bus;

pub use bus::{BlockBus, BlockVtable, MemoryBus};
