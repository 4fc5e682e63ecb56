//! Port I/O dispatch (§4.6 IN/OUT, §6.1 ambient stack).
//!
//! A host harness registers device handlers for port ranges; `IN`/`OUT`
//! route through here to whichever handler's range contains the port, or
//! fall back to default bus-float behavior (reads return all-ones, writes
//! are discarded) when nothing is registered. This core ships no device
//! models of its own (§5 Non-goals) — `IoDispatch` is the seam a host
//! wires its PIC/PIT/UART/etc. handlers into.

use crate::error::Result;

/// Trait implemented by a device that answers x86 port I/O.
///
/// Each handler covers a contiguous range of ports registered via
/// [`IoDispatch::register`]. The `port` parameter passed to `read`/`write`
/// is the absolute port number, not relative to the region's base.
pub trait IoHandler {
    /// Read `size` bytes (1 or 2) from `port`, zero-extended to `u32`.
    fn read(&mut self, port: u16, size: u8) -> Result<u32>;

    /// Write the low `size` bytes of `val` to `port`.
    fn write(&mut self, port: u16, size: u8, val: u32) -> Result<()>;
}

/// A registered I/O port region backed by a handler.
struct IoRegion {
    base: u16,
    count: u16,
    handler: Box<dyn IoHandler>,
}

impl IoRegion {
    #[inline]
    fn contains(&self, port: u16) -> bool {
        port >= self.base && port < self.base.wrapping_add(self.count)
    }
}

/// Central dispatch table for guest port I/O, consulted by `Cpu`'s
/// IN/OUT/INS/OUTS handlers.
pub struct IoDispatch {
    regions: Vec<IoRegion>,
}

impl IoDispatch {
    /// An empty dispatch table with no registered handlers.
    pub fn new() -> Self {
        IoDispatch { regions: Vec::new() }
    }

    /// Register a handler for `count` consecutive ports starting at
    /// `base`. Overlapping registrations are not checked; the first
    /// matching region wins on lookup.
    pub fn register(&mut self, base: u16, count: u16, handler: Box<dyn IoHandler>) {
        self.regions.push(IoRegion { base, count, handler });
    }

    /// Guest `IN`: delegate to the covering handler, or return the bus
    /// float (all bits set) for the requested size when none is
    /// registered.
    pub fn port_in(&mut self, port: u16, size: u8) -> Result<u32> {
        for region in self.regions.iter_mut() {
            if region.contains(port) {
                return region.handler.read(port, size);
            }
        }
        Ok(match size {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFFFF_FFFF,
        })
    }

    /// Guest `OUT`: delegate to the covering handler, or silently
    /// discard when none is registered.
    pub fn port_out(&mut self, port: u16, size: u8, val: u32) -> Result<()> {
        for region in self.regions.iter_mut() {
            if region.contains(port) {
                return region.handler.write(port, size, val);
            }
        }
        Ok(())
    }

    /// Number of registered I/O regions (diagnostic/test use).
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl Default for IoDispatch {
    fn default() -> Self {
        IoDispatch::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        reads: u32,
        last_write: u32,
    }

    impl IoHandler for Counter {
        fn read(&mut self, _port: u16, _size: u8) -> Result<u32> {
            self.reads += 1;
            Ok(self.reads)
        }
        fn write(&mut self, _port: u16, _size: u8, val: u32) -> Result<()> {
            self.last_write = val;
            Ok(())
        }
    }

    #[test]
    fn unregistered_port_reads_as_bus_float() {
        let mut io = IoDispatch::new();
        assert_eq!(io.port_in(0x60, 1).unwrap(), 0xFF);
        assert_eq!(io.port_in(0x60, 2).unwrap(), 0xFFFF);
    }

    #[test]
    fn registered_handler_receives_reads_and_writes() {
        let mut io = IoDispatch::new();
        io.register(0x3F8, 8, Box::new(Counter { reads: 0, last_write: 0 }));
        assert_eq!(io.port_in(0x3F8, 1).unwrap(), 1);
        assert_eq!(io.port_in(0x3FA, 1).unwrap(), 2);
        io.port_out(0x3F9, 1, 0x42).unwrap();
        assert_eq!(io.region_count(), 1);
    }

    #[test]
    fn unregistered_write_is_silently_discarded() {
        let mut io = IoDispatch::new();
        assert!(io.port_out(0xCF8, 4, 0xDEADBEEF).is_ok());
    }
}
