//! Segment descriptor unit: real/protected loads and limit checks (§4.3).
//!
//! Adapted from the teacher's `memory::segment::segment_translate`, but
//! restructured around the spec's explicit protected-mode load
//! algorithm (descriptor-table fetch, type rejection, CPL update, the
//! SS-reload NOINTR window) instead of a single flattened translate
//! function, and reduced to the 80286's 16-bit descriptor format (no
//! long mode, no paging).

use crate::error::{CoreError, Result};
use crate::memory::MemoryBus;
use crate::registers::{RegisterFile, SegReg, SegmentDescriptor, TableRegister};

/// Kind of memory access being checked, used to pick between a data
/// `#GP`/`#SS`/`#NP` fault and an instruction-fetch fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// Which descriptor table a selector indexes (bit 2 of the selector).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Gdt,
    Ldt,
}

impl Table {
    fn from_selector(selector: u16) -> Table {
        if selector & 0x0004 != 0 { Table::Ldt } else { Table::Gdt }
    }
}

/// What kind of segment register a load targets, since the legal
/// descriptor-type set differs per target (§4.3 "reject incompatible
/// types").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    Cs,
    Ss,
    DataOrEs,
    Ldtr,
    Tr,
}

/// Outcome of an SS load: callers must arm the one-instruction
/// interrupt-inhibit window (§4.3 point 6, the NOINTR window).
pub struct SegmentLoadEffect {
    pub arms_nointr_window: bool,
}

/// Loads and validates segment descriptors against the GDT/LDT, and
/// performs the offset-limit checks memory references need before
/// `MemoryBus` is consulted.
pub struct SegmentUnit;

impl SegmentUnit {
    /// Load `selector` into `reg`, dispatching to the real- or
    /// protected-mode algorithm. Returns the inhibit-window effect so
    /// `ExecCore` can arm NOINTR for the following instruction.
    pub fn load(
        regs: &mut RegisterFile,
        bus: &dyn MemoryBus,
        reg: SegReg,
        target: LoadTarget,
        selector: u16,
    ) -> Result<SegmentLoadEffect> {
        let desc = if regs.protected_mode() {
            Self::load_protected(regs, bus, target, selector)?
        } else {
            Self::load_real(target, selector)
        };

        if target == LoadTarget::Cs {
            regs.cpl = (selector & 0x03) as u8;
        }
        regs.load_segment(reg, desc);

        Ok(SegmentLoadEffect {
            arms_nointr_window: reg == SegReg::Ss,
        })
    }

    fn load_real(target: LoadTarget, selector: u16) -> SegmentDescriptor {
        if target == LoadTarget::Cs {
            SegmentDescriptor::real_mode_code(selector)
        } else {
            SegmentDescriptor::real_mode(selector)
        }
    }

    /// Protected-mode load algorithm (§4.3 steps 1-6). `pub(crate)`
    /// because `LLDT`/`LTR` (§4.6, 80286 control instructions) always
    /// resolve their selector against the GDT/LDT descriptor-table
    /// machinery regardless of the current PE bit, unlike a regular
    /// segment-register load which only does so once in protected mode.
    pub(crate) fn load_protected(
        regs: &RegisterFile,
        bus: &dyn MemoryBus,
        target: LoadTarget,
        selector: u16,
    ) -> Result<SegmentDescriptor> {
        // Step 1: null selector.
        if selector & 0xFFFC == 0 {
            if matches!(target, LoadTarget::Cs | LoadTarget::Ss) {
                return Err(CoreError::GeneralProtection(selector));
            }
            return Ok(SegmentDescriptor {
                selector: 0,
                base: 0,
                limit: 0,
                access: 0,
                dpl: 0,
                present: false,
                is_code: false,
                is_conforming: false,
                readable: false,
                writable: false,
                expand_down: false,
            });
        }

        // Step 2: fetch descriptor from the indexed table.
        let table = Self::table_register(regs, selector);
        let index_offset = (selector & 0xFFF8) as u32;
        if index_offset as u32 + 7 > table.limit as u32 {
            return Err(CoreError::GeneralProtection(selector));
        }
        let table_base = table.base;
        let raw = Self::read_qword(bus, table_base.wrapping_add(index_offset));
        let desc = SegmentDescriptor::from_raw_286(selector, raw);

        // Step 3: reject incompatible descriptor types.
        Self::check_type(target, &desc, selector)?;

        // Step 4: present bit.
        if !desc.present {
            return Err(match target {
                LoadTarget::Ss => CoreError::StackFault(selector),
                _ => CoreError::SegmentNotPresent(selector),
            });
        }

        Ok(desc)
    }

    fn table_register(regs: &RegisterFile, selector: u16) -> TableRegister {
        match Table::from_selector(selector) {
            Table::Gdt => regs.gdtr,
            Table::Ldt => TableRegister { base: regs.ldtr.base, limit: regs.ldtr.limit as u16 },
        }
    }

    fn read_qword(bus: &dyn MemoryBus, addr: u32) -> u64 {
        let lo = bus.read_word(addr) as u64;
        let mid = bus.read_word(addr.wrapping_add(2)) as u64;
        let hi = bus.read_word(addr.wrapping_add(4)) as u64;
        let top = bus.read_word(addr.wrapping_add(6)) as u64;
        lo | (mid << 16) | (hi << 32) | (top << 48)
    }

    fn check_type(target: LoadTarget, desc: &SegmentDescriptor, selector: u16) -> Result<()> {
        match target {
            LoadTarget::Cs => {
                if !desc.is_code {
                    return Err(CoreError::GeneralProtection(selector));
                }
            }
            LoadTarget::Ss => {
                if desc.is_code || !desc.writable {
                    return Err(CoreError::GeneralProtection(selector));
                }
            }
            LoadTarget::DataOrEs => {
                if desc.is_code && !desc.readable {
                    return Err(CoreError::GeneralProtection(selector));
                }
            }
            LoadTarget::Ldtr => {
                if desc.descriptor_type() != 0x02 {
                    return Err(CoreError::GeneralProtection(selector));
                }
            }
            LoadTarget::Tr => {
                if desc.descriptor_type() != 0x01 && desc.descriptor_type() != 0x03 {
                    return Err(CoreError::GeneralProtection(selector));
                }
            }
        }
        Ok(())
    }

    /// `checkRead(off, extra)` / `checkWrite(off, extra)` (§4.3):
    /// validates `off + extra` against the segment limit and returns
    /// the linear address on success. `extra` is `byteCount - 1`.
    pub fn check_access(
        desc: &SegmentDescriptor,
        offset: u32,
        extra: u32,
        kind: AccessKind,
        protected_mode: bool,
    ) -> Result<u32> {
        if !protected_mode {
            // Real mode: always 0xFFFF limit, never faults; wraparound
            // behavior is the model's concern (segment_offset_wraps),
            // applied by the caller before invoking this check.
            return Ok(desc.base.wrapping_add(offset));
        }

        match kind {
            AccessKind::Execute => {
                if !desc.is_code {
                    return Err(CoreError::GeneralProtection(desc.selector));
                }
            }
            AccessKind::Write => {
                if desc.is_code || !desc.writable {
                    return Err(CoreError::GeneralProtection(desc.selector));
                }
            }
            AccessKind::Read => {
                if desc.is_code && !desc.readable {
                    return Err(CoreError::GeneralProtection(desc.selector));
                }
            }
        }

        let within_limit = if desc.expand_down {
            offset > desc.limit && offset.wrapping_add(extra) > desc.limit
        } else {
            offset.wrapping_add(extra) <= desc.limit
        };
        let ok = if desc.expand_down { !within_limit } else { within_limit };
        if !ok {
            return Err(if !desc.is_code && desc.writable {
                CoreError::StackFault(desc.selector)
            } else {
                CoreError::GeneralProtection(desc.selector)
            });
        }

        Ok(desc.base.wrapping_add(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BlockBus;

    #[test]
    fn real_mode_load_sets_flat_base() {
        let regs = RegisterFile::new();
        assert!(!regs.protected_mode());
        let desc = SegmentUnit::load_real(LoadTarget::DataOrEs, 0x2000);
        assert_eq!(desc.base, 0x20000);
    }

    #[test]
    fn real_mode_check_access_never_faults() {
        let desc = SegmentDescriptor::real_mode(0x1000);
        let linear = SegmentUnit::check_access(&desc, 0xFFFE, 1, AccessKind::Read, false).unwrap();
        assert_eq!(linear, 0x1000 * 16 + 0xFFFE);
    }

    #[test]
    fn protected_mode_null_data_selector_is_unusable_but_not_faulting() {
        let bus = BlockBus::new(24);
        let mut regs = RegisterFile::new();
        regs.msw |= crate::registers::MSW_PE;
        let result = SegmentUnit::load(&mut regs, &bus, SegReg::Ds, LoadTarget::DataOrEs, 0x0000);
        assert!(result.is_ok());
    }

    #[test]
    fn protected_mode_null_cs_selector_faults() {
        let bus = BlockBus::new(24);
        let mut regs = RegisterFile::new();
        regs.msw |= crate::registers::MSW_PE;
        let result = SegmentUnit::load(&mut regs, &bus, SegReg::Cs, LoadTarget::Cs, 0x0000);
        assert!(matches!(result, Err(CoreError::GeneralProtection(0))));
    }
}
