//! Opaque save/restore payload (§6).
//!
//! A host harness calls [`Cpu::save_state`]/[`Cpu::restore_state`]
//! around its own serialization format; this core only promises a
//! stable-within-version snapshot of its own architectural state, not a
//! wire format. Segment-register restoration rejects unknown segment
//! names rather than falling back to a legacy positional guess (§8, §9
//! Open Question resolution).

use crate::error::{CoreError, Result};
use crate::flags::Flags;
use crate::interrupts::IntFlags;
use crate::registers::{RegisterFile, SegReg, SegmentDescriptor, TableRegister};

/// Named snapshot of one segment register, so restore can validate the
/// name instead of assuming array order (§9).
#[derive(Debug, Clone, Copy)]
pub struct SavedSegment {
    pub name: &'static str,
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u8,
}

impl SavedSegment {
    fn capture(name: &'static str, desc: &SegmentDescriptor) -> Self {
        SavedSegment {
            name,
            selector: desc.selector,
            base: desc.base,
            limit: desc.limit,
            access: desc.access,
        }
    }

    fn to_descriptor(&self) -> SegmentDescriptor {
        let dpl = (self.access >> 5) & 0x03;
        let present = self.access & 0x80 != 0;
        let is_system = (self.access & 0x10) == 0;
        let is_code = !is_system && (self.access & 0x08) != 0;
        let is_conforming = is_code && (self.access & 0x04) != 0;
        let readable = if is_code { self.access & 0x02 != 0 } else { true };
        let writable = if is_code { false } else { self.access & 0x02 != 0 };
        let expand_down = !is_code && (self.access & 0x04) != 0;
        SegmentDescriptor {
            selector: self.selector,
            base: self.base,
            limit: self.limit,
            access: self.access,
            dpl,
            present,
            is_code,
            is_conforming,
            readable,
            writable,
            expand_down,
        }
    }
}

/// Full architectural-state snapshot.
#[derive(Debug, Clone)]
pub struct SaveState {
    pub gpr: [u16; 8],
    pub ip: u16,
    pub ps: u16,
    pub segments: Vec<SavedSegment>,
    pub gdtr: TableRegister,
    pub idtr: TableRegister,
    pub ldtr: SavedSegment,
    pub tr: SavedSegment,
    pub msw: u16,
    pub cpl: u8,
    pub int_flags: u8,
}

impl SaveState {
    pub fn capture(regs: &RegisterFile, flags: &Flags, int_flags: IntFlags) -> Self {
        SaveState {
            gpr: regs.gpr,
            ip: regs.ip,
            ps: flags.ps_word(),
            segments: vec![
                SavedSegment::capture("ES", regs.segment(SegReg::Es)),
                SavedSegment::capture("CS", regs.segment(SegReg::Cs)),
                SavedSegment::capture("SS", regs.segment(SegReg::Ss)),
                SavedSegment::capture("DS", regs.segment(SegReg::Ds)),
            ],
            gdtr: regs.gdtr,
            idtr: regs.idtr,
            ldtr: SavedSegment::capture("LDTR", &regs.ldtr),
            tr: SavedSegment::capture("TR", &regs.tr),
            msw: regs.msw,
            cpl: regs.cpl,
            int_flags: int_flags.bits(),
        }
    }

    /// Restore into `regs`/`flags`/`int_flags`. Rejects a saved
    /// segment whose name doesn't match any known register instead of
    /// guessing a positional fallback (§9).
    pub fn restore(&self, regs: &mut RegisterFile, flags: &mut Flags) -> Result<IntFlags> {
        regs.gpr = self.gpr;
        regs.ip = self.ip;
        flags.set_ps(self.ps);
        regs.gdtr = self.gdtr;
        regs.idtr = self.idtr;
        regs.msw = self.msw;
        regs.cpl = self.cpl;

        for saved in &self.segments {
            let reg = match saved.name {
                "ES" => SegReg::Es,
                "CS" => SegReg::Cs,
                "SS" => SegReg::Ss,
                "DS" => SegReg::Ds,
                _ => return Err(CoreError::HostFault("unknown segment register name in saved state")),
            };
            regs.load_segment(reg, saved.to_descriptor());
        }
        if self.ldtr.name != "LDTR" || self.tr.name != "TR" {
            return Err(CoreError::HostFault("unknown system register name in saved state"));
        }
        regs.ldtr = self.ldtr.to_descriptor();
        regs.tr = self.tr.to_descriptor();

        IntFlags::from_bits(self.int_flags)
            .ok_or(CoreError::HostFault("unknown intFlags bit in saved state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_then_restore_round_trips_gprs_and_ip() {
        let mut regs = RegisterFile::new();
        regs.gpr[0] = 0xBEEF;
        regs.ip = 0x1234;
        let flags = Flags::reset();
        let saved = SaveState::capture(&regs, &flags, IntFlags::empty());

        let mut regs2 = RegisterFile::new();
        let mut flags2 = Flags::reset();
        saved.restore(&mut regs2, &mut flags2).unwrap();
        assert_eq!(regs2.gpr[0], 0xBEEF);
        assert_eq!(regs2.ip, 0x1234);
    }

    #[test]
    fn restore_rejects_unknown_segment_name() {
        let mut saved_bad = {
            let regs = RegisterFile::new();
            let flags = Flags::reset();
            SaveState::capture(&regs, &flags, IntFlags::empty())
        };
        saved_bad.segments[0].name = "XS";
        let mut regs2 = RegisterFile::new();
        let mut flags2 = Flags::reset();
        let result = saved_bad.restore(&mut regs2, &mut flags2);
        assert!(matches!(result, Err(CoreError::HostFault(_))));
    }
}
