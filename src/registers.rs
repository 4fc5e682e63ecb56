//! CPU register file: general-purpose, segment, and 80286 system registers.
//!
//! Reduced from a 64-bit/long-mode register file down to the 8086-80286
//! architectural state: eight 16-bit general registers, four segment
//! registers each with a cached descriptor, and the 80286 GDTR/IDTR/
//! LDTR/TR/MSW system registers. There is no paging, no MSR space, and
//! no REX-prefixed extended register set on this family.

use crate::flags::OperandSize;
use crate::model::CpuModel;

/// General-purpose register indices, matching the 8086 ModRM/opcode
/// encoding (AX=0 .. DI=7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GprIndex {
    Ax = 0,
    Cx = 1,
    Dx = 2,
    Bx = 3,
    Sp = 4,
    Bp = 5,
    Si = 6,
    Di = 7,
}

/// Segment register index. 8086-80286 expose exactly four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
}

impl SegReg {
    /// Convert a 2-bit segment-register encoding (ModRM reg field in a
    /// segment-register context, or the sreg field of `MOV sreg,r/m`).
    pub fn from_encoding(val: u8) -> Option<SegReg> {
        match val & 0x03 {
            0 => Some(SegReg::Es),
            1 => Some(SegReg::Cs),
            2 => Some(SegReg::Ss),
            3 => Some(SegReg::Ds),
            _ => None,
        }
    }
}

/// Cached segment descriptor — the hidden part of a segment register.
///
/// In real mode this is synthesized directly from the selector
/// (`base = selector << 4`, `limit = 0xFFFF`). In 80286 protected mode
/// it is loaded from a GDT/LDT entry by [`crate::segment`] and cached
/// here so every subsequent memory reference skips the descriptor
/// fetch (§4.3 "SegmentUnit").
#[derive(Debug, Clone, Copy)]
pub struct SegmentDescriptor {
    /// Visible selector value.
    pub selector: u16,
    /// Linear base address (up to 24 bits on 80286).
    pub base: u32,
    /// Segment limit in bytes. 80286 descriptors carry no granularity
    /// bit; the stored limit is always byte-granular.
    pub limit: u32,
    /// Raw access byte from the descriptor (or a synthesized real-mode
    /// value: 0x93 data / 0x9B code).
    pub access: u8,
    /// Descriptor privilege level (0-3; always 0 in real mode).
    pub dpl: u8,
    /// Segment is present.
    pub present: bool,
    /// Code segment (true) vs data segment (false).
    pub is_code: bool,
    /// Conforming code segment.
    pub is_conforming: bool,
    /// Code segment: readable. Data segment: always true.
    pub readable: bool,
    /// Data segment: writable. Code segment: always false.
    pub writable: bool,
    /// Expand-down data segment (limit check inverted).
    pub expand_down: bool,
}

impl SegmentDescriptor {
    /// Synthesize a flat real-mode data-segment descriptor for `selector`.
    pub fn real_mode(selector: u16) -> Self {
        SegmentDescriptor {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access: 0x93,
            dpl: 0,
            present: true,
            is_code: false,
            is_conforming: false,
            readable: true,
            writable: true,
            expand_down: false,
        }
    }

    /// Synthesize a flat real-mode code-segment descriptor for `selector`.
    pub fn real_mode_code(selector: u16) -> Self {
        let mut desc = Self::real_mode(selector);
        desc.is_code = true;
        desc.writable = false;
        desc.access = 0x9B;
        desc
    }

    /// Decode an 80286 segment descriptor from its 8-byte GDT/LDT entry.
    ///
    /// The 80286 descriptor format has no G/D/B/L flags nibble (those
    /// are 80386+ additions); bits 56-63 of the raw entry are reserved
    /// and ignored here rather than read as an extended base byte.
    pub fn from_raw_286(selector: u16, raw: u64) -> Self {
        let limit = (raw & 0xFFFF) as u32;
        let base_low = ((raw >> 16) & 0xFFFF) as u32;
        let base_high = ((raw >> 32) & 0xFF) as u32;
        let base = base_low | (base_high << 16);
        let access = ((raw >> 40) & 0xFF) as u8;

        let dpl = (access >> 5) & 0x03;
        let present = (access & 0x80) != 0;
        let is_system = (access & 0x10) == 0;
        let is_code = !is_system && (access & 0x08) != 0;
        let is_conforming = is_code && (access & 0x04) != 0;
        let readable = if is_code { (access & 0x02) != 0 } else { true };
        let writable = if is_code { false } else { (access & 0x02) != 0 };
        let expand_down = !is_code && (access & 0x04) != 0;

        SegmentDescriptor {
            selector,
            base,
            limit,
            access,
            dpl,
            present,
            is_code,
            is_conforming,
            readable,
            writable,
            expand_down,
        }
    }

    /// Raw descriptor-type field (bits 0-4 of the access byte), used by
    /// [`crate::segment`] to distinguish data/code/system descriptor
    /// subtypes (TSS, LDT, gates) from the access byte alone.
    pub fn descriptor_type(&self) -> u8 {
        self.access & 0x1F
    }
}

/// GDTR/IDTR register pair: linear base plus byte limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableRegister {
    /// Linear base address of the table.
    pub base: u32,
    /// Table size limit in bytes (highest valid offset).
    pub limit: u16,
}

/// Machine status word bits (80286; the `CR0` analogue for this family —
/// there is no paging or floating-point-emulation distinction relevant
/// here beyond PE/MP/EM/TS).
pub const MSW_PE: u16 = 1 << 0;
pub const MSW_MP: u16 = 1 << 1;
pub const MSW_EM: u16 = 1 << 2;
pub const MSW_TS: u16 = 1 << 3;
/// Reserved-one bits of MSW per the 80286 reset value (§8 seed scenario 1).
pub const MSW_RESET: u16 = 0xFFF0;

/// CPU register file: all architectural register state for the
/// 8086/80188/80186/80286 family.
pub struct RegisterFile {
    /// General-purpose registers, indexed by [`GprIndex`].
    pub gpr: [u16; 8],

    /// Instruction pointer.
    pub ip: u16,

    /// Segment registers (visible selector + cached descriptor),
    /// indexed by [`SegReg`].
    pub seg: [SegmentDescriptor; 4],

    /// Global Descriptor Table Register.
    pub gdtr: TableRegister,
    /// Interrupt Descriptor Table Register. Reset to the real-mode IVT
    /// (base 0, limit 0x3FF).
    pub idtr: TableRegister,
    /// Local Descriptor Table Register: selector plus cached descriptor
    /// (80286 protected mode only).
    pub ldtr: SegmentDescriptor,
    /// Task Register: selector plus cached descriptor (80286 only).
    pub tr: SegmentDescriptor,

    /// Machine status word (PE/MP/EM/TS plus reserved-one bits).
    pub msw: u16,

    /// Current privilege level (0-3; always 0 in real mode).
    pub cpl: u8,
}

impl RegisterFile {
    /// Power-on reset state for the 8088 (§8 seed scenario 1): CS:IP =
    /// FFFF:0000, all segments zeroed, GPRs zeroed, real mode. Prefer
    /// [`RegisterFile::new_for_model`] when the model is known; this
    /// constructor exists for call sites (tests, `Default`) that don't
    /// care which 8086-family reset vector they get.
    pub fn new() -> Self {
        Self::new_for_model(CpuModel::Intel8088)
    }

    /// Power-on reset state (§8 seed scenario 1, §3 "Lifecycles"):
    /// CS:IP = FFFF:0000 on 8086-style models (8088, 80186), CS.selector
    /// = 0xF000 with CS.base forced to the literal 0xFF0000 and IP =
    /// 0xFFF0 on the 80286 (not the usual `selector << 4` computation —
    /// the 80286 reset vector sits above the 8086's 1 MiB address
    /// space). All other segments zeroed, GPRs zeroed, real mode.
    pub fn new_for_model(model: CpuModel) -> Self {
        let (ip, cs) = if model.has_protected_mode() {
            let mut cs = SegmentDescriptor::real_mode_code(0xF000);
            cs.base = 0xFF0000;
            (0xFFF0, cs)
        } else {
            (0x0000, SegmentDescriptor::real_mode_code(0xFFFF))
        };
        RegisterFile {
            gpr: [0u16; 8],
            ip,
            seg: [
                SegmentDescriptor::real_mode(0x0000), // ES
                cs,
                SegmentDescriptor::real_mode(0x0000), // SS
                SegmentDescriptor::real_mode(0x0000), // DS
            ],
            gdtr: TableRegister::default(),
            idtr: TableRegister { base: 0, limit: 0x3FF },
            ldtr: SegmentDescriptor::real_mode(0),
            tr: SegmentDescriptor::real_mode(0),
            msw: MSW_RESET,
            cpl: 0,
        }
    }

    /// Whether the CPU is in 80286 protected mode.
    #[inline]
    pub fn protected_mode(&self) -> bool {
        self.msw & MSW_PE != 0
    }

    // ── GPR access ──

    /// Read an 8-bit register: 0-3 = AL/CL/DL/BL, 4-7 = AH/CH/DH/BH.
    #[inline]
    pub fn read_gpr8(&self, index: u8) -> u8 {
        if index < 4 {
            (self.gpr[index as usize] & 0xFF) as u8
        } else {
            ((self.gpr[(index - 4) as usize] >> 8) & 0xFF) as u8
        }
    }

    /// Write an 8-bit register.
    #[inline]
    pub fn write_gpr8(&mut self, index: u8, val: u8) {
        if index < 4 {
            let reg = &mut self.gpr[index as usize];
            *reg = (*reg & 0xFF00) | (val as u16);
        } else {
            let reg = &mut self.gpr[(index - 4) as usize];
            *reg = (*reg & 0x00FF) | ((val as u16) << 8);
        }
    }

    /// Read a 16-bit register.
    #[inline]
    pub fn read_gpr16(&self, index: u8) -> u16 {
        self.gpr[index as usize]
    }

    /// Write a 16-bit register.
    #[inline]
    pub fn write_gpr16(&mut self, index: u8, val: u16) {
        self.gpr[index as usize] = val;
    }

    /// Read a GPR at the given operand width.
    #[inline]
    pub fn read_gpr(&self, index: u8, width: OperandSize) -> u16 {
        match width {
            OperandSize::Byte => self.read_gpr8(index) as u16,
            OperandSize::Word => self.read_gpr16(index),
        }
    }

    /// Write a GPR at the given operand width.
    #[inline]
    pub fn write_gpr(&mut self, index: u8, width: OperandSize, val: u16) {
        match width {
            OperandSize::Byte => self.write_gpr8(index, val as u8),
            OperandSize::Word => self.write_gpr16(index, val),
        }
    }

    // ── Segment register helpers ──

    /// Get a reference to a segment descriptor.
    #[inline]
    pub fn segment(&self, reg: SegReg) -> &SegmentDescriptor {
        &self.seg[reg as usize]
    }

    /// Get a mutable reference to a segment descriptor.
    #[inline]
    pub fn segment_mut(&mut self, reg: SegReg) -> &mut SegmentDescriptor {
        &mut self.seg[reg as usize]
    }

    /// Load a segment register with an already-resolved descriptor
    /// (the real/protected-mode dispatch happens in [`crate::segment`]).
    #[inline]
    pub fn load_segment(&mut self, reg: SegReg, desc: SegmentDescriptor) {
        self.seg[reg as usize] = desc;
    }

    // ── Stack pointer helpers ──

    /// Read SP.
    #[inline]
    pub fn sp(&self) -> u16 {
        self.gpr[GprIndex::Sp as usize]
    }

    /// Write SP.
    #[inline]
    pub fn set_sp(&mut self, val: u16) {
        self.gpr[GprIndex::Sp as usize] = val;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eighty088_reset_state_matches_seed_scenario() {
        let regs = RegisterFile::new_for_model(CpuModel::Intel8088);
        assert_eq!(regs.ip, 0x0000);
        assert_eq!(regs.segment(SegReg::Cs).selector, 0xFFFF);
        assert_eq!(regs.segment(SegReg::Cs).base, 0xFFFF0);
        assert_eq!(regs.segment(SegReg::Ds).selector, 0);
        assert_eq!(regs.segment(SegReg::Es).selector, 0);
        assert_eq!(regs.segment(SegReg::Ss).selector, 0);
        assert!(!regs.protected_mode());
        assert_eq!(regs.msw, MSW_RESET);
    }

    #[test]
    fn eighty286_reset_state_matches_seed_scenario() {
        let regs = RegisterFile::new_for_model(CpuModel::Intel80286);
        assert_eq!(regs.ip, 0xFFF0);
        assert_eq!(regs.segment(SegReg::Cs).selector, 0xF000);
        assert_eq!(regs.segment(SegReg::Cs).base, 0xFF0000);
        assert!(!regs.protected_mode());
        assert_eq!(regs.msw, MSW_RESET);
        assert_eq!(regs.idtr.limit, 0x03FF);
    }

    #[test]
    fn high_byte_registers_alias_low_word() {
        let mut regs = RegisterFile::new();
        regs.write_gpr16(GprIndex::Ax as u8, 0x1234);
        assert_eq!(regs.read_gpr8(0), 0x34); // AL
        assert_eq!(regs.read_gpr8(4), 0x12); // AH
        regs.write_gpr8(4, 0xFF); // AH
        assert_eq!(regs.read_gpr16(GprIndex::Ax as u8), 0xFF34);
    }

    #[test]
    fn real_mode_descriptor_base_is_selector_shl_4() {
        let desc = SegmentDescriptor::real_mode(0x1234);
        assert_eq!(desc.base, 0x12340);
        assert_eq!(desc.limit, 0xFFFF);
    }
}
