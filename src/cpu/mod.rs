//! CPU: register/flag/interrupt state plus the decode and dispatch
//! machinery tying the other units into one fetch-decode-execute engine.
//!
//! Reduced from the teacher's `Cpu` (which additionally owned FPU/SSE
//! state, a paging-capable `Mmu`, and a long-mode-aware `run()` loop) to
//! the 8086-80286 surface: [`RegisterFile`] + [`Flags`] + [`InterruptUnit`]
//! + [`PrefetchQueue`] + a per-model [`table::InstructionTable`]. The
//! step loop itself lives in [`exec`] (§4.7).

pub mod exec;
pub mod ops_arith;
pub(crate) mod ops_common;
pub mod ops_control;
pub mod ops_data;
pub mod ops_logic;
pub mod ops_stack;
pub mod ops_string;
pub mod ops_system;
pub mod table;

use crate::decoder::Decoder;
use crate::error::Result;
use crate::flags::{Flags, OperandSize};
use crate::instruction::{DecodedInst, MemOperand};
use crate::interrupts::InterruptUnit;
use crate::io::IoDispatch;
use crate::memory::MemoryBus;
use crate::model::{CpuModel, CycleTable};
use crate::prefetch::PrefetchQueue;
use crate::registers::RegisterFile;
use crate::save_state::SaveState;
use crate::segment::{AccessKind, LoadTarget, SegmentUnit};
use crate::registers::SegReg;
use table::InstructionTable;

pub use exec::StepOutcome;

/// Host-supplied construction parameters (§6.1, the `{model,
/// cycles_per_second}` construction contract of §6).
#[derive(Debug, Clone, Copy)]
pub struct CpuConfig {
    pub model: CpuModel,
    /// Nominal clock rate used to convert a host's wall-clock budget
    /// into bus cycles; `None` falls back to
    /// `CpuModel::default_cycles_per_second`. The core itself only
    /// consumes a cycle count (see [`exec::step`]) — this is bookkeeping
    /// a host timing loop reads back via [`Cpu::cycles_per_second`].
    pub cycles_per_second: Option<u32>,
    /// Whether the prefetch queue models fetch-ahead timing at all, or
    /// every fetch goes straight to the bus (§4.4/§9 "Testable Property
    /// 3: architected-state equivalence with/without prefetch").
    pub prefetch_enabled: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: true }
    }
}

/// Top-level CPU core. Holds all architectural state and the
/// model-specialized decode/dispatch tables built once at construction.
pub struct Cpu {
    pub regs: RegisterFile,
    pub flags: Flags,
    pub interrupts: InterruptUnit,
    pub io: IoDispatch,
    pub prefetch: PrefetchQueue,
    pub model: CpuModel,
    pub cycle_table: CycleTable,
    cycles_per_second: u32,
    decoder: Decoder,
    table: InstructionTable,
    pub halted: bool,
    pub last_opcode: u8,
    pub last_fetch_addr: u32,
    pub instruction_count: u64,
}

impl Cpu {
    pub fn new(config: CpuConfig) -> Self {
        let model = config.model;
        let mut cpu = Cpu {
            regs: RegisterFile::new_for_model(model),
            flags: Flags::reset(),
            interrupts: InterruptUnit::new(),
            io: IoDispatch::new(),
            prefetch: PrefetchQueue::new(model.prefetch_depth(), config.prefetch_enabled),
            model,
            cycle_table: CycleTable::for_model(model),
            cycles_per_second: config.cycles_per_second.unwrap_or_else(|| model.default_cycles_per_second()),
            decoder: Decoder::new(model),
            table: InstructionTable::build(model),
            halted: false,
            last_opcode: 0,
            last_fetch_addr: 0,
            instruction_count: 0,
        };
        cpu.prefetch.flush(cpu.cs_ip_linear());
        cpu
    }

    /// Power-on reset (§8 seed scenario 1). The instruction table and
    /// prefetch-enabled setting are construction-time choices and
    /// survive reset; everything architectural is reinitialized.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::new_for_model(self.model);
        self.flags = Flags::reset();
        self.interrupts.reset();
        self.halted = false;
        self.instruction_count = 0;
        self.prefetch.flush(self.cs_ip_linear());
    }

    pub fn save_state(&self) -> SaveState {
        SaveState::capture(&self.regs, &self.flags, self.interrupts.flags)
    }

    pub fn restore_state(&mut self, state: &SaveState) -> Result<()> {
        let restored_flags = state.restore(&mut self.regs, &mut self.flags)?;
        self.interrupts.flags = restored_flags;
        self.prefetch.flush(self.cs_ip_linear());
        Ok(())
    }

    /// Nominal clock rate in Hz, as supplied (or defaulted) at
    /// construction (§6). A host timing loop uses this to convert a
    /// wall-clock interval into the cycle budget passed to
    /// [`exec::step`]; the core never consults it itself.
    #[inline]
    pub fn cycles_per_second(&self) -> u32 {
        self.cycles_per_second
    }

    #[inline]
    pub fn cs_ip_linear(&self) -> u32 {
        self.regs.segment(SegReg::Cs).base.wrapping_add(self.regs.ip as u32)
    }

    // ── Memory access through the segment unit ──

    /// Resolve `seg:offset` to a linear address and check it against the
    /// segment limit (a no-op check in real mode beyond the model's
    /// segment-wrap quirk, which callers handle a byte at a time).
    fn linear(&self, seg: SegReg, offset: u16, kind: AccessKind) -> Result<u32> {
        let desc = self.regs.segment(seg);
        SegmentUnit::check_access(desc, offset as u32, 0, kind, self.regs.protected_mode())
    }

    pub fn read_mem_byte(&self, bus: &dyn MemoryBus, seg: SegReg, offset: u16) -> Result<u8> {
        let lin = self.linear(seg, offset, AccessKind::Read)?;
        Ok(bus.read_byte(lin))
    }

    pub fn write_mem_byte(&mut self, bus: &mut dyn MemoryBus, seg: SegReg, offset: u16, val: u8) -> Result<()> {
        let lin = self.linear(seg, offset, AccessKind::Write)?;
        bus.write_byte(lin, val);
        Ok(())
    }

    /// Word access. On 8086/8088 a word straddling the top of the
    /// segment (offset 0xFFFF) wraps to offset 0 instead of crossing
    /// into the next segment (§4.6 `segment_offset_wraps`); 80186+
    /// instead let the high byte land at linear offset 0x10000.
    pub fn read_mem_word(&self, bus: &dyn MemoryBus, seg: SegReg, offset: u16) -> Result<u16> {
        if self.model.segment_offset_wraps() && offset == 0xFFFF {
            let lo = self.read_mem_byte(bus, seg, 0xFFFF)?;
            let hi = self.read_mem_byte(bus, seg, 0x0000)?;
            return Ok((lo as u16) | ((hi as u16) << 8));
        }
        let lin = self.linear(seg, offset, AccessKind::Read)?;
        Ok(bus.read_word(lin))
    }

    pub fn write_mem_word(&mut self, bus: &mut dyn MemoryBus, seg: SegReg, offset: u16, val: u16) -> Result<()> {
        if self.model.segment_offset_wraps() && offset == 0xFFFF {
            self.write_mem_byte(bus, seg, 0xFFFF, (val & 0xFF) as u8)?;
            self.write_mem_byte(bus, seg, 0x0000, (val >> 8) as u8)?;
            return Ok(());
        }
        let lin = self.linear(seg, offset, AccessKind::Write)?;
        bus.write_word(lin, val);
        Ok(())
    }

    // ── Effective-address / ModR/M operand access (§4.5) ──

    pub fn effective_offset(&self, ea: &MemOperand) -> u16 {
        let mut off: u16 = 0;
        if let Some(b) = ea.base {
            off = off.wrapping_add(self.regs.read_gpr16(b));
        }
        if let Some(i) = ea.index {
            off = off.wrapping_add(self.regs.read_gpr16(i));
        }
        off.wrapping_add(ea.displacement as u16)
    }

    pub fn read_ea(&self, bus: &dyn MemoryBus, ea: &MemOperand) -> Result<u32> {
        let off = self.effective_offset(ea);
        match ea.size {
            OperandSize::Byte => Ok(self.read_mem_byte(bus, ea.segment, off)? as u32),
            OperandSize::Word => Ok(self.read_mem_word(bus, ea.segment, off)? as u32),
        }
    }

    pub fn write_ea(&mut self, bus: &mut dyn MemoryBus, ea: &MemOperand, val: u32) -> Result<()> {
        let off = self.effective_offset(ea);
        match ea.size {
            OperandSize::Byte => self.write_mem_byte(bus, ea.segment, off, val as u8),
            OperandSize::Word => self.write_mem_word(bus, ea.segment, off, val as u16),
        }
    }

    /// Read the ModR/M r/m operand: a register if `mod==3`, else the
    /// resolved memory operand.
    pub fn read_rm(&self, bus: &dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<u32> {
        match &inst.ea {
            Some(ea) => self.read_ea(bus, ea),
            None => Ok(self.regs.read_gpr(inst.modrm_rm(), size) as u32),
        }
    }

    pub fn write_rm(&mut self, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize, val: u32) -> Result<()> {
        match &inst.ea {
            Some(ea) => self.write_ea(bus, ea, val),
            None => {
                self.regs.write_gpr(inst.modrm_rm(), size, val as u16);
                Ok(())
            }
        }
    }

    /// EA cycle cost for this instruction's r/m operand (0 for a
    /// register operand, or the decoder's precomputed class cost).
    pub fn rm_ea_cycles(&self, inst: &DecodedInst) -> u32 {
        inst.ea.map(|ea| ea.ea_cycles).unwrap_or(0)
    }

    // ── Stack (§4.5 "PUSH/POP go through SS") ──

    pub fn push_word(&mut self, bus: &mut dyn MemoryBus, val: u16) -> Result<()> {
        let sp = self.regs.sp().wrapping_sub(2);
        self.regs.set_sp(sp);
        self.write_mem_word(bus, SegReg::Ss, sp, val)
    }

    pub fn pop_word(&mut self, bus: &dyn MemoryBus) -> Result<u16> {
        let sp = self.regs.sp();
        let val = self.read_mem_word(bus, SegReg::Ss, sp)?;
        self.regs.set_sp(sp.wrapping_add(2));
        Ok(val)
    }

    // ── Segment loads (§4.3) ──

    /// Load `selector` into `reg`, arming the NOINTR window on an SS
    /// reload and flushing the prefetch queue on a CS reload (a CS load
    /// always implies IP changed too, via whatever branch caused it).
    pub fn load_segment(&mut self, bus: &dyn MemoryBus, reg: SegReg, target: LoadTarget, selector: u16) -> Result<()> {
        let effect = SegmentUnit::load(&mut self.regs, bus, reg, target, selector)?;
        if effect.arms_nointr_window {
            self.interrupts.set_nointr(true);
        }
        Ok(())
    }

    /// Advance IP past the just-dispatched instruction. Every handler
    /// that falls through to the next instruction calls this; branch/
    /// call/jump handlers set `regs.ip` directly instead.
    #[inline]
    pub fn advance_ip(&mut self, inst: &DecodedInst) {
        self.regs.ip = self.regs.ip.wrapping_add(inst.length as u16);
    }

    /// Flush the prefetch queue to refetch starting at the current CS:IP
    /// (§4.4: called on every branch, segment reload affecting the code
    /// stream, or a decoded prefix that changes it).
    pub fn flush_prefetch(&mut self) {
        self.prefetch.flush(self.cs_ip_linear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BlockBus;

    #[test]
    fn new_cpu_seeds_reset_state_and_prefetch() {
        let cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: true });
        assert_eq!(cpu.regs.ip, 0x0000);
        assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0xFFFF);
        assert_eq!(cpu.cs_ip_linear(), 0xFFFF0);
    }

    #[test]
    fn new_cpu_on_80286_seeds_literal_reset_base() {
        let cpu = Cpu::new(CpuConfig { model: CpuModel::Intel80286, cycles_per_second: None, prefetch_enabled: true });
        assert_eq!(cpu.regs.ip, 0xFFF0);
        assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0xF000);
        assert_eq!(cpu.regs.segment(SegReg::Cs).base, 0xFF0000);
        assert_eq!(cpu.cs_ip_linear(), 0xFFFFF0);
    }

    #[test]
    fn push_pop_word_round_trips_through_ss() {
        let mut bus = BlockBus::new(20);
        bus.install_ram(0, 0x1000).unwrap();
        let mut cpu = Cpu::new(CpuConfig::default());
        cpu.regs.set_sp(0x0100);
        cpu.push_word(&mut bus, 0xABCD).unwrap();
        assert_eq!(cpu.regs.sp(), 0x00FE);
        let v = cpu.pop_word(&bus).unwrap();
        assert_eq!(v, 0xABCD);
        assert_eq!(cpu.regs.sp(), 0x0100);
    }

    #[test]
    fn word_access_at_segment_top_wraps_on_8088() {
        let mut bus = BlockBus::new(20);
        bus.install_ram(0, 0x1000).unwrap();
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
        cpu.write_mem_word(&mut bus, SegReg::Ds, 0xFFFF, 0x1234).unwrap();
        assert_eq!(bus.read_byte(0xFFFF), 0x34);
        assert_eq!(bus.read_byte(0x0000), 0x12);
    }
}
