//! Stack instruction handlers (§4.6): PUSH/POP (register, immediate,
//! segment, r/m), PUSHF/POPF, PUSHA/POPA, ENTER/LEAVE, and the 8086-only
//! `POP CS` override at opcode 0x0F.

use super::table::HandlerFn;
use super::Cpu;
use crate::error::Result;
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::model::CpuModel;
use crate::registers::{GprIndex, SegReg};
use crate::segment::LoadTarget;

pub fn install(table: &mut [HandlerFn; 256], model: CpuModel) {
    for op in 0x50..=0x57u8 {
        table[op as usize] = exec_push_reg;
    }
    for op in 0x58..=0x5Fu8 {
        table[op as usize] = exec_pop_reg;
    }
    table[0x06] = exec_push_seg;
    table[0x0E] = exec_push_seg;
    table[0x16] = exec_push_seg;
    table[0x1E] = exec_push_seg;
    table[0x07] = exec_pop_seg;
    table[0x17] = exec_pop_seg;
    table[0x1F] = exec_pop_seg;
    // 0x0F (POP ES alias slot under the teacher's encoding) is not a
    // segment POP on this family; the 8086 model delta installs
    // `exec_pop_cs` there instead (see `table.rs`), so this module
    // claims no handler for 0x0F itself.

    table[0x8F] = exec_pop_rm;
    table[0x9C] = exec_pushf;
    table[0x9D] = exec_popf;

    if model.has_80186_extensions() {
        table[0x60] = exec_pusha;
        table[0x61] = exec_popa;
        table[0x68] = exec_push_imm16;
        table[0x6A] = exec_push_imm8;
        table[0xC8] = exec_enter;
        table[0xC9] = exec_leave;
    }
}

/// Push value computed for `PUSH SP`: `push_sp_pushes_old_value` picks
/// between the pre- and post-decrement value (§4.6, §8 "PUSH SP
/// dichotomy"). Every other register pushes its plain current value.
fn push_reg_value(cpu: &Cpu, reg: u8) -> u16 {
    if reg == GprIndex::Sp as u8 && !cpu.model.push_sp_pushes_old_value() {
        cpu.regs.sp().wrapping_sub(2)
    } else {
        cpu.regs.read_gpr16(reg)
    }
}

fn exec_push_reg(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    let val = push_reg_value(cpu, reg);
    cpu.push_word(bus, val)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg)
}

fn exec_pop_reg(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    let val = cpu.pop_word(bus)?;
    cpu.regs.write_gpr16(reg, val);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.pop_reg)
}

fn seg_reg_for_opcode(opcode: u8) -> SegReg {
    match opcode & 0x18 {
        0x00 => SegReg::Es,
        0x08 => SegReg::Cs,
        0x10 => SegReg::Ss,
        0x18 => SegReg::Ds,
        _ => unreachable!(),
    }
}

fn exec_push_seg(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let seg = seg_reg_for_opcode(inst.opcode);
    let val = cpu.regs.segment(seg).selector;
    cpu.push_word(bus, val)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg)
}

fn exec_pop_seg(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let seg = seg_reg_for_opcode(inst.opcode);
    let selector = cpu.pop_word(bus)?;
    let target = match seg {
        SegReg::Ss => LoadTarget::Ss,
        SegReg::Cs => LoadTarget::Cs,
        _ => LoadTarget::DataOrEs,
    };
    cpu.load_segment(bus, seg, target, selector)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.pop_reg)
}

/// 8086-only model delta: a lone `0x0F` opcode byte decodes as `POP CS`
/// (§4.6), installed directly into the primary table by `table.rs`.
pub fn exec_pop_cs(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let selector = cpu.pop_word(bus)?;
    cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, selector)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.pop_reg)
}

fn exec_pop_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let val = cpu.pop_word(bus)?;
    cpu.write_rm(bus, inst, crate::flags::OperandSize::Word, val as u32)?;
    let cycles = if inst.ea.is_some() {
        cpu.cycle_table.pop_reg + cpu.rm_ea_cycles(inst)
    } else {
        cpu.cycle_table.pop_reg
    };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// Shared with `ops_control`'s group 0xFF dispatcher (reg field 6).
pub(crate) fn push_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let val = cpu.read_rm(bus, inst, crate::flags::OperandSize::Word)? as u16;
    cpu.push_word(bus, val)?;
    Ok(if inst.ea.is_some() {
        cpu.cycle_table.push_reg + cpu.rm_ea_cycles(inst)
    } else {
        cpu.cycle_table.push_reg
    })
}

fn exec_push_imm16(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.push_word(bus, inst.immediate as u16)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg)
}

fn exec_push_imm8(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.push_word(bus, inst.immediate as i8 as i16 as u16)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg)
}

fn exec_pushf(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let val = cpu.flags.ps_word();
    cpu.push_word(bus, val)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg)
}

fn exec_popf(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let val = cpu.pop_word(bus)?;
    cpu.flags.set_ps(val);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.pop_reg)
}

/// PUSHA (80186+): pushes AX,CX,DX,BX,(original)SP,BP,SI,DI in that
/// order (§4.6 — the SP value pushed is the one sampled before any of
/// the eight pushes, not an incrementally-decremented one).
fn exec_pusha(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let original_sp = cpu.regs.sp();
    for reg in [GprIndex::Ax, GprIndex::Cx, GprIndex::Dx, GprIndex::Bx] {
        let val = cpu.regs.read_gpr16(reg as u8);
        cpu.push_word(bus, val)?;
    }
    cpu.push_word(bus, original_sp)?;
    for reg in [GprIndex::Bp, GprIndex::Si, GprIndex::Di] {
        let val = cpu.regs.read_gpr16(reg as u8);
        cpu.push_word(bus, val)?;
    }
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg * 8)
}

/// POPA: pops DI,SI,BP,(discarded SP slot),BX,DX,CX,AX.
fn exec_popa(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    for reg in [GprIndex::Di, GprIndex::Si, GprIndex::Bp] {
        let val = cpu.pop_word(bus)?;
        cpu.regs.write_gpr16(reg as u8, val);
    }
    let _discarded_sp = cpu.pop_word(bus)?;
    for reg in [GprIndex::Bx, GprIndex::Dx, GprIndex::Cx, GprIndex::Ax] {
        let val = cpu.pop_word(bus)?;
        cpu.regs.write_gpr16(reg as u8, val);
    }
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.pop_reg * 8)
}

/// ENTER (80186+): builds a stack frame. `immediate` carries the
/// 16-bit frame size, `immediate2` the nesting level (§4.5: "ENTER's
/// frame-size+nesting-level pair" uses both immediates).
fn exec_enter(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let frame_size = inst.immediate as u16;
    let nesting_level = (inst.immediate2 as u8) & 0x1F;

    let bp = cpu.regs.read_gpr16(GprIndex::Bp as u8);
    cpu.push_word(bus, bp)?;
    let frame_ptr = cpu.regs.sp();

    if nesting_level > 0 {
        let mut bp_cursor = bp;
        for _ in 1..nesting_level {
            bp_cursor = bp_cursor.wrapping_sub(2);
            let val = cpu.read_mem_word(bus, SegReg::Ss, bp_cursor)?;
            cpu.push_word(bus, val)?;
        }
        cpu.push_word(bus, frame_ptr)?;
    }

    cpu.regs.write_gpr16(GprIndex::Bp as u8, frame_ptr);
    let new_sp = frame_ptr.wrapping_sub(frame_size);
    cpu.regs.set_sp(new_sp);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.push_reg * (nesting_level.max(1) as u32 + 1))
}

/// LEAVE (80186+): `SP = BP; BP = pop()`.
fn exec_leave(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let bp = cpu.regs.read_gpr16(GprIndex::Bp as u8);
    cpu.regs.set_sp(bp);
    let old_bp = cpu.pop_word(bus)?;
    cpu.regs.write_gpr16(GprIndex::Bp as u8, old_bp);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.pop_reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuConfig;
    use crate::memory::BlockBus;

    fn setup() -> (Cpu, BlockBus) {
        let mut bus = BlockBus::new(20);
        bus.install_ram(0, 0x2000).unwrap();
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel80186, cycles_per_second: None, prefetch_enabled: false });
        cpu.regs.set_sp(0x1000);
        (cpu, bus)
    }

    #[test]
    fn pusha_popa_round_trip() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr16(GprIndex::Ax as u8, 0x1111);
        cpu.regs.write_gpr16(GprIndex::Bx as u8, 0x3333);
        let inst = DecodedInst { length: 1, opcode: 0x60, ..DecodedInst::empty() };
        exec_pusha(&mut cpu, &mut bus, &inst).unwrap();
        cpu.regs.write_gpr16(GprIndex::Ax as u8, 0);
        cpu.regs.write_gpr16(GprIndex::Bx as u8, 0);
        let inst = DecodedInst { length: 1, opcode: 0x61, ..DecodedInst::empty() };
        exec_popa(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Ax as u8), 0x1111);
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Bx as u8), 0x3333);
    }

    #[test]
    fn push_sp_model_delta() {
        let (mut cpu8186, mut bus8186) = setup();
        cpu8186.model = CpuModel::Intel80186;
        let sp_before = cpu8186.regs.sp();
        let val = push_reg_value(&cpu8186, GprIndex::Sp as u8);
        assert_eq!(val, sp_before.wrapping_sub(2));

        let (mut cpu286, _bus286) = setup();
        cpu286.model = CpuModel::Intel80286;
        let sp_before = cpu286.regs.sp();
        let val = push_reg_value(&cpu286, GprIndex::Sp as u8);
        assert_eq!(val, sp_before);
    }

    #[test]
    fn enter_leave_round_trip_bp() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr16(GprIndex::Bp as u8, 0xABCD);
        let sp_before = cpu.regs.sp();
        let inst = DecodedInst { length: 4, opcode: 0xC8, immediate: 0x0010, immediate2: 0, ..DecodedInst::empty() };
        exec_enter(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.sp(), sp_before - 2 - 0x10);
        let inst = DecodedInst { length: 1, opcode: 0xC9, ..DecodedInst::empty() };
        exec_leave(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Bp as u8), 0xABCD);
        assert_eq!(cpu.regs.sp(), sp_before);
    }
}
