//! Data movement instruction handlers (§4.6): MOV (register, memory,
//! segment, immediate, and moffs forms), LEA, XCHG, CBW/CWD, SAHF/LAHF,
//! WAIT, BOUND, and port I/O (IN/OUT).
//!
//! Adapted from the teacher's `executor/data.rs`, narrowed to this
//! family's addressing (no SIB/REX) and widened with the 80186 BOUND
//! check and 80286 segment-load privilege effects that `ops_common`'s
//! `load_segment` already arms.

use super::table::HandlerFn;
use super::Cpu;
use crate::error::{CoreError, Result};
use crate::flags::OperandSize;
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::model::CpuModel;
use crate::registers::SegReg;
use crate::segment::LoadTarget;

pub fn install(table: &mut [HandlerFn; 256], model: CpuModel) {
    table[0x86] = exec_xchg_rm;
    table[0x87] = exec_xchg_rm;

    table[0x88] = exec_mov_rm_reg;
    table[0x89] = exec_mov_rm_reg;
    table[0x8A] = exec_mov_reg_rm;
    table[0x8B] = exec_mov_reg_rm;
    table[0x8C] = exec_mov_rm_sreg;
    table[0x8E] = exec_mov_sreg_rm;
    table[0x8D] = exec_lea;

    for op in 0x90..=0x97u8 {
        table[op as usize] = exec_xchg_acc;
    }

    table[0x98] = exec_cbw;
    table[0x99] = exec_cwd;
    table[0x9B] = exec_wait;
    table[0x9E] = exec_sahf;
    table[0x9F] = exec_lahf;

    table[0xA0] = exec_mov_acc_moffs;
    table[0xA1] = exec_mov_acc_moffs;
    table[0xA2] = exec_mov_moffs_acc;
    table[0xA3] = exec_mov_moffs_acc;

    for op in 0xB0..=0xB7u8 {
        table[op as usize] = exec_mov_reg8_imm;
    }
    for op in 0xB8..=0xBFu8 {
        table[op as usize] = exec_mov_reg16_imm;
    }

    table[0xC6] = exec_mov_rm8_imm;
    table[0xC7] = exec_mov_rm16_imm;

    table[0xE4] = exec_in_imm8;
    table[0xE5] = exec_in_imm8;
    table[0xE6] = exec_out_imm8;
    table[0xE7] = exec_out_imm8;
    table[0xEC] = exec_in_dx;
    table[0xED] = exec_in_dx;
    table[0xEE] = exec_out_dx;
    table[0xEF] = exec_out_dx;

    if model.has_80186_extensions() {
        table[0x62] = exec_bound;
    }
}

fn exec_mov_rm_reg(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = inst.operand_size;
    let val = cpu.regs.read_gpr(inst.modrm_reg(), size) as u32;
    cpu.write_rm(bus, inst, size, val)?;
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

fn exec_mov_reg_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = inst.operand_size;
    let val = cpu.read_rm(bus, inst, size)?;
    cpu.regs.write_gpr(inst.modrm_reg(), size, val as u16);
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// MOV r/m16, sreg (0x8C): the sreg field reuses the ModR/M reg field
/// as a 2-bit segment-register encoding instead of a GPR index.
fn exec_mov_rm_sreg(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let seg = SegReg::from_encoding(inst.modrm_reg()).ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let val = cpu.regs.segment(seg).selector as u32;
    cpu.write_rm(bus, inst, OperandSize::Word, val)?;
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// MOV sreg, r/m16 (0x8E): loading SS arms the one-instruction NOINTR
/// window via `Cpu::load_segment` (§4.3).
fn exec_mov_sreg_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let seg = SegReg::from_encoding(inst.modrm_reg()).ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
    let target = match seg {
        SegReg::Ss => LoadTarget::Ss,
        SegReg::Cs => LoadTarget::Cs,
        _ => LoadTarget::DataOrEs,
    };
    cpu.load_segment(bus, seg, target, selector)?;
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// LEA: load the effective address itself, not the memory it names.
/// A register-form r/m operand (no EA) is an undefined encoding.
fn exec_lea(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ea = inst.ea.ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let offset = cpu.effective_offset(&ea);
    cpu.regs.write_gpr16(inst.modrm_reg(), offset);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

fn exec_xchg_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = inst.operand_size;
    let reg = inst.modrm_reg();
    let rm_val = cpu.read_rm(bus, inst, size)?;
    let reg_val = cpu.regs.read_gpr(reg, size) as u32;
    cpu.write_rm(bus, inst, size, reg_val)?;
    cpu.regs.write_gpr(reg, size, rm_val as u16);
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// XCHG AX,reg (0x90-0x97). 0x90 (AX,AX) is the canonical NOP encoding.
fn exec_xchg_acc(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    if reg != 0 {
        let ax = cpu.regs.read_gpr16(0);
        let other = cpu.regs.read_gpr16(reg);
        cpu.regs.write_gpr16(0, other);
        cpu.regs.write_gpr16(reg, ax);
    }
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

/// CBW: sign-extend AL into AH.
fn exec_cbw(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let al = cpu.regs.read_gpr8(0) as i8;
    cpu.regs.write_gpr16(0, al as i16 as u16);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

/// CWD: sign-extend AX into DX:AX.
fn exec_cwd(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ax = cpu.regs.read_gpr16(0) as i16;
    cpu.regs.write_gpr16(2, if ax < 0 { 0xFFFF } else { 0x0000 });
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

/// WAIT: on real hardware this stalls until the (absent) coprocessor
/// deasserts BUSY; there is no FPU on this family's emulated surface
/// (§5 Non-goals), so it is a pure cycle-consuming no-op.
fn exec_wait(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// SAHF: load CF/PF/AF/ZF/SF from AH, leaving the other flag bits alone.
fn exec_sahf(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ah = cpu.regs.read_gpr8(4);
    cpu.flags.set_cf(ah & 0x01 != 0);
    cpu.flags.set_pf(ah & 0x04 != 0);
    cpu.flags.set_af(ah & 0x10 != 0);
    cpu.flags.set_zf(ah & 0x40 != 0);
    cpu.flags.set_sf(ah & 0x80 != 0);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

/// LAHF: store CF/PF/AF/ZF/SF (plus the fixed-1 bit) into AH.
fn exec_lahf(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ps = cpu.flags.ps_word();
    cpu.regs.write_gpr8(4, (ps & 0xFF) as u8);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

/// MOV AL/AX, [moffs] and MOV [moffs], AL/AX (0xA0-0xA3): the 16-bit
/// offset is a direct address, always relative to DS unless overridden
/// (`decoder.rs` stashes it in `inst.displacement`).
fn exec_mov_acc_moffs(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let seg = inst.prefix.seg_override.unwrap_or(SegReg::Ds);
    let offset = inst.displacement as u16;
    match inst.operand_size {
        OperandSize::Byte => {
            let val = cpu.read_mem_byte(bus, seg, offset)?;
            cpu.regs.write_gpr8(0, val);
        }
        OperandSize::Word => {
            let val = cpu.read_mem_word(bus, seg, offset)?;
            cpu.regs.write_gpr16(0, val);
        }
    }
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_mem)
}

fn exec_mov_moffs_acc(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let seg = inst.prefix.seg_override.unwrap_or(SegReg::Ds);
    let offset = inst.displacement as u16;
    match inst.operand_size {
        OperandSize::Byte => {
            let val = cpu.regs.read_gpr8(0);
            cpu.write_mem_byte(bus, seg, offset, val)?;
        }
        OperandSize::Word => {
            let val = cpu.regs.read_gpr16(0);
            cpu.write_mem_word(bus, seg, offset, val)?;
        }
    }
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_mem)
}

fn exec_mov_reg8_imm(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    cpu.regs.write_gpr8(reg, inst.immediate as u8);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

fn exec_mov_reg16_imm(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    cpu.regs.write_gpr16(reg, inst.immediate as u16);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_reg)
}

fn exec_mov_rm8_imm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.write_rm(bus, inst, OperandSize::Byte, inst.immediate)?;
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

fn exec_mov_rm16_imm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.write_rm(bus, inst, OperandSize::Word, inst.immediate)?;
    let cycles = if inst.ea.is_some() { cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mov_reg };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// BOUND reg16, m16:16 (80186+): `#BR` when `reg < low` or `reg > high`,
/// where `low`/`high` are the two words stored at the memory operand.
/// A register-form r/m is not a legal encoding.
fn exec_bound(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ea = inst.ea.ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let off = cpu.effective_offset(&ea);
    let low = cpu.read_mem_word(bus, ea.segment, off)? as i16;
    let high = cpu.read_mem_word(bus, ea.segment, off.wrapping_add(2))? as i16;
    let index = cpu.regs.read_gpr16(inst.modrm_reg()) as i16;
    if index < low || index > high {
        return Err(CoreError::BoundRange);
    }
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mov_mem + cpu.rm_ea_cycles(inst))
}

fn exec_in_imm8(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let port = inst.immediate as u16;
    let size = inst.operand_size;
    let val = cpu.io.port_in(port, io_size(size))?;
    cpu.regs.write_gpr(0, size, val as u16);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_out_imm8(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let port = inst.immediate as u16;
    let size = inst.operand_size;
    let val = cpu.regs.read_gpr(0, size) as u32;
    cpu.io.port_out(port, io_size(size), val)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_in_dx(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let port = cpu.regs.read_gpr16(2); // DX
    let size = inst.operand_size;
    let val = cpu.io.port_in(port, io_size(size))?;
    cpu.regs.write_gpr(0, size, val as u16);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_out_dx(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let port = cpu.regs.read_gpr16(2); // DX
    let size = inst.operand_size;
    let val = cpu.regs.read_gpr(0, size) as u32;
    cpu.io.port_out(port, io_size(size), val)?;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

#[inline]
fn io_size(size: OperandSize) -> u8 {
    match size {
        OperandSize::Byte => 1,
        OperandSize::Word => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuConfig;
    use crate::memory::BlockBus;
    use crate::model::CpuModel;

    fn setup() -> (Cpu, BlockBus) {
        let mut bus = BlockBus::new(20);
        bus.install_ram(0, 0x2000).unwrap();
        let cpu = Cpu::new(CpuConfig { model: CpuModel::Intel80186, cycles_per_second: None, prefetch_enabled: false });
        (cpu, bus)
    }

    #[test]
    fn xchg_rm_swaps_register_and_rm() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr16(0, 0x1111); // AX
        cpu.regs.write_gpr16(3, 0x2222); // BX
        let inst = DecodedInst { length: 2, opcode: 0x87, operand_size: OperandSize::Word, modrm: Some(0xC3), ..DecodedInst::empty() };
        exec_xchg_rm(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(0), 0x2222);
        assert_eq!(cpu.regs.read_gpr16(3), 0x1111);
    }

    #[test]
    fn cbw_sign_extends_negative_al() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr8(0, 0x80);
        let inst = DecodedInst { length: 1, opcode: 0x98, ..DecodedInst::empty() };
        exec_cbw(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(0), 0xFF80);
    }

    #[test]
    fn lahf_sahf_round_trip_status_bits() {
        let (mut cpu, mut bus) = setup();
        cpu.flags.set_cf(true);
        cpu.flags.set_zf(true);
        let inst = DecodedInst { length: 1, opcode: 0x9F, ..DecodedInst::empty() };
        exec_lahf(&mut cpu, &mut bus, &inst).unwrap();
        cpu.flags.set_cf(false);
        cpu.flags.set_zf(false);
        let inst = DecodedInst { length: 1, opcode: 0x9E, ..DecodedInst::empty() };
        exec_sahf(&mut cpu, &mut bus, &inst).unwrap();
        assert!(cpu.flags.cf());
        assert!(cpu.flags.zf());
    }

    #[test]
    fn bound_faults_when_index_out_of_range() {
        let (mut cpu, mut bus) = setup();
        bus.write_word(0x100, 0x0010); // low
        bus.write_word(0x102, 0x0020); // high
        cpu.regs.write_gpr16(0, 0x0005); // AX = 5, below low
        let ea = crate::instruction::MemOperand {
            base: None,
            index: None,
            displacement: 0x100,
            segment: SegReg::Ds,
            size: OperandSize::Word,
            ea_cycles: 0,
        };
        let inst = DecodedInst { length: 4, opcode: 0x62, modrm: Some(0x06), ea: Some(ea), ..DecodedInst::empty() };
        let err = exec_bound(&mut cpu, &mut bus, &inst).unwrap_err();
        assert_eq!(err, CoreError::BoundRange);
    }

    #[test]
    fn unregistered_in_returns_bus_float() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst { length: 2, opcode: 0xE4, operand_size: OperandSize::Byte, immediate: 0x60, ..DecodedInst::empty() };
        exec_in_imm8(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr8(0), 0xFF);
    }
}
