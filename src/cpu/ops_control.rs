//! Control-flow instruction handlers (§4.6): Jcc, JMP/CALL/RET (near and
//! far), LOOP/LOOPE/LOOPNE/JCXZ, INT/INT3/INTO/IRET, HLT, the single-bit
//! flag-control opcodes, and the group 0xFF dispatcher (which spans
//! this module's CALL/JMP-indirect cases and delegates its INC/DEC and
//! PUSH sub-cases to `ops_arith`/`ops_stack`).

use super::ops_arith::inc_dec_rm;
use super::ops_stack::push_rm;
use super::table::HandlerFn;
use super::Cpu;
use crate::error::{CoreError, Result};
use crate::flags::{eval_condition, OperandSize};
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::model::CpuModel;
use crate::registers::{GprIndex, SegReg};
use crate::segment::LoadTarget;

pub fn install(table: &mut [HandlerFn; 256], _model: CpuModel) {
    for op in 0x70..=0x7Fu8 {
        table[op as usize] = exec_jcc;
    }
    table[0xEB] = exec_jmp_short;
    table[0xE9] = exec_jmp_near;
    table[0xE8] = exec_call_near;
    table[0x9A] = exec_call_far;
    table[0xEA] = exec_jmp_far;
    table[0xC3] = exec_ret_near;
    table[0xC2] = exec_ret_near_imm;
    table[0xCB] = exec_ret_far;
    table[0xCA] = exec_ret_far_imm;

    table[0xE0] = exec_loopne;
    table[0xE1] = exec_loope;
    table[0xE2] = exec_loop;
    table[0xE3] = exec_jcxz;

    table[0xCD] = exec_int_imm8;
    table[0xCC] = exec_int3;
    table[0xCE] = exec_into;
    table[0xCF] = exec_iret;

    table[0xF4] = exec_hlt;
    table[0xF8] = exec_clc;
    table[0xF9] = exec_stc;
    table[0xF5] = exec_cmc;
    table[0xFA] = exec_cli;
    table[0xFB] = exec_sti;
    table[0xFC] = exec_cld;
    table[0xFD] = exec_std;

    table[0xFF] = exec_group_ff;
}

fn branch_target(cpu: &Cpu, inst: &DecodedInst) -> u16 {
    cpu.regs.ip.wrapping_add(inst.length as u16).wrapping_add(inst.displacement as u16)
}

fn exec_jcc(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cc = inst.opcode & 0x0F;
    if eval_condition(cc, &cpu.flags) {
        cpu.regs.ip = branch_target(cpu, inst);
        cpu.flush_prefetch();
        Ok(cpu.cycle_table.jcc_taken)
    } else {
        cpu.advance_ip(inst);
        Ok(cpu.cycle_table.jcc_not_taken)
    }
}

fn exec_jmp_short(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.regs.ip = branch_target(cpu, inst);
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.jmp_near)
}

fn exec_jmp_near(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_jmp_short(cpu, bus, inst)
}

fn exec_call_near(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let return_ip = cpu.regs.ip.wrapping_add(inst.length as u16);
    cpu.push_word(bus, return_ip)?;
    cpu.regs.ip = branch_target(cpu, inst);
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.call_near)
}

fn exec_call_far(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let return_cs = cpu.regs.segment(SegReg::Cs).selector;
    let return_ip = cpu.regs.ip.wrapping_add(inst.length as u16);
    cpu.push_word(bus, return_cs)?;
    cpu.push_word(bus, return_ip)?;
    let offset = inst.immediate as u16;
    let selector = inst.immediate2 as u16;
    cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, selector)?;
    cpu.regs.ip = offset;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.call_near)
}

fn exec_jmp_far(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let offset = inst.immediate as u16;
    let selector = inst.immediate2 as u16;
    cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, selector)?;
    cpu.regs.ip = offset;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.jmp_near)
}

fn exec_ret_near(cpu: &mut Cpu, bus: &mut dyn MemoryBus, _inst: &DecodedInst) -> Result<u32> {
    let ip = cpu.pop_word(bus)?;
    cpu.regs.ip = ip;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.ret_near)
}

fn exec_ret_near_imm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ip = cpu.pop_word(bus)?;
    cpu.regs.ip = ip;
    let sp = cpu.regs.sp().wrapping_add(inst.immediate as u16);
    cpu.regs.set_sp(sp);
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.ret_near)
}

fn exec_ret_far(cpu: &mut Cpu, bus: &mut dyn MemoryBus, _inst: &DecodedInst) -> Result<u32> {
    let ip = cpu.pop_word(bus)?;
    let cs_selector = cpu.pop_word(bus)?;
    cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, cs_selector)?;
    cpu.regs.ip = ip;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.ret_near)
}

fn exec_ret_far_imm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let ip = cpu.pop_word(bus)?;
    let cs_selector = cpu.pop_word(bus)?;
    cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, cs_selector)?;
    cpu.regs.ip = ip;
    let sp = cpu.regs.sp().wrapping_add(inst.immediate as u16);
    cpu.regs.set_sp(sp);
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.ret_near)
}

fn exec_loop(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cx = cpu.regs.read_gpr16(GprIndex::Cx as u8).wrapping_sub(1);
    cpu.regs.write_gpr16(GprIndex::Cx as u8, cx);
    if cx != 0 {
        cpu.regs.ip = branch_target(cpu, inst);
        cpu.flush_prefetch();
        Ok(cpu.cycle_table.jcc_taken)
    } else {
        cpu.advance_ip(inst);
        Ok(cpu.cycle_table.jcc_not_taken)
    }
}

fn exec_loope(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cx = cpu.regs.read_gpr16(GprIndex::Cx as u8).wrapping_sub(1);
    cpu.regs.write_gpr16(GprIndex::Cx as u8, cx);
    if cx != 0 && cpu.flags.zf() {
        cpu.regs.ip = branch_target(cpu, inst);
        cpu.flush_prefetch();
        Ok(cpu.cycle_table.jcc_taken)
    } else {
        cpu.advance_ip(inst);
        Ok(cpu.cycle_table.jcc_not_taken)
    }
}

fn exec_loopne(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cx = cpu.regs.read_gpr16(GprIndex::Cx as u8).wrapping_sub(1);
    cpu.regs.write_gpr16(GprIndex::Cx as u8, cx);
    if cx != 0 && !cpu.flags.zf() {
        cpu.regs.ip = branch_target(cpu, inst);
        cpu.flush_prefetch();
        Ok(cpu.cycle_table.jcc_taken)
    } else {
        cpu.advance_ip(inst);
        Ok(cpu.cycle_table.jcc_not_taken)
    }
}

fn exec_jcxz(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    if cpu.regs.read_gpr16(GprIndex::Cx as u8) == 0 {
        cpu.regs.ip = branch_target(cpu, inst);
        cpu.flush_prefetch();
        Ok(cpu.cycle_table.jcc_taken)
    } else {
        cpu.advance_ip(inst);
        Ok(cpu.cycle_table.jcc_not_taken)
    }
}

fn exec_int_imm8(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.advance_ip(inst);
    let vector = inst.immediate as u8;
    cpu.interrupts.raise_int(&mut cpu.regs, &mut cpu.flags, bus, vector, None)?;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.software_interrupt)
}

fn exec_int3(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.advance_ip(inst);
    cpu.interrupts.raise_int(&mut cpu.regs, &mut cpu.flags, bus, 3, None)?;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.software_interrupt)
}

fn exec_into(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.advance_ip(inst);
    if cpu.flags.of() {
        cpu.interrupts.raise_int(&mut cpu.regs, &mut cpu.flags, bus, 4, None)?;
        cpu.flush_prefetch();
        Ok(cpu.cycle_table.software_interrupt)
    } else {
        Ok(cpu.cycle_table.jcc_not_taken)
    }
}

fn exec_iret(cpu: &mut Cpu, bus: &mut dyn MemoryBus, _inst: &DecodedInst) -> Result<u32> {
    cpu.interrupts.iret(&mut cpu.regs, &mut cpu.flags, bus)?;
    cpu.flush_prefetch();
    Ok(cpu.cycle_table.iret)
}

/// HLT: the CPU idles until an unmasked interrupt, NMI, or reset. The
/// step loop (`exec.rs`) checks `cpu.halted` before dispatching the next
/// instruction rather than this handler blocking.
fn exec_hlt(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.halted = true;
    cpu.interrupts.halt();
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.hlt)
}

fn exec_clc(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.flags.set_cf(false);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_stc(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.flags.set_cf(true);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_cmc(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cf = cpu.flags.cf();
    cpu.flags.set_cf(!cf);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_cli(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.flags.set_intf(false);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// STI arms the one-instruction NOINTR window (§4.3/§4.8): an interrupt
/// cannot land until the instruction *after* STI has executed.
fn exec_sti(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.flags.set_intf(true);
    cpu.interrupts.set_nointr(true);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_cld(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.flags.set_df(false);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

fn exec_std(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.flags.set_df(true);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// Group 0xFF: INC/DEC rm16 (delegated to `ops_arith`), CALL/JMP
/// near-indirect and far-indirect through r/m, PUSH rm (delegated to
/// `ops_stack`).
fn exec_group_ff(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cycles = match inst.modrm_reg() {
        0 => inc_dec_rm(cpu, bus, inst, OperandSize::Word, false)?,
        1 => inc_dec_rm(cpu, bus, inst, OperandSize::Word, true)?,
        2 => {
            let target = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            let return_ip = cpu.regs.ip.wrapping_add(inst.length as u16);
            cpu.push_word(bus, return_ip)?;
            cpu.regs.ip = target;
            cpu.flush_prefetch();
            return Ok(cpu.cycle_table.call_near);
        }
        3 => {
            let (selector, offset) = read_far_pointer(cpu, bus, inst)?;
            let return_cs = cpu.regs.segment(SegReg::Cs).selector;
            let return_ip = cpu.regs.ip.wrapping_add(inst.length as u16);
            cpu.push_word(bus, return_cs)?;
            cpu.push_word(bus, return_ip)?;
            cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, selector)?;
            cpu.regs.ip = offset;
            cpu.flush_prefetch();
            return Ok(cpu.cycle_table.call_near);
        }
        4 => {
            let target = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            cpu.regs.ip = target;
            cpu.flush_prefetch();
            return Ok(cpu.cycle_table.jmp_near);
        }
        5 => {
            let (selector, offset) = read_far_pointer(cpu, bus, inst)?;
            cpu.load_segment(bus, SegReg::Cs, LoadTarget::Cs, selector)?;
            cpu.regs.ip = offset;
            cpu.flush_prefetch();
            return Ok(cpu.cycle_table.jmp_near);
        }
        6 => push_rm(cpu, bus, inst)?,
        _ => return Err(CoreError::UndefinedOpcode(inst.opcode)),
    };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// Read a far pointer (offset, then selector) from a memory r/m operand.
/// Reg-form r/m is not a legal encoding for the far CALL/JMP sub-cases.
fn read_far_pointer(cpu: &Cpu, bus: &dyn MemoryBus, inst: &DecodedInst) -> Result<(u16, u16)> {
    let ea = inst.ea.ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let off = cpu.effective_offset(&ea);
    let offset = cpu.read_mem_word(bus, ea.segment, off)?;
    let selector = cpu.read_mem_word(bus, ea.segment, off.wrapping_add(2))?;
    Ok((selector, offset))
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
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
        cpu.regs.set_sp(0x1000);
        cpu.regs.ip = 0x0100;
        (cpu, bus)
    }

    #[test]
    fn jz_taken_when_zf_set() {
        let (mut cpu, mut bus) = setup();
        cpu.flags.set_zf(true);
        let inst = DecodedInst { length: 2, opcode: 0x74, displacement: 0x10, ..DecodedInst::empty() };
        exec_jcc(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.ip, 0x0100 + 2 + 0x10);
    }

    #[test]
    fn call_near_pushes_return_address_and_jumps() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst { length: 3, opcode: 0xE8, displacement: 0x0050, ..DecodedInst::empty() };
        exec_call_near(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.ip, 0x0100 + 3 + 0x0050);
        let ret = cpu.pop_word(&bus).unwrap();
        assert_eq!(ret, 0x0103);
    }

    #[test]
    fn loop_decrements_cx_and_branches_until_zero() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr16(GprIndex::Cx as u8, 1);
        let inst = DecodedInst { length: 2, opcode: 0xE2, displacement: -5, ..DecodedInst::empty() };
        exec_loop(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Cx as u8), 0);
        assert_eq!(cpu.regs.ip, 0x0100 + 2); // not taken, CX hit zero
    }

    #[test]
    fn hlt_sets_halted_and_arms_the_interrupt_unit() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst { length: 1, opcode: 0xF4, ..DecodedInst::empty() };
        exec_hlt(&mut cpu, &mut bus, &inst).unwrap();
        assert!(cpu.halted);
    }
}
