//! String instruction handlers (§4.6): MOVS/CMPS/STOS/LODS/SCAS, their
//! REP/REPE/REPNE-prefixed repeated forms, and the 80186+ port-I/O
//! string forms INS/OUTS.
//!
//! A REP-prefixed handler here performs exactly one element per call and
//! leaves IP pointing at the instruction's first byte until the
//! repetition is satisfied, instead of looping internally to completion.
//! `ExecCore` (`cpu::exec`) re-dispatches the same instruction on its
//! next cycle, which is what lets `InterruptUnit::check_intr` land
//! between elements (§4.4, §4.7, §9 Testable Property "REP string
//! resumability"). Since the instruction's bytes were already consumed
//! from the prefetch queue by this cycle's decode, a handler that keeps
//! looping calls [`PrefetchQueue::rewind`] to put them back before
//! returning.

use super::ops_common::cmp_flags;
use super::table::HandlerFn;
use super::Cpu;
use crate::error::Result;
use crate::flags::OperandSize;
use crate::instruction::{DecodedInst, RepPrefix};
use crate::memory::MemoryBus;
use crate::model::CpuModel;
use crate::registers::{GprIndex, SegReg};

const SI: u8 = GprIndex::Si as u8;
const DI: u8 = GprIndex::Di as u8;

pub fn install(table: &mut [HandlerFn; 256], model: CpuModel) {
    table[0xA4] = exec_movsb;
    table[0xA5] = exec_movsw;
    table[0xA6] = exec_cmpsb;
    table[0xA7] = exec_cmpsw;
    table[0xAA] = exec_stosb;
    table[0xAB] = exec_stosw;
    table[0xAC] = exec_lodsb;
    table[0xAD] = exec_lodsw;
    table[0xAE] = exec_scasb;
    table[0xAF] = exec_scasw;

    if model.has_80186_extensions() {
        table[0x6C] = exec_insb;
        table[0x6D] = exec_insw;
        table[0x6E] = exec_outsb;
        table[0x6F] = exec_outsw;
    }
}

#[inline]
fn step_delta(df: bool, size: OperandSize) -> i16 {
    let step = match size {
        OperandSize::Byte => 1i16,
        OperandSize::Word => 2i16,
    };
    if df { -step } else { step }
}

fn advance_reg(cpu: &mut Cpu, reg: u8, size: OperandSize) {
    let delta = step_delta(cpu.flags.df(), size);
    let cur = cpu.regs.read_gpr16(reg);
    cpu.regs.write_gpr16(reg, cur.wrapping_add(delta as u16));
}

/// Drive the REP/REPE/REPNE repetition protocol around one element,
/// executed by `step`. `conditional` selects CMPS/SCAS's ZF-dependent
/// termination; everything else loops purely on CX.
fn rep_drive(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    inst: &DecodedInst,
    conditional: bool,
    mut step: impl FnMut(&mut Cpu, &mut dyn MemoryBus) -> Result<()>,
) -> Result<u32> {
    match inst.rep {
        RepPrefix::None => {
            step(cpu, bus)?;
            cpu.advance_ip(inst);
            Ok(cpu.cycle_table.string_rep)
        }
        rep => {
            let cx = cpu.regs.read_gpr16(GprIndex::Cx as u8);
            if cx == 0 {
                // Zero repetitions: skip straight past the instruction.
                cpu.advance_ip(inst);
                return Ok(cpu.cycle_table.alu_reg);
            }
            step(cpu, bus)?;
            let remaining = cx.wrapping_sub(1);
            cpu.regs.write_gpr16(GprIndex::Cx as u8, remaining);

            let done = if conditional {
                let zf = cpu.flags.zf();
                remaining == 0 || (matches!(rep, RepPrefix::Rep) && !zf) || (matches!(rep, RepPrefix::Repne) && zf)
            } else {
                remaining == 0
            };

            if done {
                cpu.advance_ip(inst);
            } else {
                cpu.prefetch.rewind(inst.length as usize, cpu.cs_ip_linear());
            }
            Ok(cpu.cycle_table.string_rep)
        }
    }
}

fn movs_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<()> {
    let seg = inst.prefix.seg_override.unwrap_or(SegReg::Ds);
    let si = cpu.regs.read_gpr16(SI);
    let di = cpu.regs.read_gpr16(DI);
    match size {
        OperandSize::Byte => {
            let v = cpu.read_mem_byte(bus, seg, si)?;
            cpu.write_mem_byte(bus, SegReg::Es, di, v)?;
        }
        OperandSize::Word => {
            let v = cpu.read_mem_word(bus, seg, si)?;
            cpu.write_mem_word(bus, SegReg::Es, di, v)?;
        }
    }
    advance_reg(cpu, SI, size);
    advance_reg(cpu, DI, size);
    Ok(())
}

fn exec_movsb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| movs_step(cpu, bus, inst, OperandSize::Byte))
}

fn exec_movsw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| movs_step(cpu, bus, inst, OperandSize::Word))
}

fn cmps_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<()> {
    let seg = inst.prefix.seg_override.unwrap_or(SegReg::Ds);
    let si = cpu.regs.read_gpr16(SI);
    let di = cpu.regs.read_gpr16(DI);
    let (src, dst) = match size {
        OperandSize::Byte => (cpu.read_mem_byte(bus, seg, si)? as u32, cpu.read_mem_byte(bus, SegReg::Es, di)? as u32),
        OperandSize::Word => (cpu.read_mem_word(bus, seg, si)? as u32, cpu.read_mem_word(bus, SegReg::Es, di)? as u32),
    };
    cmp_flags(&mut cpu.flags, src, dst, size);
    advance_reg(cpu, SI, size);
    advance_reg(cpu, DI, size);
    Ok(())
}

fn exec_cmpsb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, true, |cpu, bus| cmps_step(cpu, bus, inst, OperandSize::Byte))
}

fn exec_cmpsw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, true, |cpu, bus| cmps_step(cpu, bus, inst, OperandSize::Word))
}

fn stos_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, size: OperandSize) -> Result<()> {
    let di = cpu.regs.read_gpr16(DI);
    match size {
        OperandSize::Byte => { let v = cpu.regs.read_gpr8(0); cpu.write_mem_byte(bus, SegReg::Es, di, v)?; }
        OperandSize::Word => { let v = cpu.regs.read_gpr16(0); cpu.write_mem_word(bus, SegReg::Es, di, v)?; }
    }
    advance_reg(cpu, DI, size);
    Ok(())
}

fn exec_stosb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| stos_step(cpu, bus, OperandSize::Byte))
}

fn exec_stosw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| stos_step(cpu, bus, OperandSize::Word))
}

fn lods_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<()> {
    let seg = inst.prefix.seg_override.unwrap_or(SegReg::Ds);
    let si = cpu.regs.read_gpr16(SI);
    match size {
        OperandSize::Byte => { let v = cpu.read_mem_byte(bus, seg, si)?; cpu.regs.write_gpr8(0, v); }
        OperandSize::Word => { let v = cpu.read_mem_word(bus, seg, si)?; cpu.regs.write_gpr16(0, v); }
    }
    advance_reg(cpu, SI, size);
    Ok(())
}

fn exec_lodsb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| lods_step(cpu, bus, inst, OperandSize::Byte))
}

fn exec_lodsw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| lods_step(cpu, bus, inst, OperandSize::Word))
}

fn scas_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, size: OperandSize) -> Result<()> {
    let di = cpu.regs.read_gpr16(DI);
    let (acc, mem) = match size {
        OperandSize::Byte => (cpu.regs.read_gpr8(0) as u32, cpu.read_mem_byte(bus, SegReg::Es, di)? as u32),
        OperandSize::Word => (cpu.regs.read_gpr16(0) as u32, cpu.read_mem_word(bus, SegReg::Es, di)? as u32),
    };
    cmp_flags(&mut cpu.flags, acc, mem, size);
    advance_reg(cpu, DI, size);
    Ok(())
}

fn exec_scasb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, true, |cpu, bus| scas_step(cpu, bus, OperandSize::Byte))
}

fn exec_scasw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, true, |cpu, bus| scas_step(cpu, bus, OperandSize::Word))
}

/// INS (80186+): read a port into `ES:[DI]`. The port is fixed at DX;
/// there is no immediate-port encoding for the string form.
fn ins_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, size: OperandSize) -> Result<()> {
    let port = cpu.regs.read_gpr16(2);
    let di = cpu.regs.read_gpr16(DI);
    let val = cpu.io.port_in(port, io_size(size))?;
    match size {
        OperandSize::Byte => cpu.write_mem_byte(bus, SegReg::Es, di, val as u8)?,
        OperandSize::Word => cpu.write_mem_word(bus, SegReg::Es, di, val as u16)?,
    }
    advance_reg(cpu, DI, size);
    Ok(())
}

fn exec_insb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| ins_step(cpu, bus, OperandSize::Byte))
}

fn exec_insw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| ins_step(cpu, bus, OperandSize::Word))
}

/// OUTS (80186+): write `DS:[SI]` (segment-overridable) to the port in DX.
fn outs_step(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<()> {
    let seg = inst.prefix.seg_override.unwrap_or(SegReg::Ds);
    let port = cpu.regs.read_gpr16(2);
    let si = cpu.regs.read_gpr16(SI);
    let val = match size {
        OperandSize::Byte => cpu.read_mem_byte(bus, seg, si)? as u32,
        OperandSize::Word => cpu.read_mem_word(bus, seg, si)? as u32,
    };
    cpu.io.port_out(port, io_size(size), val)?;
    advance_reg(cpu, SI, size);
    Ok(())
}

fn exec_outsb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| outs_step(cpu, bus, inst, OperandSize::Byte))
}

fn exec_outsw(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    rep_drive(cpu, bus, inst, false, |cpu, bus| outs_step(cpu, bus, inst, OperandSize::Word))
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
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
        cpu.regs.ip = 0x0100;
        (cpu, bus)
    }

    #[test]
    fn movsb_without_rep_moves_one_byte_and_advances_both_pointers() {
        let (mut cpu, mut bus) = setup();
        bus.write_byte(0x0010, 0xAB);
        cpu.regs.write_gpr16(SI, 0x0010);
        cpu.regs.write_gpr16(DI, 0x0020);
        let inst = DecodedInst { length: 1, opcode: 0xA4, operand_size: OperandSize::Byte, ..DecodedInst::empty() };
        exec_movsb(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(bus.read_byte(0x0020), 0xAB);
        assert_eq!(cpu.regs.read_gpr16(SI), 0x0011);
        assert_eq!(cpu.regs.read_gpr16(DI), 0x0021);
        assert_eq!(cpu.regs.ip, 0x0101);
    }

    #[test]
    fn rep_movsb_holds_ip_until_cx_exhausted() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr16(GprIndex::Cx as u8, 2);
        cpu.regs.write_gpr16(SI, 0x0010);
        cpu.regs.write_gpr16(DI, 0x0020);
        let inst = DecodedInst { length: 2, opcode: 0xA4, operand_size: OperandSize::Byte, rep: RepPrefix::Rep, ..DecodedInst::empty() };

        exec_movsb(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Cx as u8), 1);
        assert_eq!(cpu.regs.ip, 0x0100); // not yet advanced

        exec_movsb(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Cx as u8), 0);
        assert_eq!(cpu.regs.ip, 0x0102); // now past the instruction
    }

    #[test]
    fn rep_movsb_with_cx_zero_does_nothing_and_advances_ip() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.write_gpr16(GprIndex::Cx as u8, 0);
        let inst = DecodedInst { length: 2, opcode: 0xA4, operand_size: OperandSize::Byte, rep: RepPrefix::Rep, ..DecodedInst::empty() };
        exec_movsb(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.ip, 0x0102);
    }

    #[test]
    fn repe_cmpsb_stops_early_on_mismatch() {
        let (mut cpu, mut bus) = setup();
        bus.write_byte(0x0010, 0x11);
        bus.write_byte(0x0011, 0x22);
        bus.write_byte(0x0020, 0x11);
        bus.write_byte(0x0021, 0x99); // mismatch on the second byte
        cpu.regs.write_gpr16(GprIndex::Cx as u8, 4);
        cpu.regs.write_gpr16(SI, 0x0010);
        cpu.regs.write_gpr16(DI, 0x0020);
        let inst = DecodedInst { length: 2, opcode: 0xA6, operand_size: OperandSize::Byte, rep: RepPrefix::Rep, ..DecodedInst::empty() };

        exec_cmpsb(&mut cpu, &mut bus, &inst).unwrap(); // matches, continues
        assert_eq!(cpu.regs.ip, 0x0100);
        exec_cmpsb(&mut cpu, &mut bus, &inst).unwrap(); // mismatches, stops
        assert_eq!(cpu.regs.ip, 0x0102);
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Cx as u8), 2);
    }

    #[test]
    fn direction_flag_reverses_pointer_advance() {
        let (mut cpu, mut bus) = setup();
        cpu.flags.set_df(true);
        cpu.regs.write_gpr16(SI, 0x0010);
        cpu.regs.write_gpr16(DI, 0x0020);
        let inst = DecodedInst { length: 1, opcode: 0xA4, operand_size: OperandSize::Byte, ..DecodedInst::empty() };
        exec_movsb(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(SI), 0x000F);
        assert_eq!(cpu.regs.read_gpr16(DI), 0x001F);
    }
}
