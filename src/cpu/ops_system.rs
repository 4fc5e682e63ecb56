//! 80286 protected-mode control instructions (§4.6): the Secondary
//! (`0x0F xx`) map — SLDT/STR/LLDT/LTR/VERR/VERW, SGDT/SIDT/LGDT/LIDT/
//! SMSW/LMSW, LAR/LSL, CLTS — plus ARPL, which despite being grouped
//! with the rest in prose is a Primary-map opcode (0x63).
//!
//! Adapted from the teacher's `executor`'s descriptor-table handling,
//! generalized from a single flat GDT/paging structure down to the
//! 80286's GDTR/IDTR/LDTR/TR register quartet and its 8-byte descriptor
//! format (`SegmentDescriptor::from_raw_286`).

use super::table::HandlerFn;
use super::Cpu;
use crate::error::{CoreError, Result};
use crate::flags::OperandSize;
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::model::CpuModel;
use crate::registers::{SegmentDescriptor, TableRegister, MSW_PE};
use crate::segment::LoadTarget;
use crate::segment::SegmentUnit;

pub fn install_secondary(table: &mut [HandlerFn; 256], _model: CpuModel) {
    table[0x00] = exec_group_00;
    table[0x01] = exec_group_01;
    table[0x02] = exec_lar;
    table[0x03] = exec_lsl;
    table[0x06] = exec_clts;
}

/// ARPL (§4.6) lives in the Primary map at 0x63; installed separately
/// by `table.rs` since it doesn't belong to the Secondary-map build.
pub fn install_arpl(table: &mut [HandlerFn; 256]) {
    table[0x63] = exec_arpl;
}

/// No dedicated `CycleTable` entry exists for these control
/// instructions; approximated as a register-to-register ALU op (§4.5's
/// cost model has no class for descriptor-table access, and these are
/// rare enough on real hardware that a flat approximation has no
/// observable effect on the testable properties in §9).
fn approx_cost(cpu: &Cpu, inst: &DecodedInst) -> u32 {
    if inst.ea.is_some() {
        cpu.cycle_table.alu_reg + cpu.rm_ea_cycles(inst)
    } else {
        cpu.cycle_table.alu_reg
    }
}

/// Fetch a descriptor by raw table lookup without the present/type
/// rejection `SegmentUnit::load_protected` performs, since VERR/VERW/LAR/
/// LSL report their outcome through ZF instead of faulting.
fn fetch_descriptor_raw(cpu: &Cpu, bus: &dyn MemoryBus, selector: u16) -> Option<SegmentDescriptor> {
    if selector & 0xFFFC == 0 {
        return None;
    }
    let table = if selector & 0x0004 != 0 {
        TableRegister { base: cpu.regs.ldtr.base, limit: cpu.regs.ldtr.limit as u16 }
    } else {
        cpu.regs.gdtr
    };
    let index_offset = (selector & 0xFFF8) as u32;
    if index_offset + 7 > table.limit as u32 {
        return None;
    }
    let addr = table.base.wrapping_add(index_offset);
    let lo = bus.read_word(addr) as u64;
    let mid = bus.read_word(addr.wrapping_add(2)) as u64;
    let hi = bus.read_word(addr.wrapping_add(4)) as u64;
    let top = bus.read_word(addr.wrapping_add(6)) as u64;
    let raw = lo | (mid << 16) | (hi << 32) | (top << 48);
    Some(SegmentDescriptor::from_raw_286(selector, raw))
}

fn is_system_descriptor(desc: &SegmentDescriptor) -> bool {
    desc.access & 0x10 == 0
}

/// Group 0x00: SLDT(0)/STR(1)/LLDT(2)/LTR(3)/VERR(4)/VERW(5) by ModR/M
/// `reg` field.
fn exec_group_00(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cost = approx_cost(cpu, inst);
    match inst.modrm_reg() {
        0 => {
            let sel = cpu.regs.ldtr.selector;
            cpu.write_rm(bus, inst, OperandSize::Word, sel as u32)?;
        }
        1 => {
            let sel = cpu.regs.tr.selector;
            cpu.write_rm(bus, inst, OperandSize::Word, sel as u32)?;
        }
        2 => {
            let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            cpu.regs.ldtr = SegmentUnit::load_protected(&cpu.regs, bus, LoadTarget::Ldtr, selector)?;
        }
        3 => {
            let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            cpu.regs.tr = SegmentUnit::load_protected(&cpu.regs, bus, LoadTarget::Tr, selector)?;
        }
        4 => {
            let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            let ok = match fetch_descriptor_raw(cpu, bus, selector) {
                Some(desc) if desc.present && !is_system_descriptor(&desc) => {
                    if desc.is_code { desc.readable } else { true }
                }
                _ => false,
            };
            cpu.flags.set_zf(ok);
        }
        5 => {
            let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            let ok = match fetch_descriptor_raw(cpu, bus, selector) {
                Some(desc) if desc.present && !is_system_descriptor(&desc) => {
                    !desc.is_code && desc.writable
                }
                _ => false,
            };
            cpu.flags.set_zf(ok);
        }
        _ => return Err(CoreError::UndefinedOpcode(inst.opcode)),
    }
    cpu.advance_ip(inst);
    Ok(cost)
}

/// Group 0x01: SGDT(0)/SIDT(1)/LGDT(2)/LIDT(3)/SMSW(4)/LMSW(6) by
/// ModR/M `reg` field. SGDT/SIDT/LGDT/LIDT require a memory operand
/// (the mod==3 register form is not a legal encoding on real hardware).
fn exec_group_01(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cost = approx_cost(cpu, inst);
    match inst.modrm_reg() {
        0 => store_table_register(cpu, bus, inst, cpu.regs.gdtr)?,
        1 => store_table_register(cpu, bus, inst, cpu.regs.idtr)?,
        2 => cpu.regs.gdtr = load_table_register(cpu, bus, inst)?,
        3 => cpu.regs.idtr = load_table_register(cpu, bus, inst)?,
        4 => {
            let msw = cpu.regs.msw as u32;
            cpu.write_rm(bus, inst, OperandSize::Word, msw)?;
        }
        6 => {
            let val = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
            let mut new_msw = (cpu.regs.msw & !0x000F) | (val & 0x000F);
            if cpu.regs.msw & MSW_PE != 0 {
                // PE is sticky: LMSW cannot take the CPU back out of
                // protected mode once set (§4.6).
                new_msw |= MSW_PE;
            }
            cpu.regs.msw = new_msw;
        }
        _ => return Err(CoreError::UndefinedOpcode(inst.opcode)),
    }
    cpu.advance_ip(inst);
    Ok(cost)
}

fn store_table_register(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    inst: &DecodedInst,
    reg: TableRegister,
) -> Result<()> {
    let ea = inst.ea.ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let off = cpu.effective_offset(&ea);
    cpu.write_mem_word(bus, ea.segment, off, reg.limit)?;
    cpu.write_mem_word(bus, ea.segment, off.wrapping_add(2), (reg.base & 0xFFFF) as u16)?;
    cpu.write_mem_word(bus, ea.segment, off.wrapping_add(4), ((reg.base >> 16) & 0xFF) as u16)?;
    Ok(())
}

fn load_table_register(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    inst: &DecodedInst,
) -> Result<TableRegister> {
    let ea = inst.ea.ok_or(CoreError::UndefinedOpcode(inst.opcode))?;
    let off = cpu.effective_offset(&ea);
    let limit = cpu.read_mem_word(bus, ea.segment, off)?;
    let base_lo = cpu.read_mem_word(bus, ea.segment, off.wrapping_add(2))?;
    let base_hi = cpu.read_mem_word(bus, ea.segment, off.wrapping_add(4))? & 0xFF;
    let base = (base_lo as u32) | ((base_hi as u32) << 16);
    Ok(TableRegister { base, limit })
}

/// LAR: load the descriptor's access-rights byte (high byte of the
/// 16-bit result; the low byte carries reserved/type bits this core
/// doesn't model further) into the ModR/M `reg` GPR, setting ZF on a
/// valid, non-system descriptor and leaving the destination untouched
/// otherwise.
fn exec_lar(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
    match fetch_descriptor_raw(cpu, bus, selector) {
        Some(desc) if !is_system_descriptor(&desc) || desc.descriptor_type() == 0x02 => {
            cpu.regs.write_gpr16(inst.modrm_reg(), (desc.access as u16) << 8);
            cpu.flags.set_zf(true);
        }
        _ => cpu.flags.set_zf(false),
    }
    cpu.advance_ip(inst);
    Ok(approx_cost(cpu, inst))
}

/// LSL: load the descriptor's limit into the ModR/M `reg` GPR, same ZF
/// convention as LAR.
fn exec_lsl(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let selector = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
    match fetch_descriptor_raw(cpu, bus, selector) {
        Some(desc) if !is_system_descriptor(&desc) || desc.descriptor_type() == 0x02 => {
            cpu.regs.write_gpr16(inst.modrm_reg(), desc.limit as u16);
            cpu.flags.set_zf(true);
        }
        _ => cpu.flags.set_zf(false),
    }
    cpu.advance_ip(inst);
    Ok(approx_cost(cpu, inst))
}

/// CLTS: clear the Task-Switched bit. No ModR/M.
fn exec_clts(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    cpu.regs.msw &= !crate::registers::MSW_TS;
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// ARPL r/m16,r16 (80286 only, Primary map 0x63): if the r/m operand's
/// RPL is numerically below the source register's RPL, raise it to
/// match and set ZF; otherwise clear ZF and leave the destination
/// unchanged (§4.6).
fn exec_arpl(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let src_rpl = cpu.regs.read_gpr16(inst.modrm_reg()) & 0x03;
    let dest = cpu.read_rm(bus, inst, OperandSize::Word)? as u16;
    let dest_rpl = dest & 0x03;
    if dest_rpl < src_rpl {
        let raised = (dest & !0x03) | src_rpl;
        cpu.write_rm(bus, inst, OperandSize::Word, raised as u32)?;
        cpu.flags.set_zf(true);
    } else {
        cpu.flags.set_zf(false);
    }
    cpu.advance_ip(inst);
    Ok(approx_cost(cpu, inst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuConfig;
    use crate::memory::BlockBus;
    use crate::registers::{GprIndex, MSW_PE};

    fn setup() -> (Cpu, BlockBus) {
        let mut bus = BlockBus::new(24);
        bus.install_ram(0, 0x2000).unwrap();
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel80286, cycles_per_second: None, prefetch_enabled: false });
        cpu.regs.msw |= MSW_PE;
        (cpu, bus)
    }

    fn write_descriptor(bus: &mut BlockBus, addr: u32, base: u32, limit: u16, access: u8) {
        let raw: u64 = (limit as u64)
            | (((base & 0xFFFF) as u64) << 16)
            | ((((base >> 16) & 0xFF) as u64) << 32)
            | ((access as u64) << 40);
        bus.write_word(addr, (raw & 0xFFFF) as u16);
        bus.write_word(addr + 2, ((raw >> 16) & 0xFFFF) as u16);
        bus.write_word(addr + 4, ((raw >> 32) & 0xFFFF) as u16);
        bus.write_word(addr + 6, ((raw >> 48) & 0xFFFF) as u16);
    }

    #[test]
    fn lgdt_then_sgdt_round_trips_through_memory() {
        let (mut cpu, mut bus) = setup();
        bus.write_word(0x0100, 0x0017); // limit
        bus.write_word(0x0102, 0x1230); // base low 16
        bus.write_word(0x0104, 0x0004); // base high byte (+ undefined byte)
        let inst = DecodedInst {
            length: 3,
            opcode: 0x01,
            modrm: Some(0x16), // mod=00 reg=010 (LGDT) rm=110 (direct addr)
            ea: Some(crate::instruction::MemOperand {
                base: None,
                index: None,
                displacement: 0x0100,
                segment: crate::registers::SegReg::Ds,
                size: OperandSize::Word,
                ea_cycles: 0,
            }),
            ..DecodedInst::empty()
        };
        exec_group_01(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.gdtr.limit, 0x0017);
        assert_eq!(cpu.regs.gdtr.base, 0x0041230);

        let store_inst = DecodedInst {
            length: 3,
            opcode: 0x01,
            modrm: Some(0x06),
            ea: Some(crate::instruction::MemOperand {
                base: None,
                index: None,
                displacement: 0x0200,
                segment: crate::registers::SegReg::Ds,
                size: OperandSize::Word,
                ea_cycles: 0,
            }),
            ..DecodedInst::empty()
        };
        exec_group_01(&mut cpu, &mut bus, &store_inst).unwrap();
        assert_eq!(bus.read_word(0x0200), 0x0017);
        assert_eq!(bus.read_word(0x0202), 0x1230);
        assert_eq!(bus.read_word(0x0204), 0x0004);
    }

    #[test]
    fn lmsw_cannot_clear_pe_once_set() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst {
            length: 3,
            opcode: 0x01,
            modrm: Some(0x30), // mod=00 reg=110 (LMSW) rm=000 (BX+SI)
            ea: Some(crate::instruction::MemOperand {
                base: Some(3),
                index: Some(6),
                displacement: 0,
                segment: crate::registers::SegReg::Ds,
                size: OperandSize::Word,
                ea_cycles: 0,
            }),
            ..DecodedInst::empty()
        };
        bus.write_word(0, 0x0000); // attempt to clear everything, incl. PE
        exec_group_01(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.msw & MSW_PE, MSW_PE);
    }

    #[test]
    fn verr_sets_zf_for_readable_present_data_segment() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.gdtr = crate::registers::TableRegister { base: 0x1000, limit: 0xFF };
        // selector 0x08: index 1 in GDT, RPL 0. access=0x92: present, data, writable (readable implied true).
        write_descriptor(&mut bus, 0x1008, 0, 0xFFFF, 0x92);
        let inst = DecodedInst {
            length: 3,
            opcode: 0x00,
            modrm: Some(0xE0), // mod=11 reg=100 (VERR) rm=000 (AX)
            ..DecodedInst::empty()
        };
        cpu.regs.write_gpr16(GprIndex::Ax as u8, 0x0008);
        exec_group_00(&mut cpu, &mut bus, &inst).unwrap();
        assert!(cpu.flags.zf());
    }

    #[test]
    fn verr_clears_zf_for_null_selector() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst {
            length: 3,
            opcode: 0x00,
            modrm: Some(0xE0),
            ..DecodedInst::empty()
        };
        cpu.regs.write_gpr16(GprIndex::Ax as u8, 0x0000);
        exec_group_00(&mut cpu, &mut bus, &inst).unwrap();
        assert!(!cpu.flags.zf());
    }

    #[test]
    fn arpl_raises_low_rpl_and_sets_zf() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst {
            length: 2,
            opcode: 0x63,
            modrm: Some(0xD8), // mod=11 reg=011 (src=BX) rm=000 (dest=AX)
            ..DecodedInst::empty()
        };
        cpu.regs.write_gpr16(GprIndex::Bx as u8, 0x0003); // src RPL=3
        cpu.regs.write_gpr16(GprIndex::Ax as u8, 0x0040); // dest RPL=0
        exec_arpl(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Ax as u8), 0x0043);
        assert!(cpu.flags.zf());
    }

    #[test]
    fn arpl_leaves_higher_rpl_unchanged() {
        let (mut cpu, mut bus) = setup();
        let inst = DecodedInst {
            length: 2,
            opcode: 0x63,
            modrm: Some(0xD8),
            ..DecodedInst::empty()
        };
        cpu.regs.write_gpr16(GprIndex::Bx as u8, 0x0001); // src RPL=1
        cpu.regs.write_gpr16(GprIndex::Ax as u8, 0x0002); // dest RPL=2
        exec_arpl(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Ax as u8), 0x0002);
        assert!(!cpu.flags.zf());
    }
}
