//! Logical instruction handlers (§4.6): OR, AND, XOR, NOT, TEST, and the
//! shift/rotate groups (ROL/ROR/RCL/RCR/SHL/SHR/SAR).
//!
//! `apply_*` helpers are `pub(crate)` so `ops_arith` can delegate to them
//! from the shared group 0x80-0x83 and 0xF6/0xF7 dispatchers, which span
//! both modules.

use super::ops_common::{and_with_flags, cmp_flags, not_value, or_with_flags, xor_with_flags};
use super::table::HandlerFn;
use super::Cpu;
use crate::error::Result;
use crate::flags::{Flags, OperandSize};
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::model::CpuModel;

pub fn install(table: &mut [HandlerFn; 256], model: CpuModel) {
    for base in [0x08u8, 0x20, 0x30] {
        for form in 0..6u8 {
            table[(base + form) as usize] = alu_group_handler(base);
        }
    }
    table[0x84] = exec_test_rm;
    table[0x85] = exec_test_rm;
    table[0xA8] = exec_test_acc;
    table[0xA9] = exec_test_acc;

    table[0xD0] = exec_shift_group;
    table[0xD1] = exec_shift_group;
    table[0xD2] = exec_shift_group;
    table[0xD3] = exec_shift_group;
    if model.has_80186_extensions() {
        table[0xC0] = exec_shift_group;
        table[0xC1] = exec_shift_group;
    }
}

fn alu_group_handler(base: u8) -> HandlerFn {
    match base {
        0x08 => exec_or,
        0x20 => exec_and,
        0x30 => exec_xor,
        _ => unreachable!(),
    }
}

fn exec_alu_group(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    inst: &DecodedInst,
    op: impl Fn(&mut Flags, u32, u32, OperandSize) -> u32,
) -> Result<u32> {
    let size = inst.operand_size;
    let form = inst.opcode & 0x07;
    let mem_cycles = |cpu: &Cpu| cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst);

    let cycles = match form {
        0 | 1 => {
            let rm = cpu.read_rm(bus, inst, size)?;
            let reg_val = cpu.regs.read_gpr(inst.modrm_reg(), size) as u32;
            let result = op(&mut cpu.flags, rm, reg_val, size);
            cpu.write_rm(bus, inst, size, result)?;
            if inst.ea.is_some() { mem_cycles(cpu) } else { cpu.cycle_table.alu_reg }
        }
        2 | 3 => {
            let reg = inst.modrm_reg();
            let reg_val = cpu.regs.read_gpr(reg, size) as u32;
            let rm = cpu.read_rm(bus, inst, size)?;
            let result = op(&mut cpu.flags, reg_val, rm, size);
            cpu.regs.write_gpr(reg, size, result as u16);
            if inst.ea.is_some() { mem_cycles(cpu) } else { cpu.cycle_table.alu_reg }
        }
        4 | 5 => {
            let acc = cpu.regs.read_gpr(0, size) as u32;
            let result = op(&mut cpu.flags, acc, inst.immediate, size);
            cpu.regs.write_gpr(0, size, result as u16);
            cpu.cycle_table.alu_reg
        }
        _ => unreachable!(),
    };

    cpu.advance_ip(inst);
    Ok(cycles)
}

fn exec_or(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| or_with_flags(f, a, b, s))
}

fn exec_and(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| and_with_flags(f, a, b, s))
}

fn exec_xor(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| xor_with_flags(f, a, b, s))
}

/// Shared with `ops_arith`'s group 0x80-0x83 dispatcher.
pub(crate) fn apply_or(flags: &mut Flags, a: u32, b: u32, size: OperandSize) -> u32 {
    or_with_flags(flags, a, b, size)
}
pub(crate) fn apply_and(flags: &mut Flags, a: u32, b: u32, size: OperandSize) -> u32 {
    and_with_flags(flags, a, b, size)
}
pub(crate) fn apply_xor(flags: &mut Flags, a: u32, b: u32, size: OperandSize) -> u32 {
    xor_with_flags(flags, a, b, size)
}

/// Shared with `ops_arith`'s group 0xF6/0xF7 dispatcher (reg field 0/1).
pub(crate) fn apply_test(flags: &mut Flags, a: u32, b: u32, size: OperandSize) {
    cmp_flags(flags, a, b, size);
    let masked_a = a & size.mask();
    let masked_b = b & size.mask();
    let result = masked_a & masked_b;
    super::ops_common::logic_flags(flags, result, size);
}

/// Shared with `ops_arith`'s group 0xF6/0xF7 dispatcher (reg field 2).
pub(crate) fn apply_not(a: u32, size: OperandSize) -> u32 {
    not_value(a, size)
}

fn exec_test_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = inst.operand_size;
    let rm = cpu.read_rm(bus, inst, size)?;
    let reg_val = cpu.regs.read_gpr(inst.modrm_reg(), size) as u32;
    apply_test(&mut cpu.flags, rm, reg_val, size);
    let cycles = if inst.ea.is_some() {
        cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst)
    } else {
        cpu.cycle_table.alu_reg
    };
    cpu.advance_ip(inst);
    Ok(cycles)
}

fn exec_test_acc(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = inst.operand_size;
    let acc = cpu.regs.read_gpr(0, size) as u32;
    apply_test(&mut cpu.flags, acc, inst.immediate, size);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// Shift/rotate group (0xD0-0xD3 fixed-1/CL form, 0xC0-0xC1 80186+
/// imm8 form). `reg` field selects ROL/ROR/RCL/RCR/SHL/SHR/SHL-alias/SAR.
fn exec_shift_group(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = inst.operand_size;
    let raw_count = match inst.opcode {
        0xD0 | 0xD1 => 1u32,
        0xD2 | 0xD3 => cpu.regs.read_gpr8(1) as u32, // CL
        0xC0 | 0xC1 => inst.immediate,
        _ => unreachable!(),
    };
    let count = if cpu.model.masks_shift_count() {
        raw_count & cpu.model.shift_count_mask() as u32
    } else {
        raw_count
    };

    let val = cpu.read_rm(bus, inst, size)?;
    let result = if count == 0 {
        val
    } else {
        shift_once(&mut cpu.flags, inst.modrm_reg(), val, count, size)
    };
    cpu.write_rm(bus, inst, size, result)?;

    let by_cl = matches!(inst.opcode, 0xD2 | 0xD3);
    let base_cycles = if by_cl {
        cpu.cycle_table.shift_by_cl + cpu.cycle_table.shift_per_bit * count
    } else {
        cpu.cycle_table.shift_by_one
    };
    let cycles = if inst.ea.is_some() { base_cycles + cpu.rm_ea_cycles(inst) } else { base_cycles };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// Apply `count` repetitions of the selected shift/rotate, updating
/// flags per the final step (OF is architecturally defined only for a
/// single-bit shift/rotate; for count>1 most implementations, this one
/// included, leave OF as whatever the last step computed).
fn shift_once(flags: &mut Flags, op: u8, val: u32, count: u32, size: OperandSize) -> u32 {
    let bits = size.mask().count_ones();
    let masked = val & size.mask();
    match op {
        0 => rotate_left(flags, masked, count, bits, size),
        1 => rotate_right(flags, masked, count, bits, size),
        2 => rotate_through_carry_left(flags, masked, count, bits, size),
        3 => rotate_through_carry_right(flags, masked, count, bits, size),
        4 | 6 => shift_left(flags, masked, count, bits, size),
        5 => shift_right_logical(flags, masked, count, bits, size),
        7 => shift_right_arithmetic(flags, masked, count, bits, size),
        _ => unreachable!(),
    }
}

fn rotate_left(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let n = count % bits;
    let mut result = val;
    let mut cf = (val >> (bits - 1)) & 1 != 0;
    for _ in 0..n {
        cf = (result >> (bits - 1)) & 1 != 0;
        result = ((result << 1) | (cf as u32)) & size.mask();
    }
    flags.set_cf(cf);
    let of = (n != 0) && (((result >> (bits - 1)) & 1) != (cf as u32));
    if n != 0 {
        flags.set_of(of);
    }
    result
}

fn rotate_right(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let n = count % bits;
    let mut result = val;
    let mut cf = val & 1 != 0;
    for _ in 0..n {
        cf = result & 1 != 0;
        result = (result >> 1) | ((cf as u32) << (bits - 1));
        result &= size.mask();
    }
    flags.set_cf(cf);
    if n != 0 {
        let top = (result >> (bits - 1)) & 1;
        let second = (result >> (bits - 2)) & 1;
        flags.set_of(top != second);
    }
    result
}

fn rotate_through_carry_left(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let n = count % (bits + 1);
    let mut result = val;
    let mut cf = flags.cf();
    for _ in 0..n {
        let new_cf = (result >> (bits - 1)) & 1 != 0;
        result = ((result << 1) | (cf as u32)) & size.mask();
        cf = new_cf;
    }
    flags.set_cf(cf);
    if count != 0 {
        let of = ((result >> (bits - 1)) & 1) != (cf as u32);
        flags.set_of(of);
    }
    result
}

fn rotate_through_carry_right(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let n = count % (bits + 1);
    let mut result = val;
    let mut cf = flags.cf();
    for _ in 0..n {
        let new_cf = result & 1 != 0;
        result = (result >> 1) | ((cf as u32) << (bits - 1));
        result &= size.mask();
        cf = new_cf;
    }
    flags.set_cf(cf);
    if count != 0 {
        let top = (result >> (bits - 1)) & 1;
        let second = (result >> (bits - 2)) & 1;
        flags.set_of(top != second);
    }
    result
}

fn shift_left(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let mut result = val;
    let mut cf = false;
    for _ in 0..count {
        cf = (result >> (bits - 1)) & 1 != 0;
        result = (result << 1) & size.mask();
    }
    flags.set_cf(cf);
    super::ops_common::logic_flags(flags, result, size);
    if count == 1 {
        let top = (result >> (bits - 1)) & 1;
        flags.set_of((top != 0) != cf);
    }
    result
}

fn shift_right_logical(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let mut result = val;
    let mut cf = false;
    for _ in 0..count {
        cf = result & 1 != 0;
        result >>= 1;
    }
    flags.set_cf(cf);
    super::ops_common::logic_flags(flags, result, size);
    if count == 1 {
        flags.set_of((val >> (bits - 1)) & 1 != 0);
    }
    result
}

fn shift_right_arithmetic(flags: &mut Flags, val: u32, count: u32, bits: u32, size: OperandSize) -> u32 {
    let sign = val & size.sign_bit() != 0;
    let mut result = val;
    let mut cf = false;
    for _ in 0..count {
        cf = result & 1 != 0;
        result = (result >> 1) | if sign { size.sign_bit() } else { 0 };
    }
    flags.set_cf(cf);
    super::ops_common::logic_flags(flags, result, size);
    if count == 1 {
        flags.set_of(false);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shl_by_one_sets_of_from_sign_change() {
        let mut f = Flags::reset();
        let r = shift_left(&mut f, 0x40, 1, 8, OperandSize::Byte);
        assert_eq!(r, 0x80);
        assert!(f.of());
        assert!(!f.cf());
    }

    #[test]
    fn rcl_through_carry_rotates_in_cf() {
        let mut f = Flags::reset();
        f.set_cf(true);
        let r = rotate_through_carry_left(&mut f, 0x00, 1, 8, OperandSize::Byte);
        assert_eq!(r, 0x01);
        assert!(!f.cf());
    }

    #[test]
    fn sar_preserves_sign() {
        let mut f = Flags::reset();
        let r = shift_right_arithmetic(&mut f, 0x80, 1, 8, OperandSize::Byte);
        assert_eq!(r, 0xC0);
    }
}
