//! Arithmetic instruction handlers (§4.6): ADD, ADC, SUB, SBB, CMP, INC,
//! DEC, NEG, MUL, IMUL (1/2/3-operand), DIV, IDIV, and the BCD adjust
//! instructions DAA/DAS/AAA/AAS/AAM/AAD.
//!
//! Adapted from the teacher's `executor/arith.rs`: same operation shape
//! (read operands, compute, write back except for CMP, update flags,
//! advance IP) but driven by opcode-byte-derived operand extraction
//! instead of the teacher's pre-decoded `inst.operands[]` array (this
//! decoder never populates it, see `instruction.rs`), and narrowed from
//! the teacher's Byte/Word/Dword/Qword range down to Byte/Word only.

use super::ops_common::{
    adc_with_flags, add_with_flags, cmp_flags, dec_with_flags, inc_with_flags, neg_with_flags,
    sbb_with_flags, set_value_flags_baseline, sub_with_flags,
};
use super::table::HandlerFn;
use super::Cpu;
use crate::error::{CoreError, Result};
use crate::flags::{Flags, OperandSize};
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::model::CpuModel;

pub fn install(table: &mut [HandlerFn; 256], model: CpuModel) {
    for base in [0x00u8, 0x10, 0x18, 0x28, 0x38] {
        for form in 0..6u8 {
            table[(base + form) as usize] = alu_group_handler(base);
        }
    }
    for op in 0x40..=0x47u8 {
        table[op as usize] = exec_inc_reg;
    }
    for op in 0x48..=0x4Fu8 {
        table[op as usize] = exec_dec_reg;
    }
    table[0x27] = exec_daa;
    table[0x2F] = exec_das;
    table[0x37] = exec_aaa;
    table[0x3F] = exec_aas;
    table[0xD4] = exec_aam;
    table[0xD5] = exec_aad;

    table[0x80] = exec_group_imm_rm;
    table[0x81] = exec_group_imm_rm;
    table[0x82] = exec_group_imm_rm;
    table[0x83] = exec_group_imm_rm;

    table[0xF6] = exec_group_f6;
    table[0xF7] = exec_group_f7;
    table[0xFE] = exec_group_fe;

    if model.has_80186_extensions() {
        table[0x69] = exec_imul_3op;
        table[0x6B] = exec_imul_3op;
    }
}

fn alu_group_handler(base: u8) -> HandlerFn {
    match base {
        0x00 => exec_add,
        0x10 => exec_adc,
        0x18 => exec_sbb,
        0x28 => exec_sub,
        0x38 => exec_cmp,
        _ => unreachable!(),
    }
}

/// Generic ALU-group dispatcher over the 6 operand forms (§4.5
/// `decode_alu_form`): dst/src resolution is identical for every
/// two-operand ALU mnemonic, only `op` and `writeback` differ.
fn exec_alu_group(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    inst: &DecodedInst,
    op: impl Fn(&mut Flags, u32, u32, OperandSize) -> u32,
    writeback: bool,
) -> Result<u32> {
    let size = inst.operand_size;
    let form = inst.opcode & 0x07;
    let mem_cycles = |cpu: &Cpu| cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst);

    let cycles = match form {
        0 | 1 => {
            let rm = cpu.read_rm(bus, inst, size)?;
            let reg_val = cpu.regs.read_gpr(inst.modrm_reg(), size) as u32;
            let result = op(&mut cpu.flags, rm, reg_val, size);
            if writeback {
                cpu.write_rm(bus, inst, size, result)?;
            }
            if inst.ea.is_some() { mem_cycles(cpu) } else { cpu.cycle_table.alu_reg }
        }
        2 | 3 => {
            let reg = inst.modrm_reg();
            let reg_val = cpu.regs.read_gpr(reg, size) as u32;
            let rm = cpu.read_rm(bus, inst, size)?;
            let result = op(&mut cpu.flags, reg_val, rm, size);
            if writeback {
                cpu.regs.write_gpr(reg, size, result as u16);
            }
            if inst.ea.is_some() { mem_cycles(cpu) } else { cpu.cycle_table.alu_reg }
        }
        4 | 5 => {
            let acc = cpu.regs.read_gpr(0, size) as u32;
            let result = op(&mut cpu.flags, acc, inst.immediate, size);
            if writeback {
                cpu.regs.write_gpr(0, size, result as u16);
            }
            cpu.cycle_table.alu_reg
        }
        _ => unreachable!(),
    };

    cpu.advance_ip(inst);
    Ok(cycles)
}

fn exec_add(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| add_with_flags(f, a, b, s), true)
}

fn exec_adc(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| {
        let cf = f.cf();
        adc_with_flags(f, a, b, cf, s)
    }, true)
}

fn exec_sub(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| sub_with_flags(f, a, b, s), true)
}

fn exec_sbb(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| {
        let cf = f.cf();
        sbb_with_flags(f, a, b, cf, s)
    }, true)
}

fn exec_cmp(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_alu_group(cpu, bus, inst, |f, a, b, s| { cmp_flags(f, a, b, s); a }, false)
}

fn exec_inc_reg(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    let val = cpu.regs.read_gpr16(reg) as u32;
    let result = inc_with_flags(&mut cpu.flags, val, OperandSize::Word);
    cpu.regs.write_gpr16(reg, result as u16);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.inc_dec_reg)
}

fn exec_dec_reg(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let reg = inst.opcode & 0x07;
    let val = cpu.regs.read_gpr16(reg) as u32;
    let result = dec_with_flags(&mut cpu.flags, val, OperandSize::Word);
    cpu.regs.write_gpr16(reg, result as u16);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.inc_dec_reg)
}

/// INC/DEC r/m, shared with `ops_control`'s group 0xFF dispatcher
/// (reg field 0/1 there select the same operation on a word r/m).
pub(crate) fn inc_dec_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize, is_dec: bool) -> Result<u32> {
    let val = cpu.read_rm(bus, inst, size)?;
    let result = if is_dec {
        dec_with_flags(&mut cpu.flags, val, size)
    } else {
        inc_with_flags(&mut cpu.flags, val, size)
    };
    cpu.write_rm(bus, inst, size, result)?;
    Ok(if inst.ea.is_some() {
        cpu.cycle_table.inc_dec_mem + cpu.rm_ea_cycles(inst)
    } else {
        cpu.cycle_table.inc_dec_reg
    })
}

fn exec_group_fe(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let cycles = match inst.modrm_reg() {
        0 => inc_dec_rm(cpu, bus, inst, OperandSize::Byte, false)?,
        1 => inc_dec_rm(cpu, bus, inst, OperandSize::Byte, true)?,
        _ => return Err(CoreError::UndefinedOpcode(inst.opcode)),
    };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// Group 0x80-0x83: imm-to-rm ALU ops. `reg` field selects the mnemonic
/// (0=ADD 1=OR 2=ADC 3=SBB 4=AND 5=SUB 6=XOR 7=CMP); OR/AND/XOR are
/// delegated to `ops_logic` since this group spans both modules.
fn exec_group_imm_rm(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    use super::ops_logic::{apply_and, apply_or, apply_xor};
    let size = inst.operand_size;
    let rm = cpu.read_rm(bus, inst, size)?;
    let imm = inst.immediate;
    let writeback = inst.modrm_reg() != 7;
    let result = match inst.modrm_reg() {
        0 => add_with_flags(&mut cpu.flags, rm, imm, size),
        1 => apply_or(&mut cpu.flags, rm, imm, size),
        2 => {
            let cf = cpu.flags.cf();
            adc_with_flags(&mut cpu.flags, rm, imm, cf, size)
        }
        3 => {
            let cf = cpu.flags.cf();
            sbb_with_flags(&mut cpu.flags, rm, imm, cf, size)
        }
        4 => apply_and(&mut cpu.flags, rm, imm, size),
        5 => sub_with_flags(&mut cpu.flags, rm, imm, size),
        6 => apply_xor(&mut cpu.flags, rm, imm, size),
        7 => { cmp_flags(&mut cpu.flags, rm, imm, size); rm }
        _ => unreachable!(),
    };
    if writeback {
        cpu.write_rm(bus, inst, size, result)?;
    }
    let cycles = if inst.ea.is_some() {
        cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst)
    } else {
        cpu.cycle_table.alu_reg
    };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// Group 0xF6/0xF7: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV on r/m. TEST and NOT
/// are delegated to `ops_logic`.
fn exec_group_f6(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_group_f6_f7(cpu, bus, inst, OperandSize::Byte)
}

fn exec_group_f7(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    exec_group_f6_f7(cpu, bus, inst, OperandSize::Word)
}

fn exec_group_f6_f7(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<u32> {
    use super::ops_logic::{apply_not, apply_test};
    let cycles = match inst.modrm_reg() {
        0 | 1 => {
            let rm = cpu.read_rm(bus, inst, size)?;
            apply_test(&mut cpu.flags, rm, inst.immediate, size);
            if inst.ea.is_some() { cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.alu_reg }
        }
        2 => {
            let rm = cpu.read_rm(bus, inst, size)?;
            let result = apply_not(rm, size);
            cpu.write_rm(bus, inst, size, result)?;
            if inst.ea.is_some() { cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.alu_reg }
        }
        3 => {
            let rm = cpu.read_rm(bus, inst, size)?;
            let result = neg_with_flags(&mut cpu.flags, rm, size);
            cpu.write_rm(bus, inst, size, result)?;
            if inst.ea.is_some() { cpu.cycle_table.alu_mem + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.alu_reg }
        }
        4 => exec_mul(cpu, bus, inst, size)?,
        5 => exec_imul_1op(cpu, bus, inst, size)?,
        6 => exec_div(cpu, bus, inst, size)?,
        7 => exec_idiv(cpu, bus, inst, size)?,
        _ => unreachable!(),
    };
    cpu.advance_ip(inst);
    Ok(cycles)
}

/// MUL: unsigned multiply, AX = AL*r/m8 or DX:AX = AX*r/m16. CF/OF are
/// set when the upper half is nonzero; the remaining four flags are left
/// undefined (architecturally accurate: real silicon reuses stale
/// latches here), so only CF/OF are perturbed.
fn exec_mul(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<u32> {
    let src = cpu.read_rm(bus, inst, size)?;
    let overflow = match size {
        OperandSize::Byte => {
            let al = cpu.regs.read_gpr8(0) as u32;
            let product = al * (src & 0xFF);
            cpu.regs.write_gpr16(0, product as u16);
            (product >> 8) != 0
        }
        OperandSize::Word => {
            let ax = cpu.regs.read_gpr16(0) as u32;
            let product = ax * (src & 0xFFFF);
            cpu.regs.write_gpr16(0, product as u16);
            cpu.regs.write_gpr16(2, (product >> 16) as u16);
            (product >> 16) != 0
        }
    };
    cpu.flags.set_cf(overflow);
    cpu.flags.set_of(overflow);
    Ok(if inst.ea.is_some() { cpu.cycle_table.mul + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mul })
}

/// 1-operand IMUL: AX = AL*r/m8 (signed) or DX:AX = AX*r/m16 (signed).
fn exec_imul_1op(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<u32> {
    let src = cpu.read_rm(bus, inst, size)?;
    let overflow = match size {
        OperandSize::Byte => {
            let al = cpu.regs.read_gpr8(0) as i8 as i32;
            let s = src as u8 as i8 as i32;
            let product = al * s;
            cpu.regs.write_gpr16(0, (product as u16) & 0xFFFF);
            (product as i16 as i32) != product
        }
        OperandSize::Word => {
            let ax = cpu.regs.read_gpr16(0) as i16 as i32;
            let s = src as u16 as i16 as i32;
            let product = ax * s;
            cpu.regs.write_gpr16(0, product as u16);
            cpu.regs.write_gpr16(2, (product >> 16) as u16);
            (product >> 16 != 0) && (product >> 16 != -1)
        }
    };
    cpu.flags.set_cf(overflow);
    cpu.flags.set_of(overflow);
    Ok(if inst.ea.is_some() { cpu.cycle_table.mul + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mul })
}

/// Truncated signed multiply shared by the 80186+ 2/3-operand IMUL forms
/// (§4.6 "IMUL-imm"). Returns `(truncated_result, overflow)`.
fn imul_truncated(a: i32, b: i32, size: OperandSize) -> (u32, bool) {
    let product = a.wrapping_mul(b);
    match size {
        OperandSize::Byte => {
            let truncated = (product as u8) as u32;
            (truncated, (truncated as i8 as i32) != product)
        }
        OperandSize::Word => {
            let truncated = (product as u16) as u32;
            (truncated, (truncated as i16 as i32) != product)
        }
    }
}

/// IMUL r16,r/m16,imm (0x69 imm16, 0x6B imm8 sign-extended) — 80186+.
fn exec_imul_3op(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let size = OperandSize::Word;
    let rm = cpu.read_rm(bus, inst, size)? as i16 as i32;
    let imm = inst.immediate as i16 as i32;
    let (result, overflow) = imul_truncated(rm, imm, size);
    cpu.regs.write_gpr16(inst.modrm_reg(), result as u16);
    cpu.flags.set_cf(overflow);
    cpu.flags.set_of(overflow);
    cpu.advance_ip(inst);
    Ok(if inst.ea.is_some() { cpu.cycle_table.mul + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.mul })
}

/// DIV: unsigned division. AL=AX/src8, AH=AX%src8 (byte) or
/// AX=DX:AX/src16, DX=DX:AX%src16 (word). Raises `#DE` on a zero divisor
/// or a quotient that overflows the destination register.
fn exec_div(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<u32> {
    let divisor = cpu.read_rm(bus, inst, size)?;
    if divisor == 0 {
        return Err(CoreError::DivideError);
    }
    match size {
        OperandSize::Byte => {
            let dividend = cpu.regs.read_gpr16(0) as u32;
            let d = divisor & 0xFF;
            let q = dividend / d;
            let r = dividend % d;
            if q > 0xFF {
                return Err(CoreError::DivideError);
            }
            cpu.regs.write_gpr16(0, (q & 0xFF) as u16 | (((r & 0xFF) as u16) << 8));
        }
        OperandSize::Word => {
            let dividend = ((cpu.regs.read_gpr16(2) as u32) << 16) | cpu.regs.read_gpr16(0) as u32;
            let d = divisor & 0xFFFF;
            let q = dividend / d;
            let r = dividend % d;
            if q > 0xFFFF {
                return Err(CoreError::DivideError);
            }
            cpu.regs.write_gpr16(0, q as u16);
            cpu.regs.write_gpr16(2, r as u16);
        }
    }
    Ok(if inst.ea.is_some() { cpu.cycle_table.div + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.div })
}

/// IDIV: signed division, same register layout as `DIV`. The 8086
/// additionally faults when the quotient equals the destination's most
/// negative representable value (`model.idiv_min_overflow_faults`);
/// 80186+ accept it (§4.6).
fn exec_idiv(cpu: &mut Cpu, bus: &mut dyn MemoryBus, inst: &DecodedInst, size: OperandSize) -> Result<u32> {
    let divisor = cpu.read_rm(bus, inst, size)?;
    if divisor == 0 {
        return Err(CoreError::DivideError);
    }
    let faults_on_min = cpu.model.idiv_min_overflow_faults();
    match size {
        OperandSize::Byte => {
            let dividend = cpu.regs.read_gpr16(0) as i16 as i32;
            let d = divisor as u8 as i8 as i32;
            let q = dividend / d;
            let r = dividend % d;
            if overflows(q, i8::MIN as i32, i8::MAX as i32, faults_on_min) {
                return Err(CoreError::DivideError);
            }
            cpu.regs.write_gpr16(0, (q as u8 as u16) | ((r as u8 as u16) << 8));
        }
        OperandSize::Word => {
            let dividend = (((cpu.regs.read_gpr16(2) as u32) << 16) | cpu.regs.read_gpr16(0) as u32) as i32;
            let d = divisor as u16 as i16 as i32;
            let q = dividend / d;
            let r = dividend % d;
            if overflows(q, i16::MIN as i32, i16::MAX as i32, faults_on_min) {
                return Err(CoreError::DivideError);
            }
            cpu.regs.write_gpr16(0, q as u16);
            cpu.regs.write_gpr16(2, r as u16);
        }
    }
    Ok(if inst.ea.is_some() { cpu.cycle_table.div + cpu.rm_ea_cycles(inst) } else { cpu.cycle_table.div })
}

fn overflows(q: i32, min: i32, max: i32, faults_on_min: bool) -> bool {
    if q < min || q > max {
        return true;
    }
    faults_on_min && q == min
}

/// DAA: decimal-adjust AL after addition (§4.6 BCD adjust).
fn exec_daa(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let mut al = cpu.regs.read_gpr8(0);
    let old_al = al;
    let old_cf = cpu.flags.cf();
    let mut cf = false;
    let mut af = false;
    if (al & 0x0F) > 9 || cpu.flags.af() {
        al = al.wrapping_add(6);
        af = true;
        cf = old_cf || al < old_al; // carry out of the low-nibble add
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_add(0x60);
        cf = true;
    }
    cpu.regs.write_gpr8(0, al);
    set_value_flags_baseline(&mut cpu.flags, al as u32, OperandSize::Byte);
    cpu.flags.set_cf(cf);
    cpu.flags.set_af(af);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// DAS: decimal-adjust AL after subtraction.
fn exec_das(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let mut al = cpu.regs.read_gpr8(0);
    let old_al = al;
    let old_cf = cpu.flags.cf();
    let mut cf = false;
    let mut af = false;
    if (al & 0x0F) > 9 || cpu.flags.af() {
        al = al.wrapping_sub(6);
        af = true;
        cf = old_cf || al > old_al; // borrow out of the low-nibble sub
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_sub(0x60);
        cf = true;
    }
    cpu.regs.write_gpr8(0, al);
    set_value_flags_baseline(&mut cpu.flags, al as u32, OperandSize::Byte);
    cpu.flags.set_cf(cf);
    cpu.flags.set_af(af);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// AAA: ASCII-adjust AL after addition.
fn exec_aaa(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let al = cpu.regs.read_gpr8(0);
    let ah = cpu.regs.read_gpr8(4);
    let (al, ah, adjust) = if (al & 0x0F) > 9 || cpu.flags.af() {
        (al.wrapping_add(6) & 0x0F, ah.wrapping_add(1), true)
    } else {
        (al & 0x0F, ah, false)
    };
    cpu.regs.write_gpr8(0, al);
    cpu.regs.write_gpr8(4, ah);
    set_value_flags_baseline(&mut cpu.flags, al as u32, OperandSize::Byte);
    cpu.flags.set_cf(adjust);
    cpu.flags.set_af(adjust);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// AAS: ASCII-adjust AL after subtraction.
fn exec_aas(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let al = cpu.regs.read_gpr8(0);
    let ah = cpu.regs.read_gpr8(4);
    let (al, ah, adjust) = if (al & 0x0F) > 9 || cpu.flags.af() {
        (al.wrapping_sub(6) & 0x0F, ah.wrapping_sub(1), true)
    } else {
        (al & 0x0F, ah, false)
    };
    cpu.regs.write_gpr8(0, al);
    cpu.regs.write_gpr8(4, ah);
    set_value_flags_baseline(&mut cpu.flags, al as u32, OperandSize::Byte);
    cpu.flags.set_cf(adjust);
    cpu.flags.set_af(adjust);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.alu_reg)
}

/// AAM: ASCII-adjust AX after multiply. `imm` is the adjust base
/// (conventionally 10). A zero base raises `#DE`.
fn exec_aam(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let base = inst.immediate as u8;
    if base == 0 {
        return Err(CoreError::DivideError);
    }
    let al = cpu.regs.read_gpr8(0);
    let ah = al / base;
    let al = al % base;
    cpu.regs.write_gpr8(4, ah);
    cpu.regs.write_gpr8(0, al);
    set_value_flags_baseline(&mut cpu.flags, al as u32, OperandSize::Byte);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.mul)
}

/// AAD: ASCII-adjust AX before division. `imm` is the adjust base.
fn exec_aad(cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    let base = inst.immediate as u8;
    let al = cpu.regs.read_gpr8(0);
    let ah = cpu.regs.read_gpr8(4);
    let result = al.wrapping_add(ah.wrapping_mul(base));
    cpu.regs.write_gpr8(0, result);
    cpu.regs.write_gpr8(4, 0);
    set_value_flags_baseline(&mut cpu.flags, result as u32, OperandSize::Byte);
    cpu.advance_ip(inst);
    Ok(cpu.cycle_table.div)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{Cpu, CpuConfig};
    use crate::memory::BlockBus;
    use crate::model::CpuModel;

    fn cpu_with_rom(model: CpuModel, bytes: &[u8]) -> (Cpu, BlockBus) {
        let mut rom = vec![0u8; 0x1000];
        rom[..bytes.len()].copy_from_slice(bytes);
        let mut bus = BlockBus::new(24);
        bus.install_rom(0, &rom).unwrap();
        let mut cpu = Cpu::new(CpuConfig { model, cycles_per_second: None, prefetch_enabled: false });
        cpu.regs.load_segment(crate::registers::SegReg::Cs, crate::registers::SegmentDescriptor::real_mode(0));
        cpu.regs.ip = 0;
        (cpu, bus)
    }

    #[test]
    fn add_ax_imm_sets_flags_and_writes_back() {
        // ADD AX, 0x0001 with AX=0x7FFF => 0x8000, SF/OF/AF set.
        let (mut cpu, mut bus) = cpu_with_rom(CpuModel::Intel8088, &[0x05, 0x01, 0x00]);
        cpu.regs.write_gpr16(0, 0x7FFF);
        let inst = cpu_decode(&mut cpu, &bus);
        exec_add(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(0), 0x8000);
        assert!(cpu.flags.of());
        assert!(cpu.flags.sf());
    }

    #[test]
    fn div_by_zero_faults() {
        let (mut cpu, mut bus) = cpu_with_rom(CpuModel::Intel8088, &[0xF6, 0xF6]); // DIV DH (reg6, rm=DH=6)
        cpu.regs.write_gpr16(0, 0x0010);
        cpu.regs.write_gpr8(6, 0); // DH = 0
        let inst = cpu_decode(&mut cpu, &bus);
        let err = exec_group_f6(&mut cpu, &mut bus, &inst).unwrap_err();
        assert_eq!(err, CoreError::DivideError);
    }

    #[test]
    fn idiv_min_overflow_faults_on_8086_not_80186() {
        // IDIV word form, divisor = -1 (0xFFFF), dividend = 0x80000000-ish boundary.
        let (mut cpu8086, mut bus8086) = cpu_with_rom(CpuModel::Intel8088, &[0xF7, 0xFB]); // IDIV BX (reg7)
        cpu8086.regs.write_gpr16(2, 0x8000); // DX
        cpu8086.regs.write_gpr16(0, 0x0000); // AX, dividend = 0x80000000 = i32::MIN
        cpu8086.regs.write_gpr16(3, 0xFFFF); // BX = -1
        let inst = cpu_decode(&mut cpu8086, &bus8086);
        let err = exec_group_f7(&mut cpu8086, &mut bus8086, &inst).unwrap_err();
        assert_eq!(err, CoreError::DivideError);

        let (mut cpu186, mut bus186) = cpu_with_rom(CpuModel::Intel80186, &[0xF7, 0xFB]);
        cpu186.regs.write_gpr16(2, 0x8000);
        cpu186.regs.write_gpr16(0, 0x0000);
        cpu186.regs.write_gpr16(3, 0xFFFF);
        let inst = cpu_decode(&mut cpu186, &bus186);
        exec_group_f7(&mut cpu186, &mut bus186, &inst).unwrap();
        assert_eq!(cpu186.regs.read_gpr16(0), 0x8000); // quotient == i16::MIN, accepted
    }

    #[test]
    fn daa_adjusts_bcd_addition() {
        let (mut cpu, mut bus) = cpu_with_rom(CpuModel::Intel8088, &[0x27]);
        cpu.regs.write_gpr8(0, 0x0F); // AL after 0x05+0x0A style BCD add
        let inst = cpu_decode(&mut cpu, &bus);
        exec_daa(&mut cpu, &mut bus, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr8(0), 0x15);
        assert!(cpu.flags.af());
    }

    fn cpu_decode(cpu: &mut Cpu, bus: &BlockBus) -> DecodedInst {
        let decoder = crate::decoder::Decoder::new(cpu.model);
        decoder.decode(bus, &mut cpu.prefetch, cpu.cs_ip_linear()).unwrap()
    }
}
