//! Instruction decoder: prefixes, opcode fetch, ModR/M, operands (§4.5).
//!
//! Restructured from the teacher's four-phase `DecodeCursor` (prefix
//! parsing / opcode fetch / size resolution / operand decoding), kept
//! almost unchanged in shape, but fetching through [`PrefetchQueue`]
//! instead of the bus directly (or the bus directly when prefetch is
//! disabled, per §4.5/§9), and reduced to the 8086-80286 addressing
//! forms (16-bit ModR/M, no SIB, no REX).

use crate::error::{CoreError, Result};
use crate::flags::OperandSize;
use crate::instruction::{DecodedInst, MemOperand, OpcodeMap, Operand, RegOperand, RepPrefix};
use crate::memory::MemoryBus;
use crate::model::{CpuModel, CycleTable};
use crate::prefetch::PrefetchQueue;
use crate::registers::SegReg;

/// Hardware-enforced maximum instruction length. The 80286 additionally
/// treats exceeding it as #UD rather than silently truncating (§4.6).
const MAX_INST_LEN: usize = 15;

/// Stateless decoder parameterized by model (for 0x0F-map availability,
/// shift-count masking, and EA cost-table selection).
pub struct Decoder {
    model: CpuModel,
    cycle_table: CycleTable,
}

impl Decoder {
    pub fn new(model: CpuModel) -> Self {
        Decoder {
            model,
            cycle_table: CycleTable::for_model(model),
        }
    }

    /// Decode one instruction starting at `linear_ip`, fetching through
    /// `queue` (or `bus` directly if prefetch is disabled).
    pub fn decode(
        &self,
        bus: &dyn MemoryBus,
        queue: &mut PrefetchQueue,
        linear_ip: u32,
    ) -> Result<DecodedInst> {
        let mut cur = DecodeCursor {
            bus,
            queue,
            start_addr: linear_ip,
            pos: linear_ip,
            model: self.model,
            cycle_table: self.cycle_table,
            inst: DecodedInst::empty(),
        };
        cur.decode_instruction()
    }
}

struct DecodeCursor<'a> {
    bus: &'a dyn MemoryBus,
    queue: &'a mut PrefetchQueue,
    start_addr: u32,
    pos: u32,
    model: CpuModel,
    cycle_table: CycleTable,
    inst: DecodedInst,
}

impl<'a> DecodeCursor<'a> {
    fn fetch_u8(&mut self) -> Result<u8> {
        if (self.pos.wrapping_sub(self.start_addr)) as usize >= MAX_INST_LEN {
            return Err(CoreError::UndefinedOpcode(0));
        }
        let b = self.queue.fetch_byte(self.bus, self.pos);
        self.pos = self.pos.wrapping_add(1);
        Ok(b)
    }

    fn fetch_u16(&mut self) -> Result<u16> {
        let lo = self.fetch_u8()? as u16;
        let hi = self.fetch_u8()? as u16;
        Ok(lo | (hi << 8))
    }

    fn fetch_imm(&mut self, size: OperandSize) -> Result<i32> {
        match size {
            OperandSize::Byte => Ok(self.fetch_u8()? as i8 as i32),
            OperandSize::Word => Ok(self.fetch_u16()? as i16 as i32),
        }
    }

    fn fetch_uimm(&mut self, size: OperandSize) -> Result<u32> {
        match size {
            OperandSize::Byte => Ok(self.fetch_u8()? as u32),
            OperandSize::Word => Ok(self.fetch_u16()? as u32),
        }
    }

    fn bytes_consumed(&self) -> u8 {
        self.pos.wrapping_sub(self.start_addr) as u8
    }

    fn decode_instruction(&mut self) -> Result<DecodedInst> {
        self.phase1_prefixes()?;
        self.phase2_opcode()?;
        self.phase3_size();
        self.phase4_operands()?;

        self.inst.length = self.bytes_consumed();
        if self.model.has_protected_mode() && self.inst.length as usize > MAX_INST_LEN {
            return Err(CoreError::UndefinedOpcode(self.inst.opcode));
        }
        Ok(std::mem::replace(&mut self.inst, DecodedInst::empty()))
    }

    // ── Phase 1: prefixes ──

    fn phase1_prefixes(&mut self) -> Result<()> {
        self.inst.prefix.first_byte_addr = self.pos;
        loop {
            let b = self.fetch_u8()?;
            match b {
                0xF0 => self.inst.prefix.lock = true,
                0xF2 => self.inst.rep = RepPrefix::Repne,
                0xF3 => self.inst.rep = RepPrefix::Rep,
                0x26 => self.inst.prefix.seg_override = Some(SegReg::Es),
                0x2E => self.inst.prefix.seg_override = Some(SegReg::Cs),
                0x36 => self.inst.prefix.seg_override = Some(SegReg::Ss),
                0x3E => self.inst.prefix.seg_override = Some(SegReg::Ds),
                0x66 | 0x67 if self.model.has_80186_extensions() => {
                    self.inst.prefix.operand_size_reserved = true;
                }
                _ => {
                    self.pos -= 1;
                    break;
                }
            }
            self.inst.prefix.prefix_byte_count += 1;
        }
        Ok(())
    }

    // ── Phase 2: opcode ──

    fn phase2_opcode(&mut self) -> Result<()> {
        let b1 = self.fetch_u8()?;
        if b1 == 0x0F {
            if self.model.has_0f_map() {
                let b2 = self.fetch_u8()?;
                self.inst.opcode_map = OpcodeMap::Secondary;
                self.inst.opcode = b2;
            } else if matches!(self.model, CpuModel::Intel8088) {
                // 8086: 0x0F alone decodes as POP CS (§4.6 model delta).
                self.inst.opcode_map = OpcodeMap::Primary;
                self.inst.opcode = 0x0F;
            } else {
                return Err(CoreError::UndefinedOpcode(0x0F));
            }
        } else {
            self.inst.opcode_map = OpcodeMap::Primary;
            self.inst.opcode = b1;
        }
        Ok(())
    }

    // ── Phase 3: size resolution ──

    fn phase3_size(&mut self) {
        // This family has no 32-bit operand size; the only variance is
        // byte vs. word, which individual opcodes encode directly (the
        // low bit of most ALU opcodes). Default to word; handlers
        // narrow to byte from the opcode's own size bit.
        self.inst.operand_size = OperandSize::Word;
    }

    // ── Phase 4: ModR/M + operands ──

    /// Decode ModR/M and any trailing immediate, driven entirely by the
    /// opcode byte — the 8086 map encodes operand shape (size, whether
    /// there's a ModR/M byte, whether there's an immediate) case by
    /// case rather than through a uniform prefix scheme, so this is a
    /// big dispatch rather than a fixed per-opcode table.
    fn phase4_operands(&mut self) -> Result<()> {
        let op = self.inst.opcode;
        let seg_ov = self.inst.prefix.seg_override;

        if self.inst.opcode_map == OpcodeMap::Secondary {
            // 80286 control instructions (§4.6). CLTS (0x06) takes no
            // ModR/M; the rest (group 0x00/0x01, LAR/LSL/ARPL) do.
            if op != 0x06 {
                self.decode_modrm(OperandSize::Word, seg_ov)?;
            }
            return Ok(());
        }

        match op {
            // Segment PUSH/POP, DAA/DAS/AAA/AAS: no ModR/M, no immediate.
            0x06 | 0x07 | 0x0E | 0x16 | 0x17 | 0x1E | 0x1F => {}
            0x27 | 0x2F | 0x37 | 0x3F => {}

            // ALU group (ADD/OR/ADC/SBB/AND/SUB/XOR/CMP), forms 0-5.
            0x00..=0x3D => self.decode_alu_form(op, seg_ov)?,

            // INC/DEC reg, PUSH reg, POP reg: register encoded in opcode.
            0x40..=0x5F => {}

            // PUSHA/POPA (80186+): no operand.
            0x60 | 0x61 => {}

            // BOUND reg16,m16:16 (80186+).
            0x62 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // ARPL r/m16,r16 (80286 only; reserved/#UD on earlier models,
            // handled by the default `undefined` handler since no model
            // installs a primary-table entry at 0x63 otherwise).
            0x63 if self.model.has_protected_mode() => {
                self.inst.operand_size = OperandSize::Word;
                self.decode_modrm(OperandSize::Word, seg_ov)?;
            }

            // PUSH imm16 / PUSH imm8 (80186+).
            0x68 => { self.inst.operand_size = OperandSize::Word; self.decode_immediate(OperandSize::Word)?; }
            0x6A => { self.inst.operand_size = OperandSize::Byte; self.decode_immediate(OperandSize::Byte)?; }

            // IMUL r,rm,imm (80186+).
            0x69 => { self.decode_modrm(OperandSize::Word, seg_ov)?; self.decode_immediate(OperandSize::Word)?; }
            0x6B => { self.decode_modrm(OperandSize::Word, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }

            // INS/OUTS (80186+): no ModR/M.
            0x6C..=0x6F => {}

            // Jcc short: rel8.
            0x70..=0x7F => {
                self.inst.displacement = self.decode_rel(OperandSize::Byte)?;
            }

            // Group 0x80-0x83: imm-to-rm ALU ops.
            0x80 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }
            0x81 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; self.decode_immediate(OperandSize::Word)?; }
            0x82 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }
            0x83 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }

            // TEST rm,reg.
            0x84 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0x85 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // XCHG rm,reg.
            0x86 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0x87 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // MOV rm,reg / reg,rm (8/16) and MOV sreg forms.
            0x88 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0x89 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }
            0x8A => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0x8B => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }
            0x8C | 0x8E => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // LEA.
            0x8D => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // POP rm (group with a single valid sub-opcode).
            0x8F => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // XCHG AX,reg / NOP.
            0x90..=0x97 => {}

            // CBW/CWD, CALL far, WAIT, PUSHF/POPF, SAHF/LAHF.
            0x98 | 0x99 | 0x9B..=0x9F => {}
            0x9A => {
                self.inst.immediate = self.fetch_u16()? as u32;
                self.inst.immediate2 = self.fetch_u16()? as u32;
            }

            // MOV AL/AX,moffs and moffs,AL/AX.
            0xA0 => { self.inst.operand_size = OperandSize::Byte; self.inst.displacement = self.fetch_u16()? as i32; }
            0xA1 => { self.inst.operand_size = OperandSize::Word; self.inst.displacement = self.fetch_u16()? as i32; }
            0xA2 => { self.inst.operand_size = OperandSize::Byte; self.inst.displacement = self.fetch_u16()? as i32; }
            0xA3 => { self.inst.operand_size = OperandSize::Word; self.inst.displacement = self.fetch_u16()? as i32; }

            // TEST AL/AX,imm.
            0xA8 => { self.inst.operand_size = OperandSize::Byte; self.decode_immediate(OperandSize::Byte)?; }
            0xA9 => { self.inst.operand_size = OperandSize::Word; self.decode_immediate(OperandSize::Word)?; }

            // String opcodes: no ModR/M (addresses implicit via SI/DI).
            0xA4..=0xA7 | 0xAA..=0xAF => {
                self.inst.operand_size = if op & 1 == 0 { OperandSize::Byte } else { OperandSize::Word };
            }

            // MOV reg,imm.
            0xB0..=0xB7 => { self.inst.operand_size = OperandSize::Byte; self.decode_immediate(OperandSize::Byte)?; }
            0xB8..=0xBF => { self.inst.operand_size = OperandSize::Word; self.decode_immediate(OperandSize::Word)?; }

            // Group: MOV rm,imm.
            0xC0 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }
            0xC1 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }
            0xC2 => { self.decode_immediate(OperandSize::Word)?; }
            0xC3 | 0xC9 | 0xCB | 0xCC | 0xCE | 0xCF | 0xF0 | 0xF1 | 0xF4 | 0xF5 | 0xF8..=0xFD => {}
            0xC4 | 0xC5 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }
            0xC6 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; self.decode_immediate(OperandSize::Byte)?; }
            0xC7 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; self.decode_immediate(OperandSize::Word)?; }

            // ENTER (80186+): imm16, imm8.
            0xC8 => {
                self.inst.immediate = self.fetch_u16()? as u32;
                self.inst.immediate2 = self.fetch_u8()? as u32;
            }

            0xCA => { self.decode_immediate(OperandSize::Word)?; }
            0xCD => { self.decode_immediate(OperandSize::Byte)?; }

            // AAM/AAD: base byte (conventionally 0x0A, but encoded).
            0xD4 | 0xD5 => { self.inst.operand_size = OperandSize::Byte; self.decode_immediate(OperandSize::Byte)?; }

            // Shift/rotate groups.
            0xD0 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0xD1 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }
            0xD2 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0xD3 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            // LOOP/LOOPE/LOOPNE/JCXZ: rel8.
            0xE0..=0xE3 => { self.inst.displacement = self.decode_rel(OperandSize::Byte)?; }

            // IN/OUT imm8 port.
            0xE4 | 0xE6 => { self.inst.operand_size = OperandSize::Byte; self.decode_immediate(OperandSize::Byte)?; }
            0xE5 | 0xE7 => { self.inst.operand_size = OperandSize::Word; self.decode_immediate(OperandSize::Byte)?; }
            // IN/OUT DX port.
            0xEC..=0xEF => { self.inst.operand_size = if op & 1 == 0 { OperandSize::Byte } else { OperandSize::Word }; }

            // CALL/JMP near rel16, JMP short rel8.
            0xE8 | 0xE9 => { self.inst.displacement = self.decode_rel(OperandSize::Word)?; }
            0xEA => {
                self.inst.immediate = self.fetch_u16()? as u32;
                self.inst.immediate2 = self.fetch_u16()? as u32;
            }
            0xEB => { self.inst.displacement = self.decode_rel(OperandSize::Byte)?; }

            // Group F6/F7: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV.
            0xF6 => {
                self.inst.operand_size = OperandSize::Byte;
                self.decode_modrm(OperandSize::Byte, seg_ov)?;
                if self.inst.modrm_reg() <= 1 {
                    self.decode_immediate(OperandSize::Byte)?;
                }
            }
            0xF7 => {
                self.inst.operand_size = OperandSize::Word;
                self.decode_modrm(OperandSize::Word, seg_ov)?;
                if self.inst.modrm_reg() <= 1 {
                    self.decode_immediate(OperandSize::Word)?;
                }
            }

            // Group FE/FF: INC/DEC rm, and (FF only) CALL/JMP/PUSH rm.
            0xFE => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            0xFF => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }

            _ => {}
        }
        Ok(())
    }

    /// Decode one of the 6 forms of an ALU-group opcode (ADD/OR/ADC/
    /// SBB/AND/SUB/XOR/CMP, whose group base is `op & 0xF8`):
    /// form 0: rm8,r8  form 1: rm16,r16  form 2: r8,rm8  form 3: r16,rm16
    /// form 4: AL,imm8 form 5: AX,imm16.
    fn decode_alu_form(&mut self, op: u8, seg_ov: Option<SegReg>) -> Result<()> {
        let form = op & 0x07;
        match form {
            0 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            1 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }
            2 => { self.inst.operand_size = OperandSize::Byte; self.decode_modrm(OperandSize::Byte, seg_ov)?; }
            3 => { self.inst.operand_size = OperandSize::Word; self.decode_modrm(OperandSize::Word, seg_ov)?; }
            4 => { self.inst.operand_size = OperandSize::Byte; self.decode_immediate(OperandSize::Byte)?; }
            5 => { self.inst.operand_size = OperandSize::Word; self.decode_immediate(OperandSize::Word)?; }
            _ => {}
        }
        Ok(())
    }

    /// Decode a ModR/M byte into either a register index (mod==3) or a
    /// resolved [`MemOperand`] (§4.5). `size` is the operand's width,
    /// needed for the memory operand's `size` field.
    pub fn decode_modrm(&mut self, size: OperandSize, seg_override: Option<SegReg>) -> Result<()> {
        let modrm = self.fetch_u8()?;
        self.inst.modrm = Some(modrm);
        let md = (modrm >> 6) & 3;
        let rm = modrm & 7;

        if md == 3 {
            self.inst.ea = None;
            return Ok(());
        }

        let (base, index, default_seg, mut disp) = match rm {
            0 => (Some(3u8), Some(6u8), SegReg::Ds, 0), // BX+SI
            1 => (Some(3u8), Some(7u8), SegReg::Ds, 0), // BX+DI
            2 => (Some(5u8), Some(6u8), SegReg::Ss, 0), // BP+SI
            3 => (Some(5u8), Some(7u8), SegReg::Ss, 0), // BP+DI
            4 => (None, Some(6u8), SegReg::Ds, 0),      // SI
            5 => (None, Some(7u8), SegReg::Ds, 0),      // DI
            6 => {
                if md == 0 {
                    // Direct address, no base/index.
                    let addr = self.fetch_u16()? as i32;
                    (None, None, SegReg::Ds, addr)
                } else {
                    (Some(5u8), None, SegReg::Ss, 0) // BP + disp
                }
            }
            7 => (Some(3u8), None, SegReg::Ds, 0), // BX + disp
            _ => unreachable!(),
        };

        if md == 1 {
            disp = self.fetch_imm(OperandSize::Byte)?;
        } else if md == 2 {
            disp = self.fetch_imm(OperandSize::Word)?;
        }

        let is_direct = md == 0 && rm == 6;
        let single_reg = base.is_some() ^ index.is_some();
        let awkward_pair = matches!(rm, 2 | 3);

        let mut ea_cycles = self.cycle_table.ea_base;
        if !is_direct {
            if md == 1 || md == 2 {
                ea_cycles += self.cycle_table.ea_displacement;
            }
            if single_reg {
                ea_cycles += self.cycle_table.ea_single_reg;
            }
            if awkward_pair {
                ea_cycles += self.cycle_table.ea_awkward_pair;
            }
        }

        self.inst.ea = Some(MemOperand {
            base,
            index,
            displacement: disp,
            segment: seg_override.unwrap_or(default_seg),
            size,
            ea_cycles,
        });
        Ok(())
    }

    /// Fetch and stash an immediate operand at `size`, sign-extended.
    pub fn decode_immediate(&mut self, size: OperandSize) -> Result<()> {
        self.inst.immediate = self.fetch_uimm(size)?;
        Ok(())
    }

    /// Fetch a sign-extended relative branch displacement.
    pub fn decode_rel(&mut self, size: OperandSize) -> Result<i32> {
        self.fetch_imm(size)
    }
}

impl<'a> std::ops::Deref for DecodeCursor<'a> {
    type Target = DecodedInst;
    fn deref(&self) -> &DecodedInst {
        &self.inst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BlockBus;

    fn decode_bytes(model: CpuModel, bytes: &[u8]) -> DecodedInst {
        let mut rom = vec![0u8; 0x1000];
        rom[..bytes.len()].copy_from_slice(bytes);
        let mut bus = BlockBus::new(20);
        bus.install_rom(0, &rom).unwrap();
        let mut queue = PrefetchQueue::new(model.prefetch_depth(), true);
        queue.flush(0);
        let decoder = Decoder::new(model);
        decoder.decode(&bus, &mut queue, 0).unwrap()
    }

    #[test]
    fn decodes_single_byte_inc_ax() {
        // INC AX = 0x40
        let inst = decode_bytes(CpuModel::Intel8088, &[0x40]);
        assert_eq!(inst.opcode, 0x40);
        assert_eq!(inst.length, 1);
    }

    #[test]
    fn segment_override_prefix_recorded() {
        // ES: NOP = 0x26 0x90
        let inst = decode_bytes(CpuModel::Intel8088, &[0x26, 0x90]);
        assert_eq!(inst.prefix.seg_override, Some(SegReg::Es));
        assert_eq!(inst.length, 2);
    }

    #[test]
    fn eight086_0f_decodes_as_primary_pop_cs() {
        let inst = decode_bytes(CpuModel::Intel8088, &[0x0F]);
        assert_eq!(inst.opcode_map, OpcodeMap::Primary);
        assert_eq!(inst.opcode, 0x0F);
    }

    #[test]
    fn eighty286_0f_uses_secondary_map() {
        // 0F 00 /0 = SLDT
        let inst = decode_bytes(CpuModel::Intel80286, &[0x0F, 0x00, 0xC0]);
        assert_eq!(inst.opcode_map, OpcodeMap::Secondary);
        assert_eq!(inst.opcode, 0x00);
    }
}
