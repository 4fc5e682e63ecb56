//! Decoded instruction representation (§4.5/§4.6).
//!
//! Reduced from the teacher's REX/SIB/scale-index model down to the
//! 8086-80286 addressing forms: no SIB byte, no scale-index, a single
//! base + single index register pair at most, and only the Primary and
//! (80286-only) Secondary opcode maps.

use crate::flags::OperandSize;
use crate::registers::SegReg;

/// An instruction fully decoded from its byte encoding.
#[derive(Debug, Clone)]
pub struct DecodedInst {
    /// Length of the encoded instruction in bytes (1 to >10 triggers
    /// #UD on 80286 per §4.6 "Longer instruction prefix chain").
    pub length: u8,

    /// Opcode byte (after the 0x0F escape byte, if any).
    pub opcode: u8,

    /// Which opcode map this instruction belongs to.
    pub opcode_map: OpcodeMap,

    /// Operand size, after the 80186+ 0x66 prefix is applied (byte or
    /// word; this family has no 32-bit operand size).
    pub operand_size: OperandSize,

    /// Decoded operands (at most 2 for this instruction set).
    pub operands: [Operand; 2],
    pub operand_count: u8,

    /// Prefix state accumulated before the opcode byte.
    pub prefix: PrefixState,

    /// ModR/M byte if the opcode has one.
    pub modrm: Option<u8>,

    /// Resolved effective-address operand, if ModR/M decoded to memory.
    pub ea: Option<MemOperand>,

    /// Sign-extended displacement (8- or 16-bit) consumed by ModR/M or
    /// a branch opcode.
    pub displacement: i32,

    /// Immediate operand (byte or word, zero- or sign-extended per
    /// opcode).
    pub immediate: u32,

    /// Second immediate: only ENTER's frame-size+nesting-level pair and
    /// far CALL/JMP's segment use this.
    pub immediate2: u32,

    /// REP/REPNE prefix for string operations.
    pub rep: RepPrefix,
}

impl DecodedInst {
    /// Zeroed instruction, the decoder's starting point.
    pub fn empty() -> Self {
        DecodedInst {
            length: 0,
            opcode: 0,
            opcode_map: OpcodeMap::Primary,
            operand_size: OperandSize::Word,
            operands: [Operand::None, Operand::None],
            operand_count: 0,
            prefix: PrefixState::default(),
            modrm: None,
            ea: None,
            displacement: 0,
            immediate: 0,
            immediate2: 0,
            rep: RepPrefix::None,
        }
    }

    #[inline]
    pub fn modrm_reg(&self) -> u8 {
        self.modrm.map(|m| (m >> 3) & 7).unwrap_or(0)
    }

    #[inline]
    pub fn modrm_rm(&self) -> u8 {
        self.modrm.map(|m| m & 7).unwrap_or(0)
    }

    #[inline]
    pub fn modrm_mod(&self) -> u8 {
        self.modrm.map(|m| (m >> 6) & 3).unwrap_or(0)
    }
}

/// Opcode map identifier. The Secondary (0x0F) map only exists on the
/// 80286 (§4.6: on 8086 byte 0x0F decodes as `POP CS` in the Primary
/// map; on 80186 it is #UD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeMap {
    Primary,
    Secondary,
}

/// Decoded prefix state accumulated while scanning prefix bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixState {
    /// Segment override (None = use the addressing mode's default
    /// segment).
    pub seg_override: Option<SegReg>,
    /// 0x66 operand-size-reserved prefix byte seen (no behavioral
    /// effect on this family beyond being recorded, per §4.6 "LOCK
    /// prefix: recorded ... but has no emulated side effect" — the
    /// same applies to the reserved 66/67 forms here).
    pub operand_size_reserved: bool,
    /// LOCK prefix (0xF0). Recorded only; no emulated side effect.
    pub lock: bool,
    /// Count of prefix bytes consumed before the opcode, used for the
    /// 80286 ">10 bytes raises #UD" check and for REP-resumption
    /// addressing (§4.6 model deltas).
    pub prefix_byte_count: u8,
    /// Linear address of the first prefix byte (or the opcode byte
    /// itself if there were none), needed for model-dependent
    /// REP-resumption and fault CS:IP reporting (§4.6).
    pub first_byte_addr: u32,
}

/// REP prefix type for string operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepPrefix {
    #[default]
    None,
    /// REP/REPE (0xF3).
    Rep,
    /// REPNE (0xF2).
    Repne,
}

/// An instruction operand.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    None,
    Register(RegOperand),
    Memory(MemOperand),
    Immediate(u32),
    /// Sign-extended displacement for Jcc/JMP/CALL/LOOP.
    RelativeOffset(i32),
    /// Far pointer (segment:offset) for far JMP/CALL.
    FarPointer { segment: u16, offset: u16 },
}

/// Register operand sub-types.
#[derive(Debug, Clone, Copy)]
pub enum RegOperand {
    /// General-purpose register (0-7).
    Gpr(u8),
    /// Segment register.
    Seg(SegReg),
}

/// Memory operand: effective-address components plus the EA's cycle
/// cost class, already resolved by the decoder (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct MemOperand {
    /// Base register (BX or BP), if any.
    pub base: Option<u8>,
    /// Index register (SI or DI), if any.
    pub index: Option<u8>,
    /// Displacement (sign-extended 8- or 16-bit, or the full 16-bit
    /// direct address when base and index are both None).
    pub displacement: i32,
    /// Segment used for this access (default or overridden).
    pub segment: SegReg,
    /// Width of the memory access.
    pub size: OperandSize,
    /// Cycle cost class for this EA, from the model's `CycleTable`
    /// (§4.5: base 5, +1 displacement, +1 single register, +2 awkward
    /// pair; zeroed on 80286).
    pub ea_cycles: u32,
}
