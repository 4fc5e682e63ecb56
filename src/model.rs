//! Per-model parameters: reset state, address masks, and behavior deltas.
//!
//! `InstructionTable` construction (`cpu::table`) and `ExecCore` consult
//! `CpuModel` at a handful of well-defined points rather than branching
//! on it inline in every handler, per the "model-specific deltas at
//! construction time" design note (§4.6/§9).

/// Which physical CPU this core emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuModel {
    /// Intel 8088/8086 (6-byte prefetch on 8086, 4-byte on 8088; this
    /// core models the 8088's 4-byte queue as the common baseline).
    Intel8088,
    /// Intel 80186/80188.
    Intel80186,
    /// Intel 80286.
    Intel80286,
}

impl CpuModel {
    /// Default `cycles_per_second` when the host omits one (§6).
    pub fn default_cycles_per_second(self) -> u32 {
        match self {
            CpuModel::Intel8088 => 4_772_727,
            CpuModel::Intel80186 => 6_000_000,
            CpuModel::Intel80286 => 6_000_000,
        }
    }

    /// Prefetch queue depth in bytes (§3 "Prefetch queue").
    pub fn prefetch_depth(self) -> usize {
        match self {
            CpuModel::Intel8088 => 4,
            CpuModel::Intel80186 => 6,
            CpuModel::Intel80286 => 6,
        }
    }

    /// Whether this model masks shift/rotate counts modulo 32 (§4.6).
    pub fn masks_shift_count(self) -> bool {
        !matches!(self, CpuModel::Intel8088)
    }

    /// Shift-count mask applied before a shift/rotate executes.
    pub fn shift_count_mask(self) -> u8 {
        if self.masks_shift_count() { 0x1F } else { 0xFF }
    }

    /// Whether two-byte `0x0F xx` opcodes decode as the protected-mode
    /// control instruction set. On 8086 `0x0F` alone decodes as `POP CS`
    /// (§4.6); on 80186 it (and the other reserved forms) is `#UD`.
    pub fn has_0f_map(self) -> bool {
        matches!(self, CpuModel::Intel80286)
    }

    /// Whether this model supports the 80186+ instruction additions:
    /// PUSHA/POPA/BOUND/PUSH-imm/IMUL-imm/ENTER/LEAVE/INS/OUTS/shift-by-imm.
    pub fn has_80186_extensions(self) -> bool {
        !matches!(self, CpuModel::Intel8088)
    }

    /// Whether protected mode (and its descriptor/segment machinery) is
    /// available at all.
    pub fn has_protected_mode(self) -> bool {
        matches!(self, CpuModel::Intel80286)
    }

    /// IDIV boundary behavior: 8086 faults on quotient == i16::MIN /
    /// i8::MIN overflow case (dividend == -32768/-128, divisor == -1);
    /// 80186+ accepts it and returns the wrapped quotient (§4.6).
    pub fn idiv_min_overflow_faults(self) -> bool {
        matches!(self, CpuModel::Intel8088)
    }

    /// REP-prefixed string instruction resumption point on interrupt:
    /// 80186+ save the address of the first prefix byte; 8086 saves the
    /// address of the last prefix byte only (§4.6, Testable Property
    /// "REP string resumability").
    pub fn rep_resumes_at_first_prefix(self) -> bool {
        self.has_80186_extensions()
    }

    /// `PUSH SP` pushes the predecremented value on 8086/80186, and the
    /// value *before* decrement on 80286 (§4.6, §8 "PUSH SP dichotomy").
    pub fn push_sp_pushes_old_value(self) -> bool {
        matches!(self, CpuModel::Intel80286)
    }

    /// Saved CS:IP for INT3/INTO/#DE: 80286 points at the faulting
    /// instruction (including its prefixes); 8086 points at the
    /// following instruction for INTO specifically (§4.6).
    pub fn exception_saves_faulting_address(self) -> bool {
        matches!(self, CpuModel::Intel80286)
    }

    /// `checkINTR` priority order. §9's Design Notes flag the source's
    /// 8086-style ordering (hardware IRQ before single-step trap) as
    /// architecturally wrong for the 80286, which inverts trap-before-
    /// IRQ priority; this core honors the model as recommended.
    pub fn trap_before_irq(self) -> bool {
        matches!(self, CpuModel::Intel80286)
    }

    /// Word write crossing the top of a 64 KiB segment (offset 0xFFFF):
    /// 8086/8088 wrap within the segment; 80186+ do not wrap (the high
    /// byte lands at offset 0x10000, which faults only on 80286 once
    /// that offset exceeds the segment limit) (§4.6).
    pub fn segment_offset_wraps(self) -> bool {
        matches!(self, CpuModel::Intel8088)
    }

    /// A20 addressable-range mask size in bits when A20 is gated off.
    pub fn real_mode_addr_bits(self) -> u32 {
        match self {
            CpuModel::Intel80286 => 24,
            _ => 20,
        }
    }
}

/// Per-opcode-class cycle costs for one model, generated mechanically
/// from the tables implied by §4.6/§4.7 (Design Notes §9: "prefer a
/// typed struct of cycle costs indexed by mnemonic class").
#[derive(Debug, Clone, Copy)]
pub struct CycleTable {
    /// Register-to-register ALU op (ADD/SUB/AND/... reg,reg).
    pub alu_reg: u32,
    /// Memory-operand ALU op, excluding EA cost.
    pub alu_mem: u32,
    /// MOV reg,reg.
    pub mov_reg: u32,
    /// MOV reg,mem / mem,reg, excluding EA cost.
    pub mov_mem: u32,
    /// INC/DEC reg.
    pub inc_dec_reg: u32,
    /// INC/DEC mem, excluding EA cost.
    pub inc_dec_mem: u32,
    /// Conditional jump, taken.
    pub jcc_taken: u32,
    /// Conditional jump, not taken.
    pub jcc_not_taken: u32,
    /// Unconditional near JMP.
    pub jmp_near: u32,
    /// CALL near.
    pub call_near: u32,
    /// RET near.
    pub ret_near: u32,
    /// PUSH reg.
    pub push_reg: u32,
    /// POP reg.
    pub pop_reg: u32,
    /// String op, per repetition (MOVS/STOS/LODS/CMPS/SCAS).
    pub string_rep: u32,
    /// MUL/IMUL (flat approximation; real hardware varies by operand).
    pub mul: u32,
    /// DIV/IDIV (flat approximation).
    pub div: u32,
    /// Shift/rotate by 1.
    pub shift_by_one: u32,
    /// Shift/rotate by CL, plus `shift_per_bit` per bit shifted.
    pub shift_by_cl: u32,
    /// Additional cost per bit for CL-counted shifts.
    pub shift_per_bit: u32,
    /// INT n / INTO / INT3 software interrupt dispatch.
    pub software_interrupt: u32,
    /// IRET.
    pub iret: u32,
    /// HLT (cost of the instruction itself; the CPU then idles).
    pub hlt: u32,
    /// EA base cost (§4.5: "8088 base 5").
    pub ea_base: u32,
    /// Extra EA cost when a displacement is present.
    pub ea_displacement: u32,
    /// Extra EA cost when a single index/base register is used.
    pub ea_single_reg: u32,
    /// Extra EA cost for the awkward BP+SI / BX+DI base+index pairs.
    pub ea_awkward_pair: u32,
}

impl CycleTable {
    /// Build the cycle table for `model`. 80286 effective-address costs
    /// are zeroed per §4.5 ("zeroed on 80286") since its pipelined bus
    /// interface absorbs EA computation.
    pub fn for_model(model: CpuModel) -> Self {
        let base = CycleTable {
            alu_reg: 3,
            alu_mem: 16,
            mov_reg: 2,
            mov_mem: 9,
            inc_dec_reg: 3,
            inc_dec_mem: 15,
            jcc_taken: 16,
            jcc_not_taken: 4,
            jmp_near: 15,
            call_near: 19,
            ret_near: 16,
            push_reg: 11,
            pop_reg: 8,
            string_rep: 17,
            mul: 118,
            div: 144,
            shift_by_one: 2,
            shift_by_cl: 8,
            shift_per_bit: 4,
            software_interrupt: 51,
            iret: 24,
            hlt: 2,
            ea_base: 5,
            ea_displacement: 1,
            ea_single_reg: 1,
            ea_awkward_pair: 2,
        };
        match model {
            CpuModel::Intel8088 => base,
            CpuModel::Intel80186 => CycleTable {
                alu_reg: 2,
                alu_mem: 9,
                mov_reg: 2,
                mov_mem: 6,
                inc_dec_reg: 2,
                inc_dec_mem: 7,
                jcc_taken: 4,
                jcc_not_taken: 3,
                jmp_near: 7,
                call_near: 10,
                ret_near: 8,
                push_reg: 3,
                pop_reg: 5,
                string_rep: 5,
                mul: 35,
                div: 38,
                shift_by_one: 2,
                shift_by_cl: 5,
                shift_per_bit: 1,
                software_interrupt: 45,
                iret: 17,
                hlt: 2,
                ..base
            },
            CpuModel::Intel80286 => CycleTable {
                alu_reg: 2,
                alu_mem: 7,
                mov_reg: 2,
                mov_mem: 3,
                inc_dec_reg: 2,
                inc_dec_mem: 3,
                jcc_taken: 3,
                jcc_not_taken: 3,
                jmp_near: 7,
                call_near: 7,
                ret_near: 11,
                push_reg: 3,
                pop_reg: 5,
                string_rep: 4,
                mul: 21,
                div: 25,
                shift_by_one: 2,
                shift_by_cl: 5,
                shift_per_bit: 1,
                software_interrupt: 40,
                iret: 17,
                hlt: 2,
                ea_base: 0,
                ea_displacement: 0,
                ea_single_reg: 0,
                ea_awkward_pair: 0,
            },
        }
    }
}
