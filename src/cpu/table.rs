//! Instruction table construction per model (§4.6).
//!
//! Adapted from the teacher's `exec_primary`/`exec_secondary` match
//! dispatch (`executor/mod.rs`), but built as an actual 256-entry
//! function-pointer table assembled once per `Cpu::new`, since model
//! deltas (8086's `POP CS` at `0x0F`, the 80286-only secondary map) are
//! easiest to express as a handful of table-construction-time
//! substitutions rather than inline branches in every dispatch.

use super::ops_arith;
use super::ops_control;
use super::ops_data;
use super::ops_logic;
use super::ops_stack;
use super::ops_string;
use super::ops_system;
use super::Cpu;
use crate::error::{CoreError, Result};
use crate::instruction::{DecodedInst, OpcodeMap};
use crate::memory::MemoryBus;
use crate::model::CpuModel;

/// A handler executes one decoded instruction and returns the number of
/// bus cycles it consumed (including any EA cost for memory operands).
pub type HandlerFn = fn(&mut Cpu, &mut dyn MemoryBus, &DecodedInst) -> Result<u32>;

fn undefined(_cpu: &mut Cpu, _bus: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<u32> {
    Err(CoreError::UndefinedOpcode(inst.opcode))
}

/// Per-model dispatch table: one 256-entry primary map, plus an
/// optional 256-entry secondary (`0x0F xx`) map on models that have one.
pub struct InstructionTable {
    primary: [HandlerFn; 256],
    secondary: Option<[HandlerFn; 256]>,
}

impl InstructionTable {
    pub fn build(model: CpuModel) -> Self {
        let mut primary = [undefined as HandlerFn; 256];
        ops_data::install(&mut primary, model);
        ops_arith::install(&mut primary, model);
        ops_logic::install(&mut primary, model);
        ops_stack::install(&mut primary, model);
        ops_string::install(&mut primary, model);
        ops_control::install(&mut primary, model);

        if matches!(model, CpuModel::Intel8088) {
            // §4.6 model delta: 8086 decodes a lone 0x0F as POP CS.
            primary[0x0F] = ops_stack::exec_pop_cs;
        }

        let secondary = if model.has_0f_map() {
            let mut sec = [undefined as HandlerFn; 256];
            ops_system::install_secondary(&mut sec, model);
            Some(sec)
        } else {
            None
        };

        if model.has_protected_mode() {
            // ARPL (§4.6) is a Primary-map opcode (0x63), not part of
            // the 0x0F control-instruction set it's otherwise grouped
            // with in the spec prose.
            ops_system::install_arpl(&mut primary);
        }

        InstructionTable { primary, secondary }
    }

    pub fn dispatch(&self, inst: &DecodedInst) -> HandlerFn {
        match inst.opcode_map {
            OpcodeMap::Primary => self.primary[inst.opcode as usize],
            OpcodeMap::Secondary => match &self.secondary {
                Some(sec) => sec[inst.opcode as usize],
                None => undefined,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eighty286_has_secondary_map_8086_does_not() {
        let t286 = InstructionTable::build(CpuModel::Intel80286);
        assert!(t286.secondary.is_some());
        let t8086 = InstructionTable::build(CpuModel::Intel8088);
        assert!(t8086.secondary.is_none());
    }
}
