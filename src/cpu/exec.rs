//! ExecCore: the step loop tying decode, dispatch, interrupt delivery,
//! and cycle/prefetch budgeting together (§4.7).
//!
//! Adapted from the teacher's `Cpu::run` (`cpu_legacy_reference.rs`):
//! same fetch/decode/execute/catch-and-inject shape, but budgeted in
//! bus cycles instead of an instruction count, and routed through
//! `InstructionTable::dispatch` instead of a single `executor::execute`
//! match. The teacher's page-fault/paging branches have no counterpart
//! here (this family has no MMU); what remains is the fault-injection
//! pattern and the halt/breakpoint exit reasons.

use super::Cpu;
use crate::error::Result;
use crate::memory::MemoryBus;

/// Outcome of one call to [`step`]. Mirrors the `cycles_executed`
/// convention a debugger front-end (out of scope for this core) would
/// rely on: normal completion reports cycles spent, a pre-dispatch
/// breakpoint reports zero without having touched architected state, a
/// post-dispatch breakpoint reports the instruction already committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The budget was exhausted (or the core halted) after executing
    /// zero or more instructions; `cycles_executed` is the bus-cycle
    /// cost actually spent, which may exceed `min_cycles` by the cost
    /// of whatever instruction was in flight when the budget ran out.
    Completed { cycles_executed: u32 },
    /// `pre_dispatch_breakpoint` fired before this instruction was
    /// decoded; no state changed.
    PreDispatchBreakpoint,
    /// `post_dispatch_breakpoint` fired after this instruction
    /// committed; `cycles_executed` reflects that instruction's cost.
    PostDispatchBreakpoint { cycles_executed: u32 },
}

/// Run the core until at least `min_cycles` bus cycles have been spent
/// or the core halts with nothing to wake it, polling `poll_irq` for a
/// pending maskable interrupt ahead of each instruction.
pub fn step(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    min_cycles: u32,
    poll_irq: impl FnMut() -> Option<u8>,
) -> Result<StepOutcome> {
    let mut no_break = |_addr: u32| false;
    step_with_breakpoints(cpu, bus, min_cycles, poll_irq, &mut no_break, &mut no_break)
}

/// As [`step`], additionally consulting `pre_dispatch_breakpoint` and
/// `post_dispatch_breakpoint` (each given the linear address of the
/// instruction in question) so a host debugger can halt the loop at an
/// instruction boundary without the core needing to know what a
/// breakpoint set even means.
pub fn step_with_breakpoints(
    cpu: &mut Cpu,
    bus: &mut dyn MemoryBus,
    min_cycles: u32,
    mut poll_irq: impl FnMut() -> Option<u8>,
    pre_dispatch_breakpoint: &mut dyn FnMut(u32) -> bool,
    post_dispatch_breakpoint: &mut dyn FnMut(u32) -> bool,
) -> Result<StepOutcome> {
    let mut remaining: i64 = min_cycles as i64;
    let mut cycles_executed: u32 = 0;

    loop {
        if cpu.halted {
            // Halted: nothing runs except the interrupt poll that might
            // wake us. If it doesn't, the budget cannot be spent on
            // anything else, so stop here rather than spin.
            if !cpu.interrupts.nointr() {
                cpu.interrupts.check_intr(
                    &mut cpu.regs,
                    &mut cpu.flags,
                    bus,
                    cpu.model,
                    &mut poll_irq,
                )?;
            }
            if !cpu.interrupts.flags.contains(crate::interrupts::IntFlags::HALT) {
                cpu.halted = false;
            } else {
                return Ok(StepOutcome::Completed { cycles_executed });
            }
        }

        if remaining <= 0 {
            return Ok(StepOutcome::Completed { cycles_executed });
        }

        let linear_ip = cpu.cs_ip_linear();
        cpu.interrupts.check_return_notify(linear_ip);

        // checkINTR() ahead of dispatch, honoring the one-instruction
        // NOINTR inhibit window armed by an SS reload or STI.
        if !cpu.interrupts.flags.is_empty() && !cpu.interrupts.nointr() {
            let acknowledged = cpu.interrupts.check_intr(
                &mut cpu.regs,
                &mut cpu.flags,
                bus,
                cpu.model,
                &mut poll_irq,
            )?;
            if acknowledged && min_cycles == 0 {
                // Single-step caller: report the interrupt delivery
                // itself as the completed step rather than also
                // dispatching the handler's first instruction.
                return Ok(StepOutcome::Completed { cycles_executed });
            }
            if cpu.interrupts.flags.contains(crate::interrupts::IntFlags::HALT) {
                return Ok(StepOutcome::Completed { cycles_executed });
            }
        }

        let linear_ip = cpu.cs_ip_linear();
        if pre_dispatch_breakpoint(linear_ip) {
            return Ok(StepOutcome::PreDispatchBreakpoint);
        }

        let inst = match cpu.decoder.decode(bus, &mut cpu.prefetch, linear_ip) {
            Ok(inst) => inst,
            Err(e) => {
                log::debug!("decode fault at {:#x}: {}", linear_ip, e);
                cpu.interrupts.raise_from_error(&mut cpu.regs, &mut cpu.flags, bus, e)?;
                cpu.flush_prefetch();
                continue;
            }
        };

        cpu.last_opcode = inst.opcode;
        cpu.last_fetch_addr = linear_ip;

        let handler = cpu.table.dispatch(&inst);
        match handler(cpu, bus, &inst) {
            Ok(cost) => {
                cpu.instruction_count += 1;
                cycles_executed = cycles_executed.saturating_add(cost);
                remaining -= cost as i64;
                spend_spare_cycles(cpu, &*bus, &mut remaining);

                if post_dispatch_breakpoint(linear_ip) {
                    return Ok(StepOutcome::PostDispatchBreakpoint { cycles_executed });
                }
            }
            Err(e) => {
                log::debug!("exec fault at {:#x} opcode=0x{:02x}: {}", linear_ip, inst.opcode, e);
                cpu.interrupts.raise_from_error(&mut cpu.regs, &mut cpu.flags, bus, e)?;
                cpu.flush_prefetch();
            }
        }
    }
}

/// After an instruction completes, spend whatever cycle budget is left
/// in this call refilling the prefetch queue, one byte per
/// `CYCLES_PER_FETCHED_BYTE` (§4.4). This reproduces the
/// prefetch-dependent timing the architected tests probe without
/// modeling the bus interface unit as a concurrent pipeline stage.
fn spend_spare_cycles(cpu: &mut Cpu, bus: &dyn MemoryBus, remaining: &mut i64) {
    if *remaining <= 0 {
        return;
    }
    let spare_bytes = (*remaining / crate::prefetch::CYCLES_PER_FETCHED_BYTE as i64) as usize;
    if spare_bytes == 0 {
        return;
    }
    let spent = cpu.prefetch.fill(bus, spare_bytes);
    *remaining -= spent as i64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuConfig;
    use crate::memory::BlockBus;
    use crate::model::CpuModel;
    use crate::registers::{SegReg, SegmentDescriptor};

    fn seed_flat_cs(cpu: &mut Cpu) {
        *cpu.regs.segment_mut(SegReg::Cs) = SegmentDescriptor::real_mode_code(0);
        cpu.regs.ip = 0;
        cpu.flush_prefetch();
    }

    fn bus_with(bytes: &[(u32, u8)]) -> BlockBus {
        let mut bus = BlockBus::new(20);
        bus.install_ram(0, 0x1000).unwrap();
        for &(addr, b) in bytes {
            bus.write_byte(addr, b);
        }
        bus
    }

    #[test]
    fn steps_a_nop_and_advances_ip() {
        let mut bus = bus_with(&[(0, 0x90)]); // NOP
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
        seed_flat_cs(&mut cpu);
        let outcome = step(&mut cpu, &mut bus, 1, || None).unwrap();
        match outcome {
            StepOutcome::Completed { cycles_executed } => assert!(cycles_executed >= 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(cpu.regs.ip, 1);
    }

    #[test]
    fn hlt_stops_the_loop_with_nothing_to_wake_it() {
        let mut bus = bus_with(&[(0, 0xF4)]); // HLT
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
        seed_flat_cs(&mut cpu);
        let outcome = step(&mut cpu, &mut bus, 1000, || None).unwrap();
        assert!(cpu.halted);
        match outcome {
            StepOutcome::Completed { .. } => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn pre_dispatch_breakpoint_fires_before_state_changes() {
        let mut bus = bus_with(&[(0, 0x90)]);
        let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
        seed_flat_cs(&mut cpu);
        let outcome = step_with_breakpoints(&mut cpu, &mut bus, 1, || None, &mut |_| true, &mut |_| false).unwrap();
        assert_eq!(outcome, StepOutcome::PreDispatchBreakpoint);
        assert_eq!(cpu.regs.ip, 0);
    }
}
