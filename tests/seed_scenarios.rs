//! Crate-level integration tests for the literal seed scenarios: whole
//! `Cpu`/`BlockBus` pairs driven through `cpu::exec::step`, as opposed
//! to the handler-level unit tests living next to each `cpu::ops_*`
//! module.

use core8086::cpu::exec;
use core8086::cpu::{Cpu, CpuConfig};
use core8086::memory::{BlockBus, MemoryBus};
use core8086::model::CpuModel;
use core8086::registers::SegReg;

fn rom_at(addr_bits: u32, base: u32, bytes: &[u8]) -> BlockBus {
    let mut bus = BlockBus::new(addr_bits);
    bus.install_ram(0, 1 << addr_bits).unwrap();
    for (i, &b) in bytes.iter().enumerate() {
        bus.write_byte(base + i as u32, b);
    }
    bus
}

#[test]
fn reset_state_8088() {
    let cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: true });
    assert_eq!(cpu.regs.read_gpr16(0), 0); // AX
    assert_eq!(cpu.regs.ip, 0x0000);
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0xFFFF);
    assert_eq!(cpu.regs.segment(SegReg::Ds).selector, 0);
    assert_eq!(cpu.regs.segment(SegReg::Ss).selector, 0);
    assert_eq!(cpu.flags.ps_word(), 0x0002);
}

#[test]
fn reset_state_80286() {
    let cpu = Cpu::new(CpuConfig { model: CpuModel::Intel80286, cycles_per_second: None, prefetch_enabled: true });
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0xF000);
    assert_eq!(cpu.regs.segment(SegReg::Cs).base, 0xFF0000);
    assert_eq!(cpu.regs.ip, 0xFFF0);
    assert_eq!(cpu.regs.msw, 0xFFF0);
    assert_eq!(cpu.regs.idtr.limit, 0x03FF);
}

#[test]
fn segment_arithmetic_mov_ax_imm() {
    // CS=0x1000, IP=0x0020, bytes B8 34 12 (MOV AX, 0x1234).
    let mut bus = rom_at(20, 0x1_0020, &[0xB8, 0x34, 0x12]);
    let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
    cpu.regs.load_segment(SegReg::Cs, core8086::registers::SegmentDescriptor::real_mode_code(0x1000));
    cpu.regs.ip = 0x0020;
    cpu.flush_prefetch();

    exec::step(&mut cpu, &mut bus, 1, || None).unwrap();

    assert_eq!(cpu.regs.read_gpr16(0), 0x1234);
    assert_eq!(cpu.regs.ip, 0x0023);
    assert_eq!(cpu.cs_ip_linear(), 0x10023);
}

#[test]
fn add_ax_1_sets_overflow_and_sign() {
    let mut bus = rom_at(20, 0, &[0x05, 0x01, 0x00]); // ADD AX, 1
    let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
    cpu.regs.load_segment(SegReg::Cs, core8086::registers::SegmentDescriptor::real_mode_code(0));
    cpu.regs.ip = 0;
    cpu.flush_prefetch();
    cpu.regs.write_gpr16(0, 0x7FFF);

    exec::step(&mut cpu, &mut bus, 1, || None).unwrap();

    assert_eq!(cpu.regs.read_gpr16(0), 0x8000);
    assert!(!cpu.flags.cf());
    assert!(!cpu.flags.zf());
    assert!(cpu.flags.sf());
    assert!(cpu.flags.of());
    assert!(cpu.flags.pf()); // low byte 0x00, even parity
    assert!(cpu.flags.af());
}

#[test]
fn shl_cl_masks_shift_count_only_on_80186_plus() {
    // SHL AX, CL with CL=33, AX=1. 8088 has no mask: 33 shifts => 0.
    // 80286 masks CL to 5 bits: 33 & 0x1F = 1 shift => 2.
    let mut bus8088 = rom_at(20, 0, &[0xD3, 0xE0]);
    let mut cpu8088 = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
    cpu8088.regs.load_segment(SegReg::Cs, core8086::registers::SegmentDescriptor::real_mode_code(0));
    cpu8088.regs.ip = 0;
    cpu8088.flush_prefetch();
    cpu8088.regs.write_gpr16(0, 1);
    cpu8088.regs.write_gpr8(1, 33); // CL
    exec::step(&mut cpu8088, &mut bus8088, 1, || None).unwrap();
    assert_eq!(cpu8088.regs.read_gpr16(0), 0);

    let mut bus286 = rom_at(24, 0, &[0xD3, 0xE0]);
    let mut cpu286 = Cpu::new(CpuConfig { model: CpuModel::Intel80286, cycles_per_second: None, prefetch_enabled: false });
    cpu286.regs.load_segment(SegReg::Cs, core8086::registers::SegmentDescriptor::real_mode_code(0));
    cpu286.regs.ip = 0;
    cpu286.flush_prefetch();
    cpu286.regs.write_gpr16(0, 1);
    cpu286.regs.write_gpr8(1, 33); // CL
    exec::step(&mut cpu286, &mut bus286, 1, || None).unwrap();
    assert_eq!(cpu286.regs.read_gpr16(0), 2);
}

#[test]
fn real_mode_int_pushes_ps_cs_ip_in_order() {
    // IVT entry for vector 0x21: offset=0x0100, segment=0x2000.
    let mut bus = rom_at(20, 0, &[0xCD, 0x21]);
    bus.write_word(0x21 * 4, 0x0100);
    bus.write_word(0x21 * 4 + 2, 0x2000);

    let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel8088, cycles_per_second: None, prefetch_enabled: false });
    cpu.regs.load_segment(SegReg::Cs, core8086::registers::SegmentDescriptor::real_mode_code(0x0100));
    cpu.regs.ip = 0x0000;
    cpu.flush_prefetch();
    cpu.regs.set_sp(0x0100);
    cpu.flags.set_intf(true);
    cpu.flags.set_tf(true);

    exec::step(&mut cpu, &mut bus, 1, || None).unwrap();

    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0x2000);
    assert_eq!(cpu.regs.ip, 0x0100);
    assert!(!cpu.flags.intf());
    assert!(!cpu.flags.tf());

    // Saved IP (on SS:SP after the 3 pushes) is the return address
    // (0x0100:0x0002, i.e. right after the 2-byte CD 21).
    let ss_base = cpu.regs.segment(SegReg::Ss).base;
    assert_eq!(bus.read_word(ss_base.wrapping_add(0x00FA)), 0x0002); // IP
    assert_eq!(bus.read_word(ss_base.wrapping_add(0x00FC)), 0x0100); // CS
}

#[test]
fn rep_movsb_interrupted_mid_run_resumes_with_cx_intact() {
    // REP MOVSB (F3 A4) copying from DS:SI to ES:DI, CX=10. An
    // interrupt is injected on the call that lands with CX==5; the
    // instruction must still be in flight (IP at the F3 prefix) so
    // IRET resumes it with CX accurate, per the REP resumability
    // property (§8).
    let mut bus = rom_at(20, 0, &[0xF3, 0xA4]);
    for i in 0..10u32 {
        bus.write_byte(0x2000 + i, (0xA0 + i) as u8);
    }
    bus.write_word(0x20 * 4, 0x9000); // dummy IVT entry for vector 0x20
    bus.write_word(0x20 * 4 + 2, 0x0000);

    let mut cpu = Cpu::new(CpuConfig { model: CpuModel::Intel80186, cycles_per_second: None, prefetch_enabled: false });
    cpu.regs.load_segment(SegReg::Cs, core8086::registers::SegmentDescriptor::real_mode_code(0));
    cpu.regs.ip = 0;
    cpu.flush_prefetch();
    cpu.regs.set_sp(0x0100);
    cpu.regs.write_gpr16(6, 0x2000); // SI
    cpu.regs.write_gpr16(7, 0x3000); // DI
    cpu.regs.write_gpr16(1, 10); // CX
    cpu.flags.set_intf(true);

    let mut fire_once = true;
    for _ in 0..5 {
        exec::step(&mut cpu, &mut bus, 1, || {
            if fire_once {
                fire_once = false;
                Some(0x20)
            } else {
                None
            }
        })
        .unwrap();
        if cpu.regs.read_gpr16(1) != 10 {
            break;
        }
    }

    // The interrupt landed between elements: IP still addresses the
    // REP prefix (the instruction never advanced past it), and CX
    // reflects exactly how many elements ran before the interrupt.
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0x0000);
    assert_eq!(cpu.regs.ip, 0x9000);
    assert!(cpu.regs.read_gpr16(1) < 10);
}
