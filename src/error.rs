//! Core error / fault type.
//!
//! `CoreError` serves dual purpose: it is the `Result` error type for
//! fallible core operations and the representation of every architected
//! x86 exception, trap, and abort from §7. `ExecCore` catches these and
//! routes them to `InterruptUnit` as synchronous interrupts; the core
//! itself never aborts on a guest-architected fault. A distinct
//! `HostFault` variant exists for conditions the architecture has no
//! vector for (a corrupted bus vtable, stepping after a prior host fault).

use thiserror::Error;

/// Errors raised while stepping the CPU core.
///
/// Each architected variant carries enough state to synthesize the
/// interrupt frame (`InterruptUnit::raise_from_error`): the vector is
/// derived by [`CoreError::vector`], and the optional hardware error
/// code by [`CoreError::error_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    /// #DE — DIV/IDIV divide-by-zero or quotient overflow.
    #[error("#DE divide error")]
    DivideError,
    /// #DB — TF=1 at instruction boundary.
    #[error("#DB debug trap")]
    DebugTrap,
    /// #BP — INT3.
    #[error("#BP breakpoint")]
    Breakpoint,
    /// #OF — INTO with OF=1.
    #[error("#OF overflow")]
    Overflow,
    /// #BR — BOUND out of range (80186+).
    #[error("#BR bound range exceeded")]
    BoundRange,
    /// #UD — reserved/unused opcode form on 80186+.
    #[error("#UD undefined opcode 0x{0:02X}")]
    UndefinedOpcode(u8),
    /// #DF — fault raised while already delivering a fault.
    #[error("#DF double fault")]
    DoubleFault,
    /// #TS — invalid TSS (80286 task switch).
    #[error("#TS invalid TSS, selector=0x{0:04X}")]
    InvalidTss(u16),
    /// #NP — segment/gate not present (80286).
    #[error("#NP segment not present, selector=0x{0:04X}")]
    SegmentNotPresent(u16),
    /// #SS — stack segment fault (80286; limit or not-present on SS).
    #[error("#SS stack fault, selector=0x{0:04X}")]
    StackFault(u16),
    /// #GP — general protection fault (80286).
    #[error("#GP general protection, selector/code=0x{0:04X}")]
    GeneralProtection(u16),
    /// Guest executed HLT. Not an architected vector; `ExecCore` treats
    /// this as "halt until an unmasked event arrives", not a fault.
    #[error("CPU halted")]
    Halted,
    /// Host-level condition the architecture has no vector for.
    #[error("host fault: {0}")]
    HostFault(&'static str),
}

impl CoreError {
    /// Interrupt vector number for architected faults/traps, `None` for
    /// `Halted`/`HostFault`, which never route through `InterruptUnit`.
    pub fn vector(self) -> Option<u8> {
        match self {
            CoreError::DivideError => Some(0),
            CoreError::DebugTrap => Some(1),
            CoreError::Breakpoint => Some(3),
            CoreError::Overflow => Some(4),
            CoreError::BoundRange => Some(5),
            CoreError::UndefinedOpcode(_) => Some(6),
            CoreError::DoubleFault => Some(8),
            CoreError::InvalidTss(_) => Some(10),
            CoreError::SegmentNotPresent(_) => Some(11),
            CoreError::StackFault(_) => Some(12),
            CoreError::GeneralProtection(_) => Some(13),
            CoreError::Halted | CoreError::HostFault(_) => None,
        }
    }

    /// Hardware error code pushed for faults that have one (80286
    /// protected mode only; real mode never pushes an error code).
    pub fn error_code(self) -> Option<u16> {
        match self {
            CoreError::InvalidTss(sel)
            | CoreError::SegmentNotPresent(sel)
            | CoreError::StackFault(sel)
            | CoreError::GeneralProtection(sel) => Some(sel),
            CoreError::DoubleFault => Some(0),
            _ => None,
        }
    }
}

/// Convenience result alias used throughout the core.
pub type Result<T> = core::result::Result<T, CoreError>;
