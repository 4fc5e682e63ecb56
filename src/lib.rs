//! A cycle-accurate software core for the Intel 8086/8088/80186/80188/
//! 80286 family (§1, §4).
//!
//! Provides the decode/execute/interrupt machinery for real-mode and
//! (on the 80286) protected-mode execution, driven by a host-supplied
//! [`MemoryBus`] and [`IoDispatch`] rather than owning any device
//! models itself:
//! - **Decoder** (`decoder.rs`) — variable-length instruction decoding,
//!   with per-model prefix and ModR/M handling
//! - **CPU** (`cpu/`) — register/flag/interrupt state, the per-model
//!   instruction table, and the fetch-decode-execute step loop
//! - **Memory** (`memory/`) — a block-indexed physical bus
//! - **Segmentation** (`segment.rs`) — real- and protected-mode
//!   segment-register loads and limit checks
//! - **Interrupts** (`interrupts.rs`) — IVT/IDT dispatch and the
//!   NOINTR inhibit window
//! - **I/O** (`io.rs`) — port I/O dispatch to host-registered handlers
//!
//! # Non-goals
//!
//! This crate emulates one CPU, not a machine: it ships no PIC/PIT/
//! UART/disk models, no BIOS, and no paging or long-mode support (§5).
//! A host harness supplies those by implementing [`MemoryBus`] and
//! [`IoHandler`].

pub mod cpu;
pub mod decoder;
pub mod error;
pub mod flags;
pub mod instruction;
pub mod interrupts;
pub mod io;
pub mod memory;
pub mod model;
pub mod prefetch;
pub mod registers;
pub mod save_state;
pub mod segment;

pub use cpu::{Cpu, CpuConfig, StepOutcome};
pub use error::{CoreError, Result};
pub use io::{IoDispatch, IoHandler};
pub use memory::{BlockBus, MemoryBus};
pub use model::CpuModel;
pub use save_state::SaveState;
