//! Hardware policy API generator for bare-metal microcontrollers
//!
//! `halgen` is a command line tool that turns tiered JSON hardware metadata
//! into the per-MCU support code a firmware links against: pin and
//! alternate-function tables, `#[repr(C)]` register blocks with bitfield
//! constants and compile-time size assertions, hardware-policy types whose
//! register base address and clock frequency are const generic parameters,
//! startup code with an overridable interrupt vector table, and the
//! `device.x`/`memory.x` scripts the linker consumes.
//!
//! # Metadata tiers
//!
//! Metadata is layered: a *vendor* document carries the conventions shared
//! by every family of one silicon vendor, a *family* document describes one
//! MCU line (memory map, clock tree, peripheral instances, register
//! blocks), and an optional *peripheral* document overrides the register or
//! operation description of a single peripheral kind. More specific tiers
//! win, field by field; arrays and objects replace wholesale, so an
//! override never half-merges with what it replaces.
//!
//! # Usage
//!
//! ```text
//! $ halgen --family same70 -o generated/
//! ```
//!
//! generates, per MCU variant:
//!
//! ```text
//! generated/same70/ATSAME70Q21/
//!   .halgen-generated
//!   pins.rs
//!   registers/uart.rs
//!   policies/uart0.rs
//!   startup.rs
//!   device.x
//!   memory.x
//! ```
//!
//! A generated policy reads like the driver one would write by hand:
//!
//! ```text
//! pub struct Uart0Policy<const BASE: usize, const CLOCK_HZ: u32>;
//!
//! impl<const BASE: usize, const CLOCK_HZ: u32> Uart0Policy<BASE, CLOCK_HZ> {
//!     /// baud divisor `BRGR.CD`
//!     #[inline(always)]
//!     pub fn set_baud(rate: u32) {
//!         let divisor = CLOCK_HZ / (16 * rate);
//!         ..
//!     }
//! }
//!
//! pub type Uart0 = Uart0Policy<0x400e0800, 150000000>;
//! ```
//!
//! Generation is a single-threaded, idempotent batch: rerunning with
//! unchanged metadata produces byte-identical files, and every artifact is
//! written through a temporary file plus atomic rename, so an interrupted
//! run never leaves a truncated file behind.

pub mod config;
pub mod generate;
pub mod metadata;
pub mod render;
pub mod resolve;
pub mod util;

pub use crate::config::Config;
pub use crate::generate::{generate, GenerationReport, GenerationTarget};
pub use crate::metadata::MetadataSet;
pub use crate::resolve::{resolve, validate, ResolvedConfig};
