//! An instruction-level simulator for MCS-51 (8051) firmware.
//!
//! This is meant to test compiled firmware images without hardware:
//! single-step through a program, attach breakpoints, and emulate peripherals with memory hooks.
//!
//! # Usage
//!
//! A program image is a flat byte sequence indexed from address 0
//! (for instance, the output of an Intel HEX loader). It is loaded into a [`sim::Machine`]:
//! ```
//! use mcs51_sim::sim::Machine;
//! use mcs51_sim::sim::clock::PERIOD_1MHZ;
//! use mcs51_sim::sim::regs::P1;
//!
//! let mut m = Machine::new(PERIOD_1MHZ);
//! m.load_program(&[
//!     0x7F, 0x88, // MOV R7, #0x88
//!     0x8F, 0x90, // MOV P1, R7
//!     0x80, 0xFE, // SJMP $
//! ]);
//!
//! // a peripheral listening on P1
//! m.hook_write(P1, |m, _, new| if new == 0x88 { m.stop() });
//! m.start().unwrap(); // <-- Result can be handled accordingly
//!
//! assert_eq!(m.data[P1], 0x88);
//! ```
//!
//! The loaded program can also be listed:
//! ```
//! # use mcs51_sim::sim::Machine;
//! # let mut m = Machine::default();
//! # m.load_program(&[0x7F, 0x88, 0x8F, 0x90, 0x80, 0xFE]);
//! println!("{}", m.listing().unwrap());
//! ```
//!
//! If more granularity is needed for simulation, there are also stepping and bounded run functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod sim;
