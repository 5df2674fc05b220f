//! Working registers and special-function registers.
//!
//! This module consists of:
//! - [`Reg`]: A working register (`R0`-`R7`) of the active register bank.
//! - The bank resolver on [`Machine`] ([`Machine::active_bank`], [`Machine::read_reg`], [`Machine::write_reg`]).
//! - [`Sfr`] and [`SFR_TABLE`]: The named special-function registers, used to label addresses in listings.
//!
//! The 8051 has four banks of eight working registers, aliased onto internal memory:
//!
//! | RS1 | RS0 | bank | addresses     |
//! |-----|-----|------|---------------|
//! | 0   | 0   | 0    | `0x00`-`0x07` |
//! | 0   | 1   | 1    | `0x08`-`0x0F` |
//! | 1   | 0   | 2    | `0x10`-`0x17` |
//! | 1   | 1   | 3    | `0x18`-`0x1F` |
//!
//! `RS0` and `RS1` are bits 3 and 4 of the PSW.
//!
//! ```
//! use mcs51_sim::sim::Machine;
//! use mcs51_sim::sim::clock::PERIOD_1MHZ;
//! use mcs51_sim::sim::regs::{reg_consts::R2, PSW};
//!
//! let mut m = Machine::new(PERIOD_1MHZ);
//! m.data[PSW] = 0b0001_0000; // RS1 set: bank 2
//! m.write_reg(R2, 0x42);
//! assert_eq!(m.data[0x12], 0x42);
//! ```

use std::num::TryFromIntError;

use super::Machine;

/// Stack pointer.
pub const SP: u8 = 0x81;
/// Data pointer, low byte.
pub const DPL: u8 = 0x82;
/// Data pointer, high byte.
pub const DPH: u8 = 0x83;
/// I/O port 0.
pub const P0: u8 = 0x80;
/// I/O port 1.
pub const P1: u8 = 0x90;
/// I/O port 2.
pub const P2: u8 = 0xA0;
/// I/O port 3.
pub const P3: u8 = 0xB0;
/// Processor status word.
pub const PSW: u8 = 0xD0;
/// Accumulator.
pub const ACC: u8 = 0xE0;
/// B register.
pub const B: u8 = 0xF0;

/// Bank select bit 0 of the PSW.
pub const PSW_RS0: u8 = 1 << 3;
/// Bank select bit 1 of the PSW.
pub const PSW_RS1: u8 = 1 << 4;

/// A working register. Must be between 0 and 7.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th register of the active bank.
    pub const R0: Reg = Reg(0);
    /// The 1st register of the active bank.
    pub const R1: Reg = Reg(1);
    /// The 2nd register of the active bank.
    pub const R2: Reg = Reg(2);
    /// The 3rd register of the active bank.
    pub const R3: Reg = Reg(3);
    /// The 4th register of the active bank.
    pub const R4: Reg = Reg(4);
    /// The 5th register of the active bank.
    pub const R5: Reg = Reg(5);
    /// The 6th register of the active bank.
    pub const R6: Reg = Reg(6);
    /// The 7th register of the active bank.
    pub const R7: Reg = Reg(7);
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}
impl From<Reg> for u8 {
    fn from(value: Reg) -> Self {
        value.0
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Reg(value)),
            // There is no public constructor for TryFromIntError.
            _     => u8::try_from(256u16).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}

/// A named special-function register.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Sfr {
    /// Address in internal memory.
    pub addr: u8,
    /// Symbolic name.
    pub name: &'static str
}

/// All special-function registers known to the simulator.
pub const SFR_TABLE: &[Sfr] = &[
    Sfr { addr: SP,   name: "SP" },
    Sfr { addr: DPL,  name: "DPL" },
    Sfr { addr: DPH,  name: "DPH" },
    Sfr { addr: P0,   name: "P0" },
    Sfr { addr: 0x87, name: "PCON" },
    Sfr { addr: 0x88, name: "TCON" },
    Sfr { addr: 0x89, name: "TMOD" },
    Sfr { addr: 0x8A, name: "TL0" },
    Sfr { addr: 0x8B, name: "TL1" },
    Sfr { addr: 0x8C, name: "TH0" },
    Sfr { addr: 0x8D, name: "TH1" },
    Sfr { addr: P1,   name: "P1" },
    Sfr { addr: 0x98, name: "SCON" },
    Sfr { addr: 0x99, name: "SBUF" },
    Sfr { addr: P2,   name: "P2" },
    Sfr { addr: 0xA8, name: "IE" },
    Sfr { addr: P3,   name: "P3" },
    Sfr { addr: 0xB8, name: "IP" },
    Sfr { addr: PSW,  name: "PSW" },
    Sfr { addr: ACC,  name: "ACC" },
    Sfr { addr: B,    name: "B" },
];

/// Finds the first SFR with the given name, or `None` if there is none.
pub fn find_sfr_by_name(name: &str) -> Option<&'static Sfr> {
    SFR_TABLE.iter().find(|r| r.name == name)
}

/// Finds the first SFR at the given address, or `None` if there is none.
pub fn find_sfr_by_addr(addr: u8) -> Option<&'static Sfr> {
    SFR_TABLE.iter().find(|r| r.addr == addr)
}

/// Bank resolver.
impl Machine {
    /// The index (0-3) of the register bank selected by the PSW.
    ///
    /// This reads the PSW without triggering hooks.
    pub fn active_bank(&self) -> u8 {
        let psw = self.data[PSW];

        let mut bank = 0;
        if psw & PSW_RS0 != 0 { bank |= 0b01 };
        if psw & PSW_RS1 != 0 { bank |= 0b10 };
        bank
    }

    /// The internal memory address of the given register in the active bank.
    pub fn reg_addr(&self, reg: Reg) -> u8 {
        self.active_bank() * 8 + reg.0
    }

    /// The eight registers of the active bank.
    pub fn bank_regs(&self) -> &[u8] {
        let start = usize::from(self.reg_addr(Reg(0)));
        &self.data.as_slice()[start..start + 8]
    }

    /// Reads a register of the active bank (through [`Machine::read`], so read hooks apply).
    pub fn read_reg(&mut self, reg: Reg) -> u8 {
        self.read(self.reg_addr(reg))
    }

    /// Writes a register of the active bank (through [`Machine::write`], so write hooks apply).
    pub fn write_reg(&mut self, reg: Reg, value: u8) {
        self.write(self.reg_addr(reg), value)
    }
}
