//! Program listings.
//!
//! [`disassemble`] walks a program image from address 0 and decodes one instruction after another,
//! using the same opcode table the machine executes with.
//!
//! ```
//! use mcs51_sim::sim::listing::disassemble;
//!
//! let image = [0x75, 0x80, 0x55, 0x80, 0xFB];
//! let lines = disassemble(&image).unwrap();
//!
//! assert_eq!(lines[0].to_string(), "0000\t75 80 55\tMOV\tP0(0x80), #0x55");
//! assert_eq!(lines[1].to_string(), "0003\t80 FB\tSJMP\tC:-5(0000)");
//! ```
use std::fmt::Write;

use super::opcodes::fetch;
use super::SimErr;

/// One listed instruction.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ListingLine {
    /// Address of the instruction.
    pub addr: u16,
    /// The encoded bytes.
    pub bytes: Vec<u8>,
    /// The mnemonic.
    pub mnemonic: &'static str,
    /// The rendered operands, if the instruction has any.
    pub operands: Option<String>
}
impl std::fmt::Display for ListingLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}\t", self.addr)?;
        for (i, b) in self.bytes.iter().enumerate() {
            if i != 0 { f.write_char(' ')?; }
            write!(f, "{b:02X}")?;
        }
        write!(f, "\t{}", self.mnemonic)?;
        if let Some(ops) = &self.operands {
            write!(f, "\t{ops}")?;
        }
        Ok(())
    }
}

/// Lists every instruction of a program image, in address order.
///
/// This fails on the first unsupported opcode or truncated instruction.
pub fn disassemble(image: &[u8]) -> Result<Vec<ListingLine>, SimErr> {
    let mut lines = vec![];
    let mut addr = 0;

    while usize::from(addr) < image.len() {
        let fetched = fetch(image, addr)?;
        lines.push(ListingLine {
            addr,
            bytes: fetched.bytes(),
            mnemonic: fetched.instr.mnemonic,
            operands: fetched.render_operands()
        });

        match fetched.next_pc() {
            // wrapped past the end of the address space
            next if next <= addr => break,
            next => addr = next,
        }
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::disassemble;
    use crate::sim::clock::PERIOD_1MHZ;
    use crate::sim::{Machine, SimErr};

    #[test]
    fn test_listing_of_call_program() {
        let image = [
            0x02, 0x00, 0x06, // LJMP 0x0006
            0x8F, 0x90,       // MOV P1, R7
            0x22,             // RET
            0x7F, 0x88,       // MOV R7, #0x88
            0x12, 0x00, 0x03, // LCALL 0x0003
            0x80, 0xFE,       // SJMP $
        ];
        let text: Vec<_> = disassemble(&image).unwrap()
            .iter()
            .map(|l| l.to_string())
            .collect();

        assert_eq!(text, [
            "0000\t02 00 06\tLJMP\tC:0006",
            "0003\t8F 90\tMOV\tP1(0x90), R7",
            "0005\t22\tRET",
            "0006\t7F 88\tMOV\tR7, #0x88",
            "0008\t12 00 03\tLCALL\tC:0003",
            "000B\t80 FE\tSJMP\tC:-2(000B)",
        ]);
    }

    #[test]
    fn test_listing_is_idempotent() {
        let mut m = Machine::new(PERIOD_1MHZ);
        m.load_program(&[0x78, 0x7F, 0xE4, 0xF6, 0xD8, 0xFD]);

        let first = m.listing().unwrap();
        let second = m.listing().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.lines().count(), 4);
    }

    #[test]
    fn test_listing_errors() {
        assert_eq!(disassemble(&[]), Ok(vec![]));
        assert_eq!(
            disassemble(&[0x00, 0xA5]),
            Err(SimErr::UnsupportedOpcode { opcode: 0xA5, pc: 1 })
        );
        assert_eq!(
            disassemble(&[0x00, 0x75, 0x80]),
            Err(SimErr::OutOfBounds { addr: 1, len: 3 })
        );
    }
}
