//! The opcode table and instruction semantics.
//!
//! This module consists of:
//! - [`Instr`]: The descriptor of one opcode (length, mnemonic, semantic action).
//! - [`Action`]: What an instruction does, with the working register it is bound to (if any).
//! - [`lookup`]: O(1) lookup into the static 256-entry dispatch table.
//! - [`fetch`] and [`Fetched`]: A decoded instruction at some program address,
//!     which can be executed against a [`Machine`] or rendered as operand text.
//!
//! Status flags other than the register-bank bits are not modeled,
//! so only instructions that do not touch them are present in the table.
//! Adding an instruction means adding an [`Action`] variant, a row in the table,
//! and the corresponding arms in [`Fetched::execute`] and [`Fetched::render_operands`].
//!
//! ```
//! use mcs51_sim::sim::opcodes::{fetch, lookup};
//!
//! // MOV P0, #0x55
//! let image = [0x75, 0x80, 0x55];
//! let instr = lookup(0x75).unwrap();
//! assert_eq!((instr.mnemonic, instr.len), ("MOV", 3));
//!
//! let fetched = fetch(&image, 0).unwrap();
//! assert_eq!(fetched.next_pc(), 3);
//! assert_eq!(fetched.render_operands().as_deref(), Some("P0(0x80), #0x55"));
//! ```

use super::regs::{find_sfr_by_addr, Reg, ACC, DPH, DPL, SP};
use super::{Machine, SimErr};

/// The semantic action of an instruction.
///
/// Families of per-register instructions (such as `MOV Rn, #imm`) carry the register
/// selected by their opcode.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Action {
    /// `NOP`
    Nop,
    /// `LJMP addr16`
    Ljmp,
    /// `LCALL addr16`
    Lcall,
    /// `RET`
    Ret,
    /// `SJMP rel`
    Sjmp,
    /// `JZ rel`
    Jz,
    /// `JNZ rel`
    Jnz,
    /// `DJNZ Rn, rel`
    DjnzReg(Reg),
    /// `DJNZ direct, rel`
    DjnzDirect,
    /// `INC A`
    IncA,
    /// `DEC A`
    DecA,
    /// `INC direct`
    IncDirect,
    /// `DEC direct`
    DecDirect,
    /// `INC Rn`
    IncReg(Reg),
    /// `DEC Rn`
    DecReg(Reg),
    /// `INC DPTR`
    IncDptr,
    /// `CLR A`
    ClrA,
    /// `MOV A, #imm`
    MovAImm,
    /// `MOV A, Rn`
    MovAReg(Reg),
    /// `MOV A, direct`
    MovADirect,
    /// `MOV A, @Ri`
    MovAInd(Reg),
    /// `MOV Rn, #imm`
    MovRegImm(Reg),
    /// `MOV Rn, A`
    MovRegA(Reg),
    /// `MOV Rn, direct`
    MovRegDirect(Reg),
    /// `MOV direct, #imm`
    MovDirectImm,
    /// `MOV direct, A`
    MovDirectA,
    /// `MOV direct, Rn`
    MovDirectReg(Reg),
    /// `MOV direct, direct` (encoded source first, then destination)
    MovDirectDirect,
    /// `MOV direct, @Ri`
    MovDirectInd(Reg),
    /// `MOV @Ri, A`
    MovIndA(Reg),
    /// `MOV @Ri, #imm`
    MovIndImm(Reg),
    /// `MOV @Ri, direct`
    MovIndDirect(Reg),
    /// `MOV DPTR, #imm16`
    MovDptrImm,
    /// `MOVX A, @DPTR`
    MovxADptr,
    /// `MOVX @DPTR, A`
    MovxDptrA,
    /// `PUSH direct`
    Push,
    /// `POP direct`
    Pop,
}

/// The descriptor of an implemented opcode.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Instr {
    /// The opcode byte. This is also this descriptor's index in the dispatch table.
    pub opcode: u8,
    /// Encoded length in bytes (1-3), opcode included.
    pub len: u8,
    /// Assembly mnemonic.
    pub mnemonic: &'static str,
    /// What the instruction does.
    pub action: Action
}

const fn row(opcode: u8, len: u8, mnemonic: &'static str, action: Action) -> Option<Instr> {
    Some(Instr { opcode, len, mnemonic, action })
}

static OPCODES: [Option<Instr>; 256] = build_table();

const fn build_table() -> [Option<Instr>; 256] {
    let mut t = [None; 256];

    t[0x00] = row(0x00, 1, "NOP",   Action::Nop);
    t[0x02] = row(0x02, 3, "LJMP",  Action::Ljmp);
    t[0x04] = row(0x04, 1, "INC",   Action::IncA);
    t[0x05] = row(0x05, 2, "INC",   Action::IncDirect);
    t[0x12] = row(0x12, 3, "LCALL", Action::Lcall);
    t[0x14] = row(0x14, 1, "DEC",   Action::DecA);
    t[0x15] = row(0x15, 2, "DEC",   Action::DecDirect);
    t[0x22] = row(0x22, 1, "RET",   Action::Ret);
    t[0x60] = row(0x60, 2, "JZ",    Action::Jz);
    t[0x70] = row(0x70, 2, "JNZ",   Action::Jnz);
    t[0x74] = row(0x74, 2, "MOV",   Action::MovAImm);
    t[0x75] = row(0x75, 3, "MOV",   Action::MovDirectImm);
    t[0x80] = row(0x80, 2, "SJMP",  Action::Sjmp);
    t[0x85] = row(0x85, 3, "MOV",   Action::MovDirectDirect);
    t[0x90] = row(0x90, 3, "MOV",   Action::MovDptrImm);
    t[0xA3] = row(0xA3, 1, "INC",   Action::IncDptr);
    t[0xC0] = row(0xC0, 2, "PUSH",  Action::Push);
    t[0xD0] = row(0xD0, 2, "POP",   Action::Pop);
    t[0xD5] = row(0xD5, 3, "DJNZ",  Action::DjnzDirect);
    t[0xE0] = row(0xE0, 1, "MOVX",  Action::MovxADptr);
    t[0xE4] = row(0xE4, 1, "CLR",   Action::ClrA);
    t[0xE5] = row(0xE5, 2, "MOV",   Action::MovADirect);
    t[0xF0] = row(0xF0, 1, "MOVX",  Action::MovxDptrA);
    t[0xF5] = row(0xF5, 2, "MOV",   Action::MovDirectA);

    // @R0 and @R1 families (low bit of the opcode)
    let mut n = 0;
    while n < 2 {
        let r = Reg(n);
        let i = n as usize;
        t[0x76 + i] = row(0x76 + n, 2, "MOV", Action::MovIndImm(r));
        t[0x86 + i] = row(0x86 + n, 2, "MOV", Action::MovDirectInd(r));
        t[0xA6 + i] = row(0xA6 + n, 2, "MOV", Action::MovIndDirect(r));
        t[0xE6 + i] = row(0xE6 + n, 1, "MOV", Action::MovAInd(r));
        t[0xF6 + i] = row(0xF6 + n, 1, "MOV", Action::MovIndA(r));
        n += 1;
    }

    // Rn families (low three bits of the opcode)
    let mut n = 0;
    while n < 8 {
        let r = Reg(n);
        let i = n as usize;
        t[0x08 + i] = row(0x08 + n, 1, "INC",  Action::IncReg(r));
        t[0x18 + i] = row(0x18 + n, 1, "DEC",  Action::DecReg(r));
        t[0x78 + i] = row(0x78 + n, 2, "MOV",  Action::MovRegImm(r));
        t[0x88 + i] = row(0x88 + n, 2, "MOV",  Action::MovDirectReg(r));
        t[0xA8 + i] = row(0xA8 + n, 2, "MOV",  Action::MovRegDirect(r));
        t[0xD8 + i] = row(0xD8 + n, 2, "DJNZ", Action::DjnzReg(r));
        t[0xE8 + i] = row(0xE8 + n, 1, "MOV",  Action::MovAReg(r));
        t[0xF8 + i] = row(0xF8 + n, 1, "MOV",  Action::MovRegA(r));
        n += 1;
    }

    t
}

/// Looks up the descriptor of an opcode, or `None` if the opcode is not implemented.
pub fn lookup(opcode: u8) -> Option<&'static Instr> {
    OPCODES[usize::from(opcode)].as_ref()
}

/// Decodes the instruction at `pc` in a program image.
///
/// This fails with:
/// - [`SimErr::OutOfBounds`] if `pc` is past the end of the image,
/// - [`SimErr::UnsupportedOpcode`] if the opcode is not in the table,
/// - [`SimErr::OutOfBounds`] if the instruction's operand bytes run past the end of the image.
pub fn fetch(image: &[u8], pc: u16) -> Result<Fetched, SimErr> {
    let len = image.len();
    let start = usize::from(pc);

    let &opcode = image.get(start)
        .ok_or(SimErr::OutOfBounds { addr: pc, len })?;
    let instr = lookup(opcode)
        .ok_or(SimErr::UnsupportedOpcode { opcode, pc })?;
    let bytes = image.get(start + 1 .. start + usize::from(instr.len))
        .ok_or(SimErr::OutOfBounds { addr: pc, len })?;

    let mut operands = [0; 2];
    operands[..bytes.len()].copy_from_slice(bytes);
    Ok(Fetched { pc, instr, operands })
}

/// An instruction decoded at some program address.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Fetched {
    /// Address of the opcode byte.
    pub pc: u16,
    /// The opcode's descriptor.
    pub instr: &'static Instr,
    /// The operand bytes following the opcode. Bytes past the instruction's length are zero.
    pub operands: [u8; 2]
}
impl Fetched {
    /// The address right after this instruction's encoding.
    pub fn next_pc(&self) -> u16 {
        self.pc.wrapping_add(u16::from(self.instr.len))
    }

    /// The encoded bytes of this instruction, opcode first.
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.instr.opcode];
        bytes.extend_from_slice(&self.operands[..usize::from(self.instr.len) - 1]);
        bytes
    }

    /// The two operand bytes as a big-endian address.
    fn addr16(&self) -> u16 {
        u16::from_be_bytes(self.operands)
    }

    /// The target of a relative branch, which is relative to the following instruction.
    fn branch_target(&self, rel: u8) -> u16 {
        self.next_pc().wrapping_add_signed(i16::from(rel as i8))
    }

    /// Executes this instruction against a machine.
    ///
    /// Every access to internal memory goes through [`Machine::read`] and [`Machine::write`],
    /// so hooks observe it. The program counter is set by the instruction,
    /// either to the next instruction or to a jump target.
    pub fn execute(&self, m: &mut Machine) {
        let [b1, b2] = self.operands;
        let next = self.next_pc();

        m.pc = match self.instr.action {
            Action::Nop => next,
            Action::Ljmp => self.addr16(),
            Action::Lcall => {
                let [hi, lo] = next.to_be_bytes();
                m.push(lo);
                m.push(hi);
                self.addr16()
            },
            Action::Ret => {
                let hi = m.pop();
                let lo = m.pop();
                u16::from_be_bytes([hi, lo])
            },
            Action::Sjmp => self.branch_target(b1),
            Action::Jz => match m.read(ACC) {
                0 => self.branch_target(b1),
                _ => next
            },
            Action::Jnz => match m.read(ACC) {
                0 => next,
                _ => self.branch_target(b1)
            },
            Action::DjnzReg(r) => {
                let value = m.read_reg(r).wrapping_sub(1);
                m.write_reg(r, value);
                if value != 0 { self.branch_target(b1) } else { next }
            },
            Action::DjnzDirect => {
                let value = m.read(b1).wrapping_sub(1);
                m.write(b1, value);
                if value != 0 { self.branch_target(b2) } else { next }
            },
            Action::IncA => {
                let value = m.read(ACC).wrapping_add(1);
                m.write(ACC, value);
                next
            },
            Action::DecA => {
                let value = m.read(ACC).wrapping_sub(1);
                m.write(ACC, value);
                next
            },
            Action::IncDirect => {
                let value = m.read(b1).wrapping_add(1);
                m.write(b1, value);
                next
            },
            Action::DecDirect => {
                let value = m.read(b1).wrapping_sub(1);
                m.write(b1, value);
                next
            },
            Action::IncReg(r) => {
                let value = m.read_reg(r).wrapping_add(1);
                m.write_reg(r, value);
                next
            },
            Action::DecReg(r) => {
                let value = m.read_reg(r).wrapping_sub(1);
                m.write_reg(r, value);
                next
            },
            Action::IncDptr => {
                let dptr = m.read_dptr().wrapping_add(1);
                m.write_dptr(dptr);
                next
            },
            Action::ClrA => {
                m.write(ACC, 0);
                next
            },
            Action::MovAImm => {
                m.write(ACC, b1);
                next
            },
            Action::MovAReg(r) => {
                let value = m.read_reg(r);
                m.write(ACC, value);
                next
            },
            Action::MovADirect => {
                let value = m.read(b1);
                m.write(ACC, value);
                next
            },
            Action::MovAInd(r) => {
                let addr = m.read_reg(r);
                let value = m.read(addr);
                m.write(ACC, value);
                next
            },
            Action::MovRegImm(r) => {
                m.write_reg(r, b1);
                next
            },
            Action::MovRegA(r) => {
                let value = m.read(ACC);
                m.write_reg(r, value);
                next
            },
            Action::MovRegDirect(r) => {
                let value = m.read(b1);
                m.write_reg(r, value);
                next
            },
            Action::MovDirectImm => {
                m.write(b1, b2);
                next
            },
            Action::MovDirectA => {
                let value = m.read(ACC);
                m.write(b1, value);
                next
            },
            Action::MovDirectReg(r) => {
                let value = m.read_reg(r);
                m.write(b1, value);
                next
            },
            Action::MovDirectDirect => {
                let value = m.read(b1);
                m.write(b2, value);
                next
            },
            Action::MovDirectInd(r) => {
                let addr = m.read_reg(r);
                let value = m.read(addr);
                m.write(b1, value);
                next
            },
            Action::MovIndA(r) => {
                let value = m.read(ACC);
                let addr = m.read_reg(r);
                m.write(addr, value);
                next
            },
            Action::MovIndImm(r) => {
                let addr = m.read_reg(r);
                m.write(addr, b1);
                next
            },
            Action::MovIndDirect(r) => {
                let value = m.read(b1);
                let addr = m.read_reg(r);
                m.write(addr, value);
                next
            },
            Action::MovDptrImm => {
                m.write_dptr(self.addr16());
                next
            },
            Action::MovxADptr => {
                let dptr = m.read_dptr();
                let value = m.xdata[dptr];
                m.write(ACC, value);
                next
            },
            Action::MovxDptrA => {
                let value = m.read(ACC);
                let dptr = m.read_dptr();
                m.xdata[dptr] = value;
                next
            },
            Action::Push => {
                // SP is incremented before the source is read
                let sp = m.read(SP).wrapping_add(1);
                m.write(SP, sp);
                let value = m.read(b1);
                m.write(sp, value);
                next
            },
            Action::Pop => {
                // the destination is stored before SP moves
                let sp = m.read(SP);
                let value = m.read(sp);
                m.write(b1, value);
                let sp = m.read(SP);
                m.write(SP, sp.wrapping_sub(1));
                next
            },
        };
    }

    /// Renders the operands of this instruction as assembly text,
    /// or `None` if the instruction has no operands.
    ///
    /// Direct addresses of known SFRs are labeled with their name (e.g., `P0(0x80)`).
    /// Relative branches are shown as `C:<offset>(<target>)`.
    pub fn render_operands(&self) -> Option<String> {
        let [b1, b2] = self.operands;

        let text = match self.instr.action {
            Action::Nop | Action::Ret => return None,
            Action::Ljmp | Action::Lcall => format!("C:{:04X}", self.addr16()),
            Action::Sjmp | Action::Jz | Action::Jnz => self.render_rel(b1),
            Action::DjnzReg(r) => format!("{r}, {}", self.render_rel(b1)),
            Action::DjnzDirect => format!("{}, {}", render_direct(b1), self.render_rel(b2)),
            Action::IncA | Action::DecA | Action::ClrA => String::from("A"),
            Action::IncDirect | Action::DecDirect | Action::Push | Action::Pop => render_direct(b1),
            Action::IncReg(r) | Action::DecReg(r) => r.to_string(),
            Action::IncDptr => String::from("DPTR"),
            Action::MovAImm => format!("A, #0x{b1:02X}"),
            Action::MovAReg(r) => format!("A, {r}"),
            Action::MovADirect => format!("A, {}", render_direct(b1)),
            Action::MovAInd(r) => format!("A, @{r}"),
            Action::MovRegImm(r) => format!("{r}, #0x{b1:02X}"),
            Action::MovRegA(r) => format!("{r}, A"),
            Action::MovRegDirect(r) => format!("{r}, {}", render_direct(b1)),
            Action::MovDirectImm => format!("{}, #0x{b2:02X}", render_direct(b1)),
            Action::MovDirectA => format!("{}, A", render_direct(b1)),
            Action::MovDirectReg(r) => format!("{}, {r}", render_direct(b1)),
            Action::MovDirectDirect => format!("{}, {}", render_direct(b2), render_direct(b1)),
            Action::MovDirectInd(r) => format!("{}, @{r}", render_direct(b1)),
            Action::MovIndA(r) => format!("@{r}, A"),
            Action::MovIndImm(r) => format!("@{r}, #0x{b1:02X}"),
            Action::MovIndDirect(r) => format!("@{r}, {}", render_direct(b1)),
            Action::MovDptrImm => format!("DPTR, #0x{:04X}", self.addr16()),
            Action::MovxADptr => String::from("A, @DPTR"),
            Action::MovxDptrA => String::from("@DPTR, A"),
        };

        Some(text)
    }

    fn render_rel(&self, rel: u8) -> String {
        format!("C:{}({:04X})", rel as i8, self.branch_target(rel))
    }
}

fn render_direct(addr: u8) -> String {
    match find_sfr_by_addr(addr) {
        Some(sfr) => format!("{}(0x{addr:02X})", sfr.name),
        None => format!("0x{addr:02X}"),
    }
}

/// Stack and data pointer helpers used by instructions.
impl Machine {
    /// Pre-increments SP, then stores the value at the new SP.
    fn push(&mut self, value: u8) {
        let sp = self.read(SP).wrapping_add(1);
        self.write(SP, sp);
        self.write(sp, value);
    }

    /// Reads the value at SP, then decrements SP.
    fn pop(&mut self) -> u8 {
        let sp = self.read(SP);
        let value = self.read(sp);
        self.write(SP, sp.wrapping_sub(1));
        value
    }

    fn read_dptr(&mut self) -> u16 {
        u16::from_be_bytes([self.read(DPH), self.read(DPL)])
    }

    fn write_dptr(&mut self, dptr: u16) {
        let [hi, lo] = dptr.to_be_bytes();
        self.write(DPH, hi);
        self.write(DPL, lo);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{fetch, lookup, Action};
    use crate::sim::clock::PERIOD_1MHZ;
    use crate::sim::regs::reg_consts::{R0, R1, R3};
    use crate::sim::regs::{ACC, DPH, DPL, P1, PSW, SP};
    use crate::sim::{Machine, SimErr};

    fn machine_with(code: &[u8]) -> Machine {
        let mut m = Machine::new(PERIOD_1MHZ);
        m.load_program(code);
        m
    }

    #[test]
    fn test_table_rows_are_consistent() {
        let mut implemented = 0;
        for op in 0..=255u8 {
            if let Some(instr) = lookup(op) {
                assert_eq!(instr.opcode, op, "row {op:02X} is keyed wrong");
                assert!((1..=3).contains(&instr.len), "row {op:02X} has bad length {}", instr.len);
                implemented += 1;
            }
        }
        assert_eq!(implemented, 98);

        assert_eq!(lookup(0xDB).map(|i| i.action), Some(Action::DjnzReg(R3)));
        assert_eq!(lookup(0xA5), None);
    }

    #[test]
    fn test_dispatch_totality() {
        // Every implemented opcode, executed with zeroed operands (or a jump to its own end),
        // must leave the PC right after its encoding.
        for op in 0..=255u8 {
            let Some(instr) = lookup(op) else {
                let mut m = machine_with(&[op, 0, 0]);
                assert_eq!(m.step(), Err(SimErr::UnsupportedOpcode { opcode: op, pc: 0 }));
                assert_eq!(m.pc, 0);
                continue;
            };

            let code = match instr.action {
                Action::Ljmp | Action::Lcall => [op, 0, instr.len],
                _ => [op, 0, 0],
            };
            let mut m = machine_with(&code);
            // RET returns to 0x0001
            m.data[SP] = 0x08;
            m.data[0x08] = 0x00;
            m.data[0x07] = 0x01;

            assert_eq!(m.step(), Ok(()), "opcode {op:02X}");
            assert_eq!(m.pc, u16::from(instr.len), "opcode {op:02X} ({})", instr.mnemonic);
        }
    }

    #[test]
    fn test_fetch_errors() {
        // past the end
        assert_eq!(fetch(&[0x00], 1), Err(SimErr::OutOfBounds { addr: 1, len: 1 }));
        assert_eq!(fetch(&[], 0), Err(SimErr::OutOfBounds { addr: 0, len: 0 }));
        // unsupported comes before truncation
        assert_eq!(fetch(&[0xA5], 0), Err(SimErr::UnsupportedOpcode { opcode: 0xA5, pc: 0 }));
        // truncated operands
        assert_eq!(fetch(&[0x00, 0x02, 0x00], 1), Err(SimErr::OutOfBounds { addr: 1, len: 3 }));

        let f = fetch(&[0x00, 0x02, 0x12, 0x34], 1).unwrap();
        assert_eq!(f.operands, [0x12, 0x34]);
        assert_eq!(f.bytes(), [0x02, 0x12, 0x34]);
        assert_eq!(f.next_pc(), 4);
    }

    #[test]
    fn test_relative_branch() {
        // SJMP -8 at 0x0022 lands on 0x001C
        let mut code = vec![0; 0x24];
        code[0x22..].copy_from_slice(&[0x80, 0xF8]);
        let mut m = machine_with(&code);
        m.pc = 0x22;
        m.step().unwrap();
        assert_eq!(m.pc, 0x1C);

        // SJMP $ stays put
        let mut m = machine_with(&[0x80, 0xFE]);
        m.step().unwrap();
        assert_eq!(m.pc, 0);

        // backwards past zero wraps modulo 2^16
        let mut m = machine_with(&[0x80, 0xFC]);
        m.step().unwrap();
        assert_eq!(m.pc, 0xFFFE);

        // forward
        let f = fetch(&[0x80, 0x7F], 0).unwrap();
        assert_eq!(f.branch_target(0x7F), 0x81);
    }

    #[test]
    fn test_jz_jnz() {
        // JZ +2; JNZ +2
        let code = [0x60, 0x02, 0x00, 0x00, 0x70, 0x02];
        let mut m = machine_with(&code);
        m.step().unwrap();
        assert_eq!(m.pc, 4);
        m.step().unwrap();
        assert_eq!(m.pc, 6);

        let mut m = machine_with(&code);
        m.data[ACC] = 1;
        m.step().unwrap();
        assert_eq!(m.pc, 2);
        m.pc = 4;
        m.step().unwrap();
        assert_eq!(m.pc, 8);
    }

    #[test]
    fn test_stack_discipline() {
        // MOV SP,#0x2F; PUSH P1; POP 0x30
        let mut m = machine_with(&[0x75, 0x81, 0x2F, 0xC0, 0x90, 0xD0, 0x30]);
        m.data[P1] = 0x5A;

        m.step().unwrap();
        m.step().unwrap();
        assert_eq!(m.data[SP], 0x30);
        assert_eq!(m.data[0x30], 0x5A);

        // POP into the slot it reads from
        m.step().unwrap();
        assert_eq!(m.data[SP], 0x2F);
        assert_eq!(m.data[0x30], 0x5A);
    }

    #[test]
    fn test_pop_into_sp() {
        // POP SP: the popped byte lands in SP, then SP is decremented from there
        let mut m = machine_with(&[0xD0, 0x81]);
        m.data[SP] = 0x30;
        m.data[0x30] = 0x40;

        m.step().unwrap();
        assert_eq!(m.data[SP], 0x3F);
        assert_eq!(m.pc, 2);
    }

    #[test]
    fn test_pop_stores_before_moving_sp() {
        let mut m = machine_with(&[0xD0, 0x50]);
        m.data[SP] = 0x30;
        m.data[0x30] = 0x2F;

        let writes = Arc::new(Mutex::new(vec![]));
        let log = Arc::clone(&writes);
        m.hook_write(0x50, move |m, _, new| log.lock().unwrap().push(("dest", new, m.data[SP])));
        let log = Arc::clone(&writes);
        m.hook_write(SP, move |m, _, new| log.lock().unwrap().push(("sp", new, m.data[0x50])));

        m.step().unwrap();
        assert_eq!(*writes.lock().unwrap(), [("dest", 0x2F, 0x30), ("sp", 0x2F, 0x2F)]);
        assert_eq!(m.data[SP], 0x2F);
        assert_eq!(m.data[0x50], 0x2F);
    }

    #[test]
    fn test_lcall_ret() {
        // 0x0000 LCALL 0x0100; 0x0100 RET
        let mut code = vec![0; 0x101];
        code[..3].copy_from_slice(&[0x12, 0x01, 0x00]);
        code[0x100] = 0x22;

        let mut m = machine_with(&code);
        m.data[SP] = 0x07;

        m.step().unwrap();
        assert_eq!(m.pc, 0x0100);
        assert_eq!(m.data[SP], 0x09);
        // low byte first
        assert_eq!(&m.data.as_slice()[0x08..0x0A], &[0x03, 0x00]);

        m.step().unwrap();
        assert_eq!(m.pc, 0x0003);
        assert_eq!(m.data[SP], 0x07);
    }

    #[test]
    fn test_indirect_and_external() {
        let code = [
            0x78, 0x40,       // MOV R0, #0x40
            0x74, 0x99,       // MOV A, #0x99
            0xF6,             // MOV @R0, A
            0x79, 0x40,       // MOV R1, #0x40
            0x87, 0x41,       // MOV 0x41, @R1
            0x90, 0x12, 0x34, // MOV DPTR, #0x1234
            0xF0,             // MOVX @DPTR, A
            0xA3,             // INC DPTR
            0xE4,             // CLR A
            0xE0,             // MOVX A, @DPTR
            0x85, 0x41, 0x42, // MOV 0x42, 0x41
        ];
        let mut m = machine_with(&code);
        m.xdata[0x1235] = 0x77;
        m.run_with_limit(11).unwrap();

        assert_eq!(m.pc, code.len() as u16);
        assert_eq!(m.data[0x40], 0x99);
        assert_eq!(m.data[0x41], 0x99);
        assert_eq!(m.data[0x42], 0x99);
        assert_eq!(m.xdata[0x1234], 0x99);
        assert_eq!((m.data[DPH], m.data[DPL]), (0x12, 0x35));
        assert_eq!(m.data[ACC], 0x77);
        assert_eq!(m.read_reg(R1), 0x40);
        assert_eq!(m.read_reg(R0), 0x40);
    }

    #[test]
    fn test_register_actions_follow_bank() {
        // MOV PSW,#0x18; MOV R3,#0x21; INC R3; MOV A,R3
        let mut m = machine_with(&[0x75, 0xD0, 0x18, 0x7B, 0x21, 0x0B, 0xEB]);
        m.run_with_limit(4).unwrap();

        assert_eq!(m.data[PSW], 0x18);
        assert_eq!(m.data[0x1B], 0x22);
        assert_eq!(m.data[0x03], 0x00);
        assert_eq!(m.data[ACC], 0x22);
    }

    #[test]
    fn test_djnz_wraps() {
        // DJNZ R0 starting from 0 wraps to 0xFF and branches
        let mut m = machine_with(&[0xD8, 0xFE]);
        m.step().unwrap();
        assert_eq!(m.read_reg(R0), 0xFF);
        assert_eq!(m.pc, 0);

        // DJNZ direct falls through on reaching zero
        let mut m = machine_with(&[0xD5, 0x30, 0xFD]);
        m.data[0x30] = 1;
        m.step().unwrap();
        assert_eq!(m.data[0x30], 0);
        assert_eq!(m.pc, 3);
    }

    #[test]
    fn test_render_operands() {
        let cases: &[(&[u8], Option<&str>)] = &[
            (&[0x00],             None),
            (&[0x02, 0x00, 0x25], Some("C:0025")),
            (&[0x75, 0x80, 0x55], Some("P0(0x80), #0x55")),
            (&[0x75, 0x30, 0x01], Some("0x30, #0x01")),
            (&[0x78, 0x7F],       Some("R0, #0x7F")),
            (&[0xD8, 0xFD],       Some("R0, C:-3(FFFF)")),
            (&[0x80, 0x02],       Some("C:2(0004)")),
            (&[0x85, 0x90, 0x80], Some("P0(0x80), P1(0x90)")),
            (&[0x8F, 0x90],       Some("P1(0x90), R7")),
            (&[0x90, 0x12, 0x34], Some("DPTR, #0x1234")),
            (&[0xE6],             Some("A, @R0")),
            (&[0xF0],             Some("@DPTR, A")),
            (&[0xC0, 0xD0],       Some("PSW(0xD0)")),
        ];

        for &(code, expected) in cases {
            let f = fetch(code, 0).unwrap();
            assert_eq!(f.render_operands().as_deref(), expected, "{code:02X?}");
            // no hidden state
            assert_eq!(f.render_operands(), f.render_operands());
        }
    }
}
