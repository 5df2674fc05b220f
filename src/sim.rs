//! Simulating and execution for 8051 firmware images.
//!
//! This module is focused on executing program images (flat byte sequences indexed from address 0).
//!
//! This module consists of:
//! - [`Machine`]: The struct that simulates a program image.
//! - [`mem`]: The module handling internal and external data memory.
//! - [`regs`]: The module handling working registers, register banks, and SFRs.
//! - [`opcodes`]: The module holding the opcode table and instruction semantics.
//! - [`observer`]: The module handling memory hooks.
//! - [`debug`]: The module handling breakpoints.
//! - [`clock`]: The module handling the clock that paces runs, along with stop and interrupt signals.
//! - [`listing`]: The module producing program listings.
//!
//! # Usage
//!
//! To simulate a program, create a machine with a clock period and load the image into it:
//!
//! ```
//! use mcs51_sim::sim::Machine;
//! use mcs51_sim::sim::clock::PERIOD_1MHZ;
//! use mcs51_sim::sim::regs::P0;
//!
//! let mut m = Machine::new(PERIOD_1MHZ);
//! m.load_program(&[
//!     0x75, 0x80, 0x55, // MOV P0, #0x55
//!     0x75, 0x80, 0xAA, // MOV P0, #0xAA
//!     0x80, 0xF8,       // SJMP 0x0000
//! ]);
//!
//! // stop when the loop jumps back
//! m.add_breakpoint(0x0006, |m| m.stop());
//! m.start().unwrap();
//!
//! // the jump at the breakpoint still executes
//! assert_eq!(m.pc, 0x0000);
//! assert_eq!(m.data[P0], 0xAA);
//! ```
//!
//! ## Flags
//!
//! A machine can also be configured with [`MachineFlags`]. For example,
//! to fill memory with deterministic noise and log every port write:
//!
//! ```
//! # use mcs51_sim::sim::{Machine, MachineFlags};
//! # use mcs51_sim::sim::clock::PERIOD_1MHZ;
//! use mcs51_sim::sim::mem::MemInitStrategy;
//!
//! let m = Machine::with_flags(PERIOD_1MHZ, MachineFlags {
//!     mem_init: MemInitStrategy::Seeded { seed: 51 },
//!     trace_ports: true,
//! });
//! ```
//!
//! ## Execution
//!
//! Beyond the clock-paced [`Machine::start`] (which runs until stopped or until an error occurs),
//! there are also:
//! - [`Machine::step`]: one instruction, without the clock
//! - [`Machine::run_while`], [`Machine::run_with_limit`]: unpaced programmatic execution
//!
//! ```
//! use mcs51_sim::sim::Machine;
//! use mcs51_sim::sim::clock::PERIOD_1MHZ;
//! use mcs51_sim::sim::regs::reg_consts::R0;
//!
//! let mut m = Machine::new(PERIOD_1MHZ);
//! m.load_program(&[
//!     0x78, 0x03, // MOV R0, #3
//!     0xD8, 0xFE, // DJNZ R0, $
//! ]);
//!
//! m.step().unwrap();
//! assert_eq!(m.read_reg(R0), 3);
//! m.run_while(|m| m.pc != 0x0004).unwrap();
//! assert_eq!(m.read_reg(R0), 0);
//! assert_eq!(m.instructions_run, 4);
//! ```
//!
//! ## Querying State
//!
//! - The PC is the `m.pc` field.
//! - Internal and external memory are the `m.data` and `m.xdata` fields.
//!     Indexing them directly does not trigger hooks.
//!     [`Machine::read`] and [`Machine::write`] do.
//! - Program memory is the `m.code` field.
//! - The registers of the active bank are accessed with [`Machine::read_reg`] and [`Machine::write_reg`].
pub mod clock;
pub mod debug;
pub mod listing;
pub mod mem;
pub mod observer;
pub mod opcodes;
pub mod regs;

use std::time::Duration;

use self::clock::{Clock, InterruptLine, Signal, StopHandle};
use self::debug::BreakpointRegistry;
use self::mem::{DataMem, ExtMem, MemInitStrategy};
use self::observer::HookRegistry;
use self::regs::{P0, P1, P2, P3};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum SimErr {
    /// The opcode at the PC is not in the opcode table.
    #[error("unsupported opcode {opcode:#04X} at C:{pc:04X}")]
    UnsupportedOpcode {
        /// The opcode byte.
        opcode: u8,
        /// Where it was fetched.
        pc: u16
    },
    /// The instruction at the PC does not fit in program memory.
    #[error("instruction at C:{addr:04X} is outside program memory ({len} bytes)")]
    OutOfBounds {
        /// Address of the instruction.
        addr: u16,
        /// Length of program memory.
        len: usize
    },
}

/// Configuration flags for [`Machine`].
///
/// These are preserved between resets.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct MachineFlags {
    /// The strategy used to fill memory on creation and reset.
    ///
    /// By default, this is [`MemInitStrategy::Zeroed`].
    pub mem_init: MemInitStrategy,

    /// Whether to log every write to the I/O ports (P0-P3) at the `info` level.
    ///
    /// This installs write hooks on the ports, so it only takes effect
    /// when the machine is created with [`Machine::with_flags`].
    ///
    /// By default, this flag is `false`.
    pub trace_ports: bool
}

/// Executes program images.
pub struct Machine {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Machine::reset`] resets these values.

    /// Internal data memory (register banks, stack, SFRs).
    pub data: DataMem,

    /// External data memory.
    ///
    /// Note that this is held in the heap, as it is too large for the stack.
    pub xdata: ExtMem,

    /// The program counter.
    pub pc: u16,

    /// The number of instructions successfully run since this `Machine` was created or reset.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Machine::reset`] does not reset these values.

    /// Program memory.
    ///
    /// This is only read by the machine. See [`Machine::load_program`].
    pub code: Vec<u8>,

    /// Configuration settings for the machine.
    pub flags: MachineFlags,

    /// Tick period and control channels.
    clock: Clock,

    /// Breakpoints, by program address.
    breakpoints: BreakpointRegistry,

    /// Memory hooks, by internal memory address.
    hooks: HookRegistry,
}
impl Machine where Machine: Send {}

impl Machine {
    /// Creates a new machine with the given clock period and default flags.
    ///
    /// All memory is zeroed, the PC is 0, and no program, breakpoints or hooks are present.
    pub fn new(period: Duration) -> Self {
        Self::with_flags(period, MachineFlags::default())
    }

    /// Creates a new machine with the given clock period and flags.
    pub fn with_flags(period: Duration, flags: MachineFlags) -> Self {
        let mut filler = flags.mem_init.generator();

        let mut m = Self {
            data: DataMem::new(&mut filler),
            xdata: ExtMem::new(&mut filler),
            pc: 0,
            instructions_run: 0,

            code: vec![],
            flags,
            clock: Clock::new(period),
            breakpoints: BreakpointRegistry::new(),
            hooks: HookRegistry::new(),
        };

        if flags.trace_ports {
            m.trace_ports();
        }
        m
    }

    fn trace_ports(&mut self) {
        for (port, name) in [(P0, "P0"), (P1, "P1"), (P2, "P2"), (P3, "P3")] {
            self.hook_write(port, move |m, old, new| {
                log::info!("C:{:04X} {name}: {old:02X} -> {new:02X}", m.pc);
            });
        }
    }

    /// Replaces program memory with a program image.
    ///
    /// The rest of the machine state is left as is.
    pub fn load_program(&mut self, image: &[u8]) {
        self.code = image.to_vec();
    }

    /// Resets the machine.
    ///
    /// This resets memory (according to [`MachineFlags::mem_init`]), the PC,
    /// the instruction counter, and any pending stop request.
    ///
    /// Note that this function preserves:
    /// - Program memory
    /// - Flags
    /// - Breakpoints
    /// - Hooks
    /// - Clock period (and any stop handles or interrupt lines created from it)
    pub fn reset(&mut self) {
        let mut filler = self.flags.mem_init.generator();

        self.data = DataMem::new(&mut filler);
        self.xdata = ExtMem::new(&mut filler);
        self.pc = 0;
        self.instructions_run = 0;
        self.clock.clear();
    }

    /// The time between two steps of [`Machine::start`].
    pub fn period(&self) -> Duration {
        self.clock.period()
    }

    /// Sets the time between two steps of [`Machine::start`].
    pub fn set_period(&mut self, period: Duration) {
        self.clock.set_period(period);
    }

    /// Requests the current run to stop.
    ///
    /// This does not block and can be called from breakpoints and hooks.
    /// The run stops before its next step.
    pub fn stop(&self) {
        self.clock.request_stop();
    }

    /// Creates a handle which can stop this machine from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.clock.stop_handle()
    }

    /// Creates a handle which can signal interrupts to this machine from another thread.
    pub fn interrupt_line(&self) -> InterruptLine {
        self.clock.interrupt_line()
    }

    /// Runs one step per clock tick until stopped.
    ///
    /// This blocks until a stop is requested (through [`Machine::stop`] or a [`StopHandle`])
    /// or until a step fails. Stop requests made before this call are discarded.
    ///
    /// If a step fails, the machine is left as it was before that step and the error is returned.
    pub fn start(&mut self) -> Result<(), SimErr> {
        self.clock.clear();
        let ticker = self.clock.ticker();
        log::info!("started at C:{:04X}, period {:?}", self.pc, self.clock.period());

        let result = loop {
            // stops requested during the last step
            if self.clock.take_stop() {
                break Ok(());
            }

            match self.clock.wait(&ticker) {
                Signal::Stop => break Ok(()),
                Signal::Interrupt(source) => log::trace!("ignoring interrupt signal {source:?}"),
                Signal::Tick => if let Err(e) = self.step() {
                    break Err(e);
                },
            }
        };

        match result {
            Ok(()) => log::info!("stopped at C:{:04X} after {} instructions", self.pc, self.instructions_run),
            Err(e) => log::warn!("halted: {e}"),
        }
        result
    }

    /// Runs until the tripwire condition returns false, a stop is requested, or a step fails.
    ///
    /// Unlike [`Machine::start`], this is not paced by the clock.
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Machine) -> bool) -> Result<(), SimErr> {
        self.clock.clear();

        loop {
            if self.clock.take_stop() || !tripwire(self) {
                break Ok(());
            }

            if let Err(e) = self.step() {
                log::warn!("halted: {e}");
                break Err(e);
            }
        }
    }

    /// Runs with a limit on how many instructions to execute.
    ///
    /// This stops early under the same conditions as [`Machine::run_while`].
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|m| m.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Simulates one step, executing one instruction.
    ///
    /// The instruction at the PC is fetched and decoded, then the breakpoints at the PC run,
    /// then the instruction executes.
    ///
    /// If a breakpoint moves the PC, the decoded instruction is dropped without executing
    /// and the next step fetches from the new PC.
    ///
    /// If the instruction cannot be fetched, an error is returned and the machine is unchanged.
    pub fn step(&mut self) -> Result<(), SimErr> {
        let pc = self.pc;
        let fetched = opcodes::fetch(&self.code, pc)?;

        self.fire_breakpoints(pc);
        if self.pc != pc {
            log::debug!("C:{pc:04X} {} dropped, breakpoint moved PC to C:{:04X}", fetched.instr.mnemonic, self.pc);
            return Ok(());
        }

        log::trace!("C:{pc:04X} {}", fetched.instr.mnemonic);
        fetched.execute(self);
        self.instructions_run = self.instructions_run.wrapping_add(1);
        Ok(())
    }

    /// Lists the loaded program, one instruction per line.
    ///
    /// See [`listing::disassemble`].
    pub fn listing(&self) -> Result<String, SimErr> {
        let lines = listing::disassemble(&self.code)?;

        Ok(lines.iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
impl Default for Machine {
    fn default() -> Self {
        Self::new(clock::PERIOD_1MHZ)
    }
}
impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &self.pc)
            .field("instructions_run", &self.instructions_run)
            .field("code_len", &self.code.len())
            .field("flags", &self.flags)
            .field("clock", &self.clock)
            .field("breakpoints", &self.breakpoints)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
