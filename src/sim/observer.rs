//! Memory hooks, which observe accesses to internal data memory.
//!
//! A hook is a callback attached to one internal-memory address.
//! You would typically register hooks via [`Machine::hook_read`] and [`Machine::hook_write`].
//!
//! - Read hooks run inside [`Machine::read`] and receive the value about to be returned.
//! - Write hooks run inside [`Machine::write`], before the store, and receive the old and new values.
//!
//! Hooks cannot change the value being read or written, but they receive the whole
//! [`Machine`] and may change any other state (for example, to emulate a peripheral that
//! updates a status register when its data register is written).
//!
//! While the hooks of an address are running, nested accesses to that same address
//! do not trigger them again.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use mcs51_sim::sim::Machine;
//! use mcs51_sim::sim::clock::PERIOD_1MHZ;
//! use mcs51_sim::sim::regs::P1;
//!
//! let mut m = Machine::new(PERIOD_1MHZ);
//! let seen = Arc::new(Mutex::new(vec![]));
//!
//! let log = Arc::clone(&seen);
//! m.hook_write(P1, move |_, old, new| log.lock().unwrap().push((old, new)));
//!
//! m.write(P1, 0x0F);
//! m.write(P1, 0xF0);
//! assert_eq!(*seen.lock().unwrap(), [(0x00, 0x0F), (0x0F, 0xF0)]);
//! ```
//!
//! [`Machine::hook_read`]: super::Machine::hook_read
//! [`Machine::hook_write`]: super::Machine::hook_write
//! [`Machine::read`]: super::Machine::read
//! [`Machine::write`]: super::Machine::write

use super::Machine;

/// A callback run when an address is read. Receives the value being read.
pub type ReadHook = Box<dyn FnMut(&mut Machine, u8) + Send>;
/// A callback run before an address is written. Receives the old and the new value.
pub type WriteHook = Box<dyn FnMut(&mut Machine, u8, u8) + Send>;

const SLOTS: usize = 1 << 8;

/// The hooks registered on each internal-memory address, in registration order.
pub struct HookRegistry {
    reads: Box<[Vec<ReadHook>; SLOTS]>,
    writes: Box<[Vec<WriteHook>; SLOTS]>,
}
impl HookRegistry {
    /// Creates a registry with no hooks.
    pub fn new() -> Self {
        Self {
            reads: Box::new(std::array::from_fn(|_| Vec::new())),
            writes: Box::new(std::array::from_fn(|_| Vec::new())),
        }
    }

    /// Appends a read hook to the given address.
    pub fn add_read(&mut self, addr: u8, hook: ReadHook) {
        self.reads[usize::from(addr)].push(hook);
    }
    /// Appends a write hook to the given address.
    pub fn add_write(&mut self, addr: u8, hook: WriteHook) {
        self.writes[usize::from(addr)].push(hook);
    }

    /// The number of read and write hooks at the given address.
    pub fn count(&self, addr: u8) -> (usize, usize) {
        let i = usize::from(addr);
        (self.reads[i].len(), self.writes[i].len())
    }

    /// Removes all hooks.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    // Hooks are taken out of the registry while they run (they need the whole machine),
    // then put back in front of any hooks registered in the meantime.
    pub(super) fn take_reads(&mut self, addr: u8) -> Vec<ReadHook> {
        std::mem::take(&mut self.reads[usize::from(addr)])
    }
    pub(super) fn restore_reads(&mut self, addr: u8, hooks: Vec<ReadHook>) {
        restore(&mut self.reads[usize::from(addr)], hooks);
    }
    pub(super) fn take_writes(&mut self, addr: u8) -> Vec<WriteHook> {
        std::mem::take(&mut self.writes[usize::from(addr)])
    }
    pub(super) fn restore_writes(&mut self, addr: u8, hooks: Vec<WriteHook>) {
        restore(&mut self.writes[usize::from(addr)], hooks);
    }
}
impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reads: usize = self.reads.iter().map(Vec::len).sum();
        let writes: usize = self.writes.iter().map(Vec::len).sum();

        f.debug_struct("HookRegistry")
            .field("reads", &reads)
            .field("writes", &writes)
            .finish()
    }
}

fn restore<T>(slot: &mut Vec<T>, hooks: Vec<T>) {
    let added = std::mem::replace(slot, hooks);
    slot.extend(added);
}

/// Hooked access to internal memory.
impl Machine {
    /// Reads internal memory at `addr`, running every read hook registered there first.
    pub fn read(&mut self, addr: u8) -> u8 {
        let value = self.data[addr];

        let mut hooks = self.hooks.take_reads(addr);
        if !hooks.is_empty() {
            for hook in &mut hooks {
                hook(self, value);
            }
            self.hooks.restore_reads(addr, hooks);
        }

        value
    }

    /// Writes `value` into internal memory at `addr`.
    ///
    /// Every write hook registered there runs first, with the value present before the write.
    pub fn write(&mut self, addr: u8, value: u8) {
        let old = self.data[addr];

        let mut hooks = self.hooks.take_writes(addr);
        if !hooks.is_empty() {
            for hook in &mut hooks {
                hook(self, old, value);
            }
            self.hooks.restore_writes(addr, hooks);
        }

        self.data[addr] = value;
    }

    /// Registers a read hook at `addr`.
    pub fn hook_read(&mut self, addr: u8, hook: impl FnMut(&mut Machine, u8) + Send + 'static) {
        self.hooks.add_read(addr, Box::new(hook));
    }

    /// Registers a write hook at `addr`.
    pub fn hook_write(&mut self, addr: u8, hook: impl FnMut(&mut Machine, u8, u8) + Send + 'static) {
        self.hooks.add_write(addr, Box::new(hook));
    }

    /// Removes every read and write hook, including the port tracing hooks.
    pub fn clear_hooks(&mut self) {
        self.hooks.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::sim::clock::PERIOD_1MHZ;
    use crate::sim::regs::{P0, P1, P2};
    use crate::sim::Machine;

    #[test]
    fn test_no_hooks_pass_through() {
        let mut m = Machine::new(PERIOD_1MHZ);
        assert_eq!(m.read(0x40), 0);
        m.write(0x40, 0x5A);
        assert_eq!(m.read(0x40), 0x5A);
        assert_eq!(m.data[0x40], 0x5A);
    }

    #[test]
    fn test_write_hook_sees_old_and_new() {
        let mut m = Machine::new(PERIOD_1MHZ);
        m.data[P0] = 0x33;

        let seen = Arc::new(Mutex::new(vec![]));
        let log = Arc::clone(&seen);
        m.hook_write(P0, move |m, old, new| {
            // the store has not happened yet
            assert_eq!(m.data[P0], old);
            log.lock().unwrap().push((old, new));
        });

        m.write(P0, 0x55);
        m.write(P0, 0xAA);
        assert_eq!(*seen.lock().unwrap(), [(0x33, 0x55), (0x55, 0xAA)]);
        assert_eq!(m.data[P0], 0xAA);
    }

    #[test]
    fn test_read_hook_sees_returned_value() {
        let mut m = Machine::new(PERIOD_1MHZ);
        m.data[0x30] = 0x77;

        let seen = Arc::new(Mutex::new(vec![]));
        let log = Arc::clone(&seen);
        m.hook_read(0x30, move |_, v| log.lock().unwrap().push(v));

        let v = m.read(0x30);
        assert_eq!(v, 0x77);
        assert_eq!(*seen.lock().unwrap(), [0x77]);
    }

    #[test]
    fn test_hooks_cannot_change_value() {
        let mut m = Machine::new(PERIOD_1MHZ);
        m.data[0x30] = 0x01;
        m.hook_read(0x30, |m, _| m.data[0x30] = 0xEE);
        m.hook_write(0x31, |m, _, _| m.data[0x31] = 0xEE);

        assert_eq!(m.read(0x30), 0x01);
        m.write(0x31, 0x02);
        assert_eq!(m.data[0x31], 0x02);
    }

    #[test]
    fn test_hooks_run_in_order_and_touch_other_cells() {
        let mut m = Machine::new(PERIOD_1MHZ);

        let order = Arc::new(Mutex::new(vec![]));
        for i in 0..3 {
            let order = Arc::clone(&order);
            m.hook_write(P1, move |m, _, new| {
                order.lock().unwrap().push(i);
                // mirror the port onto P2, like a loopback peripheral
                m.write(P2, new);
            });
        }

        m.write(P1, 0xC3);
        assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
        assert_eq!(m.data[P2], 0xC3);
        assert_eq!(m.hooks.count(P1), (0, 3));
    }

    #[test]
    fn test_reentrant_access_skips_running_hooks() {
        let mut m = Machine::new(PERIOD_1MHZ);
        let calls = Arc::new(Mutex::new(0));

        let c = Arc::clone(&calls);
        m.hook_write(0x20, move |m, _, new| {
            *c.lock().unwrap() += 1;
            m.write(0x20, new.wrapping_add(1));
        });
        // registers another hook on its own address while running
        m.hook_read(0x21, |m, _| m.hook_read(0x21, |_, _| {}));

        m.write(0x20, 0x10);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(m.data[0x20], 0x10);

        m.read(0x21);
        assert_eq!(m.hooks.count(0x21), (2, 0));
    }

    #[test]
    fn test_write_hooks_all_see_prewrite_value() {
        let mut m = Machine::new(PERIOD_1MHZ);
        m.data[0x40] = 0x11;

        let seen = Arc::new(Mutex::new(vec![]));
        m.hook_write(0x40, |m, _, _| m.data[0x40] = 0xEE);
        for _ in 0..2 {
            let log = Arc::clone(&seen);
            m.hook_write(0x40, move |_, old, _| log.lock().unwrap().push(old));
        }

        m.write(0x40, 0x22);
        assert_eq!(*seen.lock().unwrap(), [0x11, 0x11]);
        assert_eq!(m.data[0x40], 0x22);
    }

    #[test]
    fn test_clear_hooks() {
        let mut m = Machine::new(PERIOD_1MHZ);
        let calls = Arc::new(Mutex::new(0));

        let c = Arc::clone(&calls);
        m.hook_write(P1, move |_, _, _| *c.lock().unwrap() += 1);
        m.hook_read(P1, |_, _| {});
        m.write(P1, 0x01);

        m.clear_hooks();
        assert_eq!(m.hooks.count(P1), (0, 0));
        m.write(P1, 0x02);
        assert_eq!(m.read(P1), 0x02);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
