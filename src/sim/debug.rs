//! Utilities to debug simulation.
//!
//! The key type here is [`BreakpointRegistry`], which holds the callbacks
//! run when the program counter reaches an address.
//! Breakpoints are usually added through [`Machine::add_breakpoint`].
//!
//! A breakpoint runs once per visit, right after its instruction has been fetched and decoded
//! and right before it executes. Callbacks at the same address run in the order they were added.
//! A callback can end a run with [`Machine::stop`].
//!
//! [`Machine::add_breakpoint`]: super::Machine::add_breakpoint
//! [`Machine::stop`]: super::Machine::stop
use std::collections::BTreeMap;

use super::Machine;

/// A callback run when the program counter reaches its address.
pub type Breakpoint = Box<dyn FnMut(&mut Machine) + Send>;

/// The breakpoints registered on each program address.
#[derive(Default)]
pub struct BreakpointRegistry {
    points: BTreeMap<u16, Vec<Breakpoint>>
}
impl BreakpointRegistry {
    /// Creates a registry with no breakpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a breakpoint at the given program address.
    pub fn add(&mut self, addr: u16, bp: Breakpoint) {
        self.points.entry(addr).or_default().push(bp);
    }

    /// The number of breakpoints at the given program address.
    pub fn count(&self, addr: u16) -> usize {
        self.points.get(&addr).map_or(0, Vec::len)
    }

    /// All program addresses with at least one breakpoint, in address order.
    pub fn addrs(&self) -> impl Iterator<Item=u16> + '_ {
        self.points.keys().copied()
    }

    /// Removes all breakpoints.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub(super) fn take(&mut self, addr: u16) -> Option<Vec<Breakpoint>> {
        self.points.remove(&addr)
    }
    pub(super) fn restore(&mut self, addr: u16, bps: Vec<Breakpoint>) {
        let slot = self.points.entry(addr).or_default();
        let added = std::mem::replace(slot, bps);
        slot.extend(added);
    }
}
impl std::fmt::Debug for BreakpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.points.iter().map(|(addr, bps)| (format!("C:{addr:04X}"), bps.len())))
            .finish()
    }
}

impl Machine {
    /// Registers a breakpoint callback at the given program address.
    pub fn add_breakpoint(&mut self, addr: u16, bp: impl FnMut(&mut Machine) + Send + 'static) {
        self.breakpoints.add(addr, Box::new(bp));
    }

    /// Removes every breakpoint.
    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Runs every breakpoint at `addr`.
    pub(super) fn fire_breakpoints(&mut self, addr: u16) {
        if let Some(mut bps) = self.breakpoints.take(addr) {
            log::debug!("breakpoint at C:{addr:04X} ({} callbacks)", bps.len());
            for bp in &mut bps {
                bp(self);
            }
            self.breakpoints.restore(addr, bps);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::BreakpointRegistry;
    use crate::sim::clock::PERIOD_1MHZ;
    use crate::sim::Machine;

    #[test]
    fn test_registry_order_and_count() {
        let mut reg = BreakpointRegistry::new();
        reg.add(0x10, Box::new(|_| {}));
        reg.add(0x04, Box::new(|_| {}));
        reg.add(0x10, Box::new(|_| {}));

        assert_eq!(reg.count(0x10), 2);
        assert_eq!(reg.count(0x04), 1);
        assert_eq!(reg.count(0x00), 0);
        assert_eq!(reg.addrs().collect::<Vec<_>>(), [0x04, 0x10]);

        reg.clear();
        assert_eq!(reg.addrs().count(), 0);
    }

    #[test]
    fn test_fire_in_registration_order() {
        let mut m = Machine::new(PERIOD_1MHZ);
        let order = Arc::new(Mutex::new(vec![]));

        for i in 0..3 {
            let order = Arc::clone(&order);
            m.add_breakpoint(0x0100, move |_| order.lock().unwrap().push(i));
        }
        // a callback that adds another callback at its own address
        m.add_breakpoint(0x0100, |m| m.add_breakpoint(0x0100, |_| {}));

        m.fire_breakpoints(0x0100);
        assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
        assert_eq!(m.breakpoints.count(0x0100), 5);

        m.fire_breakpoints(0x0200);
        assert_eq!(order.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_clear_breakpoints() {
        // SJMP $
        let mut m = Machine::new(PERIOD_1MHZ);
        m.load_program(&[0x80, 0xFE]);
        let hits = Arc::new(Mutex::new(0));

        let h = Arc::clone(&hits);
        m.add_breakpoint(0x0000, move |_| *h.lock().unwrap() += 1);
        m.step().unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);

        m.clear_breakpoints();
        assert_eq!(m.breakpoints.addrs().count(), 0);
        m.step().unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(m.instructions_run, 2);
    }
}
