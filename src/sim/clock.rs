//! The clock that paces [`Machine::start`].
//!
//! A [`Clock`] owns a tick period and two request channels:
//! - stop requests, sent with [`Machine::stop`] or a [`StopHandle`],
//! - interrupt signals, sent with an [`InterruptLine`].
//!
//! The run loop waits on the ticker and both channels at once and executes one step per tick.
//! Interrupt signals are received and logged, but vectoring is not simulated.
//!
//! Requests never block. A request made while another of the same kind is
//! still pending is dropped.
//!
//! [`Machine::start`]: super::Machine::start
//! [`Machine::stop`]: super::Machine::stop
use std::time::{Duration, Instant};

use crossbeam_channel as cbc;

/// One tick per second.
pub const PERIOD_1HZ: Duration = Duration::from_secs(1);
/// Ten ticks per second.
pub const PERIOD_10HZ: Duration = Duration::from_millis(100);
/// 800 000 ticks per second.
pub const PERIOD_800KHZ: Duration = Duration::from_nanos(1250);
/// 1 000 000 ticks per second.
pub const PERIOD_1MHZ: Duration = Duration::from_micros(1);

/// What woke the run loop.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(super) enum Signal {
    Tick,
    Stop,
    Interrupt(Option<u8>)
}

/// Tick period and control channels of a machine.
pub struct Clock {
    period: Duration,
    stop_tx: cbc::Sender<()>,
    stop_rx: cbc::Receiver<()>,
    irq_tx: cbc::Sender<u8>,
    irq_rx: cbc::Receiver<u8>,
}
impl Clock {
    /// Creates a clock ticking at the given period.
    pub fn new(period: Duration) -> Self {
        let (stop_tx, stop_rx) = cbc::bounded(1);
        let (irq_tx, irq_rx) = cbc::bounded(1);

        Self { period, stop_tx, stop_rx, irq_tx, irq_rx }
    }

    /// The time between two steps of a run.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sets the period. This applies from the next run.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Creates a handle which can stop runs of this clock from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_tx.clone())
    }

    /// Creates a handle which can signal interrupts to this clock from any thread.
    pub fn interrupt_line(&self) -> InterruptLine {
        InterruptLine(self.irq_tx.clone())
    }

    pub(super) fn request_stop(&self) {
        // full means a stop is already pending
        let _ = self.stop_tx.try_send(());
    }

    /// Consumes a pending stop request, returning whether there was one.
    pub(super) fn take_stop(&self) -> bool {
        self.stop_rx.try_recv().is_ok()
    }

    /// Discards pending stop requests and interrupt signals.
    pub(super) fn clear(&self) {
        self.stop_rx.try_iter().for_each(drop);
        self.irq_rx.try_iter().for_each(drop);
    }

    pub(super) fn ticker(&self) -> cbc::Receiver<Instant> {
        cbc::tick(self.period)
    }

    /// Blocks until the next tick, stop request, or interrupt signal.
    pub(super) fn wait(&self, ticker: &cbc::Receiver<Instant>) -> Signal {
        cbc::select! {
            recv(self.stop_rx) -> _ => Signal::Stop,
            recv(self.irq_rx) -> source => Signal::Interrupt(source.ok()),
            recv(ticker) -> _ => Signal::Tick,
        }
    }
}
impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("period", &self.period)
            .field("stop_pending", &!self.stop_rx.is_empty())
            .finish_non_exhaustive()
    }
}

/// A cloneable handle that stops a running machine.
///
/// ```
/// use std::thread;
/// use std::time::Duration;
/// use mcs51_sim::sim::Machine;
/// use mcs51_sim::sim::clock::PERIOD_1MHZ;
///
/// let mut m = Machine::new(PERIOD_1MHZ);
/// m.load_program(&[0x80, 0xFE]); // SJMP $
///
/// let handle = m.stop_handle();
/// let running = thread::spawn(move || m.start().map(|()| m));
///
/// while !running.is_finished() {
///     handle.stop();
///     thread::sleep(Duration::from_millis(1));
/// }
/// let m = running.join().unwrap().unwrap();
/// assert_eq!(m.pc, 0);
/// ```
#[derive(Debug, Clone)]
pub struct StopHandle(cbc::Sender<()>);
impl StopHandle {
    /// Requests the machine to stop before its next step.
    pub fn stop(&self) {
        let _ = self.0.try_send(());
    }
}

/// A cloneable handle that signals interrupts to a running machine.
///
/// Signals are accepted by the run loop and logged at the `trace` level. They have no other effect.
#[derive(Debug, Clone)]
pub struct InterruptLine(cbc::Sender<u8>);
impl InterruptLine {
    /// Signals an interrupt from the given source.
    pub fn raise(&self, source: u8) {
        let _ = self.0.try_send(source);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Clock, Signal, PERIOD_1HZ};

    #[test]
    fn test_stop_requests_collapse() {
        let clock = Clock::new(PERIOD_1HZ);
        let handle = clock.stop_handle();

        handle.stop();
        clock.request_stop();
        handle.stop();

        assert!(clock.take_stop());
        assert!(!clock.take_stop());
    }

    #[test]
    fn test_clear_discards_pending() {
        let clock = Clock::new(PERIOD_1HZ);
        clock.request_stop();
        clock.interrupt_line().raise(3);

        clock.clear();
        assert!(!clock.take_stop());
    }

    #[test]
    fn test_wait_signals() {
        // a long period so that the ticker never wins
        let clock = Clock::new(PERIOD_1HZ);
        let ticker = clock.ticker();

        clock.stop_handle().stop();
        assert_eq!(clock.wait(&ticker), Signal::Stop);

        clock.interrupt_line().raise(0x0B);
        assert_eq!(clock.wait(&ticker), Signal::Interrupt(Some(0x0B)));

        let mut clock = Clock::new(PERIOD_1HZ);
        clock.set_period(Duration::from_millis(1));
        let ticker = clock.ticker();
        assert_eq!(clock.wait(&ticker), Signal::Tick);
    }
}
