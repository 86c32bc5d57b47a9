//! TSTP Timer API
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::Time;

/// Timer trait provides the monotonic timestamp source the MAC runs on.
///
/// All times are in ticks relative to the same unknown epoc. The timer owns a
/// single compare interrupt, expiry is routed by the board to [`crate::mac::Mac::on_timer`].
pub trait Timer {
    /// Current time in ticks
    fn now(&self) -> Time;

    /// Time latched by the radio at the start-of-frame delimiter of the last received frame
    fn sfd(&self) -> Time;

    /// Arm the compare interrupt for an absolute time, replacing any armed interrupt
    fn interrupt_at(&self, when: Time);

    /// Disarm the compare interrupt, no-op if it has already fired
    fn cancel_interrupt(&self);

    /// Convert microseconds to ticks
    fn us_to_ticks(&self, us: u64) -> Time;

    /// Convert ticks to microseconds
    fn ticks_to_us(&self, ticks: Time) -> u64;
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use crate::Time;

    #[derive(Debug, Default)]
    struct Inner {
        now: Time,
        sfd: Time,
        armed: Option<Time>,
    }

    /// Mock timer implementation to assist with testing, ticks are microseconds
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Inner>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner::default())))
        }

        pub fn set(&mut self, now: Time) {
            self.0.lock().unwrap().now = now;
        }

        pub fn advance(&mut self, ticks: Time) {
            self.0.lock().unwrap().now += ticks;
        }

        pub fn set_sfd(&mut self, sfd: Time) {
            self.0.lock().unwrap().sfd = sfd;
        }

        /// Currently armed interrupt time
        pub fn armed(&self) -> Option<Time> {
            self.0.lock().unwrap().armed
        }

        /// Advance to the armed interrupt and disarm it, returning the fire time.
        ///
        /// Time never moves backwards, an overdue interrupt fires immediately.
        pub fn fire(&mut self) -> Option<Time> {
            let mut i = self.0.lock().unwrap();
            let at = i.armed.take()?;
            if at > i.now {
                i.now = at;
            }
            Some(i.now)
        }
    }

    impl super::Timer for MockTimer {
        fn now(&self) -> Time {
            self.0.lock().unwrap().now
        }

        fn sfd(&self) -> Time {
            self.0.lock().unwrap().sfd
        }

        fn interrupt_at(&self, when: Time) {
            self.0.lock().unwrap().armed = Some(when);
        }

        fn cancel_interrupt(&self) {
            self.0.lock().unwrap().armed = None;
        }

        fn us_to_ticks(&self, us: u64) -> Time {
            us
        }

        fn ticks_to_us(&self, ticks: Time) -> u64 {
            ticks
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Timer, mock::MockTimer};

    #[test]
    fn mock_fire_and_cancel() {
        let mut timer = MockTimer::new();
        timer.set(100);

        timer.interrupt_at(250);
        assert_eq!(timer.armed(), Some(250));
        assert_eq!(timer.fire(), Some(250));
        assert_eq!(timer.now(), 250);

        // Cancelling after the interrupt fired is a no-op
        timer.cancel_interrupt();
        assert_eq!(timer.fire(), None);
        assert_eq!(timer.now(), 250);

        // Overdue interrupts fire at the current time
        timer.interrupt_at(10);
        assert_eq!(timer.fire(), Some(250));
    }
}
