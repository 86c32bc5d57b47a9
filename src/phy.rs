//! Radio PHY interface used by the TSTP MAC
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::{fmt::Debug, marker::PhantomData};

use log::trace;

use radio::{RadioState, ReceiveInfo};

use crate::Radio;

/// Byte level radio operations required by the MAC.
///
/// Frames are handled without their FCS, `copy_out` returns the payload length.
pub trait Phy {
    type Error: Debug;

    /// Enter receive mode
    fn listen(&mut self) -> Result<(), Self::Error>;

    /// Power down the receiver / transmitter
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Start transmission of a frame, completion is polled with `transmit_done`
    fn transmit(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Poll for transmit completion
    fn transmit_done(&mut self) -> Result<bool, Self::Error>;

    /// Take a single clear channel assessment sample
    fn channel_clear(&mut self) -> Result<bool, Self::Error>;

    /// Check whether a complete frame is waiting in the receive FIFO
    fn frame_present(&mut self) -> Result<bool, Self::Error>;

    /// Copy the received frame out of the FIFO, returning its length
    fn copy_out(&mut self, buff: &mut [u8]) -> Result<usize, Self::Error>;

    /// Discard the receive FIFO contents
    fn flush_rx(&mut self) -> Result<(), Self::Error>;

    /// Acknowledge the frame received interrupt
    fn ack_interrupt(&mut self) -> Result<(), Self::Error>;
}

/// `Phy` adaptor for radios implementing the `radio` traits.
///
/// Clear channel assessment compares polled RSSI against `channel_clear_threshold`.
pub struct RadioPhy<R, S, I, E> {
    radio: R,
    channel_clear_threshold: i16,
    listening: bool,
    last_rssi: i16,
    _radio_state: PhantomData<S>,
    _radio_info: PhantomData<I>,
    _radio_err: PhantomData<E>,
}

impl <R, S, I, E> RadioPhy<R, S, I, E>
where
    R: Radio<S, I, E>,
    S: RadioState,
    I: ReceiveInfo + Default + Debug,
    E: Debug,
{
    pub fn new(radio: R, channel_clear_threshold: i16) -> Self {
        Self {
            radio,
            channel_clear_threshold,
            listening: false,
            last_rssi: 0,
            _radio_state: PhantomData,
            _radio_info: PhantomData,
            _radio_err: PhantomData,
        }
    }

    /// RSSI of the last frame copied out of the radio
    pub fn last_rssi(&self) -> i16 {
        self.last_rssi
    }

    pub fn inner(&mut self) -> &mut R {
        &mut self.radio
    }
}

impl <R, S, I, E> Phy for RadioPhy<R, S, I, E>
where
    R: Radio<S, I, E>,
    S: RadioState,
    I: ReceiveInfo + Default + Debug,
    E: Debug,
{
    type Error = E;

    fn listen(&mut self) -> Result<(), E> {
        self.radio.start_receive()?;
        self.listening = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), E> {
        self.radio.set_state(S::sleep())?;
        self.listening = false;
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), E> {
        self.listening = false;
        self.radio.start_transmit(data)
    }

    fn transmit_done(&mut self) -> Result<bool, E> {
        self.radio.check_transmit()
    }

    fn channel_clear(&mut self) -> Result<bool, E> {
        if self.radio.is_busy()? {
            return Ok(false)
        }

        // RSSI is only valid in receive mode
        if !self.listening {
            self.listen()?;
        }

        let rssi = self.radio.poll_rssi()?;
        trace!("CCA sample: {} dBm (threshold {})", rssi, self.channel_clear_threshold);

        Ok(rssi < self.channel_clear_threshold)
    }

    fn frame_present(&mut self) -> Result<bool, E> {
        self.radio.check_receive(false)
    }

    fn copy_out(&mut self, buff: &mut [u8]) -> Result<usize, E> {
        let (n, info) = self.radio.get_received(buff)?;
        self.last_rssi = info.rssi();
        Ok(n)
    }

    fn flush_rx(&mut self) -> Result<(), E> {
        self.listen()
    }

    fn ack_interrupt(&mut self) -> Result<(), E> {
        // `radio` drivers clear pending IRQs in `check_receive`
        Ok(())
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    /// Mock PHY operating state
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum PhyState {
        Off,
        Listening,
        Transmitting,
    }

    /// Injected mock PHY failure
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct MockError;

    #[derive(Debug)]
    struct Inner {
        state: PhyState,
        busy: bool,
        stall_tx: bool,
        fail: bool,
        sent: Vec<Vec<u8>>,
        rx: Option<Vec<u8>>,
        cca_samples: usize,
        irq_acks: usize,
    }

    /// Mock PHY implementation to assist with testing.
    ///
    /// Clones share state so tests can inspect a PHY owned by the MAC.
    #[derive(Clone, Debug)]
    pub struct MockPhy (Arc<Mutex<Inner>>);

    impl MockPhy {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner {
                state: PhyState::Off,
                busy: false,
                stall_tx: false,
                fail: false,
                sent: Vec::new(),
                rx: None,
                cca_samples: 0,
                irq_acks: 0,
            })))
        }

        pub fn state(&self) -> PhyState {
            self.0.lock().unwrap().state
        }

        /// Mark the channel busy for clear channel assessment
        pub fn set_busy(&mut self, busy: bool) {
            self.0.lock().unwrap().busy = busy;
        }

        /// Never report transmit completion
        pub fn stall_transmit(&mut self, stall: bool) {
            self.0.lock().unwrap().stall_tx = stall;
        }

        /// Fail every following radio operation
        pub fn fail(&mut self, fail: bool) {
            self.0.lock().unwrap().fail = fail;
        }

        /// Place a frame in the receive FIFO
        pub fn inject(&mut self, frame: &[u8]) {
            self.0.lock().unwrap().rx = Some(frame.to_vec());
        }

        /// Frames transmitted so far
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.0.lock().unwrap().sent.clone()
        }

        pub fn cca_samples(&self) -> usize {
            self.0.lock().unwrap().cca_samples
        }

        pub fn irq_acks(&self) -> usize {
            self.0.lock().unwrap().irq_acks
        }

        fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Result<R, MockError> {
            let mut i = self.0.lock().unwrap();
            if i.fail {
                return Err(MockError);
            }
            Ok(f(&mut i))
        }
    }

    impl super::Phy for MockPhy {
        type Error = MockError;

        fn listen(&mut self) -> Result<(), MockError> {
            self.with(|i| i.state = PhyState::Listening)
        }

        fn stop(&mut self) -> Result<(), MockError> {
            self.with(|i| i.state = PhyState::Off)
        }

        fn transmit(&mut self, data: &[u8]) -> Result<(), MockError> {
            self.with(|i| {
                i.state = PhyState::Transmitting;
                i.sent.push(data.to_vec());
            })
        }

        fn transmit_done(&mut self) -> Result<bool, MockError> {
            self.with(|i| !i.stall_tx)
        }

        fn channel_clear(&mut self) -> Result<bool, MockError> {
            self.with(|i| {
                i.cca_samples += 1;
                !i.busy
            })
        }

        fn frame_present(&mut self) -> Result<bool, MockError> {
            self.with(|i| i.rx.is_some())
        }

        fn copy_out(&mut self, buff: &mut [u8]) -> Result<usize, MockError> {
            self.with(|i| match i.rx.take() {
                Some(f) => {
                    let n = f.len().min(buff.len());
                    buff[..n].copy_from_slice(&f[..n]);
                    n
                },
                None => 0,
            })
        }

        fn flush_rx(&mut self) -> Result<(), MockError> {
            self.with(|i| i.rx = None)
        }

        fn ack_interrupt(&mut self) -> Result<(), MockError> {
            self.with(|i| i.irq_acks += 1)
        }
    }
}
