//! TSTP MAC state machine
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::{trace, debug, warn, error};

use rand_core::RngCore;

use crate::Time;
use crate::buffer::{BufferHandle, BufferPool};
use crate::dispatch::{Dispatcher, Notification, Observer, Protocol};
use crate::error::{CoreError, DecodeError, DispatchError};
use crate::phy::Phy;
use crate::timer::Timer;
use crate::tstp::{FrameKind, Header, MessageType, Microframe, MTU, header::stamp};

use super::{Config, MacState, RxMode, Router, Statistics};

/// Duty-cycled TSTP MAC.
///
/// Generic over a PHY (P), Timer (T), id generator (G) and Router (R), with
/// a pool of `N` buffers and up to `S` attached observers.
pub struct Mac<'a, P, T, G, R, const N: usize, const S: usize> {
    config: Config,

    phy: P,
    timer: T,
    pool: &'a BufferPool<T, G, N>,
    router: R,
    dispatcher: Dispatcher<'a, S>,

    next: MacState,
    rx_mode: RxMode,
    receiving_data_id: u16,
    sending_mf: Option<BufferHandle>,

    stats: Statistics,
}

impl <'a, P, T, G, R, const N: usize, const S: usize> Mac<'a, P, T, G, R, N, S>
where
    P: Phy,
    T: Timer,
    G: RngCore,
    R: Router,
{
    /// Create a new MAC, call `start` to begin duty-cycling
    pub fn new(config: Config, phy: P, timer: T, pool: &'a BufferPool<T, G, N>, router: R) -> Self {
        Self {
            config,
            phy,
            timer,
            pool,
            router,
            dispatcher: Dispatcher::new(),
            next: MacState::RxMf,
            rx_mode: RxMode::Off,
            receiving_data_id: 0,
            sending_mf: None,
            stats: Statistics::default(),
        }
    }

    /// Start listening for microframes
    pub fn start(&mut self) -> Result<(), CoreError<P::Error>> {
        debug!("Starting TSTP MAC");

        let r = self.rx_mf();
        if let Err(e) = &r {
            self.recover(e);
        }
        r
    }

    /// State whose handler runs on the next timer interrupt
    pub fn state(&self) -> MacState {
        self.next
    }

    pub fn rx_mode(&self) -> RxMode {
        self.rx_mode
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &'a BufferPool<T, G, N> {
        self.pool
    }

    /// Attach an observer for received frames of a protocol
    pub fn attach(&mut self, observer: &'a dyn Observer, protocol: Protocol) -> Result<(), DispatchError> {
        self.dispatcher.attach(observer, protocol)
    }

    /// Detach an observer, returning whether it was attached
    pub fn detach(&mut self, observer: &'a dyn Observer, protocol: Protocol) -> bool {
        self.dispatcher.detach(observer, protocol)
    }

    /// Timer interrupt handler, runs the armed state.
    ///
    /// On error the MAC is returned to microframe listening before the
    /// error is returned.
    pub fn on_timer(&mut self) -> Result<(), CoreError<P::Error>> {
        trace!("Timer interrupt in state {:?}", self.next);

        let r = match self.next {
            MacState::RxMf => self.rx_mf(),
            MacState::CheckTxSchedule => self.check_tx_schedule(),
            MacState::Cca => self.cca(),
            MacState::TxMf => self.tx_mf(),
            MacState::TxData => self.tx_data(),
            MacState::RxData => self.rx_data(),
        };

        if let Err(e) = &r {
            self.recover(e);
        }
        r
    }

    /// Frame received interrupt handler
    pub fn on_radio_interrupt(&mut self) -> Result<(), CoreError<P::Error>> {
        let r = self.receive();

        if let Err(e) = &r {
            self.recover(e);
        }
        r
    }

    fn receive(&mut self) -> Result<(), CoreError<P::Error>> {
        self.phy.ack_interrupt().map_err(CoreError::Radio)?;

        if !self.phy.frame_present().map_err(CoreError::Radio)? {
            return Ok(());
        }

        let mut buff = [0u8; MTU];
        let n = self.phy.copy_out(&mut buff).map_err(CoreError::Radio)?;
        let sfd = self.timer.sfd();
        let frame = &buff[..n];

        trace!("Received {} bytes (sfd: {}, mode: {:?})", n, sfd, self.rx_mode);

        // Data frames must at least carry a valid type
        let kind = FrameKind::classify(n)
            .filter(|k| *k != FrameKind::Data || Header::peek_type(frame).is_ok());

        match (kind, self.rx_mode) {
            (Some(FrameKind::Microframe), RxMode::Microframes) => self.process_mf(frame, sfd),
            (Some(FrameKind::Data), RxMode::Data) => self.process_data(frame, sfd),
            _ => {
                warn!("Dropping {} byte frame in mode {:?}", n, self.rx_mode);
                self.stats.rx_dropped = self.stats.rx_dropped.saturating_add(1);
                self.phy.flush_rx().map_err(CoreError::Radio)
            }
        }
    }

    fn process_mf(&mut self, frame: &[u8], sfd: Time) -> Result<(), CoreError<P::Error>> {
        self.phy.stop().map_err(CoreError::Radio)?;
        self.timer.cancel_interrupt();
        self.rx_mode = RxMode::Off;

        let (mf, _) = Microframe::decode(frame)?;
        self.stats.rx_microframes = self.stats.rx_microframes.saturating_add(1);

        let data_time = sfd + self.us(mf.count as u64 * self.config.period_us());

        trace!("Microframe {:?} (data at: {})", mf, data_time);

        // A neighbour is already forwarding this message
        if self.pool.preempt(mf.id) {
            self.stats.preempted = self.stats.preempted.saturating_add(1);
        }

        match self.pool.receive(frame, sfd, true) {
            Some(h) => {
                if !mf.all_listen {
                    let n = Notification{ buffer: h, id: mf.id, sfd, microframe: Some(mf), frame };
                    self.dispatcher.notify(Protocol::TSTP, &n);
                }
                self.pool.release(h);
            },
            None => self.stats.rx_no_buffer = self.stats.rx_no_buffer.saturating_add(1),
        }

        if mf.all_listen || self.router.relevant(&mf) {
            debug!("Waiting for data frame {:04x}", mf.id);

            self.receiving_data_id = mf.id;
            let margin = self.us(self.config.data_listen_margin_us as u64);
            self.next_state(MacState::RxData, data_time.saturating_sub(margin));
        } else {
            let sleep = self.us(self.config.sleep_period_us as u64);
            self.next_state(MacState::CheckTxSchedule, data_time + sleep);
        }

        Ok(())
    }

    fn process_data(&mut self, frame: &[u8], sfd: Time) -> Result<(), CoreError<P::Error>> {
        let id = self.receiving_data_id;

        match self.pool.receive(frame, sfd, false) {
            Some(h) => {
                self.pool.with_mut(h, |b| b.id = id);
                self.stats.rx_data = self.stats.rx_data.saturating_add(1);

                let n = Notification{ buffer: h, id, sfd, microframe: None, frame };
                if !self.dispatcher.notify(Protocol::TSTP, &n) {
                    trace!("No observer for data frame {:04x}", id);
                    self.pool.release(h);
                }
            },
            None => {
                warn!("No buffer for data frame {:04x}", id);
                self.stats.rx_no_buffer = self.stats.rx_no_buffer.saturating_add(1);
            }
        }

        self.check_tx_schedule()
    }

    fn check_tx_schedule(&mut self) -> Result<(), CoreError<P::Error>> {
        self.phy.stop().map_err(CoreError::Radio)?;
        self.rx_mode = RxMode::Off;

        let now = self.timer.now();

        let expired = self.pool.expired();
        let pending = self.pool.next_pending(now);
        let missed = self.pool.expired().saturating_sub(expired);
        self.stats.deadline_miss = self.stats.deadline_miss.saturating_add(missed);

        let offset = pending.and_then(|h| self.pool.with(h, |b| b.offset_us()));

        match offset {
            Some(offset) => {
                trace!("Transmission pending, offset: {} us", offset);
                self.next_state(MacState::Cca, now + self.us(offset));
            },
            None => {
                let sleep = self.us(self.config.sleep_period_us as u64);
                self.next_state(MacState::RxMf, now + sleep);
            },
        }

        Ok(())
    }

    /// Sample the channel for the whole CCA window, any busy sample defers
    fn cca(&mut self) -> Result<(), CoreError<P::Error>> {
        let t0 = self.timer.now();
        let limit = self.us(self.config.cca_time_us as u64);
        let max_samples = self.config.cca_max_samples;

        let mut samples = 0;
        let clear = loop {
            let clear = self.phy.channel_clear().map_err(CoreError::Radio)?;
            samples += 1;

            if !clear || self.timer.now().saturating_sub(t0) >= limit {
                break clear;
            }

            // Guard against a timer that never advances
            if max_samples != 0 && samples >= max_samples {
                warn!("CCA window not reached after {} samples", samples);
                break clear;
            }
        };

        if clear {
            self.prepare_tx_mf()
        } else {
            debug!("Channel busy after {} samples, deferring", samples);
            self.stats.cca_busy = self.stats.cca_busy.saturating_add(1);
            self.rx_mf()
        }
    }

    fn prepare_tx_mf(&mut self) -> Result<(), CoreError<P::Error>> {
        let pool = self.pool;

        let pending = match pool.pending() {
            Some(h) => h,
            None => return self.rx_mf(),
        };

        // Interests not addressed to us wake every neighbour
        let router = &self.router;
        let announce = pool.with(pending, |b| {
            let all_listen = match Header::peek_type(b.frame()) {
                Ok(MessageType::Interest) => !router.destined_to_me(b.frame()),
                _ => false,
            };
            (b.id, all_listen)
        });

        let (id, all_listen) = match announce {
            Some(v) => v,
            None => return self.rx_mf(),
        };

        let mf = Microframe::new(all_listen, id, self.config.microframes.max(1));

        match pool.attach_microframe(pending, &mf) {
            Some(h) => {
                debug!("Announcing message {:04x} (all_listen: {})", id, all_listen);
                self.sending_mf = Some(h);
                self.tx_mf()
            },
            None => {
                warn!("No buffer for microframe, deferring");
                self.stats.tx_no_buffer = self.stats.tx_no_buffer.saturating_add(1);
                self.rx_mf()
            }
        }
    }

    fn tx_mf(&mut self) -> Result<(), CoreError<P::Error>> {
        let h = match self.sending_mf {
            Some(h) => h,
            None => return self.rx_mf(),
        };

        let now = self.timer.now();
        let period = self.us(self.config.period_us());

        // Send the current count and store the decremented one
        let mut frame = [0u8; Microframe::SIZE];
        let remaining = self.pool.with_mut(h, |b| {
            let (mf, _) = Microframe::decode(b.frame())?;
            mf.encode(&mut frame);

            let next = Microframe::new(mf.all_listen, mf.id, mf.count.saturating_sub(1));
            next.encode(b.frame_mut());

            Ok::<_, DecodeError>(next.count)
        });

        let remaining = match remaining {
            Some(r) => r?,
            None => {
                // Pre-empted while announcing
                self.sending_mf = None;
                return self.rx_mf();
            },
        };

        if remaining > 0 {
            self.next_state(MacState::TxMf, now + period);
        } else {
            self.next_state(MacState::TxData, now + period);
        }

        self.transmit(&frame)?;
        self.stats.tx_microframes = self.stats.tx_microframes.saturating_add(1);

        Ok(())
    }

    fn tx_data(&mut self) -> Result<(), CoreError<P::Error>> {
        let timer = &self.timer;
        let sleep = self.us(self.config.sleep_period_us as u64);

        let pending = match self.pool.pending() {
            Some(h) => h,
            None => {
                self.sending_mf = None;
                self.next_state(MacState::RxMf, self.timer.now() + sleep);
                return Ok(());
            },
        };

        let mut frame = [0u8; MTU];
        let now = timer.now();

        let n = self.pool.with_mut(pending, |b| {
            let elapsed = timer.ticks_to_us(now.saturating_sub(b.sfd));
            stamp(b.frame_mut(), now, elapsed.min(u32::MAX as u64) as u32)?;

            frame[..b.size()].copy_from_slice(b.frame());
            Ok::<_, DecodeError>(b.size())
        });

        let n = match n {
            Some(n) => n?,
            None => {
                self.sending_mf = None;
                self.next_state(MacState::RxMf, now + sleep);
                return Ok(());
            },
        };

        self.transmit(&frame[..n])?;
        self.phy.stop().map_err(CoreError::Radio)?;

        debug!("Sent {} byte data frame", n);
        self.stats.tx_frames = self.stats.tx_frames.saturating_add(1);

        match (self.config.retransmit_until_deadline, self.sending_mf.take()) {
            (true, Some(mf)) => self.pool.release(mf),
            (true, None) => (),
            (false, _) => self.pool.release(pending),
        }

        self.next_state(MacState::RxMf, self.timer.now() + sleep);

        Ok(())
    }

    fn rx_mf(&mut self) -> Result<(), CoreError<P::Error>> {
        self.rx_mode = RxMode::Microframes;

        let timeout = self.us(self.config.rx_mf_timeout_us as u64);
        self.next_state(MacState::CheckTxSchedule, self.timer.now() + timeout);

        self.phy.listen().map_err(CoreError::Radio)
    }

    fn rx_data(&mut self) -> Result<(), CoreError<P::Error>> {
        self.rx_mode = RxMode::Data;

        let timeout = self.us(self.config.rx_data_timeout_us as u64);
        self.next_state(MacState::CheckTxSchedule, self.timer.now() + timeout);

        self.phy.listen().map_err(CoreError::Radio)
    }

    /// Transmit a frame and poll for completion
    fn transmit(&mut self, data: &[u8]) -> Result<(), CoreError<P::Error>> {
        self.phy.transmit(data).map_err(CoreError::Radio)?;

        let t0 = self.timer.now();
        let limit = self.us(self.config.tx_timeout_us as u64);
        let mut polls = 0;

        loop {
            if self.phy.transmit_done().map_err(CoreError::Radio)? {
                return Ok(());
            }

            polls += 1;
            if polls >= self.config.tx_max_polls || self.timer.now().saturating_sub(t0) >= limit {
                return Err(CoreError::Timeout);
            }

            core::hint::spin_loop();
        }
    }

    /// Return to microframe listening after a failed handler
    fn recover(&mut self, e: &CoreError<P::Error>) {
        error!("MAC error in state {:?}: {:?}", self.next, e);

        match e {
            CoreError::Timeout => self.stats.tx_timeout = self.stats.tx_timeout.saturating_add(1),
            _ => self.stats.radio_errors = self.stats.radio_errors.saturating_add(1),
        }

        self.sending_mf = None;
        self.rx_mode = RxMode::Off;
        if let Err(e) = self.phy.stop() {
            warn!("Failed to stop radio during recovery: {:?}", e);
            self.stats.radio_errors = self.stats.radio_errors.saturating_add(1);
        }

        let sleep = self.us(self.config.sleep_period_us as u64);
        self.next_state(MacState::RxMf, self.timer.now() + sleep);
    }

    fn next_state(&mut self, state: MacState, at: Time) {
        trace!("Next state {:?} at {}", state, at);

        self.next = state;
        self.timer.interrupt_at(at);
    }

    fn us(&self, us: u64) -> Time {
        self.timer.us_to_ticks(us)
    }
}
