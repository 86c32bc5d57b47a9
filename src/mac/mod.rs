//! TSTP Medium Access Control (MAC) layer.
//!
//! A duty-cycled MAC driven entirely by timer and radio interrupts.
//! Idle nodes periodically listen for short wake-up microframes, senders
//! precede each data frame with a burst of microframes long enough to span
//! a full sleep period.

use crate::tstp::Microframe;

pub mod config;
pub use config::Config;

pub mod core;
pub use self::core::Mac;

/// MAC states, each names the handler run on the next timer interrupt
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacState {
    /// Listen for microframes
    RxMf,
    /// Select the next transmission, or sleep
    CheckTxSchedule,
    /// Assess the channel before transmitting
    Cca,
    /// Transmit the next microframe
    TxMf,
    /// Transmit the announced data frame
    TxData,
    /// Listen for an announced data frame
    RxData,
}

/// What the receiver is currently listening for
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxMode {
    Off,
    Microframes,
    Data,
}

/// MAC statistics, counters saturate
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    pub tx_frames: u32,
    pub tx_microframes: u32,
    pub tx_no_buffer: u32,
    pub tx_timeout: u32,
    pub rx_microframes: u32,
    pub rx_data: u32,
    pub rx_dropped: u32,
    pub rx_no_buffer: u32,
    pub cca_busy: u32,
    pub deadline_miss: u32,
    pub preempted: u32,
    pub radio_errors: u32,
}

/// Routing decisions the MAC delegates to the network layer
pub trait Router {
    /// Whether the message announced by a microframe should be received
    fn relevant(&self, mf: &Microframe) -> bool;

    /// Whether an encoded frame is addressed to this node
    fn destined_to_me(&self, frame: &[u8]) -> bool;
}
