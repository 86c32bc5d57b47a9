//! TSTP MAC configuration
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

/// Configuration for the TSTP duty-cycled MAC
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    /// Number of microframes sent ahead of each data frame
    pub microframes: u16,

    /// Air time of a single microframe in microseconds
    pub microframe_time_us: u32,

    /// Gap between consecutive microframes in microseconds
    pub microframe_gap_us: u32,

    /// Sleep between listening windows in microseconds
    pub sleep_period_us: u32,

    /// Time spent listening for microframes on each wake-up
    pub rx_mf_timeout_us: u32,

    /// Time spent listening for an announced data frame
    pub rx_data_timeout_us: u32,

    /// Margin to start listening ahead of an announced data frame
    pub data_listen_margin_us: u32,

    /// Clear channel assessment window in microseconds
    pub cca_time_us: u32,

    /// Cap on CCA samples for timers that do not advance while sampling,
    /// zero samples until the window elapses
    pub cca_max_samples: u32,

    /// Transmit completion timeout in microseconds
    pub tx_timeout_us: u32,

    /// Maximum transmit completion polls
    pub tx_max_polls: u32,

    /// Keep data frames scheduled after transmission until their deadline
    /// or a neighbour's microframe for the same message, which serves as an
    /// implicit acknowledgement
    pub retransmit_until_deadline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            microframes: 50,
            microframe_time_us: 192,
            microframe_gap_us: 128,
            sleep_period_us: 3_000,
            rx_mf_timeout_us: 400,
            rx_data_timeout_us: 5_000,
            data_listen_margin_us: 500,
            cca_time_us: 128,
            cca_max_samples: 0,
            tx_timeout_us: 5_000,
            tx_max_polls: 10_000,
            retransmit_until_deadline: false,
        }
    }
}

impl Config {
    /// Microframe repetition period
    pub fn period_us(&self) -> u64 {
        self.microframe_time_us as u64 + self.microframe_gap_us as u64
    }

    /// Duration of the full microframe preamble
    pub fn preamble_us(&self) -> u64 {
        self.microframes as u64 * self.period_us()
    }
}
