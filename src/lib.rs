//! TSTP MAC
//!
//! Duty-cycled Medium Access Control and spatio-temporal message format for
//! the TSTP wireless sensor network protocol.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

#![no_std]

use core::fmt::Debug;

use radio::{State, Busy, Transmit, Receive, Rssi, ReceiveInfo};

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod phy;

pub mod tstp;

pub mod schedule;

pub mod buffer;

pub mod dispatch;

pub mod units;

pub mod mac;

pub mod error;

pub mod prelude;

/// Timestamps are 64-bit timer ticks
pub type Time = u64;

/// Radio interface combines `radio` traits
pub trait Radio<S: radio::RadioState, I: radio::ReceiveInfo, E: Debug>: radio::State<State=S, Error=E> + radio::Busy<Error=E> + radio::Transmit<Error=E> + radio::Receive<Info=I, Error=E> + radio::Rssi<Error=E> {}

/// Default Radio impl for radio devices
impl <T, S: radio::RadioState, I: ReceiveInfo, E: Debug> Radio<S, I, E> for T where
    T: State<State=S, Error=E> + Busy<Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
{}
