//! TSTP MAC errors
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::tstp::MessageType;

/// Core MAC errors, generic over the underlying radio error
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Wrapper for unhandled / underlying radio errors
    Radio(E),

    /// Decoding error
    Decode(DecodeError),

    /// Radio did not signal transmit completion in time
    Timeout,
}

impl <E> From<DecodeError> for CoreError<E> {
    fn from(e: DecodeError) -> Self {
        CoreError::Decode(e)
    }
}

/// Wire format decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Buffer shorter than the encoded object
    NotEnoughBytes,

    /// Buffer longer than the MTU or the object's capacity
    TooLong,

    /// Reserved message type
    InvalidType(u8),

    /// Valid type that does not match the object being decoded
    UnexpectedType(MessageType),
}

/// Observer registration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    /// No free observer slots
    Full,

    /// Observer already attached for this protocol
    Duplicate,
}

/// Unit registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnitError {
    /// Unit number outside of the registry
    NoSuchUnit(usize),

    /// Unit already bound to a device
    InUse(usize),

    /// Interrupt already bound to another unit
    InterruptInUse(u32),
}
