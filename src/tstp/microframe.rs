//! TSTP wake-up microframes
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DecodeError;

const ALL_LISTEN: u16 = 0x8000;

/// Message ids are 15 bits wide
pub const ID_MASK: u16 = 0x7fff;

/// Microframes are repeatedly transmitted ahead of a data frame so that
/// duty-cycled receivers can detect the pending transmission.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Microframe {
    /// Every node should wake for the following data frame
    pub all_listen: bool,
    /// Id of the announced message (15 bits)
    pub id: u16,
    /// Remaining repetitions, including this one
    pub count: u16,
}

impl Microframe {
    /// Encoded microframe size, smaller than any TSTP header
    pub const SIZE: usize = 4;

    pub fn new(all_listen: bool, id: u16, count: u16) -> Self {
        Self { all_listen, id: id & ID_MASK, count }
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < Self::SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }

        let w = LittleEndian::read_u16(&buff[0..]);

        let mf = Self {
            all_listen: w & ALL_LISTEN != 0,
            id: w & ID_MASK,
            count: LittleEndian::read_u16(&buff[2..]),
        };

        Ok((mf, Self::SIZE))
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        let mut w = self.id & ID_MASK;
        if self.all_listen {
            w |= ALL_LISTEN;
        }

        LittleEndian::write_u16(&mut buff[0..], w);
        LittleEndian::write_u16(&mut buff[2..], self.count);

        Self::SIZE
    }
}

const _: () = assert!(Microframe::SIZE < super::Header::SIZE);
