//! TSTP wire format
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DecodeError;

pub mod header;
pub use header::Header;

pub mod microframe;
pub use microframe::Microframe;

pub mod message;
pub use message::{Message, Interest, Data, ResponseMode};

/// Maximum on-air frame size, enforced by the PHY
pub const MTU: usize = 120;

/// Size of the security authentication tag carried by Data and Report messages
pub const TAG_SIZE: usize = 16;

/// Transducer unit code (IEEE 1451.0)
pub type Unit = u32;

/// Security authentication tag
pub type Tag = [u8; TAG_SIZE];

/// TSTP message types, carried in the top three bits of the header config byte.
///
/// Value 3 is reserved.
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum::FromRepr, strum::IntoStaticStr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    Interest = 0,
    Data = 1,
    Report = 2,
    Bootstrap0 = 4,
    Bootstrap1 = 5,
    Bootstrap2 = 6,
    Bootstrap3 = 7,
}

impl MessageType {
    /// Parse a (3-bit) type field
    pub fn from_bits(v: u8) -> Result<Self, DecodeError> {
        Self::from_repr(v & 0b111).ok_or(DecodeError::InvalidType(v & 0b111))
    }
}

/// Geographic coordinates (centimetres) used as TSTP node addresses
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinates {
    pub const SIZE: usize = 12;

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance, avoids floating point on small targets
    pub fn distance_sq(&self, o: &Coordinates) -> u64 {
        let dx = (self.x as i64 - o.x as i64).unsigned_abs();
        let dy = (self.y as i64 - o.y as i64).unsigned_abs();
        let dz = (self.z as i64 - o.z as i64).unsigned_abs();
        dx.saturating_mul(dx)
            .saturating_add(dy.saturating_mul(dy))
            .saturating_add(dz.saturating_mul(dz))
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < Self::SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }

        let c = Self {
            x: LittleEndian::read_i32(&buff[0..]),
            y: LittleEndian::read_i32(&buff[4..]),
            z: LittleEndian::read_i32(&buff[8..]),
        };

        Ok((c, Self::SIZE))
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        LittleEndian::write_i32(&mut buff[0..], self.x);
        LittleEndian::write_i32(&mut buff[4..], self.y);
        LittleEndian::write_i32(&mut buff[8..], self.z);
        Self::SIZE
    }
}

/// Spherical region used to address Interests
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub center: Coordinates,
    pub radius: u32,
}

impl Region {
    pub const SIZE: usize = Coordinates::SIZE + 4;

    pub const fn new(center: Coordinates, radius: u32) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, c: &Coordinates) -> bool {
        let r = self.radius as u64;
        self.center.distance_sq(c) <= r * r
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < Self::SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }

        let (center, n) = Coordinates::decode(buff)?;
        let radius = LittleEndian::read_u32(&buff[n..]);

        Ok((Self { center, radius }, Self::SIZE))
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        let n = self.center.encode(buff);
        LittleEndian::write_u32(&mut buff[n..], self.radius);
        Self::SIZE
    }
}

/// Kind of a received frame, determined purely by its length
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    Microframe,
    Data,
}

impl FrameKind {
    /// Classify a received frame by length.
    ///
    /// Microframes precede normal framing so carry no type tag, a frame of
    /// exactly `Microframe::SIZE` bytes is always a microframe. Frames too
    /// short to hold a header are malformed and yield `None`.
    pub fn classify(len: usize) -> Option<Self> {
        if len == Microframe::SIZE {
            Some(FrameKind::Microframe)
        } else if len >= Header::SIZE {
            Some(FrameKind::Data)
        } else {
            None
        }
    }
}
