//! TSTP message header
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};

use crate::Time;
use crate::error::DecodeError;
use super::{Coordinates, MessageType};

const TYPE_SHIFT: u8 = 5;
const TYPE_MASK: u8 = 0b1110_0000;
const TIME_REQUEST: u8 = 0b0001_0000;
const SPATIAL_SHIFT: u8 = 2;
const SPATIAL_MASK: u8 = 0b0000_1100;
const TEMPORAL_MASK: u8 = 0b0000_0011;

const LAST_HOP_ADDR: usize = 1;
const LAST_HOP_TIME: usize = LAST_HOP_ADDR + Coordinates::SIZE;
const ORIGIN_ADDR: usize = LAST_HOP_TIME + 8;
const ORIGIN_TIME: usize = ORIGIN_ADDR + Coordinates::SIZE;
const DEADLINE: usize = ORIGIN_TIME + 8;
const ELAPSED: usize = DEADLINE + 8;

// Wire contract: config byte, two addresses, three times and elapsed
const _: () = assert!(ELAPSED + 4 == 53);

/// TSTP header, common to all non-microframe messages
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub message_type: MessageType,
    pub time_request: bool,
    /// Spatial scale (2 bits, wider values are truncated on encode)
    pub spatial_scale: u8,
    /// Temporal scale (2 bits, wider values are truncated on encode)
    pub temporal_scale: u8,

    pub last_hop: Coordinates,
    pub last_hop_time: Time,
    pub origin: Coordinates,
    pub origin_time: Time,
    pub deadline: Time,
    /// Accumulated forwarding latency in microseconds
    pub elapsed: u32,
}

impl Header {
    /// Encoded header size
    pub const SIZE: usize = ELAPSED + 4;

    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            time_request: false,
            spatial_scale: 0,
            temporal_scale: 0,
            last_hop: Coordinates::default(),
            last_hop_time: 0,
            origin: Coordinates::default(),
            origin_time: 0,
            deadline: 0,
            elapsed: 0,
        }
    }

    /// Create a header originating (and last hopping) at `origin`
    pub fn with_origin(message_type: MessageType, origin: Coordinates, deadline: Time) -> Self {
        Self {
            last_hop: origin,
            origin,
            deadline,
            ..Self::new(message_type)
        }
    }

    /// Pack the configuration byte
    pub fn config(&self) -> u8 {
        let mut cfg = ((self.message_type as u8) << TYPE_SHIFT) & TYPE_MASK;
        if self.time_request {
            cfg |= TIME_REQUEST;
        }
        cfg |= (self.spatial_scale << SPATIAL_SHIFT) & SPATIAL_MASK;
        cfg |= self.temporal_scale & TEMPORAL_MASK;
        cfg
    }

    /// Read the message type from an encoded frame without decoding the rest
    pub fn peek_type(buff: &[u8]) -> Result<MessageType, DecodeError> {
        match buff.get(0) {
            Some(cfg) => MessageType::from_bits(cfg >> TYPE_SHIFT),
            None => Err(DecodeError::NotEnoughBytes),
        }
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < Self::SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }

        let cfg = buff[0];
        let message_type = MessageType::from_bits(cfg >> TYPE_SHIFT)?;

        let (last_hop, _) = Coordinates::decode(&buff[LAST_HOP_ADDR..])?;
        let (origin, _) = Coordinates::decode(&buff[ORIGIN_ADDR..])?;

        let h = Header {
            message_type,
            time_request: cfg & TIME_REQUEST != 0,
            spatial_scale: (cfg & SPATIAL_MASK) >> SPATIAL_SHIFT,
            temporal_scale: cfg & TEMPORAL_MASK,
            last_hop,
            last_hop_time: LittleEndian::read_u64(&buff[LAST_HOP_TIME..]),
            origin,
            origin_time: LittleEndian::read_u64(&buff[ORIGIN_TIME..]),
            deadline: LittleEndian::read_u64(&buff[DEADLINE..]),
            elapsed: LittleEndian::read_u32(&buff[ELAPSED..]),
        };

        Ok((h, Self::SIZE))
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        buff[0] = self.config();

        self.last_hop.encode(&mut buff[LAST_HOP_ADDR..]);
        LittleEndian::write_u64(&mut buff[LAST_HOP_TIME..], self.last_hop_time);
        self.origin.encode(&mut buff[ORIGIN_ADDR..]);
        LittleEndian::write_u64(&mut buff[ORIGIN_TIME..], self.origin_time);
        LittleEndian::write_u64(&mut buff[DEADLINE..], self.deadline);
        LittleEndian::write_u32(&mut buff[ELAPSED..], self.elapsed);

        Self::SIZE
    }
}

/// Update last-hop time and accumulate elapsed latency in an encoded frame,
/// leaving every other byte untouched.
pub fn stamp(buff: &mut [u8], last_hop_time: Time, elapsed_us: u32) -> Result<(), DecodeError> {
    if buff.len() < Header::SIZE {
        return Err(DecodeError::NotEnoughBytes);
    }

    LittleEndian::write_u64(&mut buff[LAST_HOP_TIME..], last_hop_time);

    let elapsed = LittleEndian::read_u32(&buff[ELAPSED..]).saturating_add(elapsed_us);
    LittleEndian::write_u32(&mut buff[ELAPSED..], elapsed);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn header() -> Header {
        Header {
            message_type: MessageType::Report,
            time_request: true,
            spatial_scale: 2,
            temporal_scale: 1,
            last_hop: Coordinates::new(-10, 20, 30),
            last_hop_time: 0x0102_0304_0506_0708,
            origin: Coordinates::new(1, -2, 3),
            origin_time: 42,
            deadline: 1_000_000,
            elapsed: 77,
        }
    }

    #[test]
    fn header_round_trip() {
        let h = header();
        let mut buff = [0u8; Header::SIZE];

        let n = h.encode(&mut buff);
        let (h2, n2) = Header::decode(&buff).unwrap();

        assert_eq!(n, Header::SIZE);
        assert_eq!(n, n2);
        assert_eq!(h, h2);
    }

    #[test]
    fn config_byte_layout() {
        let h = header();

        // type:3 | time_request:1 | spatial:2 | temporal:2
        assert_eq!(h.config(), 0b010_1_10_01);
    }

    #[test]
    fn bit_fields_truncate() {
        let mut h = header();
        h.spatial_scale = 4;
        h.temporal_scale = 5;

        let mut buff = [0u8; Header::SIZE];
        h.encode(&mut buff);
        let (h2, _) = Header::decode(&buff).unwrap();

        assert_eq!(h2.spatial_scale, 0);
        assert_eq!(h2.temporal_scale, 1);
        assert_eq!(h2.message_type, MessageType::Report);
        assert_eq!(h2.time_request, true);
    }

    #[test]
    fn decode_short_and_reserved() {
        let mut buff = [0u8; Header::SIZE];
        header().encode(&mut buff);

        assert_eq!(Header::decode(&buff[..Header::SIZE - 1]), Err(DecodeError::NotEnoughBytes));

        buff[0] = 3 << 5;
        assert_eq!(Header::decode(&buff), Err(DecodeError::InvalidType(3)));
    }

    #[test]
    fn stamp_in_place() {
        let mut buff = [0u8; Header::SIZE + 4];
        header().encode(&mut buff);
        buff[Header::SIZE..].copy_from_slice(&[9, 8, 7, 6]);

        stamp(&mut buff, 5000, 23).unwrap();

        let (h, _) = Header::decode(&buff).unwrap();
        assert_eq!(h.last_hop_time, 5000);
        assert_eq!(h.elapsed, 100);
        assert_eq!(h.origin_time, 42);
        assert_eq!(&buff[Header::SIZE..], &[9, 8, 7, 6]);
    }
}
