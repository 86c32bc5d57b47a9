//! TSTP Interest, Data and Report messages
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use crate::Time;
use crate::error::DecodeError;
use super::{Header, MessageType, Region, Tag, Unit, MTU, TAG_SIZE};

/// Maximum opaque payload carried by a Data or Report message
pub const MAX_DATA_SIZE: usize = MTU - Header::SIZE - TAG_SIZE - 4;

/// Maximum body of a bootstrap message
pub const MAX_BODY_SIZE: usize = MTU - Header::SIZE;

/// Response mode requested by an Interest
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseMode {
    /// A single node in the region responds
    Single = 0,
    /// Every node in the region responds
    All = 1,
}

const RESPONSE_MODE_ALL: u8 = 0b1000_0000;
const ERROR_MASK: u8 = 0b0111_1111;

/// Interest messages request data from a region over a time window
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Interest {
    pub header: Header,
    pub destination: Region,
    pub t0: Time,
    pub t_end: Time,
    /// Polling period, zero for event-driven interests
    pub period: Time,
    pub unit: Unit,
    pub response_mode: ResponseMode,
    /// Maximum tolerated error (7 bits)
    pub error: u8,
}

impl Interest {
    pub const SIZE: usize = Header::SIZE + Region::SIZE + 3 * 8 + 4 + 1;

    pub fn new(header: Header, destination: Region, t0: Time, t_end: Time, period: Time, unit: Unit, response_mode: ResponseMode, error: u8) -> Self {
        Self {
            header: Header { message_type: MessageType::Interest, ..header },
            destination,
            t0,
            t_end,
            period,
            unit,
            response_mode,
            error,
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.period != 0
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < Self::SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }

        let (header, mut offset) = Header::decode(buff)?;
        if header.message_type != MessageType::Interest {
            return Err(DecodeError::UnexpectedType(header.message_type));
        }

        let (destination, n) = Region::decode(&buff[offset..])?;
        offset += n;

        let t0 = LittleEndian::read_u64(&buff[offset..]);
        let t_end = LittleEndian::read_u64(&buff[offset + 8..]);
        let period = LittleEndian::read_u64(&buff[offset + 16..]);
        offset += 24;

        let unit = LittleEndian::read_u32(&buff[offset..]);
        offset += 4;

        let b = buff[offset];
        offset += 1;

        let response_mode = match b & RESPONSE_MODE_ALL != 0 {
            true => ResponseMode::All,
            false => ResponseMode::Single,
        };

        let i = Interest {
            header,
            destination,
            t0,
            t_end,
            period,
            unit,
            response_mode,
            error: b & ERROR_MASK,
        };

        Ok((i, offset))
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        let mut offset = self.header.encode(buff);

        offset += self.destination.encode(&mut buff[offset..]);

        LittleEndian::write_u64(&mut buff[offset..], self.t0);
        LittleEndian::write_u64(&mut buff[offset + 8..], self.t_end);
        LittleEndian::write_u64(&mut buff[offset + 16..], self.period);
        offset += 24;

        LittleEndian::write_u32(&mut buff[offset..], self.unit);
        offset += 4;

        let mut b = self.error & ERROR_MASK;
        if self.response_mode == ResponseMode::All {
            b |= RESPONSE_MODE_ALL;
        }
        buff[offset] = b;
        offset += 1;

        offset
    }
}

/// Data and Report messages carry an authenticated transducer reading.
///
/// The two share a layout and differ only in the header type.
#[derive(Clone, PartialEq, Debug)]
pub struct Data {
    pub header: Header,
    pub tag: Tag,
    pub unit: Unit,
    payload: Vec<u8, MAX_DATA_SIZE>,
}

impl Data {
    /// Size of a Data message with an empty payload
    pub const MIN_SIZE: usize = Header::SIZE + TAG_SIZE + 4;

    /// Create a DATA message, returns `None` if the payload exceeds `MAX_DATA_SIZE`
    pub fn data(header: Header, unit: Unit, payload: &[u8]) -> Option<Self> {
        Self::with_type(MessageType::Data, header, unit, payload)
    }

    /// Create a REPORT message, returns `None` if the payload exceeds `MAX_DATA_SIZE`
    pub fn report(header: Header, unit: Unit, payload: &[u8]) -> Option<Self> {
        Self::with_type(MessageType::Report, header, unit, payload)
    }

    fn with_type(message_type: MessageType, header: Header, unit: Unit, payload: &[u8]) -> Option<Self> {
        let payload = Vec::from_slice(payload).ok()?;

        Some(Self {
            header: Header { message_type, ..header },
            tag: [0u8; TAG_SIZE],
            unit,
            payload,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_SIZE + self.payload.len()
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < Self::MIN_SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }
        if buff.len() > MTU {
            return Err(DecodeError::TooLong);
        }

        let (header, mut offset) = Header::decode(buff)?;
        match header.message_type {
            MessageType::Data | MessageType::Report => (),
            t => return Err(DecodeError::UnexpectedType(t)),
        }

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&buff[offset..offset + TAG_SIZE]);
        offset += TAG_SIZE;

        let unit = LittleEndian::read_u32(&buff[offset..]);
        offset += 4;

        let payload = Vec::from_slice(&buff[offset..]).map_err(|_e| DecodeError::TooLong)?;

        Ok((Self { header, tag, unit, payload }, buff.len()))
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        let mut offset = self.header.encode(buff);

        buff[offset..offset + TAG_SIZE].copy_from_slice(&self.tag);
        offset += TAG_SIZE;

        LittleEndian::write_u32(&mut buff[offset..], self.unit);
        offset += 4;

        buff[offset..offset + self.payload.len()].copy_from_slice(&self.payload);
        offset + self.payload.len()
    }
}

/// Decoded TSTP message
#[derive(Clone, PartialEq, Debug)]
pub enum Message {
    Interest(Interest),
    Data(Data),
    Report(Data),
    /// Bootstrap messages are passed through with an opaque body
    Bootstrap(Header, Vec<u8, MAX_BODY_SIZE>),
}

impl Message {
    pub fn header(&self) -> &Header {
        match self {
            Message::Interest(i) => &i.header,
            Message::Data(d) | Message::Report(d) => &d.header,
            Message::Bootstrap(h, _) => h,
        }
    }

    /// Decode a received frame, the header type selects the variant
    pub fn decode(buff: &[u8]) -> Result<Self, DecodeError> {
        if buff.len() < Header::SIZE {
            return Err(DecodeError::NotEnoughBytes);
        }

        let m = match Header::peek_type(buff)? {
            MessageType::Interest => Message::Interest(Interest::decode(buff)?.0),
            MessageType::Data => Message::Data(Data::decode(buff)?.0),
            MessageType::Report => Message::Report(Data::decode(buff)?.0),
            _ => {
                let (h, n) = Header::decode(buff)?;
                let body = Vec::from_slice(&buff[n..]).map_err(|_e| DecodeError::TooLong)?;
                Message::Bootstrap(h, body)
            }
        };

        Ok(m)
    }

    pub fn encode(&self, buff: &mut [u8]) -> usize {
        match self {
            Message::Interest(i) => i.encode(buff),
            Message::Data(d) | Message::Report(d) => d.encode(buff),
            Message::Bootstrap(h, body) => {
                let n = h.encode(buff);
                buff[n..n + body.len()].copy_from_slice(body);
                n + body.len()
            }
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Message::Interest(_) => Interest::SIZE,
            Message::Data(d) | Message::Report(d) => d.encoded_len(),
            Message::Bootstrap(_, body) => Header::SIZE + body.len(),
        }
    }
}

const _: () = assert!(Interest::SIZE <= MTU);
const _: () = assert!(Data::MIN_SIZE + MAX_DATA_SIZE == MTU);

#[cfg(test)]
mod test {
    use super::*;
    use crate::tstp::Coordinates;

    fn header() -> Header {
        let mut h = Header::with_origin(MessageType::Interest, Coordinates::new(5, 6, 7), 9_000);
        h.origin_time = 1_000;
        h.spatial_scale = 1;
        h
    }

    #[test]
    fn interest_round_trip() {
        let i = Interest::new(
            header(),
            Region::new(Coordinates::new(100, -200, 0), 300),
            10_000,
            20_000,
            1_000,
            0x8492_4924,
            ResponseMode::All,
            100,
        );

        let mut buff = [0u8; MTU];
        let n = Message::Interest(i.clone()).encode(&mut buff);
        assert_eq!(n, Interest::SIZE);

        let m = Message::decode(&buff[..n]).unwrap();
        assert_eq!(m, Message::Interest(i));
    }

    #[test]
    fn interest_error_is_7_bits() {
        let i = Interest::new(header(), Region::default(), 0, 0, 0, 1, ResponseMode::Single, 0xff);

        let mut buff = [0u8; MTU];
        let n = i.encode(&mut buff);
        let (i2, _) = Interest::decode(&buff[..n]).unwrap();

        assert_eq!(i2.error, 0x7f);
        assert_eq!(i2.response_mode, ResponseMode::Single);
        assert!(!i2.is_periodic());
    }

    #[test]
    fn data_and_report_round_trip() {
        let mut d = Data::data(header(), 7, &[1, 2, 3, 4, 5]).unwrap();
        d.tag = [0xaa; TAG_SIZE];
        let r = Data::report(header(), 8, &[9u8; MAX_DATA_SIZE]).unwrap();

        let mut buff = [0u8; MTU];

        let n = d.encode(&mut buff);
        assert_eq!(n, d.encoded_len());
        assert_eq!(Message::decode(&buff[..n]).unwrap(), Message::Data(d.clone()));
        assert_eq!(d.header.message_type, MessageType::Data);

        let n = r.encode(&mut buff);
        assert_eq!(n, MTU);
        assert_eq!(Message::decode(&buff[..n]).unwrap(), Message::Report(r));
    }

    #[test]
    fn data_payload_limit() {
        assert!(Data::data(header(), 1, &[0u8; MAX_DATA_SIZE + 1]).is_none());
    }

    #[test]
    fn bootstrap_passthrough() {
        let h = Header::new(MessageType::Bootstrap2);
        let m = Message::Bootstrap(h, Vec::from_slice(&[1, 2, 3]).unwrap());

        let mut buff = [0u8; MTU];
        let n = m.encode(&mut buff);
        assert_eq!(n, m.encoded_len());
        assert_eq!(Message::decode(&buff[..n]).unwrap(), m);
    }

    #[test]
    fn decode_rejects_short_frames() {
        let buff = [0u8; Header::SIZE - 1];
        assert_eq!(Message::decode(&buff), Err(DecodeError::NotEnoughBytes));

        // Interest type but truncated body
        let mut buff = [0u8; MTU];
        let n = header().encode(&mut buff);
        assert_eq!(Message::decode(&buff[..n]), Err(DecodeError::NotEnoughBytes));
    }
}
