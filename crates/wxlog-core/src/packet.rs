//! Weather packets and their fixed binary layout
//!
//! A packet is a global header, a weather (local) header and the raw serial
//! line, written little-endian with no padding between fields:
//!
//! | Section        | Size |
//! |----------------|------|
//! | Global header  | 84   |
//! | Weather header | 42   |
//! | Serial string  | 256  |
//!
//! The layout is shared with readers in other processes and must not change
//! without a protocol version bump on both sides.

use bytes::{Buf, BufMut, BytesMut};
use chrono::NaiveDateTime;

use crate::timestamp::{Timestamp, TIMESTAMP_SIZE};
use crate::types::WeatherRecord;

/// Width of the NUL-padded data type tag
pub const DATA_TYPE_SIZE: usize = 32;
/// Tag identifying weather packets
pub const WEATHER_DATA_TYPE: &str = "WEATHER";

pub const GLOBAL_HEADER_SIZE: usize = DATA_TYPE_SIZE + 4 * 4 + 4 + 2 * TIMESTAMP_SIZE;
pub const WEATHER_HEADER_SIZE: usize = TIMESTAMP_SIZE + 2 + 4 + 2 + 4 + 4 + 2 + 4 + 4;
pub const TOTAL_HEADER_SIZE: usize = GLOBAL_HEADER_SIZE + WEATHER_HEADER_SIZE;
/// Width of the raw serial string buffer
pub const SERIAL_STRING_SIZE: usize = 256;
pub const PACKET_SIZE: usize = TOTAL_HEADER_SIZE + SERIAL_STRING_SIZE;

/// Envelope metadata for one packet
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalHeader {
    pub data_type: String,
    pub channel_id: u32,
    pub sequence: u32,
    pub total_header_size: u32,
    pub data_size: u32,
    pub first: bool,
    pub last: bool,
    pub abort: bool,
    pub valid: bool,
    /// Packet creation time (UTC), not the station's record time
    pub start_time: Timestamp,
    pub stop_time: Timestamp,
}

/// The unit forwarded to the output queue
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherPacket {
    pub header: GlobalHeader,
    pub record: WeatherRecord,
    serial: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Packet has wrong length: {0} bytes")]
    WrongLength(usize),

    #[error("Data type tag is not valid text")]
    InvalidDataType,
}

impl WeatherPacket {
    /// Raw serial bytes, at most [`SERIAL_STRING_SIZE`] long
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Raw serial line, with invalid UTF-8 replaced
    pub fn serial_lossy(&self) -> String {
        String::from_utf8_lossy(&self.serial).into_owned()
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn is_valid(&self) -> bool {
        self.header.valid
    }

    /// Serialize into exactly [`PACKET_SIZE`] bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        let header = &self.header;

        put_padded(&mut buf, header.data_type.as_bytes(), DATA_TYPE_SIZE);
        buf.put_u32_le(header.channel_id);
        buf.put_u32_le(header.sequence);
        buf.put_u32_le(header.total_header_size);
        buf.put_u32_le(header.data_size);
        buf.put_u8(header.first as u8);
        buf.put_u8(header.last as u8);
        buf.put_u8(header.abort as u8);
        buf.put_u8(header.valid as u8);
        header.start_time.encode(&mut buf);
        header.stop_time.encode(&mut buf);

        let record = &self.record;
        record.record_time.encode(&mut buf);
        buf.put_u16_le(record.wind_direction);
        buf.put_f32_le(record.wind_speed);
        buf.put_u16_le(record.solar);
        buf.put_f32_le(record.inside_temp);
        buf.put_f32_le(record.outside_temp);
        buf.put_u16_le(record.humidity);
        buf.put_f32_le(record.pressure);
        buf.put_f32_le(record.rainfall);

        put_padded(&mut buf, &self.serial, SERIAL_STRING_SIZE);

        debug_assert_eq!(buf.len(), PACKET_SIZE);
        buf.to_vec()
    }

    /// Parse a buffer produced by [`WeatherPacket::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != PACKET_SIZE {
            return Err(DecodeError::WrongLength(bytes.len()));
        }
        let mut buf = bytes;

        let data_type = std::str::from_utf8(trim_nul(&buf[..DATA_TYPE_SIZE]))
            .map_err(|_| DecodeError::InvalidDataType)?
            .to_string();
        buf.advance(DATA_TYPE_SIZE);

        let header = GlobalHeader {
            data_type,
            channel_id: buf.get_u32_le(),
            sequence: buf.get_u32_le(),
            total_header_size: buf.get_u32_le(),
            data_size: buf.get_u32_le(),
            first: buf.get_u8() != 0,
            last: buf.get_u8() != 0,
            abort: buf.get_u8() != 0,
            valid: buf.get_u8() != 0,
            start_time: Timestamp::decode(&mut buf),
            stop_time: Timestamp::decode(&mut buf),
        };

        let record = WeatherRecord {
            record_time: Timestamp::decode(&mut buf),
            wind_direction: buf.get_u16_le(),
            wind_speed: buf.get_f32_le(),
            solar: buf.get_u16_le(),
            inside_temp: buf.get_f32_le(),
            outside_temp: buf.get_f32_le(),
            humidity: buf.get_u16_le(),
            pressure: buf.get_f32_le(),
            rainfall: buf.get_f32_le(),
        };

        let serial = trim_nul(buf).to_vec();

        Ok(Self {
            header,
            record,
            serial,
        })
    }
}

fn put_padded(buf: &mut BytesMut, bytes: &[u8], width: usize) {
    let len = bytes.len().min(width);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, width - len);
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Assigns envelope metadata to parsed lines.
///
/// Owns the per-run sequence counter; a builder belongs to exactly one
/// reader for the lifetime of a run.
#[derive(Debug)]
pub struct PacketBuilder {
    channel_id: u32,
    sequence: u32,
}

impl PacketBuilder {
    pub fn new(channel_id: u32) -> Self {
        Self {
            channel_id,
            sequence: 0,
        }
    }

    /// Sequence number of the most recently built packet (0 before the first)
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Build the next packet, stamped with the current UTC time.
    ///
    /// `record` is `None` when the line could not be parsed or the stream
    /// format is unknown; the packet is then marked invalid.
    pub fn build(&mut self, raw: &str, record: Option<WeatherRecord>, last: bool) -> WeatherPacket {
        self.build_at(raw, record, last, chrono::Utc::now().naive_utc())
    }

    pub fn build_at(
        &mut self,
        raw: &str,
        record: Option<WeatherRecord>,
        last: bool,
        created: NaiveDateTime,
    ) -> WeatherPacket {
        self.sequence = self.sequence.wrapping_add(1);
        let created = Timestamp::from_datetime(&created);

        let raw = raw.as_bytes();
        let serial = raw[..raw.len().min(SERIAL_STRING_SIZE)].to_vec();

        WeatherPacket {
            header: GlobalHeader {
                data_type: WEATHER_DATA_TYPE.to_string(),
                channel_id: self.channel_id,
                sequence: self.sequence,
                total_header_size: TOTAL_HEADER_SIZE as u32,
                data_size: SERIAL_STRING_SIZE as u32,
                first: self.sequence == 1,
                last,
                abort: false,
                valid: record.is_some(),
                start_time: created,
                stop_time: created,
            },
            record: record.unwrap_or_default(),
            serial,
        }
    }
}
