//! Radio packet framing.
//!
//! A frame is at most [`PACKET_MAX_SIZE`] bytes: a tightly packed 13-byte
//! header followed by typed blocks. Every block is a 2-byte header (type,
//! count) and one or more fixed-size bodies, each of which starts with a
//! signed millisecond offset from the packet's half-minute time base. All
//! multi-byte fields are little-endian with no padding.

use arrayvec::ArrayString;
use static_assertions::const_assert;
use thiserror::Error;

/// The maximum size a packet can be in bytes.
pub const PACKET_MAX_SIZE: usize = 255;

/// Length of the call sign field, trailing bytes are NUL.
pub const CALL_SIGN_LEN: usize = 9;

/// Size of the packet header in bytes: call sign, timestamp, block count,
/// packet number.
pub const PACKET_HEADER_SIZE: usize = CALL_SIGN_LEN + 2 + 1 + 1;

/// Size of a block header in bytes: type and body count.
pub const BLOCK_HEADER_SIZE: usize = 2;

/// The packet header time base in milliseconds (half-minutes).
pub const HALF_MINUTE_MS: u32 = 30_000;

/// A HAM radio call sign, at most [`CALL_SIGN_LEN`] ASCII characters.
pub type CallSign = ArrayString<CALL_SIGN_LEN>;

const_assert!(PACKET_HEADER_SIZE == 13);
const_assert!(PACKET_HEADER_SIZE + BLOCK_HEADER_SIZE + MAX_BODY_LEN <= PACKET_MAX_SIZE);

/// Largest body length over all block types.
const MAX_BODY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("frame too small to contain a packet header")]
    MissingHeader,
    #[error("no room left in the packet for a {0:?} block")]
    NoRoom(BlockType),
    #[error("mission time does not fit the packet's time base")]
    OffsetOutOfRange,
    #[error("unknown block type 0x{0:x}")]
    UnknownBlockType(u8),
    #[error("frame truncated while parsing")]
    Truncated,
    #[error("block count of zero is not valid")]
    EmptyBlock,
}

/// Sub-types of data blocks that can be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockType {
    /// Altitude above sea level.
    AltSea = 0x0,
    /// Altitude above launch level.
    AltLaunch = 0x1,
    /// Temperature data.
    Temperature = 0x2,
    /// Pressure data.
    Pressure = 0x3,
    /// Relative linear acceleration data.
    AccelRel = 0x4,
    /// Angular velocity data.
    AngularVel = 0x5,
    /// Humidity data.
    Humidity = 0x6,
    /// Latitude and longitude coordinates.
    LatLong = 0x7,
    /// Voltage in millivolts with a unique sensor id.
    Voltage = 0x8,
    /// Magnetic field data.
    Magnetic = 0x9,
    /// Status information.
    Status = 0xA,
    /// Error information.
    Error = 0xB,
}

/// Number of defined block types; used to size per-type bookkeeping arrays.
pub const BLOCK_TYPE_COUNT: usize = 12;

impl BlockType {
    pub fn from_u8(raw: u8) -> Result<Self, PacketError> {
        Ok(match raw {
            0x0 => Self::AltSea,
            0x1 => Self::AltLaunch,
            0x2 => Self::Temperature,
            0x3 => Self::Pressure,
            0x4 => Self::AccelRel,
            0x5 => Self::AngularVel,
            0x6 => Self::Humidity,
            0x7 => Self::LatLong,
            0x8 => Self::Voltage,
            0x9 => Self::Magnetic,
            0xA => Self::Status,
            0xB => Self::Error,
            other => return Err(PacketError::UnknownBlockType(other)),
        })
    }

    /// The number of bytes in one body of this type, including the leading
    /// time offset.
    pub fn body_len(self) -> usize {
        match self {
            Self::AltSea | Self::AltLaunch | Self::Temperature | Self::Pressure | Self::Humidity => {
                2 + 4
            }
            Self::AccelRel | Self::AngularVel | Self::Magnetic => 2 + 3 * 2,
            Self::LatLong => 2 + 4 + 4,
            Self::Voltage => 2 + 2 + 1,
            Self::Status => 2 + 1,
            Self::Error => 2 + 1 + 1,
        }
    }

    /// Index for per-type counters.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One block body, in the units the wire format uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockBody {
    /// Altitude in millimetres above sea level.
    AltSea { altitude_mm: i32 },
    /// Altitude in millimetres above launch height.
    AltLaunch { altitude_mm: i32 },
    /// Temperature in millidegrees Celsius.
    Temperature { millicelsius: i32 },
    /// Pressure in Pascals.
    Pressure { pascals: u32 },
    /// Linear acceleration in centimetres per second squared.
    AccelRel { x: i16, y: i16, z: i16 },
    /// Angular velocity in tenths of degrees per second.
    AngularVel { x: i16, y: i16, z: i16 },
    /// Relative humidity in ten-thousandths of a percent.
    Humidity { ten_thousandths: u32 },
    /// Coordinates in 0.1 microdegrees per LSB.
    LatLong { latitude: i32, longitude: i32 },
    /// Voltage in millivolts with the id of the measured sensor.
    Voltage { millivolts: i16, id: u8 },
    /// Magnetic field in 0.1 microtesla per LSB.
    Magnetic { x: i16, y: i16, z: i16 },
    /// A status code, see [`crate::status::StatusCode`].
    Status { code: u8 },
    /// An error code with its originating process (must be < 32).
    Error { process: u8, code: u8 },
}

impl BlockBody {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::AltSea { .. } => BlockType::AltSea,
            Self::AltLaunch { .. } => BlockType::AltLaunch,
            Self::Temperature { .. } => BlockType::Temperature,
            Self::Pressure { .. } => BlockType::Pressure,
            Self::AccelRel { .. } => BlockType::AccelRel,
            Self::AngularVel { .. } => BlockType::AngularVel,
            Self::Humidity { .. } => BlockType::Humidity,
            Self::LatLong { .. } => BlockType::LatLong,
            Self::Voltage { .. } => BlockType::Voltage,
            Self::Magnetic { .. } => BlockType::Magnetic,
            Self::Status { .. } => BlockType::Status,
            Self::Error { .. } => BlockType::Error,
        }
    }

    /// Write the body fields after the time offset. `buf` starts at the
    /// first field byte and must hold `body_len() - 2` bytes.
    fn write_fields(&self, buf: &mut [u8]) {
        match *self {
            Self::AltSea { altitude_mm } | Self::AltLaunch { altitude_mm } => {
                buf[0..4].copy_from_slice(&altitude_mm.to_le_bytes());
            }
            Self::Temperature { millicelsius } => {
                buf[0..4].copy_from_slice(&millicelsius.to_le_bytes());
            }
            Self::Pressure { pascals } => {
                buf[0..4].copy_from_slice(&pascals.to_le_bytes());
            }
            Self::Humidity { ten_thousandths } => {
                buf[0..4].copy_from_slice(&ten_thousandths.to_le_bytes());
            }
            Self::AccelRel { x, y, z } | Self::AngularVel { x, y, z } | Self::Magnetic { x, y, z } => {
                buf[0..2].copy_from_slice(&x.to_le_bytes());
                buf[2..4].copy_from_slice(&y.to_le_bytes());
                buf[4..6].copy_from_slice(&z.to_le_bytes());
            }
            Self::LatLong { latitude, longitude } => {
                buf[0..4].copy_from_slice(&latitude.to_le_bytes());
                buf[4..8].copy_from_slice(&longitude.to_le_bytes());
            }
            Self::Voltage { millivolts, id } => {
                buf[0..2].copy_from_slice(&millivolts.to_le_bytes());
                buf[2] = id;
            }
            Self::Status { code } => {
                buf[0] = code;
            }
            Self::Error { process, code } => {
                buf[0] = process;
                buf[1] = code;
            }
        }
    }

    fn parse_fields(block_type: BlockType, buf: &[u8]) -> Self {
        let i16_at = |i: usize| i16::from_le_bytes([buf[i], buf[i + 1]]);
        let i32_at = |i: usize| i32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        match block_type {
            BlockType::AltSea => Self::AltSea { altitude_mm: i32_at(0) },
            BlockType::AltLaunch => Self::AltLaunch { altitude_mm: i32_at(0) },
            BlockType::Temperature => Self::Temperature { millicelsius: i32_at(0) },
            BlockType::Pressure => Self::Pressure { pascals: u32_at(0) },
            BlockType::AccelRel => Self::AccelRel { x: i16_at(0), y: i16_at(2), z: i16_at(4) },
            BlockType::AngularVel => Self::AngularVel { x: i16_at(0), y: i16_at(2), z: i16_at(4) },
            BlockType::Humidity => Self::Humidity { ten_thousandths: u32_at(0) },
            BlockType::LatLong => Self::LatLong { latitude: i32_at(0), longitude: i32_at(4) },
            BlockType::Voltage => Self::Voltage { millivolts: i16_at(0), id: buf[2] },
            BlockType::Magnetic => Self::Magnetic { x: i16_at(0), y: i16_at(2), z: i16_at(4) },
            BlockType::Status => Self::Status { code: buf[0] },
            BlockType::Error => Self::Error { process: buf[0], code: buf[1] },
        }
    }
}

/// The header at the start of every radio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Call sign with trailing NULs.
    pub call_sign: [u8; CALL_SIGN_LEN],
    /// The time that blocks in this packet are offset from, in half-minutes.
    pub timestamp: u16,
    /// The number of blocks in this packet.
    pub blocks: u8,
    /// Which number this packet is in the stream of sent packets.
    pub packet_num: u8,
}

impl PacketHeader {
    pub fn new(call_sign: &CallSign, packet_num: u8, mission_time_ms: u32) -> Self {
        let mut sign = [0u8; CALL_SIGN_LEN];
        let bytes = call_sign.as_bytes();
        sign[..bytes.len()].copy_from_slice(bytes);
        Self {
            call_sign: sign,
            timestamp: half_minute_timestamp(mission_time_ms),
            blocks: 0,
            packet_num,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..CALL_SIGN_LEN].copy_from_slice(&self.call_sign);
        buf[9..11].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[11] = self.blocks;
        buf[12] = self.packet_num;
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::MissingHeader);
        }
        let mut call_sign = [0u8; CALL_SIGN_LEN];
        call_sign.copy_from_slice(&buf[..CALL_SIGN_LEN]);
        Ok(Self {
            call_sign,
            timestamp: u16::from_le_bytes([buf[9], buf[10]]),
            blocks: buf[11],
            packet_num: buf[12],
        })
    }
}

/// The absolute timestamp that should be used for a packet created at the
/// given mission time. Rolls over to the next half-minute when over halfway
/// to it.
pub fn half_minute_timestamp(mission_time_ms: u32) -> u16 {
    let mut timestamp = ((mission_time_ms / 1000) / 30) as u16;
    if mission_time_ms - u32::from(timestamp) * HALF_MINUTE_MS > 15_000 {
        timestamp += 1;
    }
    timestamp
}

/// The signed millisecond offset of `mission_time_ms` from a half-minute
/// timestamp, or `None` if it cannot be represented in 16 bits.
pub fn time_offset(mission_time_ms: u32, timestamp: u16) -> Option<i16> {
    let offset = i64::from(mission_time_ms) - i64::from(timestamp) * i64::from(HALF_MINUTE_MS);
    i16::try_from(offset).ok()
}

/// Appends a block to the frame if it is possible to do so.
///
/// `end` is the current number of valid bytes in `frame`, which must already
/// contain a packet header. On success the block header, offset and body are
/// written, the header's block count is incremented and the new end offset is
/// returned.
pub fn append_block(
    frame: &mut [u8],
    end: usize,
    body: &BlockBody,
    mission_time_ms: u32,
) -> Result<usize, PacketError> {
    let block_type = body.block_type();
    let block_size = BLOCK_HEADER_SIZE + block_type.body_len();
    if end < PACKET_HEADER_SIZE {
        return Err(PacketError::MissingHeader);
    }
    if end + block_size > PACKET_MAX_SIZE || end + block_size > frame.len() {
        return Err(PacketError::NoRoom(block_type));
    }
    let timestamp = u16::from_le_bytes([frame[9], frame[10]]);
    let offset = time_offset(mission_time_ms, timestamp).ok_or(PacketError::OffsetOutOfRange)?;

    frame[end] = block_type as u8;
    frame[end + 1] = 1; // one body per block for now, readers accept more
    frame[end + 2..end + 4].copy_from_slice(&offset.to_le_bytes());
    body.write_fields(&mut frame[end + 4..end + block_size]);
    frame[11] = frame[11].wrapping_add(1);
    Ok(end + block_size)
}

/// A parsed block: its type and the bodies it carried, each with the time
/// offset it was recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    pub block_type: BlockType,
    pub bodies: Vec<(i16, BlockBody)>,
}

/// Parse a complete frame back into its header and blocks. Ground-side
/// counterpart of [`append_block`], also used to verify framing laws.
pub fn parse_packet(frame: &[u8]) -> Result<(PacketHeader, Vec<ParsedBlock>), PacketError> {
    let header = PacketHeader::parse(frame)?;
    let mut blocks = Vec::with_capacity(usize::from(header.blocks));
    let mut at = PACKET_HEADER_SIZE;
    for _ in 0..header.blocks {
        if at + BLOCK_HEADER_SIZE > frame.len() {
            return Err(PacketError::Truncated);
        }
        let block_type = BlockType::from_u8(frame[at])?;
        let count = frame[at + 1];
        if count == 0 {
            return Err(PacketError::EmptyBlock);
        }
        at += BLOCK_HEADER_SIZE;
        let mut bodies = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let body_len = block_type.body_len();
            if at + body_len > frame.len() {
                return Err(PacketError::Truncated);
            }
            let offset = i16::from_le_bytes([frame[at], frame[at + 1]]);
            let body = BlockBody::parse_fields(block_type, &frame[at + 2..at + body_len]);
            bodies.push((offset, body));
            at += body_len;
        }
        blocks.push(ParsedBlock { block_type, bodies });
    }
    Ok((header, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_sign() -> CallSign {
        CallSign::from("VA3TST").unwrap()
    }

    fn framed(mission_time_ms: u32) -> ([u8; PACKET_MAX_SIZE], usize) {
        let mut frame = [0u8; PACKET_MAX_SIZE];
        PacketHeader::new(&call_sign(), 0, mission_time_ms).write_to(&mut frame);
        (frame, PACKET_HEADER_SIZE)
    }

    #[test]
    fn timestamp_rounds_to_nearest_half_minute() {
        assert_eq!(half_minute_timestamp(0), 0);
        assert_eq!(half_minute_timestamp(15_000), 0);
        // 16s is over halfway to the next half-minute
        assert_eq!(half_minute_timestamp(16_000), 1);
        assert_eq!(half_minute_timestamp(30_000), 1);
        assert_eq!(half_minute_timestamp(44_999), 1);
        assert_eq!(half_minute_timestamp(45_001), 2);
    }

    #[test]
    fn offset_is_relative_to_time_base() {
        assert_eq!(time_offset(16_000, 1), Some(-14_000));
        assert_eq!(time_offset(30_100, 1), Some(100));
        assert_eq!(time_offset(100_000, 1), None);
        assert_eq!(time_offset(0, 2), None);
    }

    #[test]
    fn header_round_trips_with_padding() {
        let header = PacketHeader::new(&call_sign(), 7, 16_000);
        let mut buf = [0u8; PACKET_HEADER_SIZE];
        header.write_to(&mut buf);
        assert_eq!(&buf[..6], b"VA3TST");
        assert_eq!(&buf[6..9], &[0, 0, 0]);
        assert_eq!(PacketHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn append_rejects_headerless_frame() {
        let frame = &mut [0u8; PACKET_MAX_SIZE];
        let body = BlockBody::Pressure { pascals: 101_325 };
        assert_eq!(append_block(frame, 0, &body, 1000), Err(PacketError::MissingHeader));
    }

    #[test]
    fn append_rejects_unrepresentable_offset() {
        let (mut frame, end) = framed(0);
        let body = BlockBody::Pressure { pascals: 101_325 };
        assert_eq!(
            append_block(&mut frame, end, &body, 40_000),
            Err(PacketError::OffsetOutOfRange)
        );
    }

    #[test]
    fn append_stops_at_packet_capacity() {
        let (mut frame, mut end) = framed(1000);
        let body = BlockBody::LatLong { latitude: 453_824_910, longitude: -756_982_470 };
        // 12-byte blocks: 20 fit after the 13-byte header, the 21st does not
        for _ in 0..20 {
            end = append_block(&mut frame, end, &body, 1000).unwrap();
        }
        assert_eq!(
            append_block(&mut frame, end, &body, 1000),
            Err(PacketError::NoRoom(BlockType::LatLong))
        );
        assert_eq!(frame[11], 20);
    }

    #[test]
    fn frame_round_trips_every_field() {
        let mission_time = 31_000;
        let (mut frame, mut end) = framed(mission_time);
        let bodies = [
            BlockBody::AltSea { altitude_mm: 1_189_000 },
            BlockBody::Temperature { millicelsius: -12_500 },
            BlockBody::Pressure { pascals: 101_325 },
            BlockBody::AccelRel { x: -981, y: 14, z: 3200 },
            BlockBody::AngularVel { x: 5, y: -5, z: 1800 },
            BlockBody::Humidity { ten_thousandths: 455_000 },
            BlockBody::LatLong { latitude: 453_824_910, longitude: -756_982_470 },
            BlockBody::Voltage { millivolts: 3300, id: 2 },
            BlockBody::Magnetic { x: 250, y: -150, z: 450 },
            BlockBody::Status { code: 0x02 },
            BlockBody::Error { process: 1, code: 0 },
        ];
        for body in &bodies {
            end = append_block(&mut frame, end, body, mission_time).unwrap();
        }

        let (header, blocks) = parse_packet(&frame[..end]).unwrap();
        assert_eq!(header.timestamp, 1);
        assert_eq!(usize::from(header.blocks), bodies.len());
        assert_eq!(blocks.len(), bodies.len());
        for (block, body) in blocks.iter().zip(&bodies) {
            assert_eq!(block.block_type, body.block_type());
            assert_eq!(block.bodies.len(), 1);
            let (offset, parsed) = &block.bodies[0];
            // offset restores the mission time against the header's base
            assert_eq!(
                i64::from(header.timestamp) * i64::from(HALF_MINUTE_MS) + i64::from(*offset),
                i64::from(mission_time)
            );
            assert_eq!(parsed, body);
        }
    }

    #[test]
    fn parser_accepts_multi_body_blocks() {
        let (mut frame, end) = framed(500);
        // hand-build a count=2 pressure block
        let mut at = end;
        frame[at] = BlockType::Pressure as u8;
        frame[at + 1] = 2;
        at += 2;
        for pascals in [99_000u32, 99_100] {
            frame[at..at + 2].copy_from_slice(&500i16.to_le_bytes());
            frame[at + 2..at + 6].copy_from_slice(&pascals.to_le_bytes());
            at += 6;
        }
        frame[11] = 1;

        let (_, blocks) = parse_packet(&frame[..at]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bodies.len(), 2);
        assert_eq!(blocks[0].bodies[1].1, BlockBody::Pressure { pascals: 99_100 });
    }

    #[test]
    fn parser_flags_unknown_type_and_truncation() {
        let (mut frame, end) = framed(500);
        frame[end] = 0xC;
        frame[end + 1] = 1;
        frame[11] = 1;
        assert_eq!(
            parse_packet(&frame[..end + 8]),
            Err(PacketError::UnknownBlockType(0xC))
        );

        frame[end] = BlockType::Pressure as u8;
        assert_eq!(parse_packet(&frame[..end + 3]), Err(PacketError::Truncated));
    }
}
