//! Nalix wire format — the packet envelope that precedes every message.
//!
//! The header layout, field order, and checksum scope ARE the protocol.
//! Test vectors in `tests` pin the byte layout; changing field order or
//! the checksum's scope after this is a breaking change.
//!
//! The fixed-size header is a `#[repr(C, packed)]` struct with `zerocopy`
//! derives for allocation-free, safe (de)serialization — the same
//! approach `summit-core::wire` takes for `ChunkHeader`. The header's raw
//! fields are plain integers; the domain enums (`Protocol`, `PacketType`,
//! `Priority`) are validated on top of the raw bytes rather than derived
//! directly, since not every byte value is a legal discriminant. The
//! variable-length payload sits outside this struct and is copied
//! separately — there's nothing to gain from zerocopy for that part.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, I32, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::NalixError;

/// Size of the fixed wire header, in bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum total packet length (header + payload), per the `length` field
/// being a `u16`.
pub const MAX_PACKET_LEN: usize = u16::MAX as usize;

/// Transport discriminator carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 1,
    Udp = 2,
}

impl Protocol {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Tcp),
            2 => Some(Self::Udp),
            _ => None,
        }
    }
}

/// Payload type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Binary = 0,
    String = 1,
    Json = 2,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Binary),
            1 => Some(Self::String),
            2 => Some(Self::Json),
            _ => None,
        }
    }
}

/// Priority class. Ordered `Low < Medium < High < Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            3 => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Flag bits. Only the low 5 bits are defined; bits 5-7 are reserved and
/// must be zero (`decode` rejects a packet with any reserved bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const ENCRYPTED: u8 = 0x08;
    pub const COMPRESSED: u8 = 0x04;
    pub const SIGNED: u8 = 0x10;
    pub const RELIABLE: u8 = 0x20;
    pub const FRAGMENTED: u8 = 0x40;

    /// All bits not assigned a meaning above.
    const RESERVED_MASK: u8 = !(Self::ENCRYPTED
        | Self::COMPRESSED
        | Self::SIGNED
        | Self::RELIABLE
        | Self::FRAGMENTED);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }

    pub fn with(mut self, bit: u8) -> Self {
        self.set(bit);
        self
    }

    pub fn has_reserved_bits(&self) -> bool {
        self.0 & Self::RESERVED_MASK != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.contains(Self::ENCRYPTED)
    }

    pub fn is_compressed(&self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub fn is_signed(&self) -> bool {
        self.contains(Self::SIGNED)
    }
}

/// CRC32-IEEE over the payload only (not the header). Polynomial
/// `0xEDB88320`, initial `0xFFFFFFFF`, final XOR `0xFFFFFFFF` — the
/// standard IEEE parameters `crc32fast` implements directly.
///
/// Header fields, including the checksum field itself, never participate:
/// computing a checksum that covers itself is circular, and covering the
/// rest of the header would make every header field immutable once the
/// checksum is set (re-stamping a priority or timestamp would require
/// recomputing a checksum unrelated to the change).
pub fn checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// The fixed 16-byte header, laid out exactly as it appears on the wire.
/// Field order here is the wire order — see `encode`/`decode`. Multi-byte
/// fields use `zerocopy`'s explicit little-endian integer wrappers rather
/// than native `u16`/`u32`/`i32`, since the protocol's byte order is part
/// of its contract and must hold regardless of the host's endianness.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct RawHeader {
    total_len: U16<LittleEndian>,
    opcode: U16<LittleEndian>,
    protocol: u8,
    checksum: U32<LittleEndian>,
    r#type: u8,
    flags: u8,
    priority: u8,
    timestamp: I32<LittleEndian>,
}

assert_eq_size!(RawHeader, [u8; HEADER_SIZE]);

/// An immutable value describing one message on the wire.
///
/// Constructed either by [`PacketBuilder`] (send side) or by [`decode`]
/// (receive side). `length` and `checksum` are always internally
/// consistent with `payload` — there is no way to construct a `Packet`
/// with a stale checksum.
#[derive(Debug, Clone)]
pub struct Packet {
    pub opcode: u16,
    pub protocol: Protocol,
    pub r#type: PacketType,
    pub flags: Flags,
    pub priority: Priority,
    pub timestamp: i64,
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Total wire length: header plus payload.
    pub fn length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// `Encrypted` and `Signed` are mutually exclusive for transformer
    /// operations — a signed packet refuses encrypt/decrypt.
    pub fn is_transformable(&self) -> bool {
        !self.flags.is_signed()
    }
}

/// Builds a [`Packet`] on the send side, recomputing length and checksum
/// from the payload rather than letting the caller set them directly.
pub struct PacketBuilder {
    opcode: u16,
    protocol: Protocol,
    r#type: PacketType,
    flags: Flags,
    priority: Priority,
    timestamp: i64,
    payload: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(opcode: u16, protocol: Protocol) -> Self {
        Self {
            opcode,
            protocol,
            r#type: PacketType::Binary,
            flags: Flags::empty(),
            priority: Priority::Low,
            timestamp: 0,
            payload: Vec::new(),
        }
    }

    pub fn r#type(mut self, t: PacketType) -> Self {
        self.r#type = t;
        self
    }

    pub fn flags(mut self, f: Flags) -> Self {
        self.flags = f;
        self
    }

    pub fn priority(mut self, p: Priority) -> Self {
        self.priority = p;
        self
    }

    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Result<Packet, NalixError> {
        if HEADER_SIZE + self.payload.len() > MAX_PACKET_LEN {
            return Err(NalixError::LengthMismatch {
                declared: HEADER_SIZE + self.payload.len(),
                available: MAX_PACKET_LEN,
            });
        }
        let checksum = checksum(&self.payload);
        Ok(Packet {
            opcode: self.opcode,
            protocol: self.protocol,
            r#type: self.r#type,
            flags: self.flags,
            priority: self.priority,
            timestamp: self.timestamp,
            checksum,
            payload: self.payload,
        })
    }
}

/// Builds a literal error/protocol packet: opcode 0, type String, payload
/// is a leading [`crate::error::PacketErrorCode`] byte followed by a
/// UTF-8 message.
pub fn error_packet(code: crate::error::PacketErrorCode, message: &str) -> Packet {
    let mut payload = Vec::with_capacity(1 + message.len());
    payload.push(code as u8);
    payload.extend_from_slice(message.as_bytes());
    PacketBuilder::new(0, Protocol::Tcp)
        .r#type(PacketType::String)
        .payload(payload)
        .build()
        .expect("error packet payload is always well under MAX_PACKET_LEN")
}

/// Encode `packet` into `dst`, returning the number of bytes written.
///
/// Fails with [`NalixError::DestinationTooSmall`] if `dst` cannot hold the
/// full packet. The checksum is recomputed from the payload before
/// writing, so `packet.checksum` is always trusted, not the caller's.
pub fn encode(packet: &Packet, dst: &mut [u8]) -> Result<usize, NalixError> {
    let total = packet.length();
    if dst.len() < total {
        return Err(NalixError::DestinationTooSmall {
            need: total,
            have: dst.len(),
        });
    }

    let checksum = checksum(&packet.payload);

    let header = RawHeader {
        total_len: U16::new(total as u16),
        opcode: U16::new(packet.opcode),
        protocol: packet.protocol as u8,
        checksum: U32::new(checksum),
        r#type: packet.r#type as u8,
        flags: packet.flags.0,
        priority: packet.priority as u8,
        timestamp: I32::new(packet.timestamp as i32),
    };
    dst[0..HEADER_SIZE].copy_from_slice(header.as_bytes());
    dst[HEADER_SIZE..total].copy_from_slice(&packet.payload);

    Ok(total)
}

/// Decode a [`Packet`] from `src`. `src` may contain trailing bytes beyond
/// the declared `length` — only `length` bytes are consumed.
///
/// Fails with:
/// - [`NalixError::TruncatedHeader`] if `src` is shorter than [`HEADER_SIZE`].
/// - [`NalixError::LengthMismatch`] if the declared length exceeds `src.len()`.
/// - [`NalixError::ChecksumMismatch`] if the payload's CRC32 doesn't match.
/// - [`NalixError::UnsupportedFlags`] if a reserved flag bit is set.
pub fn decode(src: &[u8]) -> Result<Packet, NalixError> {
    if src.len() < HEADER_SIZE {
        return Err(NalixError::TruncatedHeader {
            need: HEADER_SIZE,
            have: src.len(),
        });
    }

    // `read_from_prefix` only requires `src.len() >= HEADER_SIZE`, already
    // checked above; the trailing payload/garbage bytes are untouched.
    let header = RawHeader::read_from_prefix(src).expect("size checked above");

    let length = header.total_len.get() as usize;
    if length < HEADER_SIZE || length > src.len() {
        return Err(NalixError::LengthMismatch {
            declared: length,
            available: src.len(),
        });
    }

    let opcode = header.opcode.get();
    let protocol = Protocol::from_u8(header.protocol).unwrap_or(Protocol::Tcp);
    let expected_checksum = header.checksum.get();
    let r#type = PacketType::from_u8(header.r#type).unwrap_or(PacketType::Binary);
    let flags = Flags(header.flags);
    let priority = Priority::from_u8(header.priority).unwrap_or(Priority::Low);
    let timestamp = header.timestamp.get() as i64;

    if flags.has_reserved_bits() {
        return Err(NalixError::UnsupportedFlags(flags.0));
    }

    let payload = src[HEADER_SIZE..length].to_vec();
    let computed = checksum(&payload);
    if computed != expected_checksum {
        return Err(NalixError::ChecksumMismatch {
            expected: expected_checksum,
            computed,
        });
    }

    Ok(Packet {
        opcode,
        protocol,
        r#type,
        flags,
        priority,
        timestamp,
        checksum: computed,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_unencrypted_ping() {
        let packet = PacketBuilder::new(0x0001, Protocol::Tcp)
            .r#type(PacketType::Binary)
            .priority(Priority::Low)
            .payload(vec![0xDE, 0xAD, 0xBE, 0xEF])
            .build()
            .unwrap();

        assert_eq!(packet.length(), HEADER_SIZE + 4);
        assert_eq!(packet.checksum, 0x7C9CA35A);

        let mut buf = vec![0u8; packet.length()];
        let written = encode(&packet, &mut buf).unwrap();
        assert_eq!(written, packet.length());

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.opcode, packet.opcode);
        assert_eq!(decoded.protocol, packet.protocol);
        assert_eq!(decoded.r#type, packet.r#type);
        assert_eq!(decoded.flags, packet.flags);
        assert_eq!(decoded.priority, packet.priority);
        assert_eq!(decoded.checksum, packet.checksum);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let buf = [0u8; 8];
        assert!(matches!(
            decode(&buf),
            Err(NalixError::TruncatedHeader { .. })
        ));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&(HEADER_SIZE as u16 + 100).to_le_bytes());
        assert!(matches!(
            decode(&buf),
            Err(NalixError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_tampered_payload() {
        let packet = PacketBuilder::new(1, Protocol::Tcp)
            .payload(vec![1, 2, 3, 4])
            .build()
            .unwrap();
        let mut buf = vec![0u8; packet.length()];
        encode(&packet, &mut buf).unwrap();
        buf[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            decode(&buf),
            Err(NalixError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_reserved_flag_bits() {
        let packet = PacketBuilder::new(1, Protocol::Tcp)
            .payload(vec![1])
            .build()
            .unwrap();
        let mut buf = vec![0u8; packet.length()];
        encode(&packet, &mut buf).unwrap();
        buf[10] |= 0x80; // a reserved bit
        assert!(matches!(
            decode(&buf),
            Err(NalixError::UnsupportedFlags(_))
        ));
    }

    #[test]
    fn encode_rejects_destination_too_small() {
        let packet = PacketBuilder::new(1, Protocol::Tcp)
            .payload(vec![1, 2, 3])
            .build()
            .unwrap();
        let mut buf = vec![0u8; 2];
        assert!(matches!(
            encode(&packet, &mut buf),
            Err(NalixError::DestinationTooSmall { .. })
        ));
    }

    #[test]
    fn flags_mutual_exclusion_checked_by_caller() {
        let signed = Flags::empty().with(Flags::SIGNED);
        let packet = PacketBuilder::new(1, Protocol::Tcp)
            .flags(signed)
            .payload(vec![1])
            .build()
            .unwrap();
        assert!(!packet.is_transformable());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Urgent);
    }

    #[test]
    fn error_packet_has_expected_shape() {
        let p = error_packet(crate::error::PacketErrorCode::UnknownOpcode, "nope");
        assert_eq!(p.opcode, 0);
        assert_eq!(p.r#type, PacketType::String);
        assert_eq!(
            p.payload[0],
            crate::error::PacketErrorCode::UnknownOpcode as u8
        );
        assert_eq!(&p.payload[1..], b"nope");
    }
}
