//! Space Packet Protocol.
//!
//! This module implements the CCSDS Space Packet primary header. The [`deku`]
//! crate is used to implement serialization and deserialization of the
//! bit-packed header fields.

use deku::prelude::*;
use std::collections::HashMap;
use thiserror::Error;

/// Primary header size.
///
/// This indicates the space packet primary header size in bytes.
pub const PRIMARY_HEADER_SIZE: usize = 6;

/// Maximum packet size.
///
/// This is the largest complete space packet (primary header, packet data
/// field and CRC) that the transport buffers can hold.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Space packet version number used by this implementation.
pub const SPP_VERSION: u8 = 0;

/// Largest application process identifier (11 bits).
pub const MAX_APID: u16 = (1 << 11) - 1;

/// Largest packet sequence count (14 bits).
pub const MAX_SEQUENCE_COUNT: u16 = (1 << 14) - 1;

/// Error encoding or decoding a fixed-size header.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// A header field does not fit in its bit width.
    #[error("{field} = {value} does not fit in {bits} bits")]
    FieldOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: u32,
        /// Width of the field in bits.
        bits: u32,
    },
    /// The bit-level codec failed.
    #[error("header codec error: {0}")]
    Codec(#[from] DekuError),
    /// The encoded header does not have the size required by the wire format.
    #[error("encoded header is {actual} bytes instead of {expected}")]
    Size {
        /// Size required by the wire format.
        expected: usize,
        /// Size produced by the codec.
        actual: usize,
    },
}

/// Checks that `value` fits in `bits` bits.
pub(crate) fn check_width(
    field: &'static str,
    value: u32,
    bits: u32,
) -> Result<(), HeaderError> {
    if value >> bits == 0 {
        Ok(())
    } else {
        Err(HeaderError::FieldOutOfRange { field, value, bits })
    }
}

/// Serializes a header into a zero-initialized fixed-size array.
pub(crate) fn to_array<const N: usize>(
    header: &impl DekuContainerWrite,
) -> Result<[u8; N], HeaderError> {
    let bytes = header.to_bytes()?;
    if bytes.len() != N {
        return Err(HeaderError::Size {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Space packet primary header.
///
/// This struct contains the fields of the primary header and uses [`deku`] for
/// serialization and deserialization. Multi-byte fields are big-endian on the
/// wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, DekuRead, DekuWrite)]
pub struct PrimaryHeader {
    /// Packet version number (3 bits).
    #[deku(bits = 3)]
    pub version: u8,
    /// Packet type.
    pub packet_type: PacketType,
    /// Secondary header flag.
    ///
    /// This flag is asserted if the packet data field starts with a PUS
    /// secondary header.
    #[deku(bits = 1)]
    pub secondary_header_flag: bool,
    /// Application process identifier (11 bits).
    #[deku(endian = "big", bits = 11)]
    pub apid: u16,
    /// Sequence flags.
    pub sequence_flags: SequenceFlags,
    /// Packet sequence count (14 bits).
    #[deku(endian = "big", bits = 14)]
    pub sequence_count: u16,
    /// Packet data length.
    ///
    /// Following the CCSDS convention, this is the number of bytes that follow
    /// the primary header minus one.
    #[deku(endian = "big")]
    pub packet_data_length: u16,
}

/// Packet type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, DekuRead, DekuWrite)]
#[deku(id_type = "u8", bits = "1")]
pub enum PacketType {
    /// Telemetry.
    #[deku(id = "0")]
    Telemetry,
    /// Telecommand.
    #[deku(id = "1")]
    Telecommand,
}

/// Sequence flags.
///
/// The default is [`SequenceFlags::Unsegmented`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Hash, DekuRead, DekuWrite)]
#[deku(id_type = "u8", bits = "2")]
pub enum SequenceFlags {
    /// Continuation segment of user data.
    #[deku(id = "0")]
    Continuation,
    /// First segment of user data.
    #[deku(id = "1")]
    First,
    /// Last segment of user data.
    #[deku(id = "2")]
    Last,
    /// Unsegmented user data.
    #[deku(id = "3")]
    #[default]
    Unsegmented,
}

impl PrimaryHeader {
    /// Builds a primary header for an unsegmented telemetry packet.
    ///
    /// The `data_field_len` is the total number of bytes following the primary
    /// header (secondary header, payload and CRC). The packet data length field
    /// is set to `data_field_len - 1`.
    pub fn telemetry(
        apid: u16,
        sequence_count: u16,
        data_field_len: usize,
    ) -> Result<PrimaryHeader, HeaderError> {
        Ok(PrimaryHeader {
            version: SPP_VERSION,
            packet_type: PacketType::Telemetry,
            secondary_header_flag: true,
            apid,
            sequence_flags: SequenceFlags::Unsegmented,
            sequence_count,
            packet_data_length: packet_data_length(data_field_len)?,
        })
    }

    /// Builds a primary header for an unsegmented telecommand packet.
    ///
    /// See [`PrimaryHeader::telemetry`] for the meaning of `data_field_len`.
    pub fn telecommand(
        apid: u16,
        sequence_count: u16,
        data_field_len: usize,
    ) -> Result<PrimaryHeader, HeaderError> {
        Ok(PrimaryHeader {
            packet_type: PacketType::Telecommand,
            ..PrimaryHeader::telemetry(apid, sequence_count, data_field_len)?
        })
    }

    /// Decodes a primary header.
    pub fn decode(raw: &[u8; PRIMARY_HEADER_SIZE]) -> Result<PrimaryHeader, HeaderError> {
        Ok(PrimaryHeader::try_from(&raw[..])?)
    }

    /// Encodes the primary header.
    ///
    /// Fields that do not fit in their bit width are rejected.
    pub fn encode(&self) -> Result<[u8; PRIMARY_HEADER_SIZE], HeaderError> {
        check_width("version", self.version.into(), 3)?;
        check_width("apid", self.apid.into(), 11)?;
        check_width("sequence_count", self.sequence_count.into(), 14)?;
        to_array(self)
    }

    /// Returns the total length of the packet.
    ///
    /// This is the primary header size plus the packet data length plus one.
    pub fn packet_len(&self) -> usize {
        usize::from(self.packet_data_length) + PRIMARY_HEADER_SIZE + 1
    }

    /// Returns the length of the packet data field.
    pub fn data_field_len(&self) -> usize {
        usize::from(self.packet_data_length) + 1
    }
}

/// Computes the packet data length field for a packet data field of
/// `data_field_len` bytes.
pub fn packet_data_length(data_field_len: usize) -> Result<u16, HeaderError> {
    data_field_len
        .checked_sub(1)
        .and_then(|len| u16::try_from(len).ok())
        .ok_or(HeaderError::FieldOutOfRange {
            field: "packet_data_length",
            value: u32::try_from(data_field_len).unwrap_or(u32::MAX),
            bits: 16,
        })
}

/// Returns the packet sequence count that follows `count`.
///
/// Packet sequence counts wrap around modulo 2^14.
pub fn next_sequence_count(count: u16) -> u16 {
    count.wrapping_add(1) & MAX_SEQUENCE_COUNT
}

/// Per-APID packet sequence counters.
///
/// Each application process identifier has its own monotonic (modulo 2^14)
/// stream of packet sequence counts. Counters start at zero and are only
/// advanced by their owner after a packet has been sent successfully.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SequenceCounters {
    counts: HashMap<u16, u16>,
}

impl SequenceCounters {
    /// Returns the sequence count to use for the next packet of `apid`.
    pub fn current(&self, apid: u16) -> u16 {
        self.counts.get(&apid).copied().unwrap_or(0)
    }

    /// Advances the counter of `apid` after a successful send.
    pub fn advance(&mut self, apid: u16) {
        let count = self.counts.entry(apid).or_insert(0);
        *count = next_sequence_count(*count);
    }
}
