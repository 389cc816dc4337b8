//! Packet pipelines.
//!
//! This module contains the transmission pipeline, which turns headers and a
//! payload into a framed telemetry packet handed to the transport, and the
//! reception pipeline, which turns a received frame into a validated
//! telecommand. Ground-side counterparts (telecommand assembly and telemetry
//! decoding) are provided for tools and tests.

use crate::{
    crc16::{self, CRC_SIZE},
    error::{RxError, TxError},
    framing,
    interfaces::Interface,
    pus::{
        TC_SECONDARY_HEADER_SIZE, TM_SECONDARY_HEADER_SIZE, TcSecondaryHeader, TmSecondaryHeader,
    },
    spp::{MAX_PACKET_SIZE, PRIMARY_HEADER_SIZE, PacketType, PrimaryHeader},
};

/// Telemetry sink.
///
/// This trait represents anything that can take a telemetry packet, given as
/// its headers and payload, and send it down the link.
pub trait TelemetrySink {
    /// Sends a telemetry packet.
    ///
    /// The caller computes the packet data length of `primary` as the size of
    /// the TM secondary header plus the payload plus the CRC, minus one.
    fn send_telemetry(
        &mut self,
        primary: &PrimaryHeader,
        secondary: &TmSecondaryHeader,
        payload: &[u8],
    ) -> Result<(), TxError>;
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for &mut S {
    fn send_telemetry(
        &mut self,
        primary: &PrimaryHeader,
        secondary: &TmSecondaryHeader,
        payload: &[u8],
    ) -> Result<(), TxError> {
        (**self).send_telemetry(primary, secondary, payload)
    }
}

/// Telemetry transmitter.
///
/// This struct implements the transmission pipeline on top of an
/// [`Interface`]: the packet is assembled, its CRC appended, and the result is
/// framed and handed to the transport.
#[derive(Debug)]
pub struct Transmitter<I> {
    interface: I,
}

impl<I: Interface> Transmitter<I> {
    /// Creates a transmitter that sends frames through `interface`.
    pub fn new(interface: I) -> Transmitter<I> {
        Transmitter { interface }
    }

    /// Returns a reference to the underlying interface.
    pub fn interface(&self) -> &I {
        &self.interface
    }

    /// Returns a mutable reference to the underlying interface.
    pub fn interface_mut(&mut self) -> &mut I {
        &mut self.interface
    }

    /// Consumes the transmitter, returning the underlying interface.
    pub fn into_inner(self) -> I {
        self.interface
    }
}

impl<I: Interface> TelemetrySink for Transmitter<I> {
    fn send_telemetry(
        &mut self,
        primary: &PrimaryHeader,
        secondary: &TmSecondaryHeader,
        payload: &[u8],
    ) -> Result<(), TxError> {
        let packet = assemble_telemetry(primary, secondary, payload)?;
        let framed = framing::frame(&packet);
        self.interface
            .transmit(&framed)
            .map_err(|err| TxError::Transport(err.into()))
    }
}

/// Assembles an unframed telemetry packet.
///
/// The primary header, TM secondary header and payload are written in order,
/// followed by the big-endian CRC16 of everything before it.
pub fn assemble_telemetry(
    primary: &PrimaryHeader,
    secondary: &TmSecondaryHeader,
    payload: &[u8],
) -> Result<Vec<u8>, TxError> {
    check_data_field(primary, TM_SECONDARY_HEADER_SIZE + payload.len() + CRC_SIZE)?;
    let mut packet = Vec::with_capacity(primary.packet_len());
    packet.extend_from_slice(&primary.encode()?);
    packet.extend_from_slice(&secondary.encode()?);
    packet.extend_from_slice(payload);
    crc16::append(&mut packet);
    Ok(packet)
}

/// Assembles an unframed telecommand packet.
///
/// This is the ground-side counterpart of [`ingest`]. The secondary header
/// is omitted when `secondary` is `None`, in which case the secondary header
/// flag of `primary` must be clear.
pub fn assemble_telecommand(
    primary: &PrimaryHeader,
    secondary: Option<&TcSecondaryHeader>,
    payload: &[u8],
) -> Result<Vec<u8>, TxError> {
    let secondary_len = if secondary.is_some() {
        TC_SECONDARY_HEADER_SIZE
    } else {
        0
    };
    check_data_field(primary, secondary_len + payload.len() + CRC_SIZE)?;
    let mut packet = Vec::with_capacity(primary.packet_len());
    packet.extend_from_slice(&primary.encode()?);
    if let Some(secondary) = secondary {
        packet.extend_from_slice(&secondary.encode()?);
    }
    packet.extend_from_slice(payload);
    crc16::append(&mut packet);
    Ok(packet)
}

fn check_data_field(primary: &PrimaryHeader, data_field_len: usize) -> Result<(), TxError> {
    let packet_len = PRIMARY_HEADER_SIZE + data_field_len;
    if packet_len > MAX_PACKET_SIZE {
        return Err(TxError::Oversize(packet_len));
    }
    if primary.data_field_len() != data_field_len {
        return Err(TxError::LengthMismatch {
            declared: primary.data_field_len(),
            actual: data_field_len,
        });
    }
    Ok(())
}

/// Validated telecommand.
///
/// This struct contains a telecommand that passed the reception pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ValidatedTc {
    /// Primary header.
    pub primary: PrimaryHeader,
    /// PUS TC secondary header.
    ///
    /// This is `None` if the secondary header flag of the primary header is
    /// clear.
    pub secondary: Option<TcSecondaryHeader>,
    /// Application data following the headers, without the CRC.
    pub application_data: Vec<u8>,
}

/// Decoded telemetry packet.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TelemetryPacket {
    /// Primary header.
    pub primary: PrimaryHeader,
    /// PUS TM secondary header.
    pub secondary: TmSecondaryHeader,
    /// Source data following the headers, without the CRC.
    pub payload: Vec<u8>,
}

/// Receives a framed telecommand.
///
/// The frame is de-stuffed and handed to [`validate_telecommand`].
pub fn ingest(framed: &[u8]) -> Result<ValidatedTc, RxError> {
    let packet = framing::deframe(framed)?;
    validate_telecommand(&packet)
}

/// Validates an unframed telecommand.
///
/// The primary header is decoded, the packet length it declares is checked
/// against the available bytes and the CRC is verified before anything else
/// is looked at. The TC secondary header is decoded only when the primary
/// header announces it. Bytes after the declared packet length are ignored.
pub fn validate_telecommand(packet: &[u8]) -> Result<ValidatedTc, RxError> {
    let (primary, data_field) = checked_data_field(packet)?;
    if primary.packet_type != PacketType::Telecommand {
        return Err(RxError::Malformed("telemetry packet received as telecommand"));
    }
    if !primary.secondary_header_flag {
        return Ok(ValidatedTc {
            primary,
            secondary: None,
            application_data: data_field.to_vec(),
        });
    }
    let Some((raw, application_data)) = data_field.split_first_chunk() else {
        return Err(RxError::Truncated {
            expected: PRIMARY_HEADER_SIZE + TC_SECONDARY_HEADER_SIZE + CRC_SIZE,
            actual: primary.packet_len(),
        });
    };
    Ok(ValidatedTc {
        primary,
        secondary: Some(TcSecondaryHeader::decode(raw)?),
        application_data: application_data.to_vec(),
    })
}

/// Decodes an unframed telemetry packet.
///
/// This is the ground-side counterpart of [`assemble_telemetry`]. The same
/// length and CRC checks as for telecommands apply.
pub fn decode_telemetry(packet: &[u8]) -> Result<TelemetryPacket, RxError> {
    let (primary, data_field) = checked_data_field(packet)?;
    if primary.packet_type != PacketType::Telemetry {
        return Err(RxError::Malformed("telecommand packet received as telemetry"));
    }
    if !primary.secondary_header_flag {
        return Err(RxError::Malformed("telemetry packet without secondary header"));
    }
    let Some((raw, payload)) = data_field.split_first_chunk() else {
        return Err(RxError::Truncated {
            expected: PRIMARY_HEADER_SIZE + TM_SECONDARY_HEADER_SIZE + CRC_SIZE,
            actual: primary.packet_len(),
        });
    };
    Ok(TelemetryPacket {
        primary,
        secondary: TmSecondaryHeader::decode(raw)?,
        payload: payload.to_vec(),
    })
}

/// Decodes the primary header, checks the declared length and the CRC, and
/// returns the packet data field without the CRC.
fn checked_data_field(packet: &[u8]) -> Result<(PrimaryHeader, &[u8]), RxError> {
    let Some(raw) = packet.first_chunk() else {
        return Err(RxError::Truncated {
            expected: PRIMARY_HEADER_SIZE,
            actual: packet.len(),
        });
    };
    let primary = PrimaryHeader::decode(raw)?;
    let packet_len = primary.packet_len();
    if packet_len > MAX_PACKET_SIZE {
        return Err(RxError::Malformed("declared length exceeds maximum packet size"));
    }
    if primary.data_field_len() < CRC_SIZE {
        return Err(RxError::Malformed("packet data field cannot hold the CRC"));
    }
    let Some(packet) = packet.get(..packet_len) else {
        return Err(RxError::Truncated {
            expected: packet_len,
            actual: packet.len(),
        });
    };
    crc16::validate(packet)?;
    Ok((primary, &packet[PRIMARY_HEADER_SIZE..packet_len - CRC_SIZE]))
}
