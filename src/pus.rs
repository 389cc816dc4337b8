//! PUS secondary headers.
//!
//! This module implements the Packet Utilization Standard (PUS) secondary
//! headers that follow the space packet primary header: the telecommand (TC)
//! header and the telemetry (TM) header. It also lists the service and message
//! subtype identifiers understood by the payload controller.

use crate::spp::{HeaderError, check_width, to_array};
use deku::prelude::*;

/// PUS TC secondary header size in bytes.
pub const TC_SECONDARY_HEADER_SIZE: usize = 5;

/// PUS TM secondary header size in bytes.
pub const TM_SECONDARY_HEADER_SIZE: usize = 9;

/// PUS version number written in TM secondary headers.
pub const PUS_VERSION: u8 = 1;

/// Request verification service (PUS service 1).
pub const REQUEST_VERIFICATION_SERVICE_ID: u8 = 1;

/// Housekeeping service (PUS service 3).
pub const HOUSEKEEPING_SERVICE_ID: u8 = 3;

/// Test service (PUS service 17).
pub const TEST_SERVICE_ID: u8 = 17;

/// TC[3,5] enable periodic housekeeping reports.
pub const HK_ENABLE_PERIODIC_REPORTS: u8 = 5;

/// TC[3,6] disable periodic housekeeping reports.
pub const HK_DISABLE_PERIODIC_REPORTS: u8 = 6;

/// TM[3,25] housekeeping parameter report.
pub const HK_PARAMETER_REPORT: u8 = 25;

/// TC[3,27] generate a one-shot housekeeping report.
pub const HK_ONE_SHOT: u8 = 27;

/// TC[17,1] are-you-alive connection test.
pub const TEST_ARE_YOU_ALIVE: u8 = 1;

/// TM[17,2] are-you-alive connection test report.
pub const TEST_ARE_YOU_ALIVE_REPORT: u8 = 2;

/// PUS TC secondary header.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, DekuRead, DekuWrite)]
pub struct TcSecondaryHeader {
    /// PUS version number (4 bits).
    #[deku(bits = 4)]
    pub pus_version: u8,
    /// Acknowledgement flags.
    pub ack_flags: AckFlags,
    /// Service type identifier.
    pub service_type_id: u8,
    /// Message subtype identifier.
    pub message_subtype_id: u8,
    /// Source identifier of the requester.
    #[deku(endian = "big")]
    pub source_id: u16,
}

/// Acknowledgement flags of a TC.
///
/// Each flag requests the corresponding successful execution verification
/// report from the request verification service.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Hash, DekuRead, DekuWrite)]
pub struct AckFlags {
    /// Successful acceptance verification requested (bit 3).
    #[deku(bits = 1)]
    pub acceptance: bool,
    /// Successful start of execution verification requested (bit 2).
    #[deku(bits = 1)]
    pub start: bool,
    /// Successful progress of execution verification requested (bit 1).
    #[deku(bits = 1)]
    pub progress: bool,
    /// Successful completion of execution verification requested (bit 0).
    #[deku(bits = 1)]
    pub completion: bool,
}

impl AckFlags {
    /// All four acknowledgements requested.
    pub const ALL: AckFlags = AckFlags {
        acceptance: true,
        start: true,
        progress: true,
        completion: true,
    };

    /// No acknowledgements requested.
    pub const NONE: AckFlags = AckFlags {
        acceptance: false,
        start: false,
        progress: false,
        completion: false,
    };

    /// Builds the flags from the low nibble of `bits`.
    pub fn from_bits(bits: u8) -> AckFlags {
        AckFlags {
            acceptance: bits & 0x08 != 0,
            start: bits & 0x04 != 0,
            progress: bits & 0x02 != 0,
            completion: bits & 0x01 != 0,
        }
    }

    /// Returns the flags as a 4-bit value.
    pub fn bits(&self) -> u8 {
        (u8::from(self.acceptance) << 3)
            | (u8::from(self.start) << 2)
            | (u8::from(self.progress) << 1)
            | u8::from(self.completion)
    }
}

impl TcSecondaryHeader {
    /// Decodes a TC secondary header.
    pub fn decode(
        raw: &[u8; TC_SECONDARY_HEADER_SIZE],
    ) -> Result<TcSecondaryHeader, HeaderError> {
        Ok(TcSecondaryHeader::try_from(&raw[..])?)
    }

    /// Encodes the TC secondary header.
    pub fn encode(&self) -> Result<[u8; TC_SECONDARY_HEADER_SIZE], HeaderError> {
        check_width("pus_version", self.pus_version.into(), 4)?;
        to_array(self)
    }
}

/// PUS TM secondary header.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, DekuRead, DekuWrite)]
pub struct TmSecondaryHeader {
    /// PUS version number (4 bits).
    #[deku(bits = 4)]
    pub pus_version: u8,
    /// Spacecraft time reference status (4 bits).
    #[deku(bits = 4)]
    pub time_reference_status: u8,
    /// Service type identifier.
    pub service_type_id: u8,
    /// Message subtype identifier.
    pub message_subtype_id: u8,
    /// Message type counter.
    #[deku(endian = "big")]
    pub message_type_counter: u16,
    /// Destination identifier.
    ///
    /// This is the source identifier of the TC that caused the report, or the
    /// housekeeping source identity for unsolicited reports.
    #[deku(endian = "big")]
    pub destination_id: u16,
    /// Coarse time.
    #[deku(endian = "big")]
    pub time: u16,
}

impl TmSecondaryHeader {
    /// Builds a TM secondary header for the report `(service_type_id,
    /// message_subtype_id)` addressed to `destination_id`.
    pub fn new(
        service_type_id: u8,
        message_subtype_id: u8,
        destination_id: u16,
        time: u16,
    ) -> TmSecondaryHeader {
        TmSecondaryHeader {
            pus_version: PUS_VERSION,
            time_reference_status: 0,
            service_type_id,
            message_subtype_id,
            message_type_counter: 0,
            destination_id,
            time,
        }
    }

    /// Decodes a TM secondary header.
    pub fn decode(
        raw: &[u8; TM_SECONDARY_HEADER_SIZE],
    ) -> Result<TmSecondaryHeader, HeaderError> {
        Ok(TmSecondaryHeader::try_from(&raw[..])?)
    }

    /// Encodes the TM secondary header.
    pub fn encode(&self) -> Result<[u8; TM_SECONDARY_HEADER_SIZE], HeaderError> {
        check_width("pus_version", self.pus_version.into(), 4)?;
        check_width(
            "time_reference_status",
            self.time_reference_status.into(),
            4,
        )?;
        to_array(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_tc_header() {
        let header = TcSecondaryHeader::decode(&[0x2d, 0x11, 0x01, 0xbe, 0xef]).unwrap();
        assert_eq!(
            header,
            TcSecondaryHeader {
                pus_version: 2,
                ack_flags: AckFlags {
                    acceptance: true,
                    start: true,
                    progress: false,
                    completion: true,
                },
                service_type_id: TEST_SERVICE_ID,
                message_subtype_id: TEST_ARE_YOU_ALIVE,
                source_id: 0xbeef,
            }
        );
    }

    #[test]
    fn serialize_tc_header() {
        let header = TcSecondaryHeader {
            pus_version: 1,
            ack_flags: AckFlags::from_bits(0b0110),
            service_type_id: HOUSEKEEPING_SERVICE_ID,
            message_subtype_id: HK_ONE_SHOT,
            source_id: 0x1234,
        };
        // the low byte of the source id must not be shifted away
        assert_eq!(header.encode().unwrap(), [0x16, 0x03, 0x1b, 0x12, 0x34]);
    }

    #[test]
    fn parse_tm_header() {
        // secondary header of a housekeeping report captured from the payload
        let raw = [0x10, 0x03, 0x19, 0x00, 0x00, 0x00, 0x00, 0x2d, 0x0d];
        let header = TmSecondaryHeader::decode(&raw).unwrap();
        assert_eq!(
            header,
            TmSecondaryHeader {
                pus_version: 1,
                time_reference_status: 0,
                service_type_id: HOUSEKEEPING_SERVICE_ID,
                message_subtype_id: HK_PARAMETER_REPORT,
                message_type_counter: 0,
                destination_id: 0,
                time: 0x2d0d,
            }
        );
        assert_eq!(header.encode().unwrap(), raw);
    }

    #[test]
    fn serialize_tm_header() {
        let header = TmSecondaryHeader {
            pus_version: 1,
            time_reference_status: 0xa,
            service_type_id: REQUEST_VERIFICATION_SERVICE_ID,
            message_subtype_id: 7,
            message_type_counter: 0x0102,
            destination_id: 0x0304,
            time: 0x0506,
        };
        assert_eq!(
            header.encode().unwrap(),
            [0x1a, 0x01, 0x07, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );
    }

    #[test]
    fn ack_flag_bits() {
        for bits in 0..16 {
            assert_eq!(AckFlags::from_bits(bits).bits(), bits);
        }
        assert_eq!(AckFlags::ALL.bits(), 0x0f);
        assert!(AckFlags::from_bits(0x08).acceptance);
        assert!(AckFlags::from_bits(0x01).completion);
    }

    #[test]
    fn reject_wide_version() {
        let mut header = TmSecondaryHeader::new(TEST_SERVICE_ID, 2, 0, 0);
        header.pus_version = 0x10;
        assert!(header.encode().is_err());
    }
}
