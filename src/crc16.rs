//! CRC16.
//!
//! Space packets exchanged with the payload controller end with a CRC16-CCITT
//! (polynomial 0x1021, initial value 0xFFFF, no reflection, no final XOR)
//! computed over every byte that precedes it. This is the CRC that the PUS
//! standard uses, known in the [`crc`] catalogue as CRC-16/IBM-3740.

use thiserror::Error;

const CRC_CCITT_FALSE: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// CRC size.
///
/// This indicates the size of the trailing CRC16 field in bytes.
pub const CRC_SIZE: usize = 2;

/// CRC mismatch.
///
/// Returned by [`validate`] when the CRC carried by a packet does not match
/// the CRC computed over its contents.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Error)]
#[error("CRC mismatch: received {received:#06x}, computed {computed:#06x}")]
pub struct ChecksumMismatch {
    /// CRC found in the last two bytes of the packet.
    pub received: u16,
    /// CRC computed over the rest of the packet.
    pub computed: u16,
}

/// Computes the CRC16 of `data`.
///
/// ```
/// use payload_comms::crc16;
///
/// assert_eq!(crc16::compute(b"123456789"), 0x29b1);
/// ```
pub fn compute(data: &[u8]) -> u16 {
    CRC_CCITT_FALSE.checksum(data)
}

/// Validates the CRC of a packet.
///
/// The last two bytes of `packet` are interpreted as the big-endian CRC of all
/// the preceding bytes. A packet shorter than the CRC itself can never be
/// valid; it is reported as a mismatch against the CRC of the empty sequence.
pub fn validate(packet: &[u8]) -> Result<(), ChecksumMismatch> {
    let Some(crc_offset) = packet.len().checked_sub(CRC_SIZE) else {
        return Err(ChecksumMismatch {
            received: 0,
            computed: compute(&[]),
        });
    };
    let (data, crc) = packet.split_at(crc_offset);
    let received = u16::from_be_bytes([crc[0], crc[1]]);
    let computed = compute(data);
    if received == computed {
        Ok(())
    } else {
        Err(ChecksumMismatch { received, computed })
    }
}

/// Appends the big-endian CRC16 of `packet` to `packet`.
pub fn append(packet: &mut Vec<u8>) {
    let crc = compute(packet);
    packet.extend_from_slice(&crc.to_be_bytes());
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(compute(b"123456789"), 0x29b1);
    }

    #[test]
    fn empty_input_is_initial_value() {
        assert_eq!(compute(&[]), 0xffff);
    }

    #[test]
    fn validate_appended_crc() {
        for len in [0, 1, 6, 17, 255] {
            let mut packet: Vec<u8> = (0..len).map(|n| (n * 7 + 3) as u8).collect();
            append(&mut packet);
            assert_eq!(validate(&packet), Ok(()));
        }
    }

    #[test]
    fn single_bit_flips_are_detected() {
        let mut packet = b"are you alive?".to_vec();
        append(&mut packet);
        for byte in 0..packet.len() {
            for bit in 0..8 {
                let mut corrupted = packet.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    validate(&corrupted).is_err(),
                    "flip of bit {bit} in byte {byte} not detected"
                );
            }
        }
    }

    #[test]
    fn mismatch_reports_both_values() {
        let packet = [0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x12, 0x34];
        assert_eq!(
            validate(&packet),
            Err(ChecksumMismatch {
                received: 0x1234,
                computed: 0x29b1,
            })
        );
    }

    #[test]
    fn too_short_packet() {
        assert!(validate(&[0xff]).is_err());
        assert!(validate(&[]).is_err());
    }
}
