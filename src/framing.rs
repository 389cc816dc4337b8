//! Framing.
//!
//! Space packets travel over the serial link byte-stuffed with Consistent
//! Overhead Byte Stuffing (COBS) and terminated by a single `0x00` sentinel.
//! Stuffing guarantees that the sentinel never appears inside a frame, so a
//! receiver can split the incoming byte stream at every zero byte.

use crate::{error::RxError, spp::MAX_PACKET_SIZE};
use std::collections::VecDeque;

/// Frame delimiter.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Maximum size of a framed packet, including the delimiter.
///
/// COBS adds one overhead byte for every 254 bytes of data (at least one).
pub const MAX_FRAME_SIZE: usize = MAX_PACKET_SIZE + MAX_PACKET_SIZE.div_ceil(254) + 1;

/// Frames a packet.
///
/// The packet is COBS encoded and the frame delimiter is appended.
pub fn frame(packet: &[u8]) -> Vec<u8> {
    let mut framed = cobs::encode_vec(packet);
    framed.push(FRAME_DELIMITER);
    framed
}

/// Deframes a packet.
///
/// This is the inverse of [`frame`]. The trailing delimiter is optional.
pub fn deframe(framed: &[u8]) -> Result<Vec<u8>, RxError> {
    let encoded = framed.strip_suffix(&[FRAME_DELIMITER]).unwrap_or(framed);
    cobs::decode_vec(encoded).map_err(|_| RxError::Framing)
}

/// Frame accumulator.
///
/// This struct splits a byte stream that arrives in arbitrary chunks into
/// complete frames. A partially received frame is simply not yet available.
/// Frames longer than [`MAX_FRAME_SIZE`] are discarded up to the next
/// delimiter, so that a lost delimiter cannot make the buffer grow without
/// bound.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct FrameAccumulator {
    partial: Vec<u8>,
    frames: VecDeque<Vec<u8>>,
    discarding: bool,
}

impl FrameAccumulator {
    /// Creates an empty frame accumulator.
    pub fn new() -> FrameAccumulator {
        FrameAccumulator::default()
    }

    /// Feeds received bytes into the accumulator.
    pub fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.discarding {
                if byte == FRAME_DELIMITER {
                    self.discarding = false;
                }
                continue;
            }
            self.partial.push(byte);
            if byte == FRAME_DELIMITER {
                if self.partial.len() > 1 {
                    self.frames.push_back(std::mem::take(&mut self.partial));
                } else {
                    // back-to-back delimiters carry no frame
                    self.partial.clear();
                }
            } else if self.partial.len() >= MAX_FRAME_SIZE {
                log::debug!(
                    "discarding frame longer than {MAX_FRAME_SIZE} bytes without delimiter"
                );
                self.partial.clear();
                self.discarding = true;
            }
        }
    }

    /// Returns the next complete frame, including its delimiter.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Returns whether a complete frame is waiting to be taken.
    pub fn has_complete_frame(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Returns whether bytes of an incomplete frame are buffered.
    pub fn has_partial_frame(&self) -> bool {
        !self.partial.is_empty() || self.discarding
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_has_no_inner_zeros() {
        let packet = [0x00, 0x11, 0x00, 0x00, 0x22, 0x33, 0x00];
        let framed = frame(&packet);
        assert_eq!(framed, [0x01, 0x02, 0x11, 0x01, 0x03, 0x22, 0x33, 0x01, 0x00]);
        assert_eq!(framed.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(deframe(&framed).unwrap(), packet);
    }

    #[test]
    fn deframe_without_delimiter() {
        assert_eq!(deframe(&[0x03, 0x11, 0x22]).unwrap(), [0x11, 0x22]);
    }

    #[test]
    fn long_packet() {
        let packet: Vec<u8> = (0..MAX_PACKET_SIZE).map(|n| (n % 251) as u8).collect();
        let framed = frame(&packet);
        assert!(framed.len() <= MAX_FRAME_SIZE);
        assert_eq!(deframe(&framed).unwrap(), packet);
    }

    #[test]
    fn accumulate_chunked_stream() {
        let first = frame(&[0x18, 0x2a, 0x00]);
        let second = frame(&[0x01, 0x02, 0x03, 0x04]);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut accumulator = FrameAccumulator::new();
        // byte-at-a-time delivery, like a UART receive interrupt
        for (n, byte) in stream.iter().enumerate() {
            accumulator.push(&[*byte]);
            if n + 1 < first.len() {
                assert!(accumulator.next_frame().is_none());
                assert!(accumulator.has_partial_frame());
            }
        }
        assert!(accumulator.has_complete_frame());
        assert_eq!(accumulator.next_frame(), Some(first));
        assert_eq!(accumulator.next_frame(), Some(second));
        assert_eq!(accumulator.next_frame(), None);
        assert!(!accumulator.has_partial_frame());
    }

    #[test]
    fn skip_empty_frames() {
        let mut accumulator = FrameAccumulator::new();
        accumulator.push(&[0x00, 0x00, 0x02, 0x55, 0x00, 0x00]);
        assert_eq!(accumulator.next_frame(), Some(vec![0x02, 0x55, 0x00]));
        assert_eq!(accumulator.next_frame(), None);
    }

    #[test]
    fn discard_overlong_frame() {
        let mut accumulator = FrameAccumulator::new();
        accumulator.push(&vec![0x01; MAX_FRAME_SIZE + 10]);
        assert!(accumulator.next_frame().is_none());
        accumulator.push(&[0x01, 0x01, 0x00]);
        // the tail of the overlong frame is dropped with it
        assert!(accumulator.next_frame().is_none());
        let good = frame(&[0x42]);
        accumulator.push(&good);
        assert_eq!(accumulator.next_frame(), Some(good));
    }
}
