use super::Interface;
use crate::framing::FrameAccumulator;
use anyhow::Result;

/// In-memory interface.
///
/// This struct stands in for the serial link when the engine runs without
/// hardware. Bytes injected with [`MemoryInterface::inject`] are treated as a
/// received byte stream, and every transmitted frame is recorded in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryInterface {
    accumulator: FrameAccumulator,
    transmitted: Vec<Vec<u8>>,
}

impl MemoryInterface {
    /// Creates an idle in-memory interface.
    pub fn new() -> MemoryInterface {
        MemoryInterface::default()
    }

    /// Injects received bytes.
    ///
    /// The bytes may contain any number of frames, including a partial frame
    /// that is completed by a later call.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.accumulator.push(bytes);
    }

    /// Returns the frames transmitted so far.
    pub fn transmitted(&self) -> &[Vec<u8>] {
        &self.transmitted
    }

    /// Takes the frames transmitted so far, leaving the record empty.
    pub fn take_transmitted(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.transmitted)
    }
}

impl Interface for MemoryInterface {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.transmitted.push(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.accumulator.next_frame())
    }
}
