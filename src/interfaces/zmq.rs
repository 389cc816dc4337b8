use super::Interface;
use crate::framing::FrameAccumulator;
use anyhow::{Context as _, Result};
use std::time::Duration;
use zmq::{Context, Socket};

/// ZMQ link interface.
///
/// This struct represents a ZMQ socket that emulates one direction of the
/// serial link. Frames are sent to a ZMQ PUB socket, and they are received in a
/// ZMQ SUB socket. Each ZMQ message carries an arbitrary chunk of the byte
/// stream, so received bytes go through a [`FrameAccumulator`] exactly like
/// bytes arriving from a UART.
pub struct ZmqInterface {
    socket: Socket,
    accumulator: FrameAccumulator,
}

impl ZmqInterface {
    /// Creates a ZMQ PUB socket that can send frames.
    ///
    /// The `context` variable is the [`zmq`] context, and `address` is the
    /// address of the ZMQ socket.
    pub fn new_pub(context: &Context, address: &str) -> Result<ZmqInterface> {
        let socket = context
            .socket(zmq::PUB)
            .context("Failed to create ZMQ PUB socket")?;
        socket
            .connect(address)
            .with_context(|| format!("Failed to connect ZMQ PUB socket to {address}"))?;
        Ok(ZmqInterface {
            socket,
            accumulator: FrameAccumulator::new(),
        })
    }

    /// Creates a ZMQ SUB socket that can receive frames.
    ///
    /// The `context` variable is the [`zmq`] context, and `address` is the
    /// address of the ZMQ socket. The socket subscribes to every message,
    /// since the byte stream has no addressing of its own.
    pub fn new_sub(context: &Context, address: &str) -> Result<ZmqInterface> {
        let socket = context
            .socket(zmq::SUB)
            .context("Failed to create ZMQ SUB socket")?;
        socket
            .connect(address)
            .with_context(|| format!("Failed to connect ZMQ SUB socket to {address}"))?;
        socket
            .set_subscribe(b"")
            .context("Failed to subscribe to all topics in ZMQ SUB socket")?;
        Ok(ZmqInterface {
            socket,
            accumulator: FrameAccumulator::new(),
        })
    }

    /// Waits until the socket has data to read.
    ///
    /// Returns `true` if data arrived or a complete frame is already buffered,
    /// and `false` if `timeout` elapsed first.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        if self.accumulator.has_complete_frame() {
            return Ok(true);
        }
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let ready = self
            .socket
            .poll(zmq::POLLIN, timeout_ms)
            .context("Failed to poll ZMQ socket")?;
        Ok(ready > 0)
    }
}

impl Interface for ZmqInterface {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        let flags = 0;
        self.socket
            .send(frame, flags)
            .context("Failed to send frame to ZMQ socket")?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.accumulator.next_frame() {
                return Ok(Some(frame));
            }
            match self.socket.recv_bytes(zmq::DONTWAIT) {
                Ok(bytes) => self.accumulator.push(&bytes),
                Err(zmq::Error::EAGAIN) => return Ok(None),
                Err(err) => {
                    return Err(err).context("Failed to receive bytes from ZMQ socket");
                }
            }
        }
    }
}
