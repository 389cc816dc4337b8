//! Transport interfaces.
//!
//! This module contains the transports that carry framed packets between the
//! payload controller and the spacecraft bus. The physical link is a byte
//! stream (a UART in flight), which is emulated over ZMQ sockets on the ground
//! and by an in-memory buffer in tests.

use anyhow::Result;

mod memory;
mod zmq;

pub use memory::MemoryInterface;
pub use zmq::ZmqInterface;

/// Abstract transport interface.
///
/// This trait represents a transport that can transmit framed packets and
/// deliver received frames once they are complete.
pub trait Interface {
    /// Transmit a framed packet.
    ///
    /// Transmission is fire-and-forget: the transport owns any retry or
    /// backpressure on the physical link.
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive a framed packet.
    ///
    /// This function never blocks. It returns the next complete frame,
    /// including its delimiter, or `None` if no complete frame has arrived yet.
    fn receive(&mut self) -> Result<Option<Vec<u8>>>;
}

impl<I: Interface + ?Sized> Interface for &mut I {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        (**self).transmit(frame)
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).receive()
    }
}

/// Bidirectional link.
///
/// This struct joins an interface used to transmit (TX) and an interface used
/// to receive (RX) into a single [`Interface`].
#[derive(Debug)]
pub struct Link<Tx, Rx> {
    /// Transmit side.
    pub tx: Tx,
    /// Receive side.
    pub rx: Rx,
}

impl<Tx: Interface, Rx: Interface> Interface for Link<Tx, Rx> {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.tx.transmit(frame)
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        self.rx.receive()
    }
}

/// Open a ZMQ link.
///
/// This function opens a ZMQ PUB socket connected to `tx_address`, to which
/// frames are sent, and a ZMQ SUB socket connected to `rx_address`, from which
/// frames are received.
pub fn open_zmq_link(
    tx_address: &str,
    rx_address: &str,
) -> Result<Link<ZmqInterface, ZmqInterface>> {
    let zmq_context = ::zmq::Context::new();
    let tx = ZmqInterface::new_pub(&zmq_context, tx_address)?;
    let rx = ZmqInterface::new_sub(&zmq_context, rx_address)?;
    Ok(Link { tx, rx })
}
