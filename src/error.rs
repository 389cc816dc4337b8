//! Errors.
//!
//! Every failure in the protocol engine is local and recoverable: the engine
//! logs it, drops the offending packet or command and carries on with the next
//! frame.

use crate::{
    crc16::ChecksumMismatch,
    dispatch::DeviceMode,
    spp::HeaderError,
    verification::{self, Stage, VerificationState},
};
use thiserror::Error;

/// Error receiving a telecommand.
#[derive(Debug, Error)]
pub enum RxError {
    /// The frame could not be de-stuffed.
    #[error("failed to deframe packet")]
    Framing,
    /// Fewer bytes are available than the headers declare.
    #[error("packet truncated: {expected} bytes required, {actual} available")]
    Truncated {
        /// Number of bytes the packet requires.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },
    /// The length or type fields are inconsistent.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    /// The CRC does not match.
    #[error(transparent)]
    ChecksumMismatch(#[from] ChecksumMismatch),
    /// A header could not be decoded.
    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),
}

/// Error transmitting a telemetry packet.
#[derive(Debug, Error)]
pub enum TxError {
    /// The packet does not fit in the transport buffer.
    #[error("packet of {0} bytes exceeds the maximum packet size")]
    Oversize(usize),
    /// The primary header packet data length disagrees with the data field.
    #[error("packet data length {declared} does not match a data field of {actual} bytes")]
    LengthMismatch {
        /// Packet data field length declared by the primary header.
        declared: usize,
        /// Actual packet data field length.
        actual: usize,
    },
    /// A header could not be encoded.
    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),
    /// The transport failed to accept the frame.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Error reporting a request verification stage.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The stage is behind the current state of the request.
    #[error("cannot report {requested:?} in state {current:?}")]
    OutOfOrder {
        /// State the request has reached.
        current: VerificationState,
        /// Stage that was reported.
        requested: Stage,
    },
    /// The verification report could not be sent.
    #[error("failed to send verification report: {0}")]
    Tx(#[from] TxError),
}

/// Error executing a telecommand inside a service handler.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service does not implement the message subtype.
    #[error("service {service} has no subtype {subtype}")]
    UnknownSubtype {
        /// Service type identifier.
        service: u8,
        /// Message subtype identifier.
        subtype: u8,
    },
    /// A housekeeping command referenced a structure that does not exist.
    #[error("no housekeeping structure with SID {0:#06x}")]
    UnknownSid(u16),
    /// The application data of the command is inconsistent.
    #[error("malformed application data: {0}")]
    Malformed(&'static str),
    /// A response could not be sent.
    #[error(transparent)]
    Tx(#[from] TxError),
    /// A verification report could not be sent.
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl ServiceError {
    /// Returns the failure code carried by execution failure reports.
    pub fn failure_code(&self) -> u16 {
        match self {
            ServiceError::UnknownSubtype { .. } => verification::FAILURE_UNKNOWN_SUBTYPE,
            ServiceError::UnknownSid(_) => verification::FAILURE_UNKNOWN_SID,
            ServiceError::Malformed(_) => verification::FAILURE_MALFORMED,
            ServiceError::Tx(_) | ServiceError::Verification(_) => {
                verification::FAILURE_EXECUTION
            }
        }
    }
}

/// Error dispatching a telecommand.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Commands are only processed in normal mode.
    #[error("device is in {0:?} mode, not operational")]
    NotOperational(DeviceMode),
    /// The telecommand has no secondary header and cannot be routed.
    #[error("telecommand has no secondary header")]
    MissingSecondaryHeader,
    /// No handler is registered for the service type.
    #[error("no handler registered for service {0}")]
    UnknownService(u8),
    /// The service does not handle the message subtype.
    #[error("service {service} does not handle subtype {subtype}")]
    UnknownSubtype {
        /// Service type identifier.
        service: u8,
        /// Message subtype identifier.
        subtype: u8,
    },
    /// The handler failed.
    #[error("service {service} failed: {source}")]
    Service {
        /// Service type identifier.
        service: u8,
        /// Handler error.
        #[source]
        source: ServiceError,
    },
    /// A verification report around the handler could not be sent.
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

/// Error processing an inbound frame end-to-end.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The frame was rejected by the reception pipeline.
    #[error(transparent)]
    Rx(#[from] RxError),
    /// The telecommand was rejected by the dispatcher.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
