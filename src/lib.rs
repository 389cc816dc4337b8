//! payload-comms
//!
//! This is a Rust crate that implements the onboard communication stack of a
//! satellite payload controller. Telecommands (TC) and telemetry (TM) travel
//! as [CCSDS Space Packets](https://public.ccsds.org/Pubs/133x0b2e2.pdf) with
//! Packet Utilization Standard (PUS) secondary headers, protected by a CRC16
//! and framed with COBS over a byte-stream link. The crate contains the packet
//! codecs and pipelines, request verification, telecommand dispatch and the
//! test and housekeeping services, as well as some CLI tools to talk to the
//! payload from the ground.

#![warn(missing_docs)]

pub mod crc16;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod framing;
pub mod interfaces;
pub mod pipeline;
pub mod pus;
pub mod services;
pub mod spp;
pub mod verification;
