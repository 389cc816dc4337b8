use anyhow::{Context, Result};
use clap::Parser;
use payload_comms::{
    crc16::CRC_SIZE,
    framing,
    interfaces::{Interface, open_zmq_link},
    pipeline::{TelemetryPacket, assemble_telecommand, decode_telemetry},
    pus::{
        AckFlags, HK_ONE_SHOT, HK_PARAMETER_REPORT, HOUSEKEEPING_SERVICE_ID, PUS_VERSION,
        REQUEST_VERIFICATION_SERVICE_ID, TC_SECONDARY_HEADER_SIZE, TEST_ARE_YOU_ALIVE,
        TEST_ARE_YOU_ALIVE_REPORT, TEST_SERVICE_ID, TcSecondaryHeader,
    },
    spp::{PrimaryHeader, next_sequence_count},
};
use std::time::{Duration, Instant, SystemTime};

/// Ping tool for the PUS test service.
///
/// Sends TC[17,1] are-you-alive requests and prints the telemetry received
/// back, including verification reports.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about, long_about = None)]
struct Args {
    /// ZMQ socket to which frames are sent.
    #[arg(long, default_value = "tcp://127.0.0.1:7000")]
    zmq_tx_socket: String,
    /// ZMQ socket from which frames are received.
    #[arg(long, default_value = "tcp://127.0.0.1:6000")]
    zmq_rx_socket: String,
    /// APID of the requests.
    #[arg(long, value_parser=clap::value_parser!(u16).range(..2048))]
    apid: u16,
    /// Source ID of the requests.
    #[arg(long, default_value_t = 0)]
    source_id: u16,
    /// Acknowledgement flags (acceptance, start, progress, completion from
    /// most to least significant bit).
    #[arg(long, default_value_t = 0xf, value_parser=clap::value_parser!(u8).range(..16))]
    ack: u8,
    /// Number of requests to send.
    #[arg(long, default_value_t = 1)]
    count: u64,
    /// Time to wait for the replies to each request.
    #[arg(long, default_value = "2s")]
    timeout: humantime::Duration,
    /// Also request a one-shot housekeeping report of this SID.
    #[arg(long, value_parser = parse_sid)]
    one_shot: Option<u16>,
}

fn parse_sid(sid: &str) -> Result<u16> {
    let sid = match sid.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => sid.parse()?,
    };
    Ok(sid)
}

fn describe(service: u8, subtype: u8) -> &'static str {
    match (service, subtype) {
        (REQUEST_VERIFICATION_SERVICE_ID, 1) => "accepted",
        (REQUEST_VERIFICATION_SERVICE_ID, 2) => "acceptance failed",
        (REQUEST_VERIFICATION_SERVICE_ID, 3) => "started",
        (REQUEST_VERIFICATION_SERVICE_ID, 4) => "start failed",
        (REQUEST_VERIFICATION_SERVICE_ID, 5) => "progress",
        (REQUEST_VERIFICATION_SERVICE_ID, 6) => "progress failed",
        (REQUEST_VERIFICATION_SERVICE_ID, 7) => "completed",
        (REQUEST_VERIFICATION_SERVICE_ID, 8) => "completion failed",
        (TEST_SERVICE_ID, TEST_ARE_YOU_ALIVE_REPORT) => "alive",
        (HOUSEKEEPING_SERVICE_ID, HK_PARAMETER_REPORT) => "housekeeping",
        _ => "unknown",
    }
}

struct Pinger {
    args: Args,
    sequence_count: u16,
}

impl Pinger {
    fn telecommand(&mut self, service: u8, subtype: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let primary = PrimaryHeader::telecommand(
            self.args.apid,
            self.sequence_count,
            TC_SECONDARY_HEADER_SIZE + payload.len() + CRC_SIZE,
        )?;
        let secondary = TcSecondaryHeader {
            pus_version: PUS_VERSION,
            ack_flags: AckFlags::from_bits(self.args.ack),
            service_type_id: service,
            message_subtype_id: subtype,
            source_id: self.args.source_id,
        };
        self.sequence_count = next_sequence_count(self.sequence_count);
        let packet = assemble_telecommand(&primary, Some(&secondary), payload)?;
        Ok(framing::frame(&packet))
    }

    fn is_last(&self, packet: &TelemetryPacket) -> bool {
        let flags = AckFlags::from_bits(self.args.ack);
        let key = (
            packet.secondary.service_type_id,
            packet.secondary.message_subtype_id,
        );
        if flags.completion {
            matches!(key, (REQUEST_VERIFICATION_SERVICE_ID, 7 | 8))
        } else {
            key == (TEST_SERVICE_ID, TEST_ARE_YOU_ALIVE_REPORT)
        }
    }
}

fn print_telemetry(packet: &TelemetryPacket, sent: Instant) {
    let timestamp = humantime::format_rfc3339_millis(SystemTime::now());
    let timestamp = console::style(format!("{timestamp}")).dim();
    let service = packet.secondary.service_type_id;
    let subtype = packet.secondary.message_subtype_id;
    let kind = console::style(format!("TM[{service},{subtype}]")).green().bold();
    let description = match (service, subtype) {
        (REQUEST_VERIFICATION_SERVICE_ID, 2 | 4 | 6 | 8) => {
            console::style(describe(service, subtype)).red().bold()
        }
        _ => console::style(describe(service, subtype)).bold(),
    };
    let rtt = console::style("RTT").blue().bold();
    let rtt_ms = sent.elapsed().as_secs_f64() * 1e3;
    let ms = console::style("ms").dim();
    println!(
        "{timestamp} {kind} {description} apid {} seq {} dest {} time {} \
         payload {:02x?} {rtt} {rtt_ms:.3} {ms}",
        packet.primary.apid,
        packet.primary.sequence_count,
        packet.secondary.destination_id,
        packet.secondary.time,
        packet.payload,
    );
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let timeout = Duration::from(args.timeout);
    let mut link = open_zmq_link(&args.zmq_tx_socket, &args.zmq_rx_socket)?;
    let mut pinger = Pinger {
        args: args.clone(),
        sequence_count: 0,
    };

    if let Some(sid) = args.one_shot {
        let mut payload = 1u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&sid.to_be_bytes());
        let frame = pinger.telecommand(HOUSEKEEPING_SERVICE_ID, HK_ONE_SHOT, &payload)?;
        link.transmit(&frame)?;
    }

    for _ in 0..args.count {
        let frame = pinger.telecommand(TEST_SERVICE_ID, TEST_ARE_YOU_ALIVE, &[])?;
        let sent = Instant::now();
        link.transmit(&frame)?;
        'wait: while let Some(remaining) = timeout.checked_sub(sent.elapsed()) {
            if !link.rx.wait_readable(remaining)? {
                break;
            }
            while let Some(frame) = link.receive()? {
                let packet = framing::deframe(&frame)
                    .map_err(anyhow::Error::from)
                    .and_then(|packet| decode_telemetry(&packet).map_err(anyhow::Error::from))
                    .context("Failed to decode telemetry");
                let packet = match packet {
                    Ok(packet) => packet,
                    Err(err) => {
                        log::warn!("{err:#}");
                        continue;
                    }
                };
                print_telemetry(&packet, sent);
                if pinger.is_last(&packet) {
                    break 'wait;
                }
            }
        }
    }
    Ok(())
}
