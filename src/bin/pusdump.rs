use anyhow::{Context, Result};
use clap::Parser;
use payload_comms::{
    framing,
    interfaces::{Interface, ZmqInterface},
};
use pcap_file::pcap::{PcapWriter, RawPcapPacket};
use std::{fs::File, path::PathBuf, time::Duration};

/// tcpdump-like tool for space packets.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// ZMQ socket from which frames are received.
    #[arg(long, default_value = "tcp://127.0.0.1:6000")]
    zmq_socket: String,
    /// PCAP output file for space packets.
    #[arg(long)]
    pcap_file: PathBuf,
    /// Also write frames that fail to deframe, as received.
    #[arg(long)]
    include_bad_frames: bool,
}

fn write_packet(pcap_writer: &mut PcapWriter<File>, packet: &[u8]) -> Result<()> {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let mut sll_header = vec![0u8; 16];
    sll_header.extend_from_slice(packet);
    let orig_len = u32::try_from(sll_header.len()).context("Packet too long for PCAP")?;
    let raw_packet = RawPcapPacket {
        ts_sec: u32::try_from(t.as_secs()).context("Timestamp out of PCAP range")?,
        ts_frac: t.subsec_nanos(),
        incl_len: orig_len,
        orig_len,
        data: sll_header.into(),
    };
    pcap_writer
        .write_raw_packet(&raw_packet)
        .context("Error writing packet to PCAP file")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let pcap_file = File::create(&args.pcap_file).with_context(|| {
        format!(
            "Failed to create output PCAP file {}",
            args.pcap_file.display()
        )
    })?;
    let pcap_header = pcap_file::pcap::PcapHeader {
        datalink: pcap_file::DataLink::LINUX_SLL,
        ts_resolution: pcap_file::TsResolution::NanoSecond,
        ..Default::default()
    };
    let mut pcap_writer = PcapWriter::with_header(pcap_file, pcap_header)
        .context("Failed to write header to PCAP file")?;

    let zmq_context = zmq::Context::new();
    let mut interface = ZmqInterface::new_sub(&zmq_context, &args.zmq_socket)?;

    loop {
        if !interface.wait_readable(Duration::from_secs(1))? {
            continue;
        }
        while let Some(frame) = interface.receive()? {
            match framing::deframe(&frame) {
                Ok(packet) => write_packet(&mut pcap_writer, &packet)?,
                Err(err) => {
                    log::warn!("{err}: {frame:02x?}");
                    if args.include_bad_frames {
                        write_packet(&mut pcap_writer, &frame)?;
                    }
                }
            }
        }
    }
}
