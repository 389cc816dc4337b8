use anyhow::Result;
use clap::Parser;
use payload_comms::{
    dispatch::{DeviceMode, UnknownServicePolicy},
    engine::{DEFAULT_HOUSEKEEPING_PERIOD, Engine, EngineConfig, Tick},
    interfaces::open_zmq_link,
    services::housekeeping::{FixedParameters, ParameterId},
};
use std::time::{Duration, Instant};

/// Payload controller communication engine.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about, long_about = None)]
struct Args {
    /// ZMQ socket to which frames are sent.
    #[arg(long, default_value = "tcp://127.0.0.1:6000")]
    zmq_tx_socket: String,
    /// ZMQ socket from which frames are received.
    #[arg(long, default_value = "tcp://127.0.0.1:7000")]
    zmq_rx_socket: String,
    /// Device mode at start.
    #[arg(long, value_enum, default_value_t = DeviceMode::Normal)]
    mode: DeviceMode,
    /// Handling of telecommands for services that are not implemented.
    #[arg(long, value_enum, default_value_t = UnknownServicePolicy::Silent)]
    unknown_service: UnknownServicePolicy,
    /// Period of housekeeping reports (in ticks).
    #[arg(long, default_value_t = DEFAULT_HOUSEKEEPING_PERIOD)]
    housekeeping_period: Tick,
    /// Duration of one engine tick.
    #[arg(long, default_value = "1ms")]
    tick: humantime::Duration,
}

/// Nominal readings reported while no sensors are attached.
fn nominal_readings() -> FixedParameters {
    FixedParameters::new()
        .with(ParameterId::BatteryVoltage, 3700)
        .with(ParameterId::Temperature, 2500)
        .with(ParameterId::Microcontroller3V3, 3300)
        .with(ParameterId::Fpga1V5, 1500)
        .with(ParameterId::Fpga3V3, 3300)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let tick = Duration::from(args.tick);
    anyhow::ensure!(!tick.is_zero(), "tick duration must not be zero");

    let config = EngineConfig {
        mode: args.mode,
        unknown_service_policy: args.unknown_service,
        housekeeping_period: args.housekeeping_period,
    };
    let link = open_zmq_link(&args.zmq_tx_socket, &args.zmq_rx_socket)?;
    let mut engine = Engine::with_payload_services(link, config, nominal_readings());
    log::info!(
        "payload controller running in {:?} mode with tick {}",
        config.mode,
        args.tick
    );

    let start = Instant::now();
    loop {
        engine.interface().rx.wait_readable(tick)?;
        // the tick counter wraps around
        let now = (start.elapsed().as_nanos() / tick.as_nanos()) as Tick;
        engine.poll(now);
    }
}
