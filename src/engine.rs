//! Protocol engine.
//!
//! The [`Engine`] ties the pipelines, the dispatcher and the services
//! together. It is a cooperative scheduler: received frames and timer ticks
//! are two event sources handled one at a time by the same worker, so the
//! service state needs no locking.

use crate::{
    dispatch::{DeviceMode, Dispatcher, ServiceHandler, UnknownServicePolicy},
    error::{DispatchError, ProcessError},
    interfaces::Interface,
    pipeline::{self, Transmitter},
    services::{
        housekeeping::{HousekeepingService, ParameterSource, ReportRegistry},
        test::TestService,
    },
};

/// Engine time in ticks.
///
/// A tick is one millisecond. The counter wraps around.
pub type Tick = u32;

/// Number of ticks in one second.
pub const TICKS_PER_SECOND: Tick = 1000;

/// Default period of housekeeping reports in ticks.
pub const DEFAULT_HOUSEKEEPING_PERIOD: Tick = 1000;

/// Returns the coarse time written in TM secondary headers.
///
/// This is the number of whole seconds, truncated to 16 bits.
pub fn coarse_time(now: Tick) -> u16 {
    (now / TICKS_PER_SECOND) as u16
}

/// Engine configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EngineConfig {
    /// Device mode at start.
    pub mode: DeviceMode,
    /// Handling of telecommands for unregistered services.
    pub unknown_service_policy: UnknownServicePolicy,
    /// Period of housekeeping reports in ticks.
    pub housekeeping_period: Tick,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            mode: DeviceMode::Normal,
            unknown_service_policy: UnknownServicePolicy::Silent,
            housekeeping_period: DEFAULT_HOUSEKEEPING_PERIOD,
        }
    }
}

/// Engine event.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Event {
    /// A complete frame arrived.
    Frame(Vec<u8>),
    /// The timer ticked.
    Tick(Tick),
}

/// Protocol engine.
#[derive(Debug)]
pub struct Engine<I> {
    transmitter: Transmitter<I>,
    dispatcher: Dispatcher,
    config: EngineConfig,
    now: Tick,
}

impl<I: Interface> Engine<I> {
    /// Creates an engine without services.
    pub fn new(interface: I, config: EngineConfig) -> Engine<I> {
        Engine {
            transmitter: Transmitter::new(interface),
            dispatcher: Dispatcher::new(config.mode, config.unknown_service_policy),
            config,
            now: 0,
        }
    }

    /// Creates an engine with the services of the payload controller.
    ///
    /// The test service and the housekeeping service are registered. The
    /// housekeeping service uses the default report structures and samples
    /// `source`.
    pub fn with_payload_services(
        interface: I,
        config: EngineConfig,
        source: impl ParameterSource + 'static,
    ) -> Engine<I> {
        let mut engine = Engine::new(interface, config);
        engine.register(Box::new(TestService::new()));
        engine.register(Box::new(HousekeepingService::new(
            ReportRegistry::payload_defaults(),
            source,
            config.housekeeping_period,
        )));
        engine
    }

    /// Registers a service handler, replacing any handler of the same
    /// service type.
    pub fn register(&mut self, handler: Box<dyn ServiceHandler>) {
        if let Some(previous) = self.dispatcher.register(handler) {
            log::warn!("replaced handler for service {}", previous.service_type_id());
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the dispatcher for modification.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Returns the registered handler of `service_type_id`, if it is an `H`.
    pub fn service<H: ServiceHandler>(&self, service_type_id: u8) -> Option<&H> {
        self.dispatcher.handler(service_type_id)
    }

    /// Returns the interface.
    pub fn interface(&self) -> &I {
        self.transmitter.interface()
    }

    /// Returns the interface for modification.
    pub fn interface_mut(&mut self) -> &mut I {
        self.transmitter.interface_mut()
    }

    /// Returns the time of the last tick.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Processes a received frame.
    ///
    /// The frame is validated and the telecommand it contains is dispatched.
    /// A frame that fails validation has no effect.
    pub fn process_frame(&mut self, framed: &[u8]) -> Result<(), ProcessError> {
        let tc = pipeline::ingest(framed)?;
        self.dispatcher.dispatch(&tc, &mut self.transmitter, self.now)?;
        Ok(())
    }

    /// Advances the engine time and runs the periodic work of the services.
    pub fn tick(&mut self, now: Tick) {
        self.now = now;
        self.dispatcher.tick(now, &mut self.transmitter);
    }

    /// Handles an event.
    pub fn handle_event(&mut self, event: Event) -> Result<(), ProcessError> {
        match event {
            Event::Frame(framed) => self.process_frame(&framed),
            Event::Tick(now) => {
                self.tick(now);
                Ok(())
            }
        }
    }

    /// Processes every frame received so far, then ticks.
    ///
    /// Frames that fail are logged and dropped. A frame still being received
    /// is left for a later call. A receive error is logged and ends the
    /// draining of frames, and the tick still runs. Returns the number of
    /// frames processed.
    pub fn poll(&mut self, now: Tick) -> usize {
        let mut processed = 0;
        loop {
            match self.interface_mut().receive() {
                Ok(Some(framed)) => {
                    if let Err(err) = self.process_frame(&framed) {
                        log_process_error(&err);
                    }
                    processed += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("could not receive frames: {err:#}");
                    break;
                }
            }
        }
        self.tick(now);
        processed
    }
}

fn log_process_error(err: &ProcessError) {
    match err {
        ProcessError::Dispatch(
            DispatchError::NotOperational(_)
            | DispatchError::UnknownService(_)
            | DispatchError::UnknownSubtype { .. },
        ) => log::debug!("dropped telecommand: {err}"),
        _ => log::warn!("dropped telecommand: {err}"),
    }
}
