//! Telecommand dispatch.
//!
//! The [`Dispatcher`] routes validated telecommands to the service handler
//! registered for their service type and drives request verification around
//! the call.

use crate::{
    engine::{Tick, coarse_time},
    error::{DispatchError, ServiceError, TxError},
    pipeline::{TelemetrySink, ValidatedTc},
    spp::SequenceCounters,
    verification::{FAILURE_UNKNOWN_SERVICE, RequestContext, Stage},
};
use std::{any::Any, collections::BTreeMap};

/// Operating mode of the device.
///
/// Telecommands are only executed in normal mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, clap::ValueEnum)]
pub enum DeviceMode {
    /// Booting, peripherals not yet configured.
    Startup,
    /// Normal operation.
    #[default]
    Normal,
    /// Safe mode after a fault.
    Safe,
}

/// Handling of telecommands for unregistered services.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, clap::ValueEnum)]
pub enum UnknownServicePolicy {
    /// Drop the telecommand without sending anything.
    #[default]
    Silent,
    /// Send a failed start of execution report, regardless of the
    /// acknowledgement flags.
    ReportStartFailure,
}

/// PUS service handler.
pub trait ServiceHandler: Any {
    /// Returns the service type identifier served by this handler.
    fn service_type_id(&self) -> u8;

    /// Returns whether the handler executes telecommands of `subtype`.
    ///
    /// Telecommands of other subtypes are dropped by the dispatcher before
    /// anything is reported.
    fn handles(&self, subtype: u8) -> bool;

    /// Executes a telecommand.
    ///
    /// The dispatcher has already reported acceptance and start of execution
    /// through `ctx`, and reports completion when this returns `Ok`. The
    /// handler may report progress. `application_data` is the data following
    /// the TC secondary header.
    fn handle(
        &mut self,
        ctx: &mut RequestContext<'_>,
        application_data: &[u8],
    ) -> Result<(), ServiceError>;

    /// Runs periodic work.
    ///
    /// This is called by the engine on every tick, in normal mode or not.
    fn on_tick(&mut self, _now: Tick, _sink: &mut dyn TelemetrySink) -> Result<(), TxError> {
        Ok(())
    }
}

/// Telecommand dispatcher.
///
/// This struct owns the service registration table, the device mode and the
/// sequence counters of the telemetry sent in response to telecommands.
pub struct Dispatcher {
    handlers: BTreeMap<u8, Box<dyn ServiceHandler>>,
    mode: DeviceMode,
    policy: UnknownServicePolicy,
    counters: SequenceCounters,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("services", &self.handlers.keys().collect::<Vec<_>>())
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("counters", &self.counters)
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no registered services.
    pub fn new(mode: DeviceMode, policy: UnknownServicePolicy) -> Dispatcher {
        Dispatcher {
            handlers: BTreeMap::new(),
            mode,
            policy,
            counters: SequenceCounters::default(),
        }
    }

    /// Registers a service handler.
    ///
    /// Returns the handler previously registered for the same service type,
    /// if any.
    pub fn register(
        &mut self,
        handler: Box<dyn ServiceHandler>,
    ) -> Option<Box<dyn ServiceHandler>> {
        let service = handler.service_type_id();
        log::debug!("registering handler for service {service}");
        self.handlers.insert(service, handler)
    }

    /// Returns whether a handler is registered for `service_type_id`.
    pub fn is_registered(&self, service_type_id: u8) -> bool {
        self.handlers.contains_key(&service_type_id)
    }

    /// Returns the handler registered for `service_type_id`, if it is an `H`.
    pub fn handler<H: ServiceHandler>(&self, service_type_id: u8) -> Option<&H> {
        let handler: &dyn ServiceHandler = &**self.handlers.get(&service_type_id)?;
        let handler: &dyn Any = handler;
        handler.downcast_ref()
    }

    /// Returns the device mode.
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Sets the device mode.
    pub fn set_mode(&mut self, mode: DeviceMode) {
        if mode != self.mode {
            log::info!("device mode changed from {:?} to {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    /// Returns the unknown service policy.
    pub fn policy(&self) -> UnknownServicePolicy {
        self.policy
    }

    /// Returns the sequence counters of response telemetry.
    pub fn counters(&self) -> &SequenceCounters {
        &self.counters
    }

    /// Dispatches a validated telecommand.
    ///
    /// Nothing is sent and no handler runs unless the device is in normal
    /// mode, the telecommand has a secondary header and its subtype is
    /// handled by the service. Telemetry is stamped with the coarse time of
    /// `now`.
    pub fn dispatch(
        &mut self,
        tc: &ValidatedTc,
        sink: &mut dyn TelemetrySink,
        now: Tick,
    ) -> Result<(), DispatchError> {
        if self.mode != DeviceMode::Normal {
            return Err(DispatchError::NotOperational(self.mode));
        }
        let Some(secondary) = tc.secondary else {
            return Err(DispatchError::MissingSecondaryHeader);
        };
        let service = secondary.service_type_id;
        let subtype = secondary.message_subtype_id;
        let time = coarse_time(now);
        log::debug!(
            "TC[{service},{subtype}] from source {} with ack flags {:#06b}",
            secondary.source_id,
            secondary.ack_flags.bits()
        );

        let Some(handler) = self.handlers.get_mut(&service) else {
            if self.policy == UnknownServicePolicy::ReportStartFailure {
                let mut ctx =
                    RequestContext::new(tc.primary, secondary, sink, &mut self.counters, time);
                ctx.report_failure(Stage::Start, FAILURE_UNKNOWN_SERVICE)?;
            }
            return Err(DispatchError::UnknownService(service));
        };
        if !handler.handles(subtype) {
            log::debug!("service {service} does not handle subtype {subtype}");
            return Err(DispatchError::UnknownSubtype { service, subtype });
        }

        let mut ctx = RequestContext::new(tc.primary, secondary, sink, &mut self.counters, time);
        ctx.report(Stage::Acceptance)?;
        ctx.report(Stage::Start)?;
        match handler.handle(&mut ctx, &tc.application_data) {
            Ok(()) => {
                ctx.report(Stage::Completion)?;
                Ok(())
            }
            Err(source) => {
                if secondary.ack_flags.completion {
                    if let Err(err) = ctx.report_failure(Stage::Completion, source.failure_code())
                    {
                        log::warn!("could not report failure of service {service}: {err}");
                    }
                }
                Err(DispatchError::Service { service, source })
            }
        }
    }

    /// Runs the periodic work of every registered service.
    ///
    /// A failure in one service is logged and does not prevent the others
    /// from running.
    pub fn tick(&mut self, now: Tick, sink: &mut dyn TelemetrySink) {
        for (service, handler) in self.handlers.iter_mut() {
            if let Err(err) = handler.on_tick(now, sink) {
                log::warn!("periodic work of service {service} failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        pus::{AckFlags, TcSecondaryHeader},
        spp::PrimaryHeader,
        verification::test::RecordingSink,
    };
    use std::{cell::Cell, rc::Rc};

    const ECHO_SERVICE_ID: u8 = 200;

    /// Replies with the application data, reporting progress before the
    /// reply.
    struct Echo {
        calls: Rc<Cell<usize>>,
        fail: bool,
    }

    impl ServiceHandler for Echo {
        fn service_type_id(&self) -> u8 {
            ECHO_SERVICE_ID
        }

        fn handles(&self, subtype: u8) -> bool {
            subtype == 1
        }

        fn handle(
            &mut self,
            ctx: &mut RequestContext<'_>,
            application_data: &[u8],
        ) -> Result<(), ServiceError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(ServiceError::Malformed("echo refused"));
            }
            ctx.report(Stage::Progress)?;
            ctx.reply(ECHO_SERVICE_ID, 2, application_data)?;
            Ok(())
        }
    }

    fn dispatcher(fail: bool) -> (Dispatcher, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let mut dispatcher = Dispatcher::new(DeviceMode::Normal, UnknownServicePolicy::Silent);
        dispatcher.register(Box::new(Echo {
            calls: calls.clone(),
            fail,
        }));
        (dispatcher, calls)
    }

    fn tc(service: u8, flags: AckFlags) -> ValidatedTc {
        tc_subtype(service, 1, flags)
    }

    fn tc_subtype(service: u8, subtype: u8, flags: AckFlags) -> ValidatedTc {
        ValidatedTc {
            primary: PrimaryHeader::telecommand(0x10, 3, 5 + 2 + 2).unwrap(),
            secondary: Some(TcSecondaryHeader {
                pus_version: 1,
                ack_flags: flags,
                service_type_id: service,
                message_subtype_id: subtype,
                source_id: 0x0777,
            }),
            application_data: vec![0xca, 0xfe],
        }
    }

    fn subtypes(sink: &RecordingSink) -> Vec<(u8, u8)> {
        sink.packets
            .iter()
            .map(|(_, secondary, _)| (secondary.service_type_id, secondary.message_subtype_id))
            .collect()
    }

    #[test]
    fn stage_order() {
        let (mut dispatcher, calls) = dispatcher(false);
        let mut sink = RecordingSink::default();
        dispatcher
            .dispatch(&tc(ECHO_SERVICE_ID, AckFlags::ALL), &mut sink, 2500)
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(
            subtypes(&sink),
            [(1, 1), (1, 3), (1, 5), (ECHO_SERVICE_ID, 2), (1, 7)]
        );
        for (n, (primary, secondary, _)) in sink.packets.iter().enumerate() {
            assert_eq!(usize::from(primary.sequence_count), n);
            assert_eq!(secondary.destination_id, 0x0777);
            assert_eq!(secondary.time, 2);
        }
        assert_eq!(sink.packets[3].2, [0xca, 0xfe]);
        assert_eq!(dispatcher.counters().current(0x10), 5);
    }

    #[test]
    fn no_flags_only_reply() {
        let (mut dispatcher, _) = dispatcher(false);
        let mut sink = RecordingSink::default();
        dispatcher
            .dispatch(&tc(ECHO_SERVICE_ID, AckFlags::NONE), &mut sink, 0)
            .unwrap();
        assert_eq!(subtypes(&sink), [(ECHO_SERVICE_ID, 2)]);
    }

    #[test]
    fn not_operational() {
        for mode in [DeviceMode::Startup, DeviceMode::Safe] {
            let (mut dispatcher, calls) = dispatcher(false);
            dispatcher.set_mode(mode);
            let mut sink = RecordingSink::default();
            assert!(matches!(
                dispatcher.dispatch(&tc(ECHO_SERVICE_ID, AckFlags::ALL), &mut sink, 0),
                Err(DispatchError::NotOperational(m)) if m == mode
            ));
            assert_eq!(calls.get(), 0);
            assert!(sink.packets.is_empty());
        }
    }

    #[test]
    fn missing_secondary_header() {
        let (mut dispatcher, calls) = dispatcher(false);
        let mut sink = RecordingSink::default();
        let mut tc = tc(ECHO_SERVICE_ID, AckFlags::ALL);
        tc.secondary = None;
        assert!(matches!(
            dispatcher.dispatch(&tc, &mut sink, 0),
            Err(DispatchError::MissingSecondaryHeader)
        ));
        assert_eq!(calls.get(), 0);
        assert!(sink.packets.is_empty());
    }

    #[test]
    fn unknown_service_silent() {
        let (mut dispatcher, calls) = dispatcher(false);
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dispatcher.dispatch(&tc(99, AckFlags::ALL), &mut sink, 0),
            Err(DispatchError::UnknownService(99))
        ));
        assert_eq!(calls.get(), 0);
        assert!(sink.packets.is_empty());
    }

    #[test]
    fn unknown_service_start_failure() {
        let mut dispatcher =
            Dispatcher::new(DeviceMode::Normal, UnknownServicePolicy::ReportStartFailure);
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dispatcher.dispatch(&tc(99, AckFlags::NONE), &mut sink, 0),
            Err(DispatchError::UnknownService(99))
        ));
        assert_eq!(subtypes(&sink), [(1, 4)]);
        assert_eq!(sink.packets[0].2[6..], [0x00, 0x01]);
    }

    #[test]
    fn unhandled_subtype_is_dropped() {
        let (mut dispatcher, calls) = dispatcher(false);
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dispatcher.dispatch(&tc_subtype(ECHO_SERVICE_ID, 9, AckFlags::ALL), &mut sink, 0),
            Err(DispatchError::UnknownSubtype {
                service: ECHO_SERVICE_ID,
                subtype: 9,
            })
        ));
        assert_eq!(calls.get(), 0);
        assert!(sink.packets.is_empty());
        assert_eq!(dispatcher.counters().current(0x10), 0);
    }

    #[test]
    fn handler_failure() {
        let (mut dispatcher, calls) = dispatcher(true);
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dispatcher.dispatch(&tc(ECHO_SERVICE_ID, AckFlags::ALL), &mut sink, 0),
            Err(DispatchError::Service {
                service: ECHO_SERVICE_ID,
                source: ServiceError::Malformed(_),
            })
        ));
        assert_eq!(calls.get(), 1);
        assert_eq!(subtypes(&sink), [(1, 1), (1, 3), (1, 8)]);
        assert_eq!(sink.packets[2].2[6..], [0x00, 0x04]);

        // without the completion flag the failure is not reported
        let mut sink = RecordingSink::default();
        assert!(
            dispatcher
                .dispatch(&tc(ECHO_SERVICE_ID, AckFlags::from_bits(0b1000)), &mut sink, 0)
                .is_err()
        );
        assert_eq!(subtypes(&sink), [(1, 1)]);
    }

    #[test]
    fn replace_handler() {
        let (mut dispatcher, _) = dispatcher(false);
        assert!(dispatcher.is_registered(ECHO_SERVICE_ID));
        let previous = dispatcher.register(Box::new(Echo {
            calls: Rc::new(Cell::new(0)),
            fail: true,
        }));
        assert!(previous.is_some());
    }

    #[test]
    fn handler_by_type() {
        let (dispatcher, _) = dispatcher(false);
        let echo = dispatcher.handler::<Echo>(ECHO_SERVICE_ID).unwrap();
        assert!(!echo.fail);
        assert!(dispatcher.handler::<Echo>(99).is_none());
    }
}
