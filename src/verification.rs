//! Request verification.
//!
//! This module implements the PUS request verification service (service 1).
//! The acknowledgement flags of a telecommand request up to four successful
//! verification reports, one per execution stage. The dispatcher wraps each
//! request in a [`RequestContext`], which tracks the stage the request has
//! reached and transmits the reports that the flags ask for, so that service
//! handlers never look at the flags themselves.

use crate::{
    crc16::CRC_SIZE,
    error::{TxError, VerificationError},
    pipeline::TelemetrySink,
    pus::{
        AckFlags, REQUEST_VERIFICATION_SERVICE_ID, TM_SECONDARY_HEADER_SIZE, TcSecondaryHeader,
        TmSecondaryHeader,
    },
    spp::{PRIMARY_HEADER_SIZE, PrimaryHeader, SequenceCounters},
};

/// Failure code: no handler is registered for the service type.
pub const FAILURE_UNKNOWN_SERVICE: u16 = 0x0001;

/// Failure code: the service does not implement the message subtype.
pub const FAILURE_UNKNOWN_SUBTYPE: u16 = 0x0002;

/// Failure code: a housekeeping structure identifier is not registered.
pub const FAILURE_UNKNOWN_SID: u16 = 0x0003;

/// Failure code: the application data is inconsistent.
pub const FAILURE_MALFORMED: u16 = 0x0004;

/// Failure code: the handler could not complete its work.
pub const FAILURE_EXECUTION: u16 = 0x0005;

/// Execution stage of a request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    /// The request has been accepted for execution.
    Acceptance,
    /// Execution has started.
    Start,
    /// Execution has progressed.
    Progress,
    /// Execution has completed.
    Completion,
}

impl Stage {
    /// Returns the message subtype of the successful verification report.
    pub fn success_subtype(self) -> u8 {
        match self {
            Stage::Acceptance => 1,
            Stage::Start => 3,
            Stage::Progress => 5,
            Stage::Completion => 7,
        }
    }

    /// Returns the message subtype of the failed verification report.
    pub fn failure_subtype(self) -> u8 {
        self.success_subtype() + 1
    }

    /// Returns whether `flags` request the successful report of this stage.
    pub fn requested(self, flags: &AckFlags) -> bool {
        match self {
            Stage::Acceptance => flags.acceptance,
            Stage::Start => flags.start,
            Stage::Progress => flags.progress,
            Stage::Completion => flags.completion,
        }
    }

    fn reached(self) -> VerificationState {
        match self {
            Stage::Acceptance => VerificationState::Accepted,
            Stage::Start => VerificationState::Started,
            Stage::Progress => VerificationState::InProgress,
            Stage::Completion => VerificationState::Completed,
        }
    }
}

/// Verification state of a request.
///
/// States are ordered. A request only moves forward, and only
/// [`VerificationState::InProgress`] may be entered more than once.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum VerificationState {
    /// Validated, no stage reported yet.
    #[default]
    Received,
    /// Accepted.
    Accepted,
    /// Execution started.
    Started,
    /// Execution in progress.
    InProgress,
    /// Execution completed.
    Completed,
    /// A failure has been reported.
    Failed,
}

impl VerificationState {
    fn can_enter(self, next: VerificationState) -> bool {
        match self {
            VerificationState::Completed | VerificationState::Failed => false,
            VerificationState::InProgress => next >= VerificationState::InProgress,
            _ => next > self,
        }
    }
}

/// Request context.
///
/// This struct is handed to a service handler together with the telecommand
/// it must execute. It gives the handler the headers of the request and the
/// means to report execution stages and to reply to the requester. It is also
/// a [`TelemetrySink`] for packets the handler numbers itself.
pub struct RequestContext<'a> {
    primary: PrimaryHeader,
    secondary: TcSecondaryHeader,
    sink: &'a mut dyn TelemetrySink,
    counters: &'a mut SequenceCounters,
    time: u16,
    state: VerificationState,
}

impl std::fmt::Debug for RequestContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("time", &self.time)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> RequestContext<'a> {
    /// Creates the context of a request.
    ///
    /// Replies and verification reports are sent to `sink`, numbered with the
    /// counter of the request APID in `counters`, and stamped with the coarse
    /// `time`.
    pub fn new(
        primary: PrimaryHeader,
        secondary: TcSecondaryHeader,
        sink: &'a mut dyn TelemetrySink,
        counters: &'a mut SequenceCounters,
        time: u16,
    ) -> RequestContext<'a> {
        RequestContext {
            primary,
            secondary,
            sink,
            counters,
            time,
            state: VerificationState::Received,
        }
    }

    /// Returns the primary header of the request.
    pub fn primary(&self) -> &PrimaryHeader {
        &self.primary
    }

    /// Returns the TC secondary header of the request.
    pub fn secondary(&self) -> &TcSecondaryHeader {
        &self.secondary
    }

    /// Returns the coarse time stamped on telemetry.
    pub fn time(&self) -> u16 {
        self.time
    }

    /// Returns the verification state reached by the request.
    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// Reports that the request reached `stage`.
    ///
    /// The successful verification report is transmitted only if the
    /// acknowledgement flags of the request ask for it, but the state always
    /// advances. Reporting a stage behind the current state fails without
    /// sending anything.
    pub fn report(&mut self, stage: Stage) -> Result<(), VerificationError> {
        let next = stage.reached();
        if !self.state.can_enter(next) {
            return Err(VerificationError::OutOfOrder {
                current: self.state,
                requested: stage,
            });
        }
        if stage.requested(&self.secondary.ack_flags) {
            self.send_verification(stage.success_subtype(), &[])?;
        }
        self.state = next;
        Ok(())
    }

    /// Reports that the request failed at `stage` with `code`.
    ///
    /// Failure reports are always transmitted. The report carries the failure
    /// code after the request primary header.
    pub fn report_failure(&mut self, stage: Stage, code: u16) -> Result<(), VerificationError> {
        if matches!(
            self.state,
            VerificationState::Completed | VerificationState::Failed
        ) {
            return Err(VerificationError::OutOfOrder {
                current: self.state,
                requested: stage,
            });
        }
        self.send_verification(stage.failure_subtype(), &code.to_be_bytes())?;
        self.state = VerificationState::Failed;
        Ok(())
    }

    /// Sends the report `(service_type_id, message_subtype_id)` to the
    /// requester.
    ///
    /// The report uses the APID of the request and the next sequence count of
    /// that APID.
    pub fn reply(
        &mut self,
        service_type_id: u8,
        message_subtype_id: u8,
        payload: &[u8],
    ) -> Result<(), TxError> {
        let apid = self.primary.apid;
        let primary = PrimaryHeader::telemetry(
            apid,
            self.counters.current(apid),
            TM_SECONDARY_HEADER_SIZE + payload.len() + CRC_SIZE,
        )?;
        let secondary = TmSecondaryHeader::new(
            service_type_id,
            message_subtype_id,
            self.secondary.source_id,
            self.time,
        );
        self.sink.send_telemetry(&primary, &secondary, payload)?;
        self.counters.advance(apid);
        Ok(())
    }

    fn send_verification(&mut self, subtype: u8, extra: &[u8]) -> Result<(), TxError> {
        let mut payload = Vec::with_capacity(PRIMARY_HEADER_SIZE + extra.len());
        payload.extend_from_slice(&self.primary.encode()?);
        payload.extend_from_slice(extra);
        log::debug!(
            "TM[{REQUEST_VERIFICATION_SERVICE_ID},{subtype}] for request {:?} from source {}",
            self.primary,
            self.secondary.source_id
        );
        self.reply(REQUEST_VERIFICATION_SERVICE_ID, subtype, &payload)
    }
}

/// Raw access to the sink, for telemetry whose sequence count is owned by the
/// handler.
impl TelemetrySink for RequestContext<'_> {
    fn send_telemetry(
        &mut self,
        primary: &PrimaryHeader,
        secondary: &TmSecondaryHeader,
        payload: &[u8],
    ) -> Result<(), TxError> {
        self.sink.send_telemetry(primary, secondary, payload)
    }
}
