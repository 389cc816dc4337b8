//! Test service (PUS service 17).

use crate::{
    dispatch::ServiceHandler,
    error::ServiceError,
    pus::{TEST_ARE_YOU_ALIVE, TEST_ARE_YOU_ALIVE_REPORT, TEST_SERVICE_ID},
    verification::{RequestContext, Stage},
};

/// Test service.
///
/// This service answers the are-you-alive connection test with an empty
/// TM[17,2] report.
#[derive(Debug, Clone, Default)]
pub struct TestService {
    answered: u64,
}

impl TestService {
    /// Creates a test service.
    pub fn new() -> TestService {
        TestService::default()
    }

    /// Returns the number of connection tests answered.
    pub fn answered(&self) -> u64 {
        self.answered
    }
}

impl ServiceHandler for TestService {
    fn service_type_id(&self) -> u8 {
        TEST_SERVICE_ID
    }

    fn handles(&self, subtype: u8) -> bool {
        subtype == TEST_ARE_YOU_ALIVE
    }

    fn handle(
        &mut self,
        ctx: &mut RequestContext<'_>,
        _application_data: &[u8],
    ) -> Result<(), ServiceError> {
        match ctx.secondary().message_subtype_id {
            TEST_ARE_YOU_ALIVE => {
                ctx.report(Stage::Progress)?;
                ctx.reply(TEST_SERVICE_ID, TEST_ARE_YOU_ALIVE_REPORT, &[])?;
                self.answered += 1;
                log::debug!("answered connection test from source {}", ctx.secondary().source_id);
                Ok(())
            }
            subtype => Err(ServiceError::UnknownSubtype {
                service: TEST_SERVICE_ID,
                subtype,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        pus::{AckFlags, TcSecondaryHeader},
        spp::{PrimaryHeader, SequenceCounters},
        verification::{VerificationState, test::RecordingSink},
    };

    fn run(subtype: u8, flags: AckFlags) -> (Result<(), ServiceError>, RecordingSink) {
        let primary = PrimaryHeader::telecommand(0x20, 0, 5 + 2).unwrap();
        let secondary = TcSecondaryHeader {
            pus_version: 1,
            ack_flags: flags,
            service_type_id: TEST_SERVICE_ID,
            message_subtype_id: subtype,
            source_id: 0x0042,
        };
        let mut sink = RecordingSink::default();
        let mut counters = SequenceCounters::default();
        let mut service = TestService::new();
        let mut ctx = RequestContext::new(primary, secondary, &mut sink, &mut counters, 0);
        ctx.report(Stage::Acceptance).unwrap();
        ctx.report(Stage::Start).unwrap();
        let result = service.handle(&mut ctx, &[]);
        if result.is_ok() {
            assert_eq!(ctx.state(), VerificationState::InProgress);
            assert_eq!(service.answered(), 1);
        }
        (result, sink)
    }

    #[test]
    fn are_you_alive() {
        let (result, sink) = run(TEST_ARE_YOU_ALIVE, AckFlags::ALL);
        result.unwrap();
        let reports: Vec<(u8, u8)> = sink
            .packets
            .iter()
            .map(|(_, secondary, _)| (secondary.service_type_id, secondary.message_subtype_id))
            .collect();
        assert_eq!(reports, [(1, 1), (1, 3), (1, 5), (17, 2)]);
        let (primary, secondary, payload) = &sink.packets[3];
        assert!(payload.is_empty());
        assert_eq!(primary.apid, 0x20);
        assert_eq!(primary.sequence_count, 3);
        assert_eq!(primary.packet_data_length, 10);
        assert_eq!(secondary.destination_id, 0x0042);
    }

    #[test]
    fn unknown_subtype() {
        let (result, sink) = run(3, AckFlags::NONE);
        assert!(matches!(
            result,
            Err(ServiceError::UnknownSubtype {
                service: TEST_SERVICE_ID,
                subtype: 3,
            })
        ));
        assert!(sink.packets.is_empty());
    }

    #[test]
    fn handled_subtypes() {
        let service = TestService::new();
        assert!(service.handles(TEST_ARE_YOU_ALIVE));
        assert!(!service.handles(TEST_ARE_YOU_ALIVE_REPORT));
        assert!(!service.handles(3));
    }
}
