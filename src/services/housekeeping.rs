//! Housekeeping service (PUS service 3).
//!
//! Housekeeping parameters are grouped in report structures identified by a
//! structure identifier (SID). Each structure samples its parameters at its
//! own collection interval and can be reported periodically, or once on
//! request.

use crate::{
    crc16::CRC_SIZE,
    dispatch::ServiceHandler,
    engine::{Tick, coarse_time},
    error::{ServiceError, TxError},
    pipeline::TelemetrySink,
    pus::{
        HK_DISABLE_PERIODIC_REPORTS, HK_ENABLE_PERIODIC_REPORTS, HK_ONE_SHOT, HK_PARAMETER_REPORT,
        HOUSEKEEPING_SERVICE_ID, TM_SECONDARY_HEADER_SIZE, TmSecondaryHeader,
    },
    spp::{PrimaryHeader, next_sequence_count},
    verification::RequestContext,
};
use deku::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum number of parameters in a report structure.
pub const MAX_PARAMETERS: usize = 16;

/// Maximum number of SIDs in a housekeeping command.
pub const MAX_SIDS_PER_COMMAND: usize = 16;

/// Default collection interval in ticks.
pub const DEFAULT_COLLECTION_INTERVAL: Tick = 500;

/// APID of periodic housekeeping reports.
pub const HK_APID: u16 = 61;

/// Destination identifier of periodic housekeeping reports.
pub const HK_SOURCE_ID: u16 = 14;

/// SID of the microcontroller report structure.
pub const MICROCONTROLLER_SID: u16 = 0xAAAA;

/// SID of the FPGA report structure.
pub const FPGA_SID: u16 = 0x5555;

/// Housekeeping parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ParameterId {
    /// Battery voltage.
    BatteryVoltage,
    /// Board temperature.
    Temperature,
    /// Microcontroller 3.3 V rail.
    Microcontroller3V3,
    /// FPGA 1.5 V rail.
    Fpga1V5,
    /// FPGA 3.3 V rail.
    Fpga3V3,
}

/// Source of housekeeping parameter readings.
pub trait ParameterSource {
    /// Samples the current reading of `parameter`.
    fn sample(&mut self, parameter: ParameterId) -> u16;
}

/// Parameter source with fixed readings.
///
/// Parameters that have not been set read as zero.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FixedParameters {
    values: BTreeMap<ParameterId, u16>,
}

impl FixedParameters {
    /// Creates a source where every parameter reads as zero.
    pub fn new() -> FixedParameters {
        FixedParameters::default()
    }

    /// Sets the reading of `parameter`.
    pub fn set(&mut self, parameter: ParameterId, value: u16) {
        self.values.insert(parameter, value);
    }

    /// Returns the source with the reading of `parameter` set.
    pub fn with(mut self, parameter: ParameterId, value: u16) -> FixedParameters {
        self.set(parameter, value);
        self
    }
}

impl ParameterSource for FixedParameters {
    fn sample(&mut self, parameter: ParameterId) -> u16 {
        self.values.get(&parameter).copied().unwrap_or(0)
    }
}

/// Error building a report structure with too many parameters.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("report structure with {0} parameters exceeds the maximum of {MAX_PARAMETERS}")]
pub struct TooManyParameters(pub usize);

/// Housekeeping parameter report structure.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReportStructure {
    sid: u16,
    collection_interval: Tick,
    sources: heapless::Vec<ParameterId, MAX_PARAMETERS>,
    parameters: heapless::Vec<u32, MAX_PARAMETERS>,
    periodic_send: bool,
    last_collection: Tick,
    sequence_count: u16,
}

impl ReportStructure {
    /// Creates a report structure.
    ///
    /// The structure reports one parameter per entry in `sources`, in order.
    /// All parameters read as zero until the first collection. Periodic
    /// reporting is disabled.
    pub fn new(
        sid: u16,
        sources: &[ParameterId],
        collection_interval: Tick,
    ) -> Result<ReportStructure, TooManyParameters> {
        let too_many = || TooManyParameters(sources.len());
        let sources = heapless::Vec::from_slice(sources).map_err(|_| too_many())?;
        let mut parameters = heapless::Vec::new();
        parameters.resize(sources.len(), 0).map_err(|_| too_many())?;
        Ok(ReportStructure {
            sid,
            collection_interval,
            sources,
            parameters,
            periodic_send: false,
            last_collection: 0,
            sequence_count: 0,
        })
    }

    /// Returns the structure identifier.
    pub fn sid(&self) -> u16 {
        self.sid
    }

    /// Returns the collection interval in ticks.
    pub fn collection_interval(&self) -> Tick {
        self.collection_interval
    }

    /// Returns the parameters the structure samples, in slot order.
    pub fn sources(&self) -> &[ParameterId] {
        &self.sources
    }

    /// Returns the collected parameter values, in slot order.
    pub fn parameters(&self) -> &[u32] {
        &self.parameters
    }

    /// Returns whether periodic reporting is enabled.
    pub fn periodic_send(&self) -> bool {
        self.periodic_send
    }

    /// Enables or disables periodic reporting.
    pub fn set_periodic_send(&mut self, enabled: bool) {
        self.periodic_send = enabled;
    }

    /// Returns the tick of the last collection.
    pub fn last_collection(&self) -> Tick {
        self.last_collection
    }

    /// Returns the sequence count of the next report.
    pub fn sequence_count(&self) -> u16 {
        self.sequence_count
    }

    /// Samples the parameters if the collection interval has elapsed.
    ///
    /// Returns whether the parameters were sampled. The tick counter may wrap
    /// around.
    pub fn collect(&mut self, now: Tick, source: &mut impl ParameterSource) -> bool {
        if now.wrapping_sub(self.last_collection) <= self.collection_interval {
            return false;
        }
        for (slot, &parameter) in self.parameters.iter_mut().zip(self.sources.iter()) {
            *slot = source.sample(parameter).into();
        }
        self.last_collection = now;
        true
    }

    /// Encodes the report: the SID followed by every parameter as a
    /// big-endian 32-bit value.
    pub fn encode(&self) -> Vec<u8> {
        let mut report = Vec::with_capacity(2 + 4 * self.parameters.len());
        report.extend_from_slice(&self.sid.to_be_bytes());
        for parameter in &self.parameters {
            report.extend_from_slice(&parameter.to_be_bytes());
        }
        report
    }

    /// Sends the report as a TM[3,25] and advances the sequence count.
    fn send(
        &mut self,
        sink: &mut impl TelemetrySink,
        apid: u16,
        destination_id: u16,
        time: u16,
    ) -> Result<(), TxError> {
        let report = self.encode();
        let primary = PrimaryHeader::telemetry(
            apid,
            self.sequence_count,
            TM_SECONDARY_HEADER_SIZE + report.len() + CRC_SIZE,
        )?;
        let secondary = TmSecondaryHeader::new(
            HOUSEKEEPING_SERVICE_ID,
            HK_PARAMETER_REPORT,
            destination_id,
            time,
        );
        sink.send_telemetry(&primary, &secondary, &report)?;
        self.sequence_count = next_sequence_count(self.sequence_count);
        Ok(())
    }
}

/// Registry of report structures, keyed by SID.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReportRegistry {
    structures: BTreeMap<u16, ReportStructure>,
}

impl ReportRegistry {
    /// Creates an empty registry.
    pub fn new() -> ReportRegistry {
        ReportRegistry::default()
    }

    /// Creates the registry of the payload controller.
    ///
    /// It contains the microcontroller structure (battery voltage,
    /// temperature, microcontroller 3.3 V rail) and the FPGA structure (FPGA
    /// 1.5 V and 3.3 V rails).
    pub fn payload_defaults() -> ReportRegistry {
        let mut registry = ReportRegistry::new();
        let defaults: [(u16, &[ParameterId]); 2] = [
            (
                MICROCONTROLLER_SID,
                &[
                    ParameterId::BatteryVoltage,
                    ParameterId::Temperature,
                    ParameterId::Microcontroller3V3,
                ],
            ),
            (FPGA_SID, &[ParameterId::Fpga1V5, ParameterId::Fpga3V3]),
        ];
        for (sid, sources) in defaults {
            if let Ok(structure) =
                ReportStructure::new(sid, sources, DEFAULT_COLLECTION_INTERVAL)
            {
                registry.insert(structure);
            }
        }
        registry
    }

    /// Inserts a report structure.
    ///
    /// Returns the structure previously registered with the same SID, if any.
    pub fn insert(&mut self, structure: ReportStructure) -> Option<ReportStructure> {
        self.structures.insert(structure.sid, structure)
    }

    /// Returns the structure with `sid`.
    pub fn get(&self, sid: u16) -> Option<&ReportStructure> {
        self.structures.get(&sid)
    }

    /// Returns the structure with `sid` for modification.
    pub fn get_mut(&mut self, sid: u16) -> Option<&mut ReportStructure> {
        self.structures.get_mut(&sid)
    }

    /// Returns whether a structure with `sid` is registered.
    pub fn contains(&self, sid: u16) -> bool {
        self.structures.contains_key(&sid)
    }

    /// Iterates over the structures in SID order.
    pub fn iter(&self) -> impl Iterator<Item = &ReportStructure> {
        self.structures.values()
    }

    /// Returns the number of structures.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }
}

/// SID list carried by housekeeping telecommands.
#[derive(Debug, Clone, Eq, PartialEq, DekuRead)]
struct SidList {
    #[deku(endian = "big", assert = "usize::from(*count) <= MAX_SIDS_PER_COMMAND")]
    count: u16,
    #[deku(endian = "big", count = "count")]
    sids: Vec<u16>,
}

/// Parses the SID list of a housekeeping telecommand.
///
/// Every SID must be registered in `registry`. Bytes after the list are
/// ignored.
fn parse_sids(
    application_data: &[u8],
    registry: &ReportRegistry,
) -> Result<Vec<u16>, ServiceError> {
    let (_, list) = SidList::from_bytes((application_data, 0)).map_err(|err| {
        log::debug!("invalid SID list: {err}");
        ServiceError::Malformed("invalid SID list")
    })?;
    log::trace!("housekeeping command for {} SIDs", list.count);
    if let Some(&sid) = list.sids.iter().find(|&&sid| !registry.contains(sid)) {
        return Err(ServiceError::UnknownSid(sid));
    }
    Ok(list.sids)
}

/// Housekeeping service.
///
/// This struct owns the report structures and the parameter source. It
/// handles the housekeeping telecommands and, on every engine tick, collects
/// parameters and sends the periodic reports.
#[derive(Debug)]
pub struct HousekeepingService<P> {
    registry: ReportRegistry,
    source: P,
    reporting_period: Tick,
    last_periodic_send: Tick,
}

impl<P: ParameterSource> HousekeepingService<P> {
    /// Creates a housekeeping service.
    ///
    /// Periodic reports are sent every `reporting_period` ticks.
    pub fn new(
        registry: ReportRegistry,
        source: P,
        reporting_period: Tick,
    ) -> HousekeepingService<P> {
        HousekeepingService {
            registry,
            source,
            reporting_period,
            last_periodic_send: 0,
        }
    }

    /// Returns the report structures.
    pub fn registry(&self) -> &ReportRegistry {
        &self.registry
    }

    /// Returns the report structures for modification.
    pub fn registry_mut(&mut self) -> &mut ReportRegistry {
        &mut self.registry
    }

    /// Returns the parameter source for modification.
    pub fn source_mut(&mut self) -> &mut P {
        &mut self.source
    }

    /// Samples the parameters of every structure whose collection interval
    /// has elapsed.
    pub fn collect(&mut self, now: Tick) {
        for structure in self.registry.structures.values_mut() {
            if structure.collect(now, &mut self.source) {
                log::trace!("collected housekeeping structure {:#06x}", structure.sid);
            }
        }
    }

    /// Sends a report for every structure with periodic reporting enabled.
    ///
    /// Returns the number of reports sent.
    pub fn send_periodic(
        &mut self,
        sink: &mut impl TelemetrySink,
        time: u16,
    ) -> Result<usize, TxError> {
        let mut sent = 0;
        for structure in self.registry.structures.values_mut() {
            if structure.periodic_send {
                structure.send(sink, HK_APID, HK_SOURCE_ID, time)?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Executes a housekeeping telecommand.
    ///
    /// All SIDs of the command are checked before any structure is modified
    /// or reported, so a command naming an unknown SID has no effect.
    pub fn handle_command(
        &mut self,
        ctx: &mut RequestContext<'_>,
        application_data: &[u8],
    ) -> Result<(), ServiceError> {
        let subtype = ctx.secondary().message_subtype_id;
        match subtype {
            HK_ENABLE_PERIODIC_REPORTS | HK_DISABLE_PERIODIC_REPORTS => {
                let enabled = subtype == HK_ENABLE_PERIODIC_REPORTS;
                for sid in parse_sids(application_data, &self.registry)? {
                    if let Some(structure) = self.registry.get_mut(sid) {
                        structure.set_periodic_send(enabled);
                    }
                    log::info!(
                        "periodic housekeeping reports {} for SID {sid:#06x}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
                Ok(())
            }
            HK_ONE_SHOT => {
                let apid = ctx.primary().apid;
                let destination_id = ctx.secondary().source_id;
                let time = ctx.time();
                for sid in parse_sids(application_data, &self.registry)? {
                    if let Some(structure) = self.registry.get_mut(sid) {
                        structure.send(ctx, apid, destination_id, time)?;
                    }
                }
                Ok(())
            }
            _ => Err(ServiceError::UnknownSubtype {
                service: HOUSEKEEPING_SERVICE_ID,
                subtype,
            }),
        }
    }
}

impl<P: ParameterSource + 'static> ServiceHandler for HousekeepingService<P> {
    fn service_type_id(&self) -> u8 {
        HOUSEKEEPING_SERVICE_ID
    }

    fn handles(&self, subtype: u8) -> bool {
        matches!(
            subtype,
            HK_ENABLE_PERIODIC_REPORTS | HK_DISABLE_PERIODIC_REPORTS | HK_ONE_SHOT
        )
    }

    fn handle(
        &mut self,
        ctx: &mut RequestContext<'_>,
        application_data: &[u8],
    ) -> Result<(), ServiceError> {
        self.handle_command(ctx, application_data)
    }

    fn on_tick(&mut self, now: Tick, mut sink: &mut dyn TelemetrySink) -> Result<(), TxError> {
        self.collect(now);
        if now.wrapping_sub(self.last_periodic_send) >= self.reporting_period {
            self.last_periodic_send = now;
            self.send_periodic(&mut sink, coarse_time(now))?;
        }
        Ok(())
    }
}
