//! Semantic Result Assembler.
//!
//! Merges every stage output into one [`AuditResult`]. `audit_final` is
//! the only completion signal a consumer may trust: a halted result
//! carries the halt and no stage sections at all.

use crate::actions::AdaptiveAction;
use crate::audit::{AuditContext, AuditStatus, Halt, HaltReason, Stage, StageResult};
use crate::completeness::DayRecord;
use crate::error::Result;
use crate::metrics::derived::DerivedMetrics;
use crate::metrics::extended::ExtendedMetrics;
use crate::metrics::MetricKey;
use crate::models::{ActivityEvent, DateWindow, Discipline};
use crate::totals::WindowAggregate;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metrics the derived engine must either read or withhold
pub const DERIVED_METRICS: &[MetricKey] = &[
    MetricKey::Acwr,
    MetricKey::Monotony,
    MetricKey::Strain,
    MetricKey::StressBalance,
    MetricKey::ChronicLoad,
    MetricKey::AcuteLoad,
    MetricKey::FitnessTrend,
    MetricKey::LoadTrend,
    MetricKey::FatigueTrend,
    MetricKey::EfficiencyFactor,
    MetricKey::RecoveryIndex,
    MetricKey::RollingSessionCount,
    MetricKey::Zone2Share,
    MetricKey::ZoneQualityIndex,
    MetricKey::PolarisationRatio,
    MetricKey::PolarisationIndex,
    MetricKey::FatOxidationIndex,
];

pub const EXTENDED_METRICS: &[MetricKey] = &[
    MetricKey::DurabilityIndex,
    MetricKey::BenchmarkIndex,
    MetricKey::SpecificityIndex,
    MetricKey::ConsistencyIndex,
    MetricKey::AgeAdjustedLoad,
];

/// One row of the event log, 1:1 with the window's activity events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: String,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub discipline: Option<Discipline>,
    pub activity_type: String,
    pub duration_secs: u32,
    pub hours: Decimal,
    pub distance_km: Decimal,
    pub load: Decimal,
    pub avg_power: Option<u16>,
    pub normalized_power: Option<u16>,
    pub avg_heart_rate: Option<u16>,
    pub provenance: String,
}

impl From<&ActivityEvent> for EventLogEntry {
    fn from(event: &ActivityEvent) -> Self {
        Self {
            id: event.id.clone(),
            date: event.date,
            start: event.start,
            discipline: event.discipline,
            activity_type: event.activity_type.clone(),
            duration_secs: event.duration_secs,
            hours: event.hours().round_dp(2),
            distance_km: event.distance_km().round_dp(2),
            load: event.load,
            avg_power: event.avg_power,
            normalized_power: event.normalized_power,
            avg_heart_rate: event.avg_heart_rate,
            provenance: event.provenance.clone(),
        }
    }
}

/// Rule table that produced a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStamp {
    pub version: String,
    pub fingerprint: String,
}

/// Outputs of stages 3 to 8, handed over for assembly
pub struct StageOutputs<'a> {
    pub aggregate: WindowAggregate,
    pub days: Vec<DayRecord>,
    pub events: &'a [ActivityEvent],
    pub derived: DerivedMetrics,
    pub extended: ExtendedMetrics,
    pub actions: Vec<AdaptiveAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub audit_final: bool,
    pub status: AuditStatus,
    pub run_id: Uuid,
    pub athlete_id: String,
    pub window: DateWindow,
    pub config: ConfigStamp,
    pub context: AuditContext,
    pub halt: Option<Halt>,
    pub totals: Option<WindowAggregate>,
    pub days: Option<Vec<DayRecord>>,
    pub events: Option<Vec<EventLogEntry>>,
    pub derived: Option<DerivedMetrics>,
    pub extended: Option<ExtendedMetrics>,
    pub actions: Option<Vec<AdaptiveAction>>,
}

impl AuditResult {
    /// Result for a run that stopped at `halt`. The context must already
    /// be in the halted state.
    pub fn halted(context: AuditContext, halt: Halt, config: ConfigStamp) -> Self {
        Self {
            audit_final: false,
            status: context.status(),
            run_id: context.run_id,
            athlete_id: context.athlete_id.clone(),
            window: context.window,
            config,
            context,
            halt: Some(halt),
            totals: None,
            days: None,
            events: None,
            derived: None,
            extended: None,
            actions: None,
        }
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        self.halt.as_ref().map(|h| &h.reason)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Check that every canonical section is present and consistent.
pub fn verify(outputs: &StageOutputs, window: DateWindow) -> StageResult<Vec<EventLogEntry>> {
    let mut missing: Vec<String> = outputs
        .aggregate
        .missing_buckets()
        .into_iter()
        .map(|d| format!("totals.{}", d.as_str()))
        .collect();

    let log: Vec<EventLogEntry> = outputs.events.iter().map(EventLogEntry::from).collect();
    if log.len() as u32 != outputs.aggregate.all.event_count {
        missing.push(format!(
            "events ({} log rows for {} events)",
            log.len(),
            outputs.aggregate.all.event_count
        ));
    }
    if outputs.days.len() as u32 != window.days() {
        missing.push(format!("days ({} of {})", outputs.days.len(), window.days()));
    }
    missing.extend(
        DERIVED_METRICS
            .iter()
            .filter(|k| !outputs.derived.set.covers(&[**k]))
            .map(|k| format!("derived.{}", k.name())),
    );
    missing.extend(
        EXTENDED_METRICS
            .iter()
            .filter(|k| !outputs.extended.set.covers(&[**k]))
            .map(|k| format!("extended.{}", k.name())),
    );

    if missing.is_empty() {
        Ok(log)
    } else {
        Err(Halt::new(Stage::Assembly, HaltReason::SchemaMismatch { missing }))
    }
}

/// Merge stage outputs into the canonical result and close the context.
pub fn assemble(mut context: AuditContext, config: ConfigStamp, outputs: StageOutputs) -> Result<AuditResult> {
    let log = match verify(&outputs, context.window) {
        Ok(log) => log,
        Err(halt) => {
            context.halt(&halt)?;
            return Ok(AuditResult::halted(context, halt, config));
        }
    };

    context.complete_stage(Stage::Assembly)?;
    context.advance(AuditStatus::Final)?;
    tracing::info!(
        run_id = %context.run_id,
        athlete = %context.athlete_id,
        events = log.len(),
        actions = outputs.actions.len(),
        "audit final"
    );

    Ok(AuditResult {
        audit_final: true,
        status: context.status(),
        run_id: context.run_id,
        athlete_id: context.athlete_id.clone(),
        window: context.window,
        config,
        context,
        halt: None,
        totals: Some(outputs.aggregate),
        days: Some(outputs.days),
        events: Some(log),
        derived: Some(outputs.derived),
        extended: Some(outputs.extended),
        actions: Some(outputs.actions),
    })
}
