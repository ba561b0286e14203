//! Extended Metrics Engine: composite metrics over the derived set and
//! the athlete's history.

use super::derived::DerivedMetrics;
use super::series::{back_half_drop, output_stream};
use super::{DerivedMetricSet, MetricKey, PriorSnapshot};
use crate::config::AuditConfig;
use crate::models::ActivityEvent;
use crate::normalize::NormalizedDataset;
use crate::totals::WindowAggregate;
use crate::zones::seconds_from_zone;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingPhase {
    Build,
    Overload,
    Deload,
    Consolidation,
}

impl TrainingPhase {
    pub fn description(&self) -> &'static str {
        match self {
            TrainingPhase::Build => "Load rising at a sustainable rate",
            TrainingPhase::Overload => "Load rising faster than the chronic base supports",
            TrainingPhase::Deload => "Load reduced, recovery under way",
            TrainingPhase::Consolidation => "Load holding steady",
        }
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingPhase::Build => "build",
            TrainingPhase::Overload => "overload",
            TrainingPhase::Deload => "deload",
            TrainingPhase::Consolidation => "consolidation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAssessment {
    pub phase: TrainingPhase,
    pub load_trend_pct: Option<f64>,
    /// HRV above baseline, in percent
    pub hrv_rebound_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityBalance {
    pub long_sessions: u32,
    pub interval_sessions: u32,
    pub target: u32,
    pub met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeAdjustment {
    pub age: u32,
    pub multiplier: Decimal,
    pub acute_load: Decimal,
    pub adjusted_acute_load: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedMetrics {
    pub set: DerivedMetricSet,
    pub age_adjustment: Option<AgeAdjustment>,
    pub phase: PhaseAssessment,
    pub quality: QualityBalance,
}

pub struct ExtendedMetricsEngine<'a> {
    config: &'a AuditConfig,
}

impl<'a> ExtendedMetricsEngine<'a> {
    pub fn new(config: &'a AuditConfig) -> Self {
        Self { config }
    }

    pub fn compute(
        &self,
        data: &NormalizedDataset,
        aggregate: &WindowAggregate,
        derived: &DerivedMetrics,
        prior: &PriorSnapshot,
    ) -> ExtendedMetrics {
        let mut set = DerivedMetricSet::default();

        self.durability(&mut set, &data.events, prior);
        self.benchmark(&mut set, data, prior);
        self.specificity(&mut set, data, aggregate, prior);
        self.consistency(&mut set, data, aggregate, prior);

        let age_adjustment = self.age_adjustment(data, derived);
        match &age_adjustment {
            Some(adj) => {
                let value = adj.adjusted_acute_load.to_f64().unwrap_or_default();
                set.record(MetricKey::AgeAdjustedLoad, value, None, prior);
            }
            None => set.withhold(MetricKey::AgeAdjustedLoad, "athlete age unknown"),
        }

        ExtendedMetrics {
            set,
            age_adjustment,
            phase: self.phase(derived),
            quality: self.quality(data),
        }
    }

    fn durability(&self, set: &mut DerivedMetricSet, events: &[ActivityEvent], prior: &PriorSnapshot) {
        let rules = &self.config.durability;
        let drops: Vec<f64> = events
            .iter()
            .filter(|e| e.duration_secs > rules.min_session_secs)
            .filter_map(|e| back_half_drop(output_stream(e)?, rules.min_samples))
            .collect();
        if drops.is_empty() {
            set.withhold(MetricKey::DurabilityIndex, "no long session with power or pace stream");
            return;
        }
        let index = 1.0 - drops.iter().mean();
        set.record(MetricKey::DurabilityIndex, index, Some(&self.config.bands.durability), prior);
    }

    fn benchmark(&self, set: &mut DerivedMetricSet, data: &NormalizedDataset, prior: &PriorSnapshot) {
        let retest = data
            .events
            .iter()
            .any(|e| self.config.quality.retest_tags.iter().any(|t| e.has_tag(t)));
        if !retest {
            set.withhold(MetricKey::BenchmarkIndex, "no re-test event in window");
            return;
        }
        let (Some(current), Some(previous)) = (data.profile.ftp, prior.threshold_power) else {
            set.withhold(MetricKey::BenchmarkIndex, "current or prior threshold power unknown");
            return;
        };
        let index = f64::from(current) / f64::from(previous) - 1.0;
        set.record(MetricKey::BenchmarkIndex, index, Some(&self.config.bands.benchmark), prior);
    }

    fn specificity(
        &self,
        set: &mut DerivedMetricSet,
        data: &NormalizedDataset,
        aggregate: &WindowAggregate,
        prior: &PriorSnapshot,
    ) {
        let Some(target) = data.profile.target_discipline else {
            set.withhold(MetricKey::SpecificityIndex, "no target discipline on profile");
            return;
        };
        if aggregate.all.hours <= Decimal::ZERO {
            set.withhold(MetricKey::SpecificityIndex, "no training hours in window");
            return;
        }
        let specific = aggregate
            .discipline(target)
            .map(|t| t.hours)
            .unwrap_or(Decimal::ZERO);
        let index = (specific / aggregate.all.hours).to_f64().unwrap_or_default();
        set.record(MetricKey::SpecificityIndex, index, Some(&self.config.bands.specificity), prior);
    }

    fn consistency(
        &self,
        set: &mut DerivedMetricSet,
        data: &NormalizedDataset,
        aggregate: &WindowAggregate,
        prior: &PriorSnapshot,
    ) {
        match data.planned_sessions.filter(|p| *p > 0) {
            Some(planned) => {
                let index = f64::from(aggregate.all.event_count) / f64::from(planned);
                set.record(MetricKey::ConsistencyIndex, index, Some(&self.config.bands.consistency), prior);
            }
            None => set.withhold(MetricKey::ConsistencyIndex, "no planned sessions reported"),
        }
    }

    fn age_adjustment(&self, data: &NormalizedDataset, derived: &DerivedMetrics) -> Option<AgeAdjustment> {
        let age = data.profile.age?;
        let multiplier = self.config.age_multiplier(age)?;
        let acute_load = derived.load.acute.round_dp(2);
        Some(AgeAdjustment {
            age,
            multiplier,
            acute_load,
            adjusted_acute_load: (acute_load * multiplier).round_dp(2),
        })
    }

    fn phase(&self, derived: &DerivedMetrics) -> PhaseAssessment {
        let rules = &self.config.phase;
        let trend = derived.load.fatigue_trend_pct;
        let rebound = derived.recovery.as_ref().map(|r| -r.hrv_drop_pct());
        let acwr = derived.set.value(MetricKey::Acwr);

        let phase = match trend {
            Some(t) if t > rules.build_trend_pct && acwr.map_or(false, |a| a > rules.overload_acwr) => {
                TrainingPhase::Overload
            }
            Some(t) if t > rules.build_trend_pct => TrainingPhase::Build,
            Some(t) if t < rules.deload_trend_pct => TrainingPhase::Deload,
            Some(t)
                if t < rules.soft_deload_trend_pct
                    && rebound.map_or(false, |r| r >= rules.hrv_rebound_pct) =>
            {
                TrainingPhase::Deload
            }
            _ => TrainingPhase::Consolidation,
        };

        PhaseAssessment {
            phase,
            load_trend_pct: trend,
            hrv_rebound_pct: rebound,
        }
    }

    fn quality(&self, data: &NormalizedDataset) -> QualityBalance {
        let rules = &self.config.quality;
        let long_sessions = data
            .events
            .iter()
            .filter(|e| e.duration_secs >= rules.long_session_secs)
            .count() as u32;
        let interval_sessions = data
            .events
            .iter()
            .filter(|e| {
                seconds_from_zone(e, rules.high_intensity_zone) >= rules.interval_zone_secs
                    || rules.interval_tags.iter().any(|t| e.has_tag(t))
            })
            .count() as u32;

        let days = data.window.days();
        let target = (rules.sessions_per_week * days).div_ceil(7).max(1);
        QualityBalance {
            long_sessions,
            interval_sessions,
            target,
            met: long_sessions >= 1 && interval_sessions >= 1 && long_sessions + interval_sessions >= target,
        }
    }
}
