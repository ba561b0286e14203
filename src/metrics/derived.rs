//! Derived Metrics Engine.
//!
//! Pure function of the validated aggregate, the event detail and the
//! wellness history. Anything that lacks real inputs is withheld with a
//! reason instead of being defaulted.

use super::series::event_decoupling;
use super::{Band, DerivedMetricSet, MetricKey, PriorSnapshot};
use crate::config::{AuditConfig, BandLevel, RecoveryRules};
use crate::load::{LoadModel, LoadSnapshot};
use crate::models::{DateWindow, WellnessSample};
use crate::normalize::NormalizedDataset;
use crate::totals::WindowAggregate;
use crate::zones::ZoneDistribution;
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// HRV and resting-HR movement of the recent block against baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTrend {
    pub hrv_recent: f64,
    pub hrv_baseline: f64,
    pub rhr_recent: f64,
    pub rhr_baseline: f64,
}

impl RecoveryTrend {
    /// Positive when HRV fell below baseline
    pub fn hrv_drop_pct(&self) -> f64 {
        (self.hrv_baseline - self.hrv_recent) / self.hrv_baseline * 100.0
    }

    /// Positive when resting HR rose above baseline
    pub fn rhr_rise_bpm(&self) -> f64 {
        self.rhr_recent - self.rhr_baseline
    }

    pub fn index(&self) -> f64 {
        (self.hrv_recent / self.hrv_baseline) * (self.rhr_baseline / self.rhr_recent)
    }

    pub fn from_samples(samples: &[WellnessSample], end: NaiveDate, rules: &RecoveryRules) -> Option<Self> {
        let recent = DateWindow::ending(end, rules.recent_days);
        let baseline = DateWindow::ending(end, rules.baseline_days);
        let mean_of = |range: DateWindow, pick: fn(&WellnessSample) -> Option<f64>| -> Option<f64> {
            let values: Vec<f64> = samples
                .iter()
                .filter(|s| range.contains(s.date))
                .filter_map(pick)
                .collect();
            (!values.is_empty()).then(|| values.iter().mean())
        };

        let trend = Self {
            hrv_recent: mean_of(recent, |s| s.hrv)?,
            hrv_baseline: mean_of(baseline, |s| s.hrv)?,
            rhr_recent: mean_of(recent, |s| s.resting_hr)?,
            rhr_baseline: mean_of(baseline, |s| s.resting_hr)?,
        };
        (trend.hrv_baseline > 0.0 && trend.rhr_recent > 0.0).then_some(trend)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub set: DerivedMetricSet,
    pub load: LoadSnapshot,
    pub zones: ZoneDistribution,
    pub recovery: Option<RecoveryTrend>,
}

pub struct DerivedMetricsEngine<'a> {
    config: &'a AuditConfig,
}

impl<'a> DerivedMetricsEngine<'a> {
    pub fn new(config: &'a AuditConfig) -> Self {
        Self { config }
    }

    pub fn compute(&self, data: &NormalizedDataset, aggregate: &WindowAggregate, prior: &PriorSnapshot) -> DerivedMetrics {
        let bands = &self.config.bands;
        let mut set = DerivedMetricSet::default();

        let load = LoadModel::new(&self.config.load).snapshot(&data.history, data.window.end);
        let has_history = !data.history.is_empty();

        match load.acwr {
            Some(acwr) => set.record(MetricKey::Acwr, acwr, Some(&bands.acwr), prior),
            None => set.withhold(MetricKey::Acwr, "chronic load is zero"),
        }
        if has_history {
            let balance = load.balance.to_f64().unwrap_or_default();
            set.record(MetricKey::StressBalance, balance, Some(&bands.stress_balance), prior);
            set.record(MetricKey::ChronicLoad, load.fitness.to_f64().unwrap_or_default(), None, prior);
            set.record(MetricKey::AcuteLoad, load.acute.to_f64().unwrap_or_default(), None, prior);
        } else {
            for key in [MetricKey::StressBalance, MetricKey::ChronicLoad, MetricKey::AcuteLoad] {
                set.withhold(key, "no load history");
            }
        }
        for (key, ramp) in [
            (MetricKey::FitnessTrend, load.fitness_ramp),
            (MetricKey::LoadTrend, load.acute_ramp),
        ] {
            match ramp.filter(|_| has_history).and_then(|r| r.to_f64()) {
                Some(value) => set.record(key, value, None, prior),
                None => set.withhold(key, "history shorter than the ramp lookback"),
            }
        }
        match load.fatigue_trend_pct {
            Some(trend) => set.record(MetricKey::FatigueTrend, trend, None, prior),
            None => set.withhold(MetricKey::FatigueTrend, "no baseline load"),
        }
        set.record(MetricKey::RollingSessionCount, f64::from(load.rolling_sessions), None, prior);

        self.monotony_and_strain(&mut set, &load, aggregate, data.window, prior);

        let recovery = RecoveryTrend::from_samples(&data.wellness, data.window.end, &self.config.recovery);
        match &recovery {
            Some(trend) => {
                let band = self.recovery_band(trend, load.balance);
                set.record_with_band(MetricKey::RecoveryIndex, trend.index(), Some(band), prior);
            }
            None => set.withhold(MetricKey::RecoveryIndex, "HRV or resting HR missing in recent or baseline window"),
        }

        let zones = ZoneDistribution::from_events(&data.events);
        self.intensity_distribution(&mut set, &zones, prior);
        self.fat_oxidation(&mut set, data, aggregate, prior);
        self.efficiency_factor(&mut set, data, prior);

        DerivedMetrics {
            set,
            load,
            zones,
            recovery,
        }
    }

    fn monotony_and_strain(
        &self,
        set: &mut DerivedMetricSet,
        load: &LoadSnapshot,
        aggregate: &WindowAggregate,
        window: DateWindow,
        prior: &PriorSnapshot,
    ) {
        let daily = &load.recent_daily_loads;
        let total: f64 = daily.iter().sum();
        if total <= 0.0 {
            set.withhold(MetricKey::Monotony, "no load in monotony window");
            set.withhold(MetricKey::Strain, "no load in monotony window");
            return;
        }

        let mean = daily.iter().mean();
        let std_dev = daily.iter().population_std_dev();
        if !(std_dev > 0.0) {
            set.withhold(MetricKey::Monotony, "daily load has no variation");
            set.withhold(MetricKey::Strain, "monotony withheld");
            return;
        }

        let monotony = mean / std_dev;
        set.record(MetricKey::Monotony, monotony, Some(&self.config.bands.monotony), prior);

        let strain = total * monotony;
        let hours = aggregate.all.hours.to_f64().unwrap_or_default();
        let weekly_hours = hours * 7.0 / f64::from(window.days());
        let table = self.config.strain_tier(weekly_hours).map(|tier| &tier.bands);
        set.record(MetricKey::Strain, strain, table, prior);
    }

    fn recovery_band(&self, trend: &RecoveryTrend, balance: Decimal) -> Band {
        let rules = &self.config.recovery;
        let hrv_drop = trend.hrv_drop_pct();
        let rhr_rise = trend.rhr_rise_bpm();

        if hrv_drop > rules.hrv_red_drop_pct || rhr_rise > rules.rhr_red_rise_bpm {
            Band::new("compromised", BandLevel::Red)
        } else if hrv_drop <= rules.hrv_stable_drop_pct
            && rhr_rise <= rules.rhr_steady_rise_bpm
            && balance >= Decimal::ZERO
        {
            Band::new("recovered", BandLevel::Green)
        } else {
            Band::new("drifting", BandLevel::Amber)
        }
    }

    fn intensity_distribution(&self, set: &mut DerivedMetricSet, zones: &ZoneDistribution, prior: &PriorSnapshot) {
        let bands = &self.config.bands;
        if zones.is_empty() {
            for key in [
                MetricKey::Zone2Share,
                MetricKey::ZoneQualityIndex,
                MetricKey::PolarisationRatio,
                MetricKey::PolarisationIndex,
            ] {
                set.withhold(key, "no time-in-zone data");
            }
            return;
        }

        if let Some(z2) = zones.pct(2) {
            set.record(MetricKey::Zone2Share, z2, None, prior);
        }
        if let Some(high) = zones.pct_from(self.config.quality.high_intensity_zone) {
            set.record(MetricKey::ZoneQualityIndex, high, None, prior);
        }
        match zones.polarisation_ratio() {
            Some(ratio) => set.record(MetricKey::PolarisationRatio, ratio, Some(&bands.polarisation_ratio), prior),
            None => set.withhold(MetricKey::PolarisationRatio, "no zone 2 time"),
        }
        if let Some(index) = zones.polarisation_index() {
            set.record(MetricKey::PolarisationIndex, index, Some(&bands.polarisation_index), prior);
        }
    }

    /// Duration-weighted NP ÷ average HR over sessions recording both
    fn efficiency_factor(&self, set: &mut DerivedMetricSet, data: &NormalizedDataset, prior: &PriorSnapshot) {
        let (weighted, secs) = data
            .events
            .iter()
            .filter_map(|e| match (e.normalized_power, e.avg_heart_rate) {
                (Some(np), Some(hr)) if np > 0 && hr > 0 => {
                    Some((f64::from(np) / f64::from(hr), f64::from(e.duration_secs)))
                }
                _ => None,
            })
            .fold((0.0, 0.0), |(sum, total), (ef, secs)| (sum + ef * secs, total + secs));

        if secs > 0.0 {
            set.record(MetricKey::EfficiencyFactor, weighted / secs, None, prior);
        } else {
            set.withhold(MetricKey::EfficiencyFactor, "no session with normalized power and heart rate");
        }
    }

    fn fat_oxidation(
        &self,
        set: &mut DerivedMetricSet,
        data: &NormalizedDataset,
        aggregate: &WindowAggregate,
        prior: &PriorSnapshot,
    ) {
        let rules = &self.config.fat_oxidation;
        let min_samples = self.config.durability.min_samples;

        let Some(intensity) = aggregate.all.avg_intensity.and_then(|v| v.to_f64()) else {
            set.withhold(MetricKey::FatOxidationIndex, "no intensity factor recorded");
            return;
        };
        let decoupling: Vec<f64> = data
            .events
            .iter()
            .filter_map(|e| event_decoupling(e, min_samples))
            .collect();
        if decoupling.is_empty() {
            set.withhold(MetricKey::FatOxidationIndex, "no decoupling data");
            return;
        }
        let rpe: Vec<f64> = data.events.iter().filter_map(|e| e.rpe).map(f64::from).collect();
        if rpe.is_empty() {
            set.withhold(MetricKey::FatOxidationIndex, "no perceived exertion recorded");
            return;
        }

        let decoupling = decoupling.iter().mean();
        let rpe = rpe.iter().mean();
        if decoupling > rules.max_decoupling_pct || rpe > rules.max_rpe {
            set.withhold(
                MetricKey::FatOxidationIndex,
                format!("outside validity range (decoupling {:.1}%, RPE {:.1})", decoupling, rpe),
            );
            return;
        }

        let intensity_term = 1.0 - (intensity - rules.target_intensity).abs() / rules.intensity_span;
        let decoupling_term = 1.0 - decoupling.max(0.0) / rules.decoupling_scale;
        let index = (intensity_term * decoupling_term).clamp(0.0, 1.0);
        set.record(MetricKey::FatOxidationIndex, index, Some(&self.config.bands.fat_oxidation), prior);
    }
}
