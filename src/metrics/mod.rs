//! Metric readings shared by the derived and extended engines.

pub mod derived;
pub mod extended;
pub mod series;

use crate::config::{BandCut, BandLevel, BandTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    Acwr,
    Monotony,
    Strain,
    StressBalance,
    ChronicLoad,
    AcuteLoad,
    FitnessTrend,
    LoadTrend,
    FatigueTrend,
    EfficiencyFactor,
    RecoveryIndex,
    RollingSessionCount,
    Zone2Share,
    ZoneQualityIndex,
    PolarisationRatio,
    PolarisationIndex,
    FatOxidationIndex,
    DurabilityIndex,
    BenchmarkIndex,
    SpecificityIndex,
    ConsistencyIndex,
    AgeAdjustedLoad,
}

impl MetricKey {
    pub fn name(&self) -> &'static str {
        match self {
            MetricKey::Acwr => "ACWR",
            MetricKey::Monotony => "Monotony",
            MetricKey::Strain => "Strain",
            MetricKey::StressBalance => "Stress balance",
            MetricKey::ChronicLoad => "CTL",
            MetricKey::AcuteLoad => "ATL",
            MetricKey::FitnessTrend => "Fitness trend (CTL/week)",
            MetricKey::LoadTrend => "Load trend (ATL/week)",
            MetricKey::FatigueTrend => "Fatigue trend %",
            MetricKey::EfficiencyFactor => "Efficiency factor (NP/HR)",
            MetricKey::RecoveryIndex => "Recovery index",
            MetricKey::RollingSessionCount => "Sessions (rolling)",
            MetricKey::Zone2Share => "Zone 2 share %",
            MetricKey::ZoneQualityIndex => "Zone quality index %",
            MetricKey::PolarisationRatio => "Polarisation ratio",
            MetricKey::PolarisationIndex => "Polarisation index",
            MetricKey::FatOxidationIndex => "Fat-oxidation index",
            MetricKey::DurabilityIndex => "Durability index",
            MetricKey::BenchmarkIndex => "Benchmark index",
            MetricKey::SpecificityIndex => "Specificity index",
            MetricKey::ConsistencyIndex => "Consistency index",
            MetricKey::AgeAdjustedLoad => "Age-adjusted acute load",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub label: String,
    pub level: BandLevel,
}

impl Band {
    pub fn new(label: impl Into<String>, level: BandLevel) -> Self {
        Self {
            label: label.into(),
            level,
        }
    }
}

impl From<&BandCut> for Band {
    fn from(cut: &BandCut) -> Self {
        Band::new(cut.label.clone(), cut.level)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub value: f64,
    /// `None` for descriptive metrics that carry no band table
    pub band: Option<Band>,
    /// Change from the prior comparable window
    pub delta: Option<f64>,
}

/// Metric values from the previous comparable window. Read-only input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorSnapshot {
    #[serde(default)]
    pub values: BTreeMap<MetricKey, f64>,
    /// Threshold power at the previous re-test
    #[serde(default)]
    pub threshold_power: Option<u16>,
}

/// Metric name → reading, plus the metrics that could not be computed
/// and why. A withheld metric never appears among the readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricSet {
    pub readings: BTreeMap<MetricKey, MetricReading>,
    pub withheld: BTreeMap<MetricKey, String>,
}

impl DerivedMetricSet {
    pub fn record(&mut self, key: MetricKey, value: f64, table: Option<&BandTable>, prior: &PriorSnapshot) {
        let band = table.and_then(|t| t.classify(value)).map(Band::from);
        self.record_with_band(key, value, band, prior);
    }

    pub fn record_with_band(&mut self, key: MetricKey, value: f64, band: Option<Band>, prior: &PriorSnapshot) {
        if !value.is_finite() {
            self.withhold(key, "value is not a finite number");
            return;
        }
        let delta = prior.values.get(&key).map(|previous| value - previous);
        self.withheld.remove(&key);
        self.readings.insert(key, MetricReading { value, band, delta });
    }

    pub fn withhold(&mut self, key: MetricKey, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(metric = ?key, %reason, "metric withheld");
        self.readings.remove(&key);
        self.withheld.insert(key, reason);
    }

    pub fn get(&self, key: MetricKey) -> Option<&MetricReading> {
        self.readings.get(&key)
    }

    pub fn value(&self, key: MetricKey) -> Option<f64> {
        self.readings.get(&key).map(|r| r.value)
    }

    pub fn level(&self, key: MetricKey) -> Option<BandLevel> {
        self.get(key).and_then(|r| r.band.as_ref()).map(|b| b.level)
    }

    pub fn label(&self, key: MetricKey) -> Option<&str> {
        self.get(key).and_then(|r| r.band.as_ref()).map(|b| b.label.as_str())
    }

    pub fn is_withheld(&self, key: MetricKey) -> bool {
        self.withheld.contains_key(&key)
    }

    /// Every key either read or withheld
    pub fn covers(&self, keys: &[MetricKey]) -> bool {
        keys.iter()
            .all(|k| self.readings.contains_key(k) || self.withheld.contains_key(k))
    }
}
