use crate::error::{AuditError, Result};
use anyhow::Context;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Version stamped on rule tables produced by this build
pub const CONFIG_VERSION: &str = "2024.2";

/// Versioned rule tables injected into a run.
///
/// Each stage borrows only its own sub-table. Two runs with equal
/// configs (same [`AuditConfig::fingerprint`]) classify identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub version: String,
    pub integrity: IntegrityRules,
    pub variance: VarianceRules,
    pub load: LoadModelRules,
    pub bands: BandRules,
    pub strain_tiers: Vec<StrainTier>,
    pub recovery: RecoveryRules,
    pub durability: DurabilityRules,
    pub fat_oxidation: FatOxidationRules,
    pub age_tiers: Vec<AgeTier>,
    pub phase: PhaseRules,
    pub quality: QualityRules,
    pub actions: ActionRules,
}

/// Traffic-light level attached to a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandLevel {
    Green,
    Amber,
    Red,
    Neutral,
}

/// One cut point of a band table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandCut {
    /// Upper bound of this band; `None` closes the table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,

    /// Whether `upper` itself belongs to this band
    #[serde(default)]
    pub inclusive: bool,

    pub label: String,
    pub level: BandLevel,
}

/// Ordered list of bands; the first cut admitting the value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandTable {
    pub cuts: Vec<BandCut>,
}

impl BandTable {
    pub fn new(cuts: Vec<BandCut>) -> Self {
        Self { cuts }
    }

    pub fn classify(&self, value: f64) -> Option<&BandCut> {
        if !value.is_finite() {
            return None;
        }
        self.cuts.iter().find(|cut| match cut.upper {
            Some(upper) if cut.inclusive => value <= upper,
            Some(upper) => value < upper,
            None => true,
        })
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.cuts.is_empty() {
            return Err(AuditError::Configuration(format!("band table '{}' is empty", name)));
        }
        let bounds: Vec<f64> = self.cuts.iter().filter_map(|c| c.upper).collect();
        if bounds.windows(2).any(|w| w[0] > w[1]) {
            return Err(AuditError::Configuration(format!(
                "band table '{}' has unsorted cut points",
                name
            )));
        }
        if self.cuts.iter().rev().skip(1).any(|c| c.upper.is_none()) {
            return Err(AuditError::Configuration(format!(
                "band table '{}' has an open cut before its last entry",
                name
            )));
        }
        Ok(())
    }
}

fn cut(upper: f64, inclusive: bool, label: &str, level: BandLevel) -> BandCut {
    BandCut {
        upper: Some(upper),
        inclusive,
        label: label.to_string(),
        level,
    }
}

fn rest(label: &str, level: BandLevel) -> BandCut {
    BandCut {
        upper: None,
        inclusive: false,
        label: label.to_string(),
        level,
    }
}

/// Upper bound on adaptive actions emitted by one run
pub const ACTION_CAP: usize = 5;

/// Initial fetch plus exactly one coverage retry
pub const FETCH_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityRules {
    /// Minimum share of calendar days with at least one record
    pub coverage_threshold: Decimal,

    /// Fetch attempts allowed before a coverage halt (one retry)
    pub max_fetch_attempts: u8,

    /// Provenance labels that never count as real event data
    pub untrusted_sources: Vec<String>,

    pub max_duration_hours: Decimal,
    pub max_intensity_factor: Decimal,
    pub min_heart_rate: u16,
    pub max_heart_rate: u16,

    /// Load above `factor × median` is flagged
    pub load_outlier_factor: Decimal,
    pub load_outlier_min_events: usize,

    /// Same-day overlap needed before sessions are flagged for review
    pub duplicate_overlap_secs: i64,
    pub duplicate_overlap_fraction: f64,
}

/// Absolute-or-relative allowance; the larger one applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub absolute: Decimal,
    pub relative: Decimal,
}

impl Tolerance {
    pub fn allowed(&self, expected: Decimal) -> Decimal {
        let relative = (self.relative * expected).abs();
        self.absolute.max(relative)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceRules {
    pub hours: Tolerance,
    pub distance_km: Tolerance,
    pub load: Tolerance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadModelRules {
    /// Days of lightweight history fetched ahead of the window end
    pub history_days: u32,
    pub acute_days: u32,
    pub chronic_days: u32,
    /// Time constant for the fitness curve used by stress balance
    pub fitness_days: u32,
    pub monotony_days: u32,
    pub trend_recent_days: u32,
    pub trend_baseline_days: u32,
    /// Lookback for the CTL and ATL ramp (change per week)
    pub ramp_days: u32,
    pub rolling_session_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandRules {
    pub acwr: BandTable,
    pub monotony: BandTable,
    pub stress_balance: BandTable,
    pub polarisation_ratio: BandTable,
    pub polarisation_index: BandTable,
    pub durability: BandTable,
    pub fat_oxidation: BandTable,
    pub benchmark: BandTable,
    pub specificity: BandTable,
    pub consistency: BandTable,
}

/// Strain cut-offs for athletes up to `max_weekly_hours`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrainTier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_weekly_hours: Option<f64>,
    pub bands: BandTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRules {
    pub recent_days: u32,
    pub baseline_days: u32,
    pub hrv_stable_drop_pct: f64,
    pub hrv_red_drop_pct: f64,
    pub rhr_steady_rise_bpm: f64,
    pub rhr_red_rise_bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurabilityRules {
    /// Sessions must run strictly longer than this
    pub min_session_secs: u32,
    /// Shortest stream (samples) worth splitting into halves
    pub min_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatOxidationRules {
    pub target_intensity: f64,
    pub intensity_span: f64,
    pub decoupling_scale: f64,
    pub max_decoupling_pct: f64,
    pub max_rpe: f64,
}

/// Age multiplier applying up to and including `max_age`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeTier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRules {
    pub build_trend_pct: f64,
    pub overload_acwr: f64,
    pub deload_trend_pct: f64,
    pub soft_deload_trend_pct: f64,
    pub hrv_rebound_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    pub long_session_secs: u32,
    /// First zone (1-based) counted as high intensity
    pub high_intensity_zone: usize,
    pub interval_zone_secs: u32,
    pub sessions_per_week: u32,
    pub interval_tags: Vec<String>,
    pub retest_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRules {
    pub max_actions: usize,
    pub deload_acwr: f64,
    pub deload_monotony: f64,
    pub block_intensity_recovery: f64,
    pub min_zone2_pct: f64,
    pub min_rolling_sessions: u32,
    pub high_monotony: f64,
    pub min_polarisation_index: f64,
    pub min_consistency: f64,
    pub regression_benchmark: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            integrity: IntegrityRules::default(),
            variance: VarianceRules::default(),
            load: LoadModelRules::default(),
            bands: BandRules::default(),
            strain_tiers: default_strain_tiers(),
            recovery: RecoveryRules::default(),
            durability: DurabilityRules::default(),
            fat_oxidation: FatOxidationRules::default(),
            age_tiers: vec![
                AgeTier { max_age: Some(34), multiplier: dec!(0.95) },
                AgeTier { max_age: Some(50), multiplier: dec!(0.85) },
                AgeTier { max_age: None, multiplier: dec!(0.75) },
            ],
            phase: PhaseRules::default(),
            quality: QualityRules::default(),
            actions: ActionRules::default(),
        }
    }
}

impl Default for IntegrityRules {
    fn default() -> Self {
        Self {
            coverage_threshold: dec!(0.85),
            max_fetch_attempts: FETCH_ATTEMPTS,
            untrusted_sources: vec!["mock".into(), "cache".into(), "sandbox".into()],
            max_duration_hours: dec!(12),
            max_intensity_factor: dec!(1.5),
            min_heart_rate: 30,
            max_heart_rate: 220,
            load_outlier_factor: dec!(3),
            load_outlier_min_events: 4,
            duplicate_overlap_secs: 120,
            duplicate_overlap_fraction: 0.8,
        }
    }
}

impl Default for VarianceRules {
    fn default() -> Self {
        Self {
            hours: Tolerance { absolute: dec!(0.1), relative: dec!(0.01) },
            distance_km: Tolerance { absolute: dec!(1.0), relative: dec!(0.01) },
            load: Tolerance { absolute: dec!(2), relative: dec!(0.01) },
        }
    }
}

impl Default for LoadModelRules {
    fn default() -> Self {
        Self {
            history_days: 42,
            acute_days: 7,
            chronic_days: 28,
            fitness_days: 42,
            monotony_days: 7,
            trend_recent_days: 7,
            trend_baseline_days: 28,
            ramp_days: 7,
            rolling_session_days: 21,
        }
    }
}

impl Default for BandRules {
    fn default() -> Self {
        use BandLevel::*;
        Self {
            acwr: BandTable::new(vec![
                cut(0.8, false, "low", Amber),
                cut(1.3, true, "balanced", Green),
                cut(1.5, true, "caution", Amber),
                rest("high risk", Red),
            ]),
            monotony: BandTable::new(vec![
                cut(1.5, false, "healthy", Green),
                cut(2.0, true, "caution", Amber),
                rest("risk", Red),
            ]),
            stress_balance: BandTable::new(vec![
                cut(-30.0, false, "very fatigued", Red),
                cut(-10.0, false, "fatigued", Amber),
                cut(5.0, false, "neutral", Green),
                cut(25.0, false, "fresh", Green),
                rest("very fresh", Amber),
            ]),
            polarisation_ratio: BandTable::new(vec![
                cut(0.35, false, "threshold", Amber),
                cut(0.7, false, "z2 base", Green),
                cut(1.0, false, "mixed", Amber),
                rest("polarised", Green),
            ]),
            polarisation_index: BandTable::new(vec![
                cut(0.6, false, "intensity focused", Amber),
                cut(0.75, false, "mixed", Amber),
                rest("aerobic", Green),
            ]),
            durability: BandTable::new(vec![
                cut(0.93, false, "weak", Red),
                cut(0.95, false, "moderate", Amber),
                rest("strong", Green),
            ]),
            fat_oxidation: BandTable::new(vec![
                cut(0.6, false, "low", Red),
                cut(0.8, false, "moderate", Amber),
                rest("optimal", Green),
            ]),
            benchmark: BandTable::new(vec![
                cut(-0.03, true, "regression", Red),
                cut(0.02, false, "stagnant", Amber),
                rest("productive", Green),
            ]),
            specificity: BandTable::new(vec![
                cut(0.5, false, "base", Neutral),
                cut(0.7, false, "build", Amber),
                rest("peak", Green),
            ]),
            consistency: BandTable::new(vec![
                cut(0.75, false, "inconsistent", Red),
                cut(0.9, false, "variable", Amber),
                rest("consistent", Green),
            ]),
        }
    }
}

fn strain_tier(max_weekly_hours: Option<f64>, manageable: f64, elevated: f64) -> StrainTier {
    StrainTier {
        max_weekly_hours,
        bands: BandTable::new(vec![
            cut(manageable, true, "manageable", BandLevel::Green),
            cut(elevated, true, "elevated", BandLevel::Amber),
            rest("excessive", BandLevel::Red),
        ]),
    }
}

fn default_strain_tiers() -> Vec<StrainTier> {
    vec![
        strain_tier(Some(5.0), 1500.0, 2500.0),
        strain_tier(Some(10.0), 3000.0, 4500.0),
        strain_tier(Some(15.0), 4500.0, 6500.0),
        strain_tier(None, 6500.0, 9000.0),
    ]
}

impl Default for RecoveryRules {
    fn default() -> Self {
        Self {
            recent_days: 7,
            baseline_days: 42,
            hrv_stable_drop_pct: 10.0,
            hrv_red_drop_pct: 25.0,
            rhr_steady_rise_bpm: 5.0,
            rhr_red_rise_bpm: 10.0,
        }
    }
}

impl Default for DurabilityRules {
    fn default() -> Self {
        Self {
            min_session_secs: 7200,
            min_samples: 600,
        }
    }
}

impl Default for FatOxidationRules {
    fn default() -> Self {
        Self {
            target_intensity: 0.70,
            intensity_span: 0.10,
            decoupling_scale: 10.0,
            max_decoupling_pct: 5.0,
            max_rpe: 4.0,
        }
    }
}

impl Default for PhaseRules {
    fn default() -> Self {
        Self {
            build_trend_pct: 10.0,
            overload_acwr: 1.3,
            deload_trend_pct: -15.0,
            soft_deload_trend_pct: -5.0,
            hrv_rebound_pct: 5.0,
        }
    }
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            long_session_secs: 7200,
            high_intensity_zone: 5,
            interval_zone_secs: 600,
            sessions_per_week: 2,
            interval_tags: vec!["intervals".into(), "vo2".into(), "vo2max".into()],
            retest_tags: vec!["test".into(), "ftp test".into(), "ramp test".into()],
        }
    }
}

impl Default for ActionRules {
    fn default() -> Self {
        Self {
            max_actions: ACTION_CAP,
            deload_acwr: 1.5,
            deload_monotony: 1.6,
            block_intensity_recovery: 0.85,
            min_zone2_pct: 15.0,
            min_rolling_sessions: 3,
            high_monotony: 2.0,
            min_polarisation_index: 0.6,
            min_consistency: 0.75,
            regression_benchmark: -0.03,
        }
    }
}

impl AuditConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AuditConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trainaudit")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                if config_path.exists() {
                    tracing::warn!(path = %config_path.display(), "ignoring unreadable config: {:#}", err);
                }
                Self::default()
            }
        }
    }

    /// Reject tables that cannot classify anything sensibly
    pub fn validate(&self) -> Result<()> {
        let threshold = self.integrity.coverage_threshold;
        if threshold <= Decimal::ZERO || threshold > Decimal::ONE {
            return Err(AuditError::Configuration(format!(
                "coverage_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.integrity.max_fetch_attempts != FETCH_ATTEMPTS {
            return Err(AuditError::Configuration(format!(
                "max_fetch_attempts must be {} (one coverage retry), got {}",
                FETCH_ATTEMPTS, self.integrity.max_fetch_attempts
            )));
        }
        if self.actions.max_actions == 0 || self.actions.max_actions > ACTION_CAP {
            return Err(AuditError::Configuration(format!(
                "max_actions must be in 1..={}, got {}",
                ACTION_CAP, self.actions.max_actions
            )));
        }
        let load = &self.load;
        if [load.acute_days, load.chronic_days, load.fitness_days, load.monotony_days, load.ramp_days]
            .iter()
            .any(|d| *d == 0)
        {
            return Err(AuditError::Configuration("load time constants must be positive".into()));
        }
        if load.history_days < load.chronic_days {
            return Err(AuditError::Configuration(
                "history_days must cover at least chronic_days".into(),
            ));
        }

        let bands = &self.bands;
        for (name, table) in [
            ("acwr", &bands.acwr),
            ("monotony", &bands.monotony),
            ("stress_balance", &bands.stress_balance),
            ("polarisation_ratio", &bands.polarisation_ratio),
            ("polarisation_index", &bands.polarisation_index),
            ("durability", &bands.durability),
            ("fat_oxidation", &bands.fat_oxidation),
            ("benchmark", &bands.benchmark),
            ("specificity", &bands.specificity),
            ("consistency", &bands.consistency),
        ] {
            table.validate(name)?;
        }

        if self.strain_tiers.is_empty() || self.strain_tiers.last().and_then(|t| t.max_weekly_hours).is_some() {
            return Err(AuditError::Configuration(
                "strain_tiers must end with an open-ended tier".into(),
            ));
        }
        for tier in &self.strain_tiers {
            tier.bands.validate("strain")?;
        }
        if self.age_tiers.is_empty() || self.age_tiers.last().and_then(|t| t.max_age).is_some() {
            return Err(AuditError::Configuration(
                "age_tiers must end with an open-ended tier".into(),
            ));
        }
        Ok(())
    }

    /// SHA-256 of the canonical TOML form
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = toml::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Strain band table for the given weekly volume
    pub fn strain_tier(&self, weekly_hours: f64) -> Option<&StrainTier> {
        self.strain_tiers.iter().find(|tier| match tier.max_weekly_hours {
            Some(max) => weekly_hours <= max,
            None => true,
        })
    }

    pub fn age_multiplier(&self, age: u32) -> Option<Decimal> {
        self.age_tiers
            .iter()
            .find(|tier| tier.max_age.map_or(true, |max| age <= max))
            .map(|tier| tier.multiplier)
    }
}
