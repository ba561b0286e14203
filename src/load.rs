use crate::config::LoadModelRules;
use crate::models::{DateWindow, HistoryEntry};
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load summed over one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLoad {
    pub date: NaiveDate,

    /// Sum of session loads for the day
    pub total_load: Decimal,

    /// Sessions logged on this day
    pub session_count: u16,
}

/// Exponentially weighted load curves for one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadPoint {
    pub date: NaiveDate,

    /// Short-window (acute) weighted load
    pub acute: Decimal,

    /// Long-window (chronic) weighted load used for ACWR
    pub chronic: Decimal,

    /// Fitness curve used for stress balance
    pub fitness: Decimal,

    /// Stress balance: yesterday's fitness minus today's acute load
    pub balance: Decimal,

    pub daily_load: Decimal,
}

/// Load state at the end of the audited window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub date: NaiveDate,
    pub acute: Decimal,
    pub chronic: Decimal,
    pub fitness: Decimal,
    pub balance: Decimal,

    /// `None` while the chronic load is still zero
    pub acwr: Option<f64>,

    /// (recent mean − baseline mean) ÷ baseline mean × 100
    pub fatigue_trend_pct: Option<f64>,

    /// Fitness (CTL) change over the ramp lookback
    pub fitness_ramp: Option<Decimal>,

    /// Acute (ATL) change over the ramp lookback
    pub acute_ramp: Option<Decimal>,

    /// Daily loads for the monotony window, oldest first, rest days as 0
    pub recent_daily_loads: Vec<f64>,

    /// Sessions over the rolling consistency window
    pub rolling_sessions: u32,
}

pub struct LoadModel<'a> {
    rules: &'a LoadModelRules,
}

impl<'a> LoadModel<'a> {
    pub fn new(rules: &'a LoadModelRules) -> Self {
        Self { rules }
    }

    pub fn aggregate_daily(&self, history: &[HistoryEntry]) -> BTreeMap<NaiveDate, DailyLoad> {
        let mut daily: BTreeMap<NaiveDate, DailyLoad> = BTreeMap::new();

        for entry in history {
            daily
                .entry(entry.date)
                .and_modify(|day| {
                    day.total_load += entry.load;
                    day.session_count += 1;
                })
                .or_insert(DailyLoad {
                    date: entry.date,
                    total_load: entry.load,
                    session_count: 1,
                });
        }

        daily
    }

    /// Curves for every day of `range`, seeded at zero on its first day
    pub fn series(&self, daily: &BTreeMap<NaiveDate, DailyLoad>, range: DateWindow) -> Vec<LoadPoint> {
        let acute_factor = Decimal::ONE / Decimal::from(self.rules.acute_days);
        let chronic_factor = Decimal::ONE / Decimal::from(self.rules.chronic_days);
        let fitness_factor = Decimal::ONE / Decimal::from(self.rules.fitness_days);

        let mut acute = Decimal::ZERO;
        let mut chronic = Decimal::ZERO;
        let mut fitness = Decimal::ZERO;
        let mut points = Vec::with_capacity(range.days() as usize);

        for date in range.dates() {
            let load = daily.get(&date).map(|d| d.total_load).unwrap_or(Decimal::ZERO);
            let previous_fitness = fitness;

            // x_today = x_yesterday + (load_today - x_yesterday) / N
            acute += (load - acute) * acute_factor;
            chronic += (load - chronic) * chronic_factor;
            fitness += (load - fitness) * fitness_factor;

            points.push(LoadPoint {
                date,
                acute,
                chronic,
                fitness,
                balance: previous_fitness - acute,
                daily_load: load,
            });
        }

        points
    }

    /// Mean daily load over the `days` ending on `end`
    fn mean_load(daily: &BTreeMap<NaiveDate, DailyLoad>, end: NaiveDate, days: u32) -> f64 {
        let range = DateWindow::ending(end, days);
        let total: Decimal = daily.range(range.start..=range.end).map(|(_, d)| d.total_load).sum();
        total.to_f64().unwrap_or_default() / f64::from(range.days())
    }

    pub fn snapshot(&self, history: &[HistoryEntry], end: NaiveDate) -> LoadSnapshot {
        let daily = self.aggregate_daily(history);
        let range = DateWindow::ending(end, self.rules.history_days);
        let points = self.series(&daily, range);

        let (acute, chronic, fitness, balance) = points
            .last()
            .map(|p| (p.acute, p.chronic, p.fitness, p.balance))
            .unwrap_or_default();

        let ramp_from = points
            .len()
            .checked_sub(self.rules.ramp_days as usize + 1)
            .and_then(|i| points.get(i));
        let fitness_ramp = ramp_from.map(|from| fitness - from.fitness);
        let acute_ramp = ramp_from.map(|from| acute - from.acute);

        let acwr = (chronic > Decimal::ZERO)
            .then(|| (acute / chronic).to_f64())
            .flatten();

        let baseline = Self::mean_load(&daily, end, self.rules.trend_baseline_days);
        let fatigue_trend_pct = (baseline > 0.0).then(|| {
            let recent = Self::mean_load(&daily, end, self.rules.trend_recent_days);
            (recent - baseline) / baseline * 100.0
        });

        let recent_daily_loads = DateWindow::ending(end, self.rules.monotony_days)
            .dates()
            .map(|date| {
                daily
                    .get(&date)
                    .and_then(|d| d.total_load.to_f64())
                    .unwrap_or(0.0)
            })
            .collect();

        let rolling = DateWindow::ending(end, self.rules.rolling_session_days);
        let rolling_sessions = history.iter().filter(|h| rolling.contains(h.date)).count() as u32;

        LoadSnapshot {
            date: end,
            acute,
            chronic,
            fitness,
            balance,
            acwr,
            fatigue_trend_pct,
            fitness_ramp,
            acute_ramp,
            recent_daily_loads,
            rolling_sessions,
        }
    }
}
