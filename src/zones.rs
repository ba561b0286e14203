use crate::models::ActivityEvent;
use serde::{Deserialize, Serialize};

/// Time-in-zone summed across a window's events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneDistribution {
    /// Seconds per zone, Z1 first
    pub seconds: Vec<u64>,
    /// Events that contributed zone data
    pub sessions_with_zones: u32,
}

impl ZoneDistribution {
    pub fn from_events(events: &[ActivityEvent]) -> Self {
        let mut distribution = Self::default();
        for zones in events.iter().filter_map(|e| e.zone_times.as_ref()) {
            if distribution.seconds.len() < zones.len() {
                distribution.seconds.resize(zones.len(), 0);
            }
            for (slot, secs) in distribution.seconds.iter_mut().zip(zones) {
                *slot += u64::from(*secs);
            }
            distribution.sessions_with_zones += 1;
        }
        distribution
    }

    pub fn total_secs(&self) -> u64 {
        self.seconds.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_secs() == 0
    }

    /// Share of total time in zone `zone` (1-based), in percent
    pub fn pct(&self, zone: usize) -> Option<f64> {
        let total = self.total_secs();
        if total == 0 || zone == 0 {
            return None;
        }
        let secs = self.seconds.get(zone - 1).copied().unwrap_or(0);
        Some(secs as f64 / total as f64 * 100.0)
    }

    /// Share of time in `from` and every zone above it, in percent
    pub fn pct_from(&self, from: usize) -> Option<f64> {
        let total = self.total_secs();
        if total == 0 || from == 0 {
            return None;
        }
        let secs: u64 = self.seconds.iter().skip(from - 1).sum();
        Some(secs as f64 / total as f64 * 100.0)
    }

    /// (Z1% + Z3%) ÷ (2 × Z2%)
    pub fn polarisation_ratio(&self) -> Option<f64> {
        let z2 = self.pct(2)?;
        if z2 <= 0.0 {
            return None;
        }
        Some((self.pct(1)? + self.pct(3)?) / (2.0 * z2))
    }

    /// (Z1% + Z2%) ÷ total, on a 0-1 scale
    pub fn polarisation_index(&self) -> Option<f64> {
        Some((self.pct(1)? + self.pct(2)?) / 100.0)
    }
}

/// Seconds an event spent at or above zone `from` (1-based)
pub fn seconds_from_zone(event: &ActivityEvent, from: usize) -> u32 {
    event
        .zone_times
        .as_ref()
        .map(|zones| zones.iter().skip(from.saturating_sub(1)).sum::<u32>())
        .unwrap_or(0)
}
