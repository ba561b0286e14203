//! Within-session drift from second-by-second streams.

use crate::models::ActivityEvent;
use statrs::statistics::Statistics;

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let m = values.iter().mean();
    m.is_finite().then_some(m)
}

/// Fractional output drop from the first to the second half of a session.
///
/// Zero samples (coasting, stops) are ignored. Negative drift counts as
/// no drop.
pub fn back_half_drop(series: &[f64], min_samples: usize) -> Option<f64> {
    let moving: Vec<f64> = series.iter().copied().filter(|v| *v > 0.0).collect();
    if moving.len() < min_samples.max(2) {
        return None;
    }
    let (first, second) = moving.split_at(moving.len() / 2);
    let first = mean(first)?;
    let second = mean(second)?;
    if first <= 0.0 {
        return None;
    }
    Some(((first - second) / first).max(0.0))
}

/// Aerobic decoupling (%): change in output per heartbeat between halves
pub fn decoupling_pct(output: &[f64], heart_rate: &[f64], min_samples: usize) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = output
        .iter()
        .zip(heart_rate)
        .map(|(o, h)| (*o, *h))
        .filter(|(o, h)| *o > 0.0 && *h > 0.0)
        .collect();
    if pairs.len() < min_samples.max(2) {
        return None;
    }
    let (first, second) = pairs.split_at(pairs.len() / 2);
    let efficiency = |half: &[(f64, f64)]| -> Option<f64> {
        let out: Vec<f64> = half.iter().map(|p| p.0).collect();
        let hr: Vec<f64> = half.iter().map(|p| p.1).collect();
        Some(mean(&out)? / mean(&hr)?)
    };
    let first = efficiency(first)?;
    let second = efficiency(second)?;
    Some((first - second) / first * 100.0)
}

/// Output stream used for drift: power when present, else speed
pub fn output_stream(event: &ActivityEvent) -> Option<&[f64]> {
    let streams = event.streams.as_ref()?;
    streams
        .watts
        .as_deref()
        .filter(|w| !w.is_empty())
        .or_else(|| streams.velocity.as_deref().filter(|v| !v.is_empty()))
}

/// Stream-derived decoupling, falling back to the provider's figure
pub fn event_decoupling(event: &ActivityEvent, min_samples: usize) -> Option<f64> {
    let from_streams = output_stream(event).and_then(|output| {
        let hr = event.streams.as_ref()?.heartrate.as_deref()?;
        decoupling_pct(output, hr, min_samples)
    });
    from_streams.or(event.decoupling_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_half_drop() {
        let mut series = vec![200.0; 600];
        series.extend(vec![180.0; 600]);
        let drop = back_half_drop(&series, 100).unwrap();
        assert!((drop - 0.10).abs() < 1e-9);

        let rising: Vec<f64> = (0..200).map(|i| 150.0 + i as f64).collect();
        assert_eq!(back_half_drop(&rising, 100), Some(0.0));
        assert_eq!(back_half_drop(&[200.0; 10], 100), None);
    }

    #[test]
    fn test_zeros_are_ignored() {
        let mut series = vec![200.0; 300];
        series.extend(vec![0.0; 300]);
        series.extend(vec![200.0; 300]);
        assert_eq!(back_half_drop(&series, 100), Some(0.0));
    }

    #[test]
    fn test_decoupling() {
        let power = vec![200.0; 1000];
        let mut hr = vec![140.0; 500];
        hr.extend(vec![147.0; 500]);
        let pct = decoupling_pct(&power, &hr, 100).unwrap();
        // 200/140 vs 200/147: efficiency falls by 1 - 140/147
        assert!((pct - (1.0 - 140.0 / 147.0) * 100.0).abs() < 1e-9);
    }
}
