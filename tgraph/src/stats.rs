//! Aggregate statistics over uncompressed samples
//!
//! Statistics are always computed before compression so the representative
//! rule of the [`crate::downsample`] module cannot bias them.

use serde::Serialize;
use tgraph_sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
/// Current, average, minimum and maximum of a series.
pub struct Stats {
    /// The most recent raw value.
    pub current: f64,
    /// Arithmetic mean of all values.
    pub average: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

impl Stats {
    /// Compute statistics for `samples`, `None` if there are none.
    #[must_use]
    pub fn of(samples: &[Sample]) -> Option<Self> {
        let last = samples.last()?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in samples {
            min = min.min(sample.value);
            max = max.max(sample.value);
            sum += sample.value;
        }
        Some(Self {
            current: last.value,
            average: sum / samples.len() as f64,
            min,
            max,
        })
    }

    /// `max - min`, or 1 when the series is flat.
    #[must_use]
    pub fn range(&self) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 { 1.0 } else { range }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn samples(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample {
                timestamp: i as i64,
                value: *v,
            })
            .collect()
    }

    #[test]
    fn empty_has_no_stats() {
        assert_eq!(Stats::of(&[]), None);
    }

    #[test]
    fn basic() {
        let stats = Stats::of(&samples(&[50.0, 55.0, 52.0])).expect("stats");
        assert_eq!(stats.current, 52.0);
        assert_eq!(stats.min, 50.0);
        assert_eq!(stats.max, 55.0);
        assert_eq!(format!("{:.2}", stats.average), "52.33");
        assert_eq!(stats.range(), 5.0);
    }

    #[test]
    fn flat_series_has_unit_range() {
        let stats = Stats::of(&samples(&[7.0, 7.0])).expect("stats");
        assert_eq!(stats.range(), 1.0);
    }

    proptest! {
        #[test]
        fn average_is_bounded(values in prop::collection::vec(-1.0e9_f64..1.0e9, 1..500)) {
            let stats = Stats::of(&samples(&values)).expect("stats");
            prop_assert!(stats.min <= stats.max);
            prop_assert!(stats.average >= stats.min - 1e-6 * stats.min.abs().max(1.0));
            prop_assert!(stats.average <= stats.max + 1e-6 * stats.max.abs().max(1.0));
            prop_assert!(stats.range() > 0.0);
        }
    }
}
