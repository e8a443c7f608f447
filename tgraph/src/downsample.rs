//! Peak-preserving downsampling
//!
//! A buffer may hold far more samples than a display has columns. The
//! [`Downsampler`] partitions the samples into `target_width` contiguous
//! segments and keeps one representative per segment. A naive mean would
//! erase isolated spikes and dips, so segments whose spread is significant
//! relative to their peak are represented by whichever extreme lies farther
//! from the segment mean. Low-spread segments use the mean.
//!
//! The reduction is lossy, deterministic and never reorders its input.

use std::borrow::Cow;

use serde::Serialize;
use tgraph_sample::Sample;

/// The default share of a segment's peak its spread must exceed before an
/// extreme, not the mean, represents the segment.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
/// At most `target_width` representative samples, in input order.
///
/// Each representative carries the timestamp of the last raw sample folded
/// into its segment. When no compression was needed the series borrows the
/// input unchanged.
pub struct CompressedSeries<'a> {
    points: Cow<'a, [Sample]>,
}

impl CompressedSeries<'_> {
    /// The representative samples.
    #[must_use]
    pub fn points(&self) -> &[Sample] {
        &self.points
    }

    /// Number of representatives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` if there are no representatives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `true` if the series is the input, untouched.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(self.points, Cow::Borrowed(_))
    }

    /// How many input samples each representative stands for, on average.
    #[must_use]
    pub fn ratio(&self, original_len: usize) -> f64 {
        if self.points.is_empty() {
            return 1.0;
        }
        original_len as f64 / self.points.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Segment-reduction downsampler.
pub struct Downsampler {
    threshold: f64,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Downsampler {
    /// Create a [`Downsampler`] with a custom significance threshold.
    #[must_use]
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Reduce `samples` to at most `target_width` representatives.
    ///
    /// If `samples` already fits it is returned unchanged. Otherwise segment
    /// `i` covers `[floor(i * n / w), floor((i + 1) * n / w))`; empty segments
    /// contribute nothing.
    #[must_use]
    pub fn compress<'a>(&self, samples: &'a [Sample], target_width: usize) -> CompressedSeries<'a> {
        if samples.len() <= target_width {
            return CompressedSeries {
                points: Cow::Borrowed(samples),
            };
        }

        let n = samples.len();
        let mut points = Vec::with_capacity(target_width);
        for i in 0..target_width {
            let start = i * n / target_width;
            let end = ((i + 1) * n / target_width).min(n);
            if let Some(point) = self.reduce(&samples[start..end]) {
                points.push(point);
            }
        }

        CompressedSeries {
            points: Cow::Owned(points),
        }
    }

    fn reduce(&self, segment: &[Sample]) -> Option<Sample> {
        let last = segment.last()?;

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in segment {
            min = min.min(sample.value);
            max = max.max(sample.value);
            sum += sample.value;
        }
        let avg = sum / segment.len() as f64;

        let value = if max - min > self.threshold * max {
            if (max - avg).abs() > (min - avg).abs() {
                max
            } else {
                min
            }
        } else {
            avg
        };

        Some(Sample {
            timestamp: last.timestamp,
            value,
        })
    }
}

/// Reduce `samples` to at most `target_width` representatives with the
/// default threshold. See [`Downsampler::compress`].
#[must_use]
pub fn compress(samples: &[Sample], target_width: usize) -> CompressedSeries<'_> {
    Downsampler::default().compress(samples, target_width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample {
                timestamp: 1_000 * i as i64,
                value: *v,
            })
            .collect()
    }

    fn arb_samples() -> impl Strategy<Value = Vec<Sample>> {
        prop::collection::vec(-1.0e6_f64..1.0e6, 0..2_000).prop_map(|values| series(&values))
    }

    #[test]
    fn fits_is_identity() {
        let samples = series(&[1.0, 2.0, 3.0]);
        let out = compress(&samples, 3);
        assert!(out.is_identity());
        assert_eq!(out.points(), samples.as_slice());
    }

    #[test]
    fn zero_width_is_empty() {
        let samples = series(&[1.0, 2.0]);
        assert!(compress(&samples, 0).is_empty());
    }

    #[test]
    fn low_variation_uses_mean() {
        let samples = series(&[100.0, 101.0, 102.0, 103.0]);
        let out = compress(&samples, 2);
        assert_eq!(out.len(), 2);
        assert!((out.points()[0].value - 100.5).abs() < f64::EPSILON);
        assert!((out.points()[1].value - 102.5).abs() < f64::EPSILON);
    }

    #[test]
    fn representative_carries_last_timestamp() {
        let samples = series(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let out = compress(&samples, 3);
        let stamps: Vec<i64> = out.points().iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 3_000, 5_000]);
    }

    #[test]
    fn dip_is_preserved() {
        let mut values = vec![50.0; 100];
        values[42] = 1.0;
        let samples = series(&values);
        let out = compress(&samples, 10);
        assert_eq!(out.points()[4].value, 1.0);
        assert!((out.ratio(samples.len()) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn isolated_spike_survives() {
        // Oscillates 10, 90, 10, ... with a single spike to 200 at index 500.
        let mut values: Vec<f64> = (0..1_000)
            .map(|i| if i % 2 == 0 { 10.0 } else { 90.0 })
            .collect();
        values[500] = 200.0;
        let samples = series(&values);
        let out = compress(&samples, 100);
        assert_eq!(out.len(), 100);
        // Segment 50 covers indices [500, 510).
        assert!(out.points()[50].value >= 190.0);
    }

    #[test]
    fn tunable_threshold() {
        let samples = series(&[10.0, 10.0, 10.0, 10.5]);
        // Spread 0.5 is under 10% of 10.5, the mean wins.
        let out = compress(&samples, 1);
        assert!((out.points()[0].value - 10.125).abs() < f64::EPSILON);
        // Under a 1% threshold the spread is significant and the max, farther
        // from the mean, wins.
        let out = Downsampler::with_threshold(0.01).compress(&samples, 1);
        assert_eq!(out.points()[0].value, 10.5);
    }

    proptest! {
        #[test]
        fn identity_when_fits(samples in arb_samples(), slack in 0_usize..100) {
            let width = samples.len() + slack;
            let out = compress(&samples, width);
            prop_assert_eq!(out.points(), samples.as_slice());
        }

        #[test]
        fn output_is_bounded(samples in arb_samples(), width in 0_usize..500) {
            prop_assert!(compress(&samples, width).len() <= width);
        }

        #[test]
        fn deterministic(samples in arb_samples(), width in 1_usize..500) {
            prop_assert_eq!(compress(&samples, width), compress(&samples, width));
        }

        #[test]
        fn order_is_preserved(samples in arb_samples(), width in 1_usize..500) {
            let out = compress(&samples, width);
            prop_assert!(out.points().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }

        #[test]
        fn spike_is_not_averaged_away(
            len in 200_usize..2_000,
            width in 10_usize..60,
            at in 0.0_f64..1.0,
            spike in 1_000.0_f64..1.0e6,
        ) {
            let mut values = vec![0.5; len];
            let idx = ((len - 1) as f64 * at) as usize;
            values[idx] = spike;
            let samples = series(&values);
            let out = compress(&samples, width);
            prop_assert!(out.points().iter().any(|s| (s.value - spike).abs() < 1e-9));
        }
    }
}
