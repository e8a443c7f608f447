//! The Sample Extractor
//!
//! Turns one raw line into a [`Sample`] for a selected metric. Malformed input
//! never produces an error, only the absence of a sample: the caller is
//! expected to drop such lines silently.

use serde::{Deserialize, Serialize};

use crate::{
    metric::MetricSelector,
    record::{Field, Record},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// A single time-stamped observation of one metric.
pub struct Sample {
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    /// The observed value, always finite.
    pub value: f64,
}

impl Sample {
    /// Create a new [`Sample`]. Returns `None` if `value` is not finite.
    #[must_use]
    pub fn new(timestamp: i64, value: f64) -> Option<Self> {
        value.is_finite().then_some(Self { timestamp, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What to do when the selected metric field is absent from a line.
pub enum MissingField {
    /// Produce no sample.
    #[default]
    Reject,
    /// Produce a sample with value zero.
    Zero,
}

impl Record {
    /// Build a [`Sample`] for `metric` from this record, subject to the
    /// `missing` policy. Non-numeric fields never produce a sample.
    #[must_use]
    pub fn sample(&self, metric: MetricSelector, missing: MissingField) -> Option<Sample> {
        let value = match (self.field(metric), missing) {
            (Field::Value(v), _) => v,
            (Field::Missing, MissingField::Zero) => 0.0,
            (Field::Missing, MissingField::Reject) | (Field::NotNumeric, _) => return None,
        };
        Sample::new(self.timestamp, value)
    }
}

/// Extract a [`Sample`] for `metric` from `line`.
///
/// Returns `None` if the line is blank, is not a JSON object, lacks an
/// integer `timestamp` or if the selected field is missing or not numeric.
#[must_use]
pub fn extract(line: &str, metric: MetricSelector) -> Option<Sample> {
    extract_with(line, metric, MissingField::Reject)
}

/// As [`extract`] but with an explicit policy for a missing field.
#[must_use]
pub fn extract_with(line: &str, metric: MetricSelector, missing: MissingField) -> Option<Sample> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Record::parse(line).ok()?.sample(metric, missing)
}
