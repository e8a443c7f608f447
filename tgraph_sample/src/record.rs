//! Canonical representation of a producer's log line
//!
//! A line is a single JSON object. The only required field is `timestamp`,
//! integer milliseconds since the unix epoch. Metric fields are optional and
//! producers commonly write them as fixed-precision decimal strings, so both
//! `"heapUsed": 51.5` and `"heapUsed": "51.50"` are accepted. Fields this
//! crate does not know about are ignored.

use serde::Deserialize;

use crate::metric::MetricSelector;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Reading {
    Number(f64),
    Text(String),
    // Any other JSON type. Present, but never numeric.
    Other(serde::de::IgnoredAny),
}

impl Reading {
    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Reading::Number(n) => *n,
            Reading::Text(s) => s.trim().parse::<f64>().ok()?,
            Reading::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// The outcome of reading one metric field from a [`Record`].
pub enum Field {
    /// The field is absent, or explicitly `null`.
    Missing,
    /// The field is present but is not a finite decimal number.
    NotNumeric,
    /// The field's value.
    Value(f64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The structure of a log line.
pub struct Record {
    /// The time in milliseconds since the unix epoch this line was written.
    pub timestamp: i64,
    heap_used: Option<Reading>,
    heap_total: Option<Reading>,
    heap_percent: Option<Reading>,
    rss: Option<Reading>,
    external: Option<Reading>,
    cpu_percent: Option<Reading>,
    cpu_user: Option<Reading>,
    cpu_system: Option<Reading>,
    cpu_total: Option<Reading>,
}

impl Record {
    /// Parse a single line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a JSON object with an integer
    /// `timestamp`.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    fn reading(&self, metric: MetricSelector) -> Option<&Reading> {
        match metric {
            MetricSelector::HeapUsed => self.heap_used.as_ref(),
            MetricSelector::HeapTotal => self.heap_total.as_ref(),
            MetricSelector::HeapPercent => self.heap_percent.as_ref(),
            MetricSelector::Rss => self.rss.as_ref(),
            MetricSelector::External => self.external.as_ref(),
            MetricSelector::CpuPercent => self.cpu_percent.as_ref(),
            MetricSelector::CpuUser => self.cpu_user.as_ref(),
            MetricSelector::CpuSystem => self.cpu_system.as_ref(),
            MetricSelector::CpuTotal => self.cpu_total.as_ref(),
        }
    }

    /// Read the field selected by `metric`.
    #[must_use]
    pub fn field(&self, metric: MetricSelector) -> Field {
        match self.reading(metric) {
            None => Field::Missing,
            Some(reading) => reading.as_f64().map_or(Field::NotNumeric, Field::Value),
        }
    }
}
