//! The web dashboard payload
//!
//! The browser draws the chart itself. What the server owes it is a
//! [`Payload`]: every tracked metric downsampled to the requested resolution,
//! statistics over the uncompressed data and the viewer's settings. The same
//! document is served from `/data` and pushed over the event stream.

use std::{collections::BTreeMap, fmt, str};

use serde::{Deserialize, Serialize};
use tgraph_sample::{MetricSelector, Sample};

use crate::{
    downsample::{CompressedSeries, Downsampler},
    stats::Stats,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Errors produced when handling web display settings.
pub enum Error {
    /// Resolution outside the accepted range.
    #[error("resolution must be between {min} and {max}, got {0}", min = Resolution::MIN, max = Resolution::MAX)]
    ResolutionOutOfRange(f64),
    /// Resolution that is not a whole number.
    #[error("resolution must be a whole number, got {0}")]
    ResolutionNotWhole(f64),
    /// Unrecognised chart style.
    #[error("unknown chart style '{0}', expected one of line, area, bars")]
    UnknownStyle(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How the browser draws a series.
pub enum ChartStyle {
    /// Connected line.
    #[default]
    Line,
    /// Filled area under the line.
    Area,
    /// One bar per point.
    Bars,
}

impl ChartStyle {
    /// The configuration name of this style.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ChartStyle::Line => "line",
            ChartStyle::Area => "area",
            ChartStyle::Bars => "bars",
        }
    }
}

impl fmt::Display for ChartStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl str::FromStr for ChartStyle {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        [ChartStyle::Line, ChartStyle::Area, ChartStyle::Bars]
            .into_iter()
            .find(|style| style.name().eq_ignore_ascii_case(input))
            .ok_or_else(|| Error::UnknownStyle(input.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "usize")]
/// Number of points the browser asked each series be downsampled to.
pub struct Resolution(usize);

impl Resolution {
    /// Smallest accepted resolution.
    pub const MIN: usize = 50;
    /// Largest accepted resolution.
    pub const MAX: usize = 1000;

    /// The resolution as a target width.
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self(300)
    }
}

impl TryFrom<usize> for Resolution {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::ResolutionOutOfRange(value as f64))
        }
    }
}

impl TryFrom<f64> for Resolution {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !(Self::MIN as f64..=Self::MAX as f64).contains(&value) {
            return Err(Error::ResolutionOutOfRange(value));
        }
        if value.fract() != 0.0 {
            return Err(Error::ResolutionNotWhole(value));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let width = value as usize;
        Ok(Self(width))
    }
}

impl From<Resolution> for usize {
    fn from(resolution: Resolution) -> Self {
        resolution.0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Viewer settings echoed in every [`Payload`].
pub struct PayloadSpec {
    /// The metric the dashboard shows first.
    pub metric: MetricSelector,
    /// `true` under accumulate retention.
    pub accumulate: bool,
    /// The rolling window bound.
    pub max_data_points: usize,
    /// Downsampling target for every series.
    pub resolution: Resolution,
    /// How the browser should draw.
    pub style: ChartStyle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
/// The dashboard document.
pub struct Payload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    /// The active metric, compressed.
    pub data_points: CompressedSeries<'a>,
    /// Every tracked metric, compressed.
    pub all_metrics_data: BTreeMap<MetricSelector, CompressedSeries<'a>>,
    /// The active metric.
    pub metric: MetricSelector,
    /// Human label of the active metric.
    pub metric_label: &'static str,
    /// `true` under accumulate retention.
    pub accumulate: bool,
    /// The rolling window bound.
    pub max_data_points: usize,
    /// Downsampling target.
    pub resolution: Resolution,
    /// How the browser should draw.
    pub style: ChartStyle,
    /// Statistics for the active metric.
    pub stats: Stats,
    /// Statistics for every tracked metric.
    pub all_stats: BTreeMap<MetricSelector, Stats>,
    /// Uncompressed sample count of the active metric.
    pub total_points: usize,
}

impl<'a> Payload<'a> {
    /// Build a payload from per-metric buffer snapshots. Every series is
    /// compressed to `spec.resolution` with `downsampler`, statistics are
    /// computed on the snapshots. Missing series read as empty.
    pub fn build<I>(series: I, spec: &PayloadSpec, downsampler: &Downsampler) -> Self
    where
        I: IntoIterator<Item = (MetricSelector, &'a [Sample])>,
    {
        let width = spec.resolution.get();
        let mut all_metrics_data = BTreeMap::new();
        let mut all_stats = BTreeMap::new();
        let mut total_points = 0;

        for (metric, samples) in series {
            if metric == spec.metric {
                total_points = samples.len();
            }
            all_metrics_data.insert(metric, downsampler.compress(samples, width));
            all_stats.insert(metric, Stats::of(samples).unwrap_or_default());
        }

        let data_points = all_metrics_data
            .get(&spec.metric)
            .cloned()
            .unwrap_or_else(|| downsampler.compress(&[], width));
        let stats = all_stats.get(&spec.metric).copied().unwrap_or_default();

        Self {
            kind: "update",
            data_points,
            all_metrics_data,
            metric: spec.metric,
            metric_label: spec.metric.label(),
            accumulate: spec.accumulate,
            max_data_points: spec.max_data_points,
            resolution: spec.resolution,
            style: spec.style,
            stats,
            all_stats,
            total_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                timestamp: i as i64,
                value: (i % 7) as f64,
            })
            .collect()
    }

    fn spec(resolution: usize) -> PayloadSpec {
        PayloadSpec {
            metric: MetricSelector::Rss,
            accumulate: true,
            max_data_points: 100,
            resolution: Resolution::try_from(resolution).expect("resolution"),
            style: ChartStyle::Area,
        }
    }

    #[test]
    fn resolution_bounds() {
        assert!(Resolution::try_from(49_usize).is_err());
        assert!(Resolution::try_from(2000_usize).is_err());
        assert_eq!(Resolution::try_from(50_usize).map(Resolution::get), Ok(50));
        assert_eq!(Resolution::try_from(1000.0).map(Resolution::get), Ok(1000));
        assert!(matches!(
            Resolution::try_from(100.5),
            Err(Error::ResolutionNotWhole(_))
        ));
        assert!(Resolution::try_from(f64::NAN).is_err());
        assert!(serde_json::from_str::<Resolution>("\"500\"").is_err());
        assert!(serde_json::from_str::<Resolution>("500").is_ok());
    }

    #[test]
    fn payload_shape() {
        let rss = samples(1_200);
        let heap = samples(10);
        let series = [
            (MetricSelector::Rss, rss.as_slice()),
            (MetricSelector::HeapUsed, heap.as_slice()),
        ];
        let payload = Payload::build(series, &spec(500), &Downsampler::default());
        assert!(payload.data_points.len() <= 500);
        assert_eq!(payload.total_points, 1_200);

        let json: Value = serde_json::to_value(&payload).expect("serializes");
        assert_eq!(json["type"], "update");
        assert_eq!(json["metric"], "rss");
        assert_eq!(json["metricLabel"], "RSS Memory (MB)");
        assert_eq!(json["accumulate"], true);
        assert_eq!(json["maxDataPoints"], 100);
        assert_eq!(json["resolution"], 500);
        assert_eq!(json["style"], "area");
        assert_eq!(json["allMetricsData"]["heapUsed"].as_array().map(Vec::len), Some(10));
        assert_eq!(json["allStats"]["heapUsed"]["max"], 6.0);
        assert_eq!(json["stats"]["min"], 0.0);
        assert!(json["dataPoints"][0]["timestamp"].is_i64());
    }

    #[test]
    fn empty_series_report_zero_stats() {
        let empty: Vec<Sample> = Vec::new();
        let payload = Payload::build(
            [(MetricSelector::Rss, empty.as_slice())],
            &spec(50),
            &Downsampler::default(),
        );
        assert_eq!(payload.stats, Stats::default());
        assert!(payload.data_points.is_empty());
        assert_eq!(payload.total_points, 0);
    }

    #[test]
    fn chart_style_parses() {
        assert_eq!("bars".parse::<ChartStyle>(), Ok(ChartStyle::Bars));
        assert!("pie".parse::<ChartStyle>().is_err());
    }
}
