//! This module controls configuration parsing from the end user. Settings
//! come from a YAML document, either the contents of the `TGRAPH_CONFIG`
//! environment variable or a file, and command line flags override them.
//! Every field has a default so an empty document is a valid configuration.

use std::{
    env, fs, io,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tgraph_sample::MetricSelector;
use tracing::debug;

use crate::{
    buffer::{Retention, RetentionPolicy},
    downsample::{DEFAULT_THRESHOLD, Downsampler},
    render::{
        glyph::GlyphStyle,
        terminal::{DisplaySpec, GUTTER},
        web::{ChartStyle, Resolution},
    },
    session::{Settings, Tracking},
};

/// Environment variable holding a complete YAML configuration.
pub const CONFIG_ENV: &str = "TGRAPH_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The terminal layout leaves no room to plot.
    #[error("view.width must be greater than {gutter}, got {0}", gutter = GUTTER)]
    ViewWidth(usize),
    /// The terminal layout needs two rows.
    #[error("view.height must be at least 2, got {0}")]
    ViewHeight(usize),
    /// The downsampling threshold must be a non-negative share.
    #[error("extreme_threshold must be finite and not negative, got {0}")]
    Threshold(f64),
    /// Simulated load runs in the monitor's own process.
    #[error("monitor.simulate and monitor.simulate_cpu require monitoring the monitor itself, drop monitor.pid")]
    SimulateForeign,
}

fn default_file() -> PathBuf {
    PathBuf::from("heap.log")
}

fn default_window() -> NonZeroUsize {
    NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN)
}

fn default_refresh_milliseconds() -> u64 {
    100
}

fn default_title() -> String {
    "tgraph".to_string()
}

fn default_height() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3456))
}

fn default_concurrent_requests_max() -> usize {
    100
}

fn default_interval_milliseconds() -> u64 {
    100
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The log file producers append to and viewers follow.
    #[serde(default = "default_file")]
    pub file: PathBuf,
    /// The metric shown first.
    #[serde(default)]
    pub metric: MetricSelector,
    /// Whether a viewer keeps a rolling window or every sample.
    #[serde(default)]
    pub retention: Retention,
    /// The rolling window size, kept while accumulating.
    #[serde(default = "default_window")]
    pub max_data_points: NonZeroUsize,
    /// Share of a segment's peak its spread must exceed before the
    /// downsampler keeps an extreme instead of the mean.
    #[serde(default = "default_threshold")]
    pub extreme_threshold: f64,
    /// Terminal redraw period. Zero redraws only after loads and commands.
    #[serde(default = "default_refresh_milliseconds")]
    pub refresh_milliseconds: u64,
    /// Terminal viewer settings.
    #[serde(default)]
    pub view: View,
    /// Web viewer settings.
    #[serde(default)]
    pub web: Web,
    /// Resource monitor settings.
    #[serde(default)]
    pub monitor: Monitor,
    /// The method by which to express internal telemetry
    pub telemetry: Option<Telemetry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: default_file(),
            metric: MetricSelector::default(),
            retention: Retention::default(),
            max_data_points: default_window(),
            extreme_threshold: default_threshold(),
            refresh_milliseconds: default_refresh_milliseconds(),
            view: View::default(),
            web: Web::default(),
            monitor: Monitor::default(),
            telemetry: None,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Terminal viewer settings.
pub struct View {
    /// Glyph set.
    #[serde(default)]
    pub style: GlyphStyle,
    /// Chart title, the metric label is appended.
    #[serde(default = "default_title")]
    pub title: String,
    /// Total columns. Taken from `COLUMNS`, else 80, when absent.
    pub width: Option<usize>,
    /// Plot rows.
    #[serde(default = "default_height")]
    pub height: usize,
    /// Draw the legend.
    #[serde(default = "default_true")]
    pub show_legend: bool,
    /// Draw the time axis.
    #[serde(default = "default_true")]
    pub show_time_axis: bool,
}

impl Default for View {
    fn default() -> Self {
        Self {
            style: GlyphStyle::default(),
            title: default_title(),
            width: None,
            height: default_height(),
            show_legend: true,
            show_time_axis: true,
        }
    }
}

impl View {
    /// The display layout, with `fallback_width` used when no width is set.
    #[must_use]
    pub fn display_spec(&self, fallback_width: usize) -> DisplaySpec {
        DisplaySpec {
            width: self.width.unwrap_or(fallback_width),
            height: self.height,
            style: self.style,
            show_legend: self.show_legend,
            show_time_axis: self.show_time_axis,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Web viewer settings.
pub struct Web {
    /// Address the dashboard binds to.
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// How the browser draws.
    #[serde(default)]
    pub style: ChartStyle,
    /// Initial downsampling target.
    #[serde(default)]
    pub resolution: Resolution,
    /// Requests served concurrently.
    #[serde(default = "default_concurrent_requests_max")]
    pub concurrent_requests_max: usize,
}

impl Default for Web {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            style: ChartStyle::default(),
            resolution: Resolution::default(),
            concurrent_requests_max: default_concurrent_requests_max(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Resource monitor settings.
pub struct Monitor {
    /// Sampling period.
    #[serde(default = "default_interval_milliseconds")]
    pub interval_milliseconds: u64,
    /// Process to sample, the monitor itself when absent.
    pub pid: Option<i32>,
    /// Record cpu fields. Memory only when false.
    #[serde(default = "default_true")]
    pub cpu: bool,
    /// Allocate and release memory in the monitor to produce a moving chart.
    #[serde(default)]
    pub simulate: bool,
    /// Burn cpu in short random bursts in the monitor.
    #[serde(default)]
    pub simulate_cpu: bool,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            interval_milliseconds: default_interval_milliseconds(),
            pid: None,
            cpu: true,
            simulate: false,
            simulate_cpu: false,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(untagged)]
/// Defines the manner of internal telemetry.
pub enum Telemetry {
    /// Expose internal metrics for scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
    },
}

impl Config {
    /// Load configuration from [`CONFIG_ENV`] if set, else from `path` if
    /// given, else use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the document is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        Self::resolve(env::var(CONFIG_ENV).ok(), path)
    }

    fn resolve(from_env: Option<String>, path: Option<&Path>) -> Result<Self, Error> {
        if let Some(contents) = from_env {
            debug!("Using config from env var '{CONFIG_ENV}'");
            return Self::parse(&contents);
        }
        let Some(path) = path else {
            debug!("No configuration given, using defaults");
            return Ok(Self::default());
        };
        debug!("Attempting to open configuration file at: {}", path.display());
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML, names an unknown
    /// field or describes an unusable layout.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal layout leaves no plot area.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(width) = self.view.width {
            if width <= GUTTER {
                return Err(Error::ViewWidth(width));
            }
        }
        if self.view.height < 2 {
            return Err(Error::ViewHeight(self.view.height));
        }
        if !self.extreme_threshold.is_finite() || self.extreme_threshold < 0.0 {
            return Err(Error::Threshold(self.extreme_threshold));
        }
        if self.monitor.pid.is_some() && (self.monitor.simulate || self.monitor.simulate_cpu) {
            return Err(Error::SimulateForeign);
        }
        Ok(())
    }

    /// The retention policy viewers start with.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.retention.policy(self.max_data_points)
    }

    /// The downsampler both renderers use.
    #[must_use]
    pub fn downsampler(&self) -> Downsampler {
        Downsampler::with_threshold(self.extreme_threshold)
    }

    /// Terminal redraw period, `None` to redraw only on change.
    #[must_use]
    pub fn refresh(&self) -> Option<Duration> {
        (self.refresh_milliseconds > 0).then(|| Duration::from_millis(self.refresh_milliseconds))
    }

    /// Session settings for a viewer with the given tracking.
    #[must_use]
    pub fn settings(&self, tracking: Tracking) -> Settings {
        Settings {
            path: self.file.clone(),
            title: self.view.title.clone(),
            metric: self.metric,
            retention: self.retention,
            window: self.max_data_points,
            glyph: self.view.style,
            chart: self.web.style,
            resolution: self.web.resolution,
            tracking,
        }
    }
}
