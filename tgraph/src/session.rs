//! The Viewer Session
//!
//! A [`Session`] ties the Extractor, Buffer, Downsampler and Renderers together
//! for one viewer. It moves through four states:
//!
//! ```text
//! Initializing -> Loading -> Live -> Stopped
//! ```
//!
//! `start` replays the file's history into fresh buffers and enters Live.
//! While Live, each new line is ingested and renders may be taken at any
//! time. Mode changes (metric, style, retention, reload) are only accepted
//! while Live and are all the same operation: drop the buffers and replay the
//! history under the new settings. Once Stopped nothing is ingested and
//! nothing renders.
//!
//! A session is not shared. Drivers own it on a single task, which is what
//! keeps an append from ever interleaving with a replay.
//!
//! ## Metrics
//!
//! `lines_received`: Lines offered to a live session
//! `lines_rejected`: Lines that produced no sample
//! `renders`: Frames and payloads produced
//!

use std::{collections::BTreeMap, fmt, io, num::NonZeroUsize, path::PathBuf, time::Duration};

use metrics::counter;
use tgraph_sample::{MetricSelector, MissingField, Record, Sample};
use tracing::{debug, info};

use crate::{
    buffer::{Buffer, Retention, RetentionPolicy},
    downsample::Downsampler,
    history::History,
    render::{
        self,
        glyph::GlyphStyle,
        terminal::{Renderer, Status},
        web::{ChartStyle, Payload, PayloadSpec, Resolution},
    },
};

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Session`].
pub enum Error {
    /// The operation is only valid in [`State::Live`].
    #[error("session is {0}, operation requires it to be live")]
    NotLive(State),
    /// `start` was called more than once.
    #[error("session is {0}, it can only be started once")]
    AlreadyStarted(State),
    /// The log file exists but could not be read.
    #[error("Failed to read history: {0}")]
    Io(#[from] io::Error),
    /// A web display setting was rejected.
    #[error(transparent)]
    Web(#[from] render::web::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of a [`Session`].
pub enum State {
    /// Created, not yet started.
    Initializing,
    /// Replaying the file's history.
    Loading,
    /// Following the file.
    Live,
    /// Finished. Terminal.
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Initializing => "initializing",
            State::Loading => "loading",
            State::Live => "live",
            State::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which metrics a session buffers.
pub enum Tracking {
    /// Only the active metric. Lines missing it are rejected.
    Active,
    /// Every metric. A missing field reads as zero.
    All,
}

impl Tracking {
    fn missing(self) -> MissingField {
        match self {
            Tracking::Active => MissingField::Reject,
            Tracking::All => MissingField::Zero,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Everything that determines what a [`Session`] buffers and shows.
pub struct Settings {
    /// The log file to follow.
    pub path: PathBuf,
    /// Chart title, the metric label is appended.
    pub title: String,
    /// The active metric.
    pub metric: MetricSelector,
    /// Retention mode in effect.
    pub retention: Retention,
    /// Rolling window size, kept while accumulating.
    pub window: NonZeroUsize,
    /// Terminal glyph set.
    pub glyph: GlyphStyle,
    /// Web chart style.
    pub chart: ChartStyle,
    /// Web downsampling target.
    pub resolution: Resolution,
    /// Which metrics to buffer.
    pub tracking: Tracking,
}

impl Settings {
    /// The buffer policy the mode and window make.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.retention.policy(self.window)
    }
}

#[derive(Debug)]
/// A single viewer's state machine. See the module documentation.
pub struct Session {
    settings: Settings,
    state: State,
    buffers: BTreeMap<MetricSelector, Buffer>,
    downsampler: Downsampler,
}

impl Session {
    /// Create a new [`Session`] in [`State::Initializing`].
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            state: State::Initializing,
            buffers: BTreeMap::new(),
            downsampler: Downsampler::default(),
        }
    }

    /// Use `downsampler` for web payloads in place of the default.
    #[must_use]
    pub fn with_downsampler(mut self, downsampler: Downsampler) -> Self {
        self.downsampler = downsampler;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replay the file's history and go live. Returns the byte offset the
    /// follower must resume from.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was already started or if the log
    /// file exists but cannot be read. A missing file is not an error.
    pub async fn start(&mut self) -> Result<u64, Error> {
        if self.state != State::Initializing {
            return Err(Error::AlreadyStarted(self.state));
        }
        self.replay().await
    }

    /// Stop the session, releasing its buffers. Idempotent.
    pub fn stop(&mut self) {
        if self.state != State::Stopped {
            info!("Stopping session for {path}", path = self.settings.path.display());
        }
        self.state = State::Stopped;
        self.buffers.clear();
    }

    /// Offer one raw line. Returns `true` if it produced at least one
    /// sample. Lines offered outside [`State::Live`] are ignored.
    pub fn ingest(&mut self, line: &str) -> bool {
        if self.state != State::Live {
            return false;
        }
        counter!("lines_received").increment(1);
        self.append(line)
    }

    /// The retained samples of `metric`, empty if it is not tracked.
    #[must_use]
    pub fn snapshot(&self, metric: MetricSelector) -> &[Sample] {
        self.buffers.get(&metric).map_or(&[][..], Buffer::snapshot)
    }

    /// Number of samples retained for the active metric.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot(self.settings.metric).len()
    }

    /// `true` if nothing is retained for the active metric.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the active metric as a terminal frame with its status line,
    /// `None` unless live.
    #[must_use]
    pub fn render_terminal(&self, renderer: &Renderer, refresh: Duration) -> Option<String> {
        if self.state != State::Live {
            return None;
        }
        counter!("renders").increment(1);
        let samples = self.snapshot(self.settings.metric);
        let title = format!(
            "{title} - {label}",
            title = self.settings.title,
            label = self.settings.metric.label()
        );
        let status = Status {
            policy: self.settings.policy(),
            refresh,
            file: &self.settings.path,
        };
        Some(renderer.render(&title, samples, Some(&status)))
    }

    /// Build the web payload over every tracked metric, `None` unless live.
    #[must_use]
    pub fn payload(&self) -> Option<Payload<'_>> {
        if self.state != State::Live {
            return None;
        }
        counter!("renders").increment(1);
        let spec = PayloadSpec {
            metric: self.settings.metric,
            accumulate: self.settings.retention == Retention::Accumulate,
            max_data_points: self.settings.window.get(),
            resolution: self.settings.resolution,
            style: self.settings.chart,
        };
        let series = self
            .buffers
            .iter()
            .map(|(metric, buffer)| (*metric, buffer.snapshot()));
        Some(Payload::build(series, &spec, &self.downsampler))
    }

    /// Switch the active metric and reload.
    ///
    /// # Errors
    ///
    /// See [`Session::reinitialize`].
    pub async fn set_metric(&mut self, metric: MetricSelector) -> Result<u64, Error> {
        self.ensure_live()?;
        self.settings.metric = metric;
        self.reinitialize().await
    }

    /// Switch between the memory and cpu metric families and reload.
    ///
    /// # Errors
    ///
    /// See [`Session::reinitialize`].
    pub async fn toggle_family(&mut self) -> Result<u64, Error> {
        let metric = self.settings.metric.toggle_family();
        self.set_metric(metric).await
    }

    /// Switch the terminal glyph set and reload.
    ///
    /// # Errors
    ///
    /// See [`Session::reinitialize`].
    pub async fn set_style(&mut self, style: GlyphStyle) -> Result<u64, Error> {
        self.ensure_live()?;
        self.settings.glyph = style;
        self.reinitialize().await
    }

    /// Advance to the next terminal glyph set and reload.
    ///
    /// # Errors
    ///
    /// See [`Session::reinitialize`].
    pub async fn cycle_style(&mut self) -> Result<u64, Error> {
        let style = self.settings.glyph.next();
        self.set_style(style).await
    }

    /// Switch retention and reload. A rolling policy also sets the window,
    /// accumulating keeps the current one for the next switch back.
    ///
    /// # Errors
    ///
    /// See [`Session::reinitialize`].
    pub async fn set_retention(&mut self, policy: RetentionPolicy) -> Result<u64, Error> {
        self.ensure_live()?;
        if let RetentionPolicy::Rolling { max_size } = policy {
            self.settings.window = max_size;
        }
        self.settings.retention = policy.mode();
        self.reinitialize().await
    }

    /// Flip between the rolling window and accumulate retention and reload.
    ///
    /// # Errors
    ///
    /// See [`Session::reinitialize`].
    pub async fn toggle_retention(&mut self) -> Result<u64, Error> {
        let policy = self.settings.retention.toggle().policy(self.settings.window);
        self.set_retention(policy).await
    }

    /// Change the web downsampling target. Buffers are left as they are.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the session untouched, if the session is not
    /// live or `requested` is not a whole number within
    /// [`Resolution::MIN`]..=[`Resolution::MAX`].
    pub fn set_resolution(&mut self, requested: f64) -> Result<Resolution, Error> {
        self.ensure_live()?;
        let resolution = Resolution::try_from(requested)?;
        debug!("resolution changed to {resolution}");
        self.settings.resolution = resolution;
        Ok(resolution)
    }

    /// Drop every buffer and replay the file's history under the current
    /// settings. Returns the byte offset the follower must resume from.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not live or if the log file exists
    /// but cannot be read. The session stays live on a read failure, with
    /// empty buffers.
    pub async fn reinitialize(&mut self) -> Result<u64, Error> {
        self.ensure_live()?;
        self.replay().await
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.state == State::Live {
            Ok(())
        } else {
            Err(Error::NotLive(self.state))
        }
    }

    async fn replay(&mut self) -> Result<u64, Error> {
        self.state = State::Loading;
        let tracked: Vec<MetricSelector> = match self.settings.tracking {
            Tracking::Active => vec![self.settings.metric],
            Tracking::All => MetricSelector::ALL.to_vec(),
        };
        let retention = self.settings.policy();
        self.buffers = tracked
            .into_iter()
            .map(|metric| (metric, Buffer::new(retention)))
            .collect();

        let history = match History::read(&self.settings.path).await {
            Ok(history) => history,
            Err(err) => {
                self.state = State::Live;
                return Err(err.into());
            }
        };
        for line in history.lines_for(retention) {
            self.append(line);
        }
        info!(
            "Loaded {points} existing data points from {lines} lines, mode {retention}",
            points = self.len(),
            lines = history.len(),
        );

        self.state = State::Live;
        Ok(history.offset())
    }

    fn append(&mut self, line: &str) -> bool {
        let Ok(record) = Record::parse(line.trim()) else {
            counter!("lines_rejected").increment(1);
            return false;
        };
        let missing = self.settings.tracking.missing();
        let mut accepted = false;
        for (metric, buffer) in &mut self.buffers {
            if let Some(sample) = record.sample(*metric, missing) {
                buffer.append(sample);
                accepted = true;
            }
        }
        if !accepted {
            counter!("lines_rejected").increment(1);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write, path::Path};

    use super::*;
    use crate::render::terminal::DisplaySpec;

    fn line(timestamp: i64, heap: f64) -> String {
        format!(r#"{{"timestamp":{timestamp},"heapUsed":"{heap:.2}","cpuPercent":"{cpu:.2}"}}"#, cpu = heap / 2.0)
    }

    fn write_lines(path: &Path, count: usize, from: usize) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open");
        for i in from..from + count {
            writeln!(file, "{}", line(1_000 * i as i64, i as f64)).expect("write");
        }
    }

    fn settings(path: &Path, policy: RetentionPolicy, tracking: Tracking) -> Settings {
        let window = match policy {
            RetentionPolicy::Rolling { max_size } => max_size,
            RetentionPolicy::Accumulate => NonZeroUsize::new(100).expect("non-zero"),
        };
        Settings {
            path: path.to_path_buf(),
            title: "tgraph".to_string(),
            metric: MetricSelector::HeapUsed,
            retention: policy.mode(),
            window,
            glyph: GlyphStyle::Blocks,
            chart: ChartStyle::Line,
            resolution: Resolution::default(),
            tracking,
        }
    }

    fn rolling(n: usize) -> RetentionPolicy {
        RetentionPolicy::rolling(NonZeroUsize::new(n).expect("non-zero"))
    }

    #[tokio::test]
    async fn missing_file_goes_live_and_waits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = Session::new(settings(
            &dir.path().join("absent.log"),
            rolling(100),
            Tracking::Active,
        ));
        assert_eq!(session.state(), State::Initializing);
        assert_eq!(session.start().await.expect("start"), 0);
        assert_eq!(session.state(), State::Live);
        assert!(session.is_empty());
        assert!(matches!(session.start().await, Err(Error::AlreadyStarted(State::Live))));
    }

    #[tokio::test]
    async fn malformed_lines_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = Session::new(settings(
            &dir.path().join("heap.log"),
            RetentionPolicy::Accumulate,
            Tracking::Active,
        ));
        session.start().await.expect("start");
        let before = session.len();
        assert!(session.ingest(&line(1_000, 1.0)));
        assert!(!session.ingest("not json"));
        assert!(session.ingest(&line(2_000, 2.0)));
        assert_eq!(session.len(), before + 2);
    }

    #[tokio::test]
    async fn rolling_start_keeps_the_tail_of_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 150, 0);
        let mut session = Session::new(settings(&path, rolling(100), Tracking::Active));
        let offset = session.start().await.expect("start");
        assert_eq!(offset, fs::metadata(&path).expect("metadata").len());
        let samples = session.snapshot(MetricSelector::HeapUsed);
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[0].timestamp, 50_000);
        assert_eq!(samples[99].value, 149.0);
    }

    #[tokio::test]
    async fn reload_rederives_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 20, 0);
        let mut session = Session::new(settings(&path, RetentionPolicy::Accumulate, Tracking::Active));
        session.start().await.expect("start");
        assert_eq!(session.len(), 20);

        // The follower would have ingested these too.
        write_lines(&path, 10, 20);
        for i in 20..30 {
            session.ingest(&line(1_000 * i, i as f64));
        }
        assert_eq!(session.len(), 30);

        let offset = session.reinitialize().await.expect("reload");
        assert_eq!(session.len(), 30);
        assert_eq!(offset, fs::metadata(&path).expect("metadata").len());
    }

    #[tokio::test]
    async fn mode_changes_require_live() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = Session::new(settings(
            &dir.path().join("heap.log"),
            rolling(10),
            Tracking::Active,
        ));
        assert!(matches!(session.reinitialize().await, Err(Error::NotLive(State::Initializing))));
        assert!(matches!(session.toggle_family().await, Err(Error::NotLive(_))));
        assert!(matches!(session.cycle_style().await, Err(Error::NotLive(_))));
        assert!(matches!(session.set_resolution(500.0), Err(Error::NotLive(_))));
        assert_eq!(session.settings().metric, MetricSelector::HeapUsed);

        session.start().await.expect("start");
        session.stop();
        assert!(matches!(session.toggle_retention().await, Err(Error::NotLive(State::Stopped))));
    }

    #[tokio::test]
    async fn nothing_after_stop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 5, 0);
        let mut session = Session::new(settings(&path, rolling(10), Tracking::All));
        session.start().await.expect("start");
        assert!(session.payload().is_some());
        session.stop();
        assert!(!session.ingest(&line(9_000, 9.0)));
        assert!(session.payload().is_none());
        let renderer = Renderer::new(DisplaySpec {
            width: 80,
            height: 10,
            style: GlyphStyle::Blocks,
            show_legend: true,
            show_time_axis: true,
        })
        .expect("renderer");
        assert!(session.render_terminal(&renderer, Duration::from_millis(100)).is_none());
    }

    #[tokio::test]
    async fn toggles_reload_under_new_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 30, 0);
        let mut session = Session::new(settings(&path, rolling(10), Tracking::Active));
        session.start().await.expect("start");
        assert_eq!(session.len(), 10);

        session.toggle_retention().await.expect("toggle");
        assert_eq!(session.settings().policy(), RetentionPolicy::Accumulate);
        assert_eq!(session.len(), 30);
        session.toggle_retention().await.expect("toggle");
        assert_eq!(session.settings().policy(), rolling(10));
        assert_eq!(session.len(), 10);

        session.toggle_family().await.expect("toggle");
        assert_eq!(session.settings().metric, MetricSelector::CpuPercent);
        assert_eq!(session.snapshot(MetricSelector::CpuPercent).last().map(|s| s.value), Some(14.5));
        assert!(session.snapshot(MetricSelector::HeapUsed).is_empty());

        session.cycle_style().await.expect("cycle");
        assert_eq!(session.settings().glyph, GlyphStyle::Blocks.next());
    }

    #[tokio::test]
    async fn accumulate_start_keeps_the_configured_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 40, 0);
        let mut settings = settings(&path, RetentionPolicy::Accumulate, Tracking::Active);
        settings.window = NonZeroUsize::new(25).expect("non-zero");
        let mut session = Session::new(settings);
        session.start().await.expect("start");
        assert_eq!(session.len(), 40);
        assert_eq!(session.payload().expect("payload").max_data_points, 25);

        session.toggle_retention().await.expect("toggle");
        assert_eq!(session.settings().policy(), rolling(25));
        assert_eq!(session.len(), 25);
    }

    #[tokio::test]
    async fn payloads_use_the_configured_downsampler() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        let mut file = fs::File::create(&path).expect("create");
        for i in 0..1_000 {
            let heap = if i % 2 == 0 { 100.0 } else { 105.0 };
            writeln!(file, "{}", line(1_000 * i, heap)).expect("write");
        }
        drop(file);

        let mut default = Session::new(settings(&path, RetentionPolicy::Accumulate, Tracking::Active));
        default.start().await.expect("start");
        default.set_resolution(50.0).expect("resolution");
        let payload = default.payload().expect("payload");
        assert_eq!(payload.data_points.len(), 50);
        // A spread of 5 is under 10% of 105, segments keep their mean.
        assert!(payload.data_points.points().iter().all(|s| (s.value - 102.5).abs() < 1e-9));

        let mut tuned = Session::new(settings(&path, RetentionPolicy::Accumulate, Tracking::Active))
            .with_downsampler(Downsampler::with_threshold(0.01));
        tuned.start().await.expect("start");
        tuned.set_resolution(50.0).expect("resolution");
        let payload = tuned.payload().expect("payload");
        // Both extremes are equally far from the mean, the min wins the tie.
        assert!(payload.data_points.points().iter().all(|s| s.value == 100.0));
    }

    #[tokio::test]
    async fn resolution_requests_are_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 2_000, 0);
        let mut session = Session::new(settings(&path, RetentionPolicy::Accumulate, Tracking::All));
        session.start().await.expect("start");
        let before = session.settings().resolution;

        assert!(matches!(session.set_resolution(2_000.0), Err(Error::Web(_))));
        assert_eq!(session.settings().resolution, before);

        let accepted = session.set_resolution(500.0).expect("accepted");
        assert_eq!(accepted.get(), 500);
        assert_eq!(session.len(), 2_000);
        let payload = session.payload().expect("payload");
        assert!(payload.data_points.len() <= 500);
        assert!(payload.all_metrics_data.values().all(|s| s.len() <= 500));
    }

    #[tokio::test]
    async fn web_tracking_reads_missing_fields_as_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = Session::new(settings(
            &dir.path().join("heap.log"),
            rolling(10),
            Tracking::All,
        ));
        session.start().await.expect("start");
        assert!(session.ingest(r#"{"timestamp":1,"heapUsed":"3.00"}"#));
        assert_eq!(session.snapshot(MetricSelector::Rss).len(), 1);
        assert_eq!(session.snapshot(MetricSelector::Rss)[0].value, 0.0);
        // A non-numeric field is never zeroed.
        assert!(session.ingest(r#"{"timestamp":2,"heapUsed":"n/a"}"#));
        assert_eq!(session.snapshot(MetricSelector::HeapUsed).len(), 1);
    }

    #[tokio::test]
    async fn terminal_frame_carries_title_and_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        write_lines(&path, 3, 0);
        let mut session = Session::new(settings(&path, rolling(100), Tracking::Active));
        session.start().await.expect("start");
        let renderer = Renderer::new(DisplaySpec {
            width: 60,
            height: 8,
            style: GlyphStyle::Lean,
            show_legend: true,
            show_time_axis: true,
        })
        .expect("renderer");
        let frame = session
            .render_terminal(&renderer, Duration::from_millis(250))
            .expect("frame");
        assert!(frame.contains("tgraph - Heap Used (MB)"));
        assert!(frame.contains("Data points: 3 | Mode: Rolling | Refresh: 250ms"));
        assert!(frame.contains("Current: 2.00 | Average: 1.00 | Min: 0.00 | Max: 2.00"));
    }
}
