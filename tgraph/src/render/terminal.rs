//! Character-grid rendering
//!
//! Produces the full-screen text block the terminal viewer redraws on every
//! tick: a centred title, a value-labelled plot area, a bottom axis, elapsed
//! time labels, the legend and an optional status line. The plot area is
//! `width - 10` columns wide, the remaining columns hold the value gutter.
//! That plot width is also the Downsampler target.

use std::{fmt::Write, path::Path, time::Duration};

use tgraph_sample::Sample;

use crate::{
    buffer::RetentionPolicy,
    downsample::{CompressedSeries, Downsampler},
    render::{fixed::Fixed, glyph::GlyphStyle},
    stats::Stats,
};

/// Columns reserved left of the plot for value labels.
pub const GUTTER: usize = 10;
/// Most time labels drawn under the axis.
const MAX_TIME_LABELS: usize = 5;

/// Statistics shown when there is no data.
const EMPTY_STATS: Stats = Stats {
    current: 0.0,
    average: 0.0,
    min: 0.0,
    max: 100.0,
};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors produced by [`Renderer`].
pub enum Error {
    /// The display is too narrow to hold the gutter and one plot column.
    #[error("display width {0} is too narrow, need at least {min}", min = GUTTER + 1)]
    TooNarrow(usize),
    /// The display must have at least two rows.
    #[error("display height {0} is too short, need at least 2")]
    TooShort(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Layout of the terminal chart.
pub struct DisplaySpec {
    /// Total columns, gutter included.
    pub width: usize,
    /// Plot rows.
    pub height: usize,
    /// Glyph set.
    pub style: GlyphStyle,
    /// Draw the current/average/min/max legend.
    pub show_legend: bool,
    /// Draw elapsed time labels under the axis.
    pub show_time_axis: bool,
}

impl DisplaySpec {
    /// Columns available for plotting.
    #[must_use]
    pub fn plot_width(&self) -> usize {
        self.width.saturating_sub(GUTTER)
    }
}

#[derive(Debug, Clone, Copy)]
/// Renders sample slices into text blocks.
pub struct Renderer {
    spec: DisplaySpec,
    downsampler: Downsampler,
}

impl Renderer {
    /// Create a new [`Renderer`].
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` leaves no plot area.
    pub fn new(spec: DisplaySpec) -> Result<Self, Error> {
        if spec.width <= GUTTER {
            return Err(Error::TooNarrow(spec.width));
        }
        if spec.height < 2 {
            return Err(Error::TooShort(spec.height));
        }
        Ok(Self {
            spec,
            downsampler: Downsampler::default(),
        })
    }

    /// Use `downsampler` in place of the default.
    #[must_use]
    pub fn with_downsampler(mut self, downsampler: Downsampler) -> Self {
        self.downsampler = downsampler;
        self
    }

    /// The layout in use.
    #[must_use]
    pub fn spec(&self) -> &DisplaySpec {
        &self.spec
    }

    /// The downsampler applied to plotted points.
    #[must_use]
    pub fn downsampler(&self) -> Downsampler {
        self.downsampler
    }

    /// Swap the glyph set.
    pub fn set_style(&mut self, style: GlyphStyle) {
        self.spec.style = style;
    }

    /// Render `samples` under `title`, appending a status line if `status`
    /// is given.
    ///
    /// Statistics and time labels come from the uncompressed `samples`, only
    /// the plotted points are downsampled.
    #[must_use]
    pub fn render(&self, title: &str, samples: &[Sample], status: Option<&Status<'_>>) -> String {
        let stats = Stats::of(samples).unwrap_or(EMPTY_STATS);
        let plot_width = self.spec.plot_width();
        let height = self.spec.height;
        let series = self.downsampler.compress(samples, plot_width);
        let grid = plot(series.points(), &stats, plot_width, height, self.spec.style);

        let mut lines: Vec<String> = Vec::with_capacity(height + 7);
        let pad = self.spec.width.saturating_sub(title.chars().count()) / 2;
        lines.push(format!("{}{title}", " ".repeat(pad)));
        lines.push("═".repeat(self.spec.width));

        let spread = stats.max - stats.min;
        for (y, row) in grid.iter().enumerate() {
            let value = stats.max - (y as f64 / (height - 1) as f64) * spread;
            let row: String = row.iter().collect();
            lines.push(format!("{value:>7} │{row}", value = Fixed::new(value, 1)));
        }
        lines.push(format!("{}└{}", " ".repeat(8), "─".repeat(plot_width)));

        if self.spec.show_time_axis {
            if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
                lines.push(format!(
                    "{}{}",
                    " ".repeat(9),
                    time_axis(first.timestamp, last.timestamp, plot_width)
                ));
            }
        }

        if self.spec.show_legend {
            lines.push(String::new());
            lines.push(legend(&stats));
        }

        if let Some(status) = status {
            lines.push(status.line(samples.len(), &series));
        }

        lines.join("\n")
    }
}

/// The legend line: current, average, min and max to two decimals.
#[must_use]
pub fn legend(stats: &Stats) -> String {
    format!(
        "Current: {} | Average: {} | Min: {} | Max: {}",
        Fixed::new(stats.current, 2),
        Fixed::new(stats.average, 2),
        Fixed::new(stats.min, 2),
        Fixed::new(stats.max, 2),
    )
}

fn cell(index: usize, value: f64, len: usize, stats: &Stats, width: usize, height: usize) -> (i64, i64) {
    let x = (index as f64 / len.saturating_sub(1).max(1) as f64 * (width - 1) as f64).floor();
    let scaled = ((value - stats.min) / stats.range() * (height - 1) as f64).floor();
    (x as i64, (height - 1) as i64 - scaled as i64)
}

/// Rasterize `points` into a `height` by `width` grid of glyphs.
fn plot(points: &[Sample], stats: &Stats, width: usize, height: usize, style: GlyphStyle) -> Vec<Vec<char>> {
    let mut grid = Grid {
        cells: vec![vec![' '; width]; height],
        style,
    };

    let mut prev: Option<(i64, i64)> = None;
    for (i, point) in points.iter().enumerate() {
        let (x, y) = cell(i, point.value, points.len(), stats, width, height);
        if grid.contains(x, y) {
            grid.set(x, y, style.point());
            grid.fill_below(x, y, |distance| style.fill(distance));
            if let Some((px, py)) = prev {
                grid.line(px, py, x, y);
            }
            prev = Some((x, y));
        }
    }

    grid.cells
}

struct Grid {
    cells: Vec<Vec<char>>,
    style: GlyphStyle,
}

impl Grid {
    fn contains(&self, x: i64, y: i64) -> bool {
        y >= 0 && (y as usize) < self.cells.len() && x >= 0 && (x as usize) < self.cells[0].len()
    }

    fn set(&mut self, x: i64, y: i64, glyph: char) {
        self.cells[y as usize][x as usize] = glyph;
    }

    fn get(&self, x: i64, y: i64) -> char {
        self.cells[y as usize][x as usize]
    }

    /// Fill blank cells strictly below (x, y) down to the bottom row with the
    /// glyph `fill` picks for their distance from the line.
    fn fill_below(&mut self, x: i64, y: i64, fill: impl Fn(usize) -> Option<char>) {
        let x = x as usize;
        for fill_y in (y as usize + 1)..self.cells.len() {
            if self.cells[fill_y][x] == ' ' {
                match fill(fill_y - y as usize) {
                    Some(glyph) => self.cells[fill_y][x] = glyph,
                    None => return,
                }
            }
        }
    }

    /// Bresenham from (x1, y1) to (x2, y2), inclusive.
    fn line(&mut self, x1: i64, y1: i64, x2: i64, y2: i64) {
        let dx = (x2 - x1).abs();
        let dy = (y2 - y1).abs();
        let sx = if x1 < x2 { 1 } else { -1 };
        let sy = if y1 < y2 { 1 } else { -1 };
        let stroke = self.style.stroke(dx as usize, dy as usize, sx == sy);
        let stroke_fill = self.style.stroke_fill();
        let mut err = dx - dy;
        let (mut x, mut y) = (x1, y1);

        loop {
            if self.contains(x, y) && GlyphStyle::overwritable(self.get(x, y)) {
                self.set(x, y, stroke);
                self.fill_below(x, y, |_| stroke_fill);
            }
            if x == x2 && y == y2 {
                break;
            }
            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// Elapsed time labels for a span from `first` to `last` epoch milliseconds,
/// laid out over `width` columns. All labels but the last are left aligned at
/// their proportional position, the last is right aligned to the edge.
#[must_use]
pub fn time_axis(first: i64, last: i64, width: usize) -> String {
    let mut row = vec![' '; width];
    let count = MAX_TIME_LABELS.min(width / 10);
    let duration = (last - first).max(0) as f64;
    let steps = count.saturating_sub(1).max(1) as f64;

    for i in 0..count {
        let fraction = i as f64 / steps;
        let label = elapsed(Duration::from_millis((fraction * duration) as u64));
        let start = if i + 1 == count {
            width.saturating_sub(label.chars().count())
        } else {
            (fraction * width.saturating_sub(1) as f64).floor() as usize
        };
        for (slot, ch) in row.iter_mut().skip(start).zip(label.chars()) {
            *slot = ch;
        }
    }

    row.into_iter().collect()
}

/// Format an elapsed duration as `Ns`, `NmNs` or `NhNm`, dropping a zero
/// trailing unit.
#[must_use]
pub fn elapsed(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        let (mins, secs) = (seconds / 60, seconds % 60);
        if secs > 0 {
            format!("{mins}m{secs}s")
        } else {
            format!("{mins}m")
        }
    } else {
        let (hours, mins) = (seconds / 3600, (seconds % 3600) / 60);
        if mins > 0 {
            format!("{hours}h{mins}m")
        } else {
            format!("{hours}h")
        }
    }
}

#[derive(Debug, Clone, Copy)]
/// What the terminal viewer's status line reports besides the point count.
pub struct Status<'a> {
    /// Retention in effect.
    pub policy: RetentionPolicy,
    /// Redraw cadence.
    pub refresh: Duration,
    /// The file being followed.
    pub file: &'a Path,
}

impl Status<'_> {
    /// The status line and key hints for `points` buffered samples drawn as
    /// `series`. The compression ratio appears only when `series` was
    /// compressed.
    #[must_use]
    pub fn line(&self, points: usize, series: &CompressedSeries<'_>) -> String {
        let mut line = format!("Data points: {points}");
        if !series.is_identity() && !series.is_empty() {
            let ratio = Fixed::new(series.ratio(points), 1);
            let _ = write!(line, " ({ratio}:1 compression)");
        }
        let _ = write!(
            line,
            " | Mode: {mode} | Refresh: {refresh}ms | File: {file}",
            mode = self.policy,
            refresh = self.refresh.as_millis(),
            file = self.file.display(),
        );
        line.push_str("\n\n[R] Reload  [C] Clear  [M] Memory/CPU  [L] Style  [A] Accumulate  [Q] Quit");
        line
    }
}
