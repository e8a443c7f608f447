//! The terminal driver
//!
//! One task follows the file, reads single-letter commands from its input
//! (each followed by Enter) and redraws the whole screen. With a refresh
//! period the chart is redrawn on every tick. Without one it is redrawn only
//! after the history load, after commands and when new samples arrive.
//!
//! | key | action |
//! |-----|--------|
//! | `r` | reload from the file |
//! | `c` | clear the screen and reload |
//! | `m` | switch between memory and cpu metrics |
//! | `l` | next glyph style |
//! | `a` | switch between rolling and accumulate retention |
//! | `q` | quit |

use std::{
    env,
    io::{self, Write},
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    pin,
    time::{self, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    follow::{DEFAULT_POLL_INTERVAL, Follower},
    render::terminal::{self, Renderer},
    session::{self, Session, Tracking},
    signals::Watcher,
};

const CLEAR: &str = "\x1b[2J\x1b[H";
const DEFAULT_WIDTH: usize = 80;

#[derive(thiserror::Error, Debug)]
/// Errors produced by the terminal driver.
pub enum Error {
    /// The session could not start.
    #[error("Session error: {0}")]
    Session(#[from] session::Error),
    /// The configured layout cannot be drawn.
    #[error("Layout error: {0}")]
    Layout(#[from] terminal::Error),
    /// Reading commands or writing frames failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reload,
    Clear,
    Metric,
    Style,
    Accumulate,
    Quit,
}

impl Command {
    fn parse(input: &str) -> Option<Self> {
        let key = input.trim().chars().next()?.to_ascii_lowercase();
        match key {
            'r' => Some(Command::Reload),
            'c' => Some(Command::Clear),
            'm' => Some(Command::Metric),
            'l' => Some(Command::Style),
            'a' => Some(Command::Accumulate),
            'q' => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Total columns when the configuration names none: `COLUMNS`, else 80.
#[must_use]
pub fn fallback_width() -> usize {
    env::var("COLUMNS")
        .ok()
        .and_then(|columns| columns.trim().parse().ok())
        .unwrap_or(DEFAULT_WIDTH)
}

#[derive(Debug)]
/// Draws the active metric to `W`. See the module documentation.
pub struct Terminal<W> {
    session: Session,
    follower: Follower,
    renderer: Renderer,
    refresh: Option<Duration>,
    output: W,
}

impl<W> Terminal<W>
where
    W: Write,
{
    /// Create a driver for `config` drawing to `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured layout leaves no room to plot.
    pub fn new(config: &Config, output: W) -> Result<Self, Error> {
        let renderer = Renderer::new(config.view.display_spec(fallback_width()))?
            .with_downsampler(config.downsampler());
        Ok(Self {
            session: Session::new(config.settings(Tracking::Active)),
            follower: Follower::new(config.file.clone(), 0),
            renderer,
            refresh: config.refresh(),
            output,
        })
    }

    /// Load the history, then follow the file and serve commands read from
    /// `input` until `q` or the stop signal. Input ending is not a stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read on start, if `input`
    /// fails or if a frame cannot be written.
    pub async fn run<R>(mut self, input: R, mut shutdown: Watcher) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let offset = self.session.start().await?;
        self.follower.seek(offset);
        self.draw()?;

        let mut refresh = self.refresh.map(|period| {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut poll = time::interval(DEFAULT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lines = input.lines();
        let mut input_open = true;

        let shutdown_fut = shutdown.recv();
        pin!(shutdown_fut);
        loop {
            tokio::select! {
                () = &mut shutdown_fut => {
                    info!("Shutdown signal received, stopping terminal viewer.");
                    break;
                }
                () = tick(refresh.as_mut()) => self.draw()?,
                _ = poll.tick() => {
                    if self.follow().await && self.refresh.is_none() {
                        self.draw()?;
                    }
                }
                line = lines.next_line(), if input_open => {
                    let Some(line) = line? else {
                        debug!("input closed, commands disabled");
                        input_open = false;
                        continue;
                    };
                    let Some(command) = Command::parse(&line) else {
                        continue;
                    };
                    if command == Command::Quit {
                        break;
                    }
                    self.command(command).await?;
                }
            }
        }

        self.session.stop();
        Ok(())
    }

    async fn follow(&mut self) -> bool {
        let lines = match self.follower.poll().await {
            Ok(lines) => lines,
            Err(err) => {
                warn!("Failed to follow {path}: {err}", path = self.follower.path().display());
                return false;
            }
        };
        let mut accepted = false;
        for line in &lines {
            accepted |= self.session.ingest(line);
        }
        accepted
    }

    async fn command(&mut self, command: Command) -> Result<(), Error> {
        debug!("command {command:?}");
        let reloaded = match command {
            Command::Reload => self.session.reinitialize().await,
            Command::Clear => {
                self.output.write_all(CLEAR.as_bytes())?;
                self.session.reinitialize().await
            }
            Command::Metric => self.session.toggle_family().await,
            Command::Style => {
                let reloaded = self.session.cycle_style().await;
                self.renderer.set_style(self.session.settings().glyph);
                reloaded
            }
            Command::Accumulate => self.session.toggle_retention().await,
            Command::Quit => return Ok(()),
        };
        match reloaded {
            Ok(offset) => self.follower.seek(offset),
            Err(err) => warn!("Reload failed: {err}"),
        }
        self.draw()
    }

    fn draw(&mut self) -> Result<(), Error> {
        let refresh = self.refresh.unwrap_or(Duration::ZERO);
        let Some(frame) = self.session.render_terminal(&self.renderer, refresh) else {
            return Ok(());
        };
        writeln!(self.output, "{CLEAR}{frame}")?;
        self.output.flush()?;
        Ok(())
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
