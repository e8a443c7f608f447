//! The resource monitor
//!
//! Samples one process every interval and appends a JSON line per sample to
//! the log file, in the format every viewer reads. Memory comes from
//! `/proc/{pid}/status`, cpu time from `/proc/{pid}/stat`. Values are
//! written as two-decimal strings:
//!
//! * `heapUsed` anonymous resident memory, MB
//! * `heapTotal` data segment size, MB
//! * `external` file-backed resident memory, MB
//! * `rss` resident set size, MB
//! * `heapPercent` `heapUsed` over `heapTotal`
//! * `cpuPercent` cpu time over wall time since the previous sample, capped at 100
//! * `cpuUser`, `cpuSystem`, `cpuTotal` cpu milliseconds since the previous sample
//!
//! With `simulate` the monitor also grows and releases memory of its own, and
//! with `simulate_cpu` it burns cpu in short bursts, see [`crate::simulate`].
//! Both only make sense when it samples itself.
//!
//! Only Linux is supported.
//!
//! ## Metrics
//!
//! `lines_written`: Sample lines appended to the log file
//!

use std::{
    io,
    path::PathBuf,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::{config::Config, render::fixed::Fixed};
#[cfg(not(target_os = "linux"))]
use crate::signals::Watcher;

const KIB_PER_MIB: f64 = 1024.0;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Monitor`].
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// A sample line could not be encoded.
    #[error("Failed to encode sample: {0}")]
    Json(#[from] serde_json::Error),
    /// A simulation task panicked.
    #[error("Simulation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[cfg(target_os = "linux")]
    /// Wrapper for [`procfs::ProcError`]
    #[error("Unable to read procfs: {0}")]
    Proc(#[from] procfs::ProcError),
    #[cfg(not(target_os = "linux"))]
    /// The monitor reads procfs, which this platform lacks.
    #[error("the resource monitor is only available on Linux")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Memory figures of one process, in KiB.
pub struct Memory {
    /// Anonymous resident memory.
    pub anon_kib: u64,
    /// Data segment size.
    pub data_kib: u64,
    /// File-backed resident memory.
    pub file_kib: u64,
    /// Resident set size.
    pub rss_kib: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Cumulative cpu time of one process.
pub struct CpuTime {
    /// Time in user mode.
    pub user: Duration,
    /// Time in kernel mode.
    pub system: Duration,
}

#[derive(Debug, Clone, Copy)]
/// One observation of a process.
pub struct Reading {
    /// Memory at `at`.
    pub memory: Memory,
    /// Cpu time consumed up to `at`.
    pub cpu: CpuTime,
    /// When the observation was taken.
    pub at: Instant,
}

fn two(value: f64) -> Fixed {
    Fixed::new(value, 2)
}

fn mib(kib: u64) -> Fixed {
    two(kib as f64 / KIB_PER_MIB)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Cpu {
    cpu_percent: Fixed,
    cpu_user: Fixed,
    cpu_system: Fixed,
    cpu_total: Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
/// One log line.
pub struct Line {
    timestamp: i64,
    heap_used: Fixed,
    heap_total: Fixed,
    external: Fixed,
    rss: Fixed,
    heap_percent: Fixed,
    #[serde(flatten)]
    cpu: Option<Cpu>,
}

impl Line {
    /// Build the line for `reading` taken at `timestamp` epoch milliseconds.
    /// Cpu fields are present only when `previous` is given.
    #[must_use]
    pub fn new(timestamp: i64, reading: &Reading, previous: Option<&Reading>) -> Self {
        let memory = reading.memory;
        let heap_percent = if memory.data_kib == 0 {
            0.0
        } else {
            memory.anon_kib as f64 / memory.data_kib as f64 * 100.0
        };
        Self {
            timestamp,
            heap_used: mib(memory.anon_kib),
            heap_total: mib(memory.data_kib),
            external: mib(memory.file_kib),
            rss: mib(memory.rss_kib),
            heap_percent: two(heap_percent),
            cpu: previous.map(|previous| cpu_since(previous, reading)),
        }
    }

    /// Encode as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

fn cpu_since(previous: &Reading, current: &Reading) -> Cpu {
    let user = current.cpu.user.saturating_sub(previous.cpu.user);
    let system = current.cpu.system.saturating_sub(previous.cpu.system);
    let total = user + system;
    let elapsed = current.at.saturating_duration_since(previous.at);
    let percent = if elapsed.is_zero() {
        0.0
    } else {
        (total.as_secs_f64() / elapsed.as_secs_f64() * 100.0).min(100.0)
    };
    Cpu {
        cpu_percent: two(percent),
        cpu_user: two(user.as_secs_f64() * 1_000.0),
        cpu_system: two(system.as_secs_f64() * 1_000.0),
        cpu_total: two(total.as_secs_f64() * 1_000.0),
    }
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone)]
/// Appends resource samples of one process to a log file.
pub struct Monitor {
    path: PathBuf,
    interval: Duration,
    pid: Option<i32>,
    include_cpu: bool,
    simulate_memory: bool,
    simulate_cpu: bool,
}

impl Monitor {
    /// Create a [`Monitor`] from `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.file.clone(),
            interval: Duration::from_millis(config.monitor.interval_milliseconds.max(1)),
            pid: config.monitor.pid,
            include_cpu: config.monitor.cpu,
            simulate_memory: config.monitor.simulate,
            simulate_cpu: config.monitor.simulate_cpu,
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::time::{Duration, Instant};

    use metrics::counter;
    use procfs::process::Process;
    use tokio::{
        fs::OpenOptions,
        io::AsyncWriteExt,
        pin,
        task::JoinSet,
        time::{self, MissedTickBehavior},
    };
    use tracing::{debug, info};

    use super::{CpuTime, Error, Line, Memory, Monitor, Reading, epoch_millis};
    use crate::{signals::Watcher, simulate};

    #[derive(Debug)]
    struct Sampler {
        process: Process,
        ticks_per_second: u64,
    }

    impl Sampler {
        fn new(pid: Option<i32>) -> Result<Self, Error> {
            let process = match pid {
                Some(pid) => Process::new(pid)?,
                None => Process::myself()?,
            };
            Ok(Self {
                process,
                ticks_per_second: procfs::ticks_per_second().max(1),
            })
        }

        fn ticks(&self, ticks: u64) -> Duration {
            Duration::from_micros(ticks.saturating_mul(1_000_000) / self.ticks_per_second)
        }

        fn read(&self) -> Result<Reading, Error> {
            let status = self.process.status()?;
            let stat = self.process.stat()?;
            Ok(Reading {
                memory: Memory {
                    anon_kib: status.rssanon.unwrap_or(0),
                    data_kib: status.vmdata.unwrap_or(0),
                    file_kib: status.rssfile.unwrap_or(0),
                    rss_kib: status.vmrss.unwrap_or(0),
                },
                cpu: CpuTime {
                    user: self.ticks(stat.utime),
                    system: self.ticks(stat.stime),
                },
                at: Instant::now(),
            })
        }
    }

    impl Monitor {
        /// Sample until the stop signal, appending one line per interval.
        ///
        /// # Errors
        ///
        /// Returns an error if the process cannot be read or the log file
        /// cannot be written.
        pub async fn run(self, mut shutdown: Watcher) -> Result<(), Error> {
            let sampler = Sampler::new(self.pid)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            info!(
                "Monitoring pid {pid} every {interval:?} into {path}",
                pid = sampler.process.pid(),
                interval = self.interval,
                path = self.path.display(),
            );

            let mut load = JoinSet::new();
            if self.simulate_memory {
                info!("Simulating memory activity");
                load.spawn(simulate::memory(shutdown.clone()));
            }
            if self.simulate_cpu {
                info!("Simulating cpu activity");
                load.spawn(simulate::cpu(shutdown.clone()));
            }

            let mut previous = sampler.read()?;
            let mut interval = time::interval_at(
                time::Instant::now() + self.interval,
                self.interval,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let shutdown_fut = shutdown.recv();
            pin!(shutdown_fut);
            loop {
                tokio::select! {
                    () = &mut shutdown_fut => {
                        info!("Shutdown signal received, stopping monitor.");
                        break;
                    }
                    _ = interval.tick() => {
                        let reading = sampler.read()?;
                        let baseline = self.include_cpu.then_some(&previous);
                        let line = Line::new(epoch_millis(), &reading, baseline);
                        file.write_all(&line.to_bytes()?).await?;
                        counter!("lines_written").increment(1);
                        debug!(
                            "heap {heap}MB / {total}MB, rss {rss}MB",
                            heap = line.heap_used,
                            total = line.heap_total,
                            rss = line.rss,
                        );
                        previous = reading;
                    }
                }
            }
            file.flush().await?;
            while let Some(joined) = load.join_next().await {
                joined?;
            }
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Monitor {
    /// Always fails: the monitor needs procfs.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::Unsupported`].
    #[allow(clippy::unused_async)]
    pub async fn run(self, _shutdown: Watcher) -> Result<(), Error> {
        Err(Error::Unsupported)
    }
}
