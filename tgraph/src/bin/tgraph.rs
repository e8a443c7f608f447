use std::{
    io,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process,
};

use clap::{Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::PrometheusBuilder;
use tgraph::{
    buffer::Retention,
    config::{self, Config, Telemetry},
    monitor::{self, Monitor},
    render::{glyph::GlyphStyle, web::ChartStyle},
    signals::{self, Watcher},
    viewer::{self, terminal::Terminal, web::Server},
};
use tgraph_sample::MetricSelector;
use tokio::{
    fs,
    io::{AsyncBufRead, BufReader},
    runtime::Builder,
    signal,
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const MAX_SHUTDOWN_DELAY: Duration = Duration::from_secs(1);
const DEMO_FILE: &str = "demo-heap.log";
const DEMO_WARMUP: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Terminal viewer returned an error: {0}")]
    Terminal(#[from] viewer::terminal::Error),
    #[error("Web viewer returned an error: {0}")]
    Web(#[from] viewer::web::Error),
    #[error("Monitor returned an error: {0}")]
    Monitor(#[from] monitor::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Could not join the spawned task: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chart a log file in the terminal
    View(ViewCommand),
    /// Chart a log file in the browser
    Web(WebCommand),
    /// Append resource samples of a process to a log file
    Monitor(MonitorCommand),
    /// Run a simulated monitor and chart it in the terminal
    Demo(DemoCommand),
    /// Validate configuration and exit
    ConfigCheck(ConfigCheckCommand),
}

// Arguments every subcommand that runs shares
#[derive(Args)]
struct Common {
    /// path on disk to the configuration file, ignored when TGRAPH_CONFIG is set
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// log file to follow or write
    #[clap(long, short)]
    file: Option<PathBuf>,
    /// address to bind a prometheus exporter for internal metrics to
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
}

impl Common {
    fn config(&self) -> Result<Config, Error> {
        let mut config = Config::load(self.config_path.as_deref())?;
        if let Some(file) = &self.file {
            config.file.clone_from(file);
        }
        if let Some(addr) = self.prometheus_addr {
            config.telemetry = Some(Telemetry::Prometheus { addr });
        }
        Ok(config)
    }
}

// Arguments both viewers share
#[derive(Args)]
struct ChartArgs {
    /// metric to chart: heapUsed, heapTotal, heapPercent, rss, external,
    /// cpuPercent, cpuUser, cpuSystem or cpuTotal
    #[clap(long, short)]
    metric: Option<MetricSelector>,
    /// keep every sample instead of a rolling window
    #[clap(long, short)]
    accumulate: bool,
    /// rolling window size, kept for switching back from accumulate
    #[clap(long, short)]
    points: Option<NonZeroUsize>,
}

impl ChartArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(metric) = self.metric {
            config.metric = metric;
        }
        if let Some(points) = self.points {
            config.max_data_points = points;
        }
        if self.accumulate {
            config.retention = Retention::Accumulate;
        }
    }
}

#[derive(Args)]
struct ViewCommand {
    #[command(flatten)]
    common: Common,
    #[command(flatten)]
    chart: ChartArgs,
    /// glyph style: blocks, lean, ascii, dots or braille
    #[clap(long, short)]
    style: Option<GlyphStyle>,
    /// redraw period in milliseconds, 0 to redraw only on change
    #[clap(long, short)]
    refresh: Option<u64>,
}

#[derive(Args)]
struct WebCommand {
    #[command(flatten)]
    common: Common,
    #[command(flatten)]
    chart: ChartArgs,
    /// chart style: line, area or bars
    #[clap(long, short)]
    style: Option<ChartStyle>,
    /// port the dashboard binds to
    #[clap(long)]
    port: Option<u16>,
    /// refresh period in milliseconds reported to the dashboard
    #[clap(long, short)]
    refresh: Option<u64>,
}

#[derive(Args)]
struct MonitorCommand {
    #[command(flatten)]
    common: Common,
    /// sampling period in milliseconds
    #[clap(long, short)]
    interval: Option<u64>,
    /// process to sample, the monitor itself when absent
    #[clap(long)]
    pid: Option<i32>,
    /// record memory only
    #[clap(long)]
    no_cpu: bool,
    /// grow and release memory in the monitor so the chart moves
    #[clap(long)]
    simulate: bool,
    /// burn cpu in short random bursts in the monitor
    #[clap(long)]
    simulate_cpu: bool,
}

#[derive(Args)]
struct DemoCommand {
    #[command(flatten)]
    common: Common,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
}

impl ViewCommand {
    fn config(&self) -> Result<Config, Error> {
        let mut config = self.common.config()?;
        self.chart.apply(&mut config);
        if let Some(style) = self.style {
            config.view.style = style;
        }
        if let Some(refresh) = self.refresh {
            config.refresh_milliseconds = refresh;
        }
        config.validate()?;
        Ok(config)
    }
}

impl WebCommand {
    fn config(&self) -> Result<Config, Error> {
        let mut config = self.common.config()?;
        self.chart.apply(&mut config);
        if let Some(style) = self.style {
            config.web.style = style;
        }
        if let Some(port) = self.port {
            config.web.addr.set_port(port);
        }
        if let Some(refresh) = self.refresh {
            config.refresh_milliseconds = refresh;
        }
        config.validate()?;
        Ok(config)
    }
}

impl MonitorCommand {
    fn config(&self) -> Result<Config, Error> {
        let mut config = self.common.config()?;
        if let Some(interval) = self.interval {
            config.monitor.interval_milliseconds = interval;
        }
        if self.pid.is_some() {
            config.monitor.pid = self.pid;
        }
        if self.no_cpu {
            config.monitor.cpu = false;
        }
        config.monitor.simulate |= self.simulate;
        config.monitor.simulate_cpu |= self.simulate_cpu;
        config.validate()?;
        Ok(config)
    }
}

impl DemoCommand {
    fn config(&self) -> Result<Config, Error> {
        let mut config = self.common.config()?;
        if self.common.file.is_none() {
            config.file = PathBuf::from(DEMO_FILE);
        }
        config.metric = MetricSelector::HeapPercent;
        config.retention = Retention::Accumulate;
        config.refresh_milliseconds = 300;
        config.view.style = GlyphStyle::Blocks;
        config.monitor.interval_milliseconds = 100;
        config.monitor.pid = None;
        config.monitor.simulate = true;
        config.validate()?;
        Ok(config)
    }
}

async fn remove_log(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

/// Start from an empty log, give the simulated monitor a head start, then
/// chart its output until `q` or the stop signal. The log is removed on the
/// way out.
async fn demo<R>(config: Config, terminal: Terminal<io::Stdout>, input: R, mut shutdown: Watcher) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
{
    remove_log(&config.file).await?;
    let (monitor_watcher, monitor_broadcaster) = signals::signal();
    let monitor = tokio::spawn(Monitor::new(&config).run(monitor_watcher));
    info!(
        "Demo monitor writing to {path}, viewer starts in {DEMO_WARMUP:?}",
        path = config.file.display()
    );

    let warmed = tokio::select! {
        () = shutdown.recv() => false,
        () = time::sleep(DEMO_WARMUP) => true,
    };
    let viewed = if warmed {
        terminal.run(input, shutdown).await.map_err(Error::from)
    } else {
        Ok(())
    };

    monitor_broadcaster.signal();
    let monitored = monitor.await?;
    remove_log(&config.file).await?;
    viewed?;
    Ok(monitored?)
}

fn install_telemetry(config: &Config) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus { addr }) = config.telemetry {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Exporting internal metrics at http://{addr}/metrics");
    }
    Ok(())
}

async fn inner_main(command: Commands) -> Result<(), Error> {
    let (watcher, broadcaster) = signals::signal();

    let mut task: JoinHandle<Result<(), Error>> = match command {
        Commands::View(cmd) => {
            let config = cmd.config()?;
            install_telemetry(&config)?;
            let terminal = Terminal::new(&config, io::stdout())?;
            let input = BufReader::new(tokio::io::stdin());
            tokio::spawn(async move { Ok(terminal.run(input, watcher).await?) })
        }
        Commands::Web(cmd) => {
            let config = cmd.config()?;
            install_telemetry(&config)?;
            let server = Server::new(&config, watcher).await?;
            tokio::spawn(async move { Ok(server.run().await?) })
        }
        Commands::Monitor(cmd) => {
            let config = cmd.config()?;
            install_telemetry(&config)?;
            let monitor = Monitor::new(&config);
            tokio::spawn(async move { Ok(monitor.run(watcher).await?) })
        }
        Commands::Demo(cmd) => {
            let config = cmd.config()?;
            install_telemetry(&config)?;
            let terminal = Terminal::new(&config, io::stdout())?;
            let input = BufReader::new(tokio::io::stdin());
            tokio::spawn(demo(config, terminal, input, watcher))
        }
        Commands::ConfigCheck(_) => return Ok(()),
    };

    tokio::select! {
        res = signal::ctrl_c() => {
            res?;
            info!("received ctrl-c");
            broadcaster.signal();
        }
        res = &mut task => return res?,
    }
    task.await?
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let cli = Cli::parse();
    if let Commands::ConfigCheck(cmd) = &cli.command {
        match Config::load(cmd.config_path.as_deref()) {
            Ok(_) => {
                info!("Configuration is valid");
                process::exit(0)
            }
            Err(err) => {
                error!("Configuration is invalid: {err}");
                process::exit(1)
            }
        }
    }

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting tgraph {version}.");

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(cli.command));
    // Reading stdin parks a blocking thread that never returns on its own.
    runtime.shutdown_timeout(MAX_SHUTDOWN_DELAY);
    if let Err(err) = &res {
        error!("{err}");
    }
    res
}

#[cfg(test)]
mod tests {
    use tgraph::{
        buffer::RetentionPolicy,
        session::{Session, Tracking},
    };

    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).expect("arguments").command
    }

    #[tokio::test]
    async fn points_survive_accumulate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        let file = path.to_str().expect("utf8 path");
        let Commands::View(cmd) = parse(&["tgraph", "view", "-f", file, "-p", "50", "-a"]) else {
            panic!("expected view");
        };
        let config = cmd.config().expect("config");
        assert_eq!(config.policy(), RetentionPolicy::Accumulate);

        let mut session = Session::new(config.settings(Tracking::Active));
        session.start().await.expect("start");
        session.toggle_retention().await.expect("toggle");
        assert_eq!(
            session.settings().policy(),
            RetentionPolicy::rolling(NonZeroUsize::new(50).expect("non-zero"))
        );
    }

    #[test]
    fn web_refresh_is_configured() {
        let Commands::Web(cmd) = parse(&["tgraph", "web", "--refresh", "250", "-p", "20"]) else {
            panic!("expected web");
        };
        let config = cmd.config().expect("config");
        assert_eq!(config.refresh_milliseconds, 250);
        assert_eq!(config.max_data_points.get(), 20);
    }

    #[test]
    fn monitor_simulates_on_request() {
        let Commands::Monitor(cmd) = parse(&["tgraph", "monitor", "--simulate", "--simulate-cpu"]) else {
            panic!("expected monitor");
        };
        let config = cmd.config().expect("config");
        assert!(config.monitor.simulate);
        assert!(config.monitor.simulate_cpu);

        let Commands::Monitor(cmd) = parse(&["tgraph", "monitor", "--simulate", "--pid", "1"]) else {
            panic!("expected monitor");
        };
        assert!(matches!(cmd.config(), Err(Error::Config(config::Error::SimulateForeign))));
    }

    #[test]
    fn demo_defaults() {
        let Commands::Demo(cmd) = parse(&["tgraph", "demo"]) else {
            panic!("expected demo");
        };
        let config = cmd.config().expect("config");
        assert_eq!(config.file, PathBuf::from(DEMO_FILE));
        assert_eq!(config.metric, MetricSelector::HeapPercent);
        assert_eq!(config.retention, Retention::Accumulate);
        assert_eq!(config.view.style, GlyphStyle::Blocks);
        assert_eq!(config.refresh_milliseconds, 300);
        assert_eq!(config.monitor.interval_milliseconds, 100);
        assert!(config.monitor.simulate);
    }

    #[tokio::test]
    async fn demo_cleans_up_its_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("demo.log");
        std::fs::write(&path, "stale\n").expect("write");
        let file = path.to_str().expect("utf8 path");
        let Commands::Demo(cmd) = parse(&["tgraph", "demo", "-f", file]) else {
            panic!("expected demo");
        };
        let config = cmd.config().expect("config");
        let terminal = Terminal::new(&config, io::stdout()).expect("terminal");

        let (watcher, broadcaster) = signals::signal();
        broadcaster.signal();
        demo(config, terminal, tokio::io::empty(), watcher).await.expect("demo");
        assert!(!path.exists());
    }
}
