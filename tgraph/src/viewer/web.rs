//! The web dashboard driver
//!
//! The session lives in an actor task together with the follower. HTTP
//! handlers never touch it directly: they send a [`Command`] and await the
//! reply. After every polled batch that produced samples, and after every
//! resolution change or reload, the actor serializes a fresh payload and
//! publishes it to all event-stream subscribers.
//!
//! Routes:
//!
//! * `GET /` the dashboard page
//! * `GET /data` the current payload
//! * `GET /config` the viewer settings
//! * `GET /sse` an event stream, the current payload then every update
//! * `POST /resolution` body `{"resolution": N}`, N in 50..=1000
//! * `POST /reload` re-derive every series from the file
//!
//! ## Metrics
//!
//! `requests_received`: Total requests received
//! `subscribers`: Open event streams
//! `updates_published`: Payloads published to event streams
//!

use std::{convert::Infallible, fmt, net::SocketAddr, path::Path};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{StreamExt, stream};
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, StreamBody};
use hyper::{body::Frame, body::Incoming, service::service_fn};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tgraph_sample::MetricSelector;
use tokio::{
    net::TcpListener,
    pin,
    sync::{broadcast, mpsc, oneshot},
    task::{JoinError, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    buffer::Retention,
    config::Config,
    follow::{DEFAULT_POLL_INTERVAL, Follower},
    httpd::{self, Body},
    render::web::{ChartStyle, Resolution},
    session::{self, Session, Tracking},
    signals::Watcher,
};

const DASHBOARD: &str = include_str!("../../assets/index.html");
const COMMAND_QUEUE: usize = 64;
const UPDATE_QUEUE: usize = 16;

#[derive(thiserror::Error, Debug)]
/// Errors produced by the web driver.
pub enum Error {
    /// The session could not start.
    #[error("Session error: {0}")]
    Session(#[from] session::Error),
    /// The HTTP server failed.
    #[error("HTTP server error: {0}")]
    Httpd(#[from] httpd::Error),
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The session task panicked.
    #[error("Session task failed: {0}")]
    Join(#[from] JoinError),
    /// The session task is gone, no command can be served.
    #[error("Session task has stopped")]
    SessionGone,
}

enum Command {
    Data(oneshot::Sender<Bytes>),
    Config(oneshot::Sender<Bytes>),
    Resolution {
        requested: f64,
        reply: oneshot::Sender<Result<Resolution, session::Error>>,
    },
    Reload(oneshot::Sender<Result<(), session::Error>>),
    Subscribe(oneshot::Sender<(Bytes, broadcast::Receiver<Bytes>)>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Data(_) => "Data",
            Command::Config(_) => "Config",
            Command::Resolution { .. } => "Resolution",
            Command::Reload(_) => "Reload",
            Command::Subscribe(_) => "Subscribe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewerConfig<'a> {
    metric: MetricSelector,
    metric_label: &'static str,
    accumulate: bool,
    max_data_points: usize,
    refresh_rate: u64,
    style: ChartStyle,
    log_file: &'a Path,
    resolution: Resolution,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolutionRequest {
    resolution: f64,
}

struct Actor {
    session: Session,
    follower: Follower,
    updates: broadcast::Sender<Bytes>,
    refresh_milliseconds: u64,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut shutdown: Watcher) {
        let mut poll = time::interval(DEFAULT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown_fut = shutdown.recv();
        pin!(shutdown_fut);
        loop {
            tokio::select! {
                () = &mut shutdown_fut => {
                    debug!("web session received shutdown");
                    break;
                }
                _ = poll.tick() => self.follow().await,
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
            }
        }
        self.session.stop();
    }

    async fn follow(&mut self) {
        let lines = match self.follower.poll().await {
            Ok(lines) => lines,
            Err(err) => {
                warn!("Failed to follow {path}: {err}", path = self.follower.path().display());
                return;
            }
        };
        let mut accepted = false;
        for line in &lines {
            accepted |= self.session.ingest(line);
        }
        if accepted {
            self.publish();
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Data(reply) => {
                let _ = reply.send(self.encode());
            }
            Command::Config(reply) => {
                let _ = reply.send(self.config());
            }
            Command::Resolution { requested, reply } => {
                let result = self.session.set_resolution(requested);
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Command::Reload(reply) => {
                let result = self.session.reinitialize().await.map(|offset| {
                    self.follower.seek(offset);
                });
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Command::Subscribe(reply) => {
                let receiver = self.updates.subscribe();
                let _ = reply.send((self.encode(), receiver));
                gauge!("subscribers").set(self.updates.receiver_count() as f64);
            }
        }
    }

    fn publish(&self) {
        if self.updates.receiver_count() == 0 {
            return;
        }
        // Err only when every subscriber left since the check above.
        let _ = self.updates.send(self.encode());
        counter!("updates_published").increment(1);
        gauge!("subscribers").set(self.updates.receiver_count() as f64);
    }

    fn encode(&self) -> Bytes {
        let Some(payload) = self.session.payload() else {
            return Bytes::from_static(b"{}");
        };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                error!("Failed to serialize payload: {err}");
                Bytes::from_static(b"{}")
            }
        }
    }

    fn config(&self) -> Bytes {
        let settings = self.session.settings();
        let config = ViewerConfig {
            metric: settings.metric,
            metric_label: settings.metric.label(),
            accumulate: settings.retention == Retention::Accumulate,
            max_data_points: settings.window.get(),
            refresh_rate: self.refresh_milliseconds,
            style: settings.chart,
            log_file: &settings.path,
            resolution: settings.resolution,
        };
        match serde_json::to_vec(&config) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                error!("Failed to serialize config: {err}");
                Bytes::from_static(b"{}")
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Handle {
    commands: mpsc::Sender<Command>,
}

impl Handle {
    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SessionGone)?;
        response.await.map_err(|_| Error::SessionGone)
    }
}

#[derive(Debug)]
/// The web dashboard server. Construct with [`Server::new`], then [`Server::run`].
pub struct Server {
    listener: TcpListener,
    handle: Handle,
    actor: JoinHandle<()>,
    concurrent_requests_max: usize,
    shutdown: Watcher,
}

impl Server {
    /// Load the file's history, start the session task and bind the
    /// dashboard address.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read or the address cannot
    /// be bound.
    pub async fn new(config: &Config, shutdown: Watcher) -> Result<Self, Error> {
        let mut session =
            Session::new(config.settings(Tracking::All)).with_downsampler(config.downsampler());
        let offset = session.start().await?;
        let listener = httpd::bind(config.web.addr).await?;
        info!(
            "Web interface available at: http://{addr}",
            addr = listener.local_addr()?
        );

        let (commands, inbox) = mpsc::channel(COMMAND_QUEUE);
        let (updates, _) = broadcast::channel(UPDATE_QUEUE);
        let actor = Actor {
            session,
            follower: Follower::new(config.file.clone(), offset),
            updates,
            refresh_milliseconds: config.refresh_milliseconds,
        };
        let actor = tokio::spawn(actor.run(inbox, shutdown.clone()));

        Ok(Self {
            listener,
            handle: Handle { commands },
            actor,
            concurrent_requests_max: config.web.concurrent_requests_max,
            shutdown,
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket's address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve the dashboard until the stop signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the server or the session task fails.
    pub async fn run(self) -> Result<(), Error> {
        let handle = self.handle;
        httpd::serve(
            self.listener,
            self.concurrent_requests_max,
            self.shutdown,
            move || {
                let handle = handle.clone();
                service_fn(move |request| route(handle.clone(), request))
            },
        )
        .await?;
        self.actor.await?;
        info!("Web viewer stopped");
        Ok(())
    }
}

async fn route(handle: Handle, request: Request<Incoming>) -> Result<Response<Body>, hyper::Error> {
    counter!("requests_received").increment(1);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    debug!("{method} {path}");

    let response = match (method, path.as_str()) {
        (Method::GET, "/") => httpd::respond(StatusCode::OK, "text/html; charset=utf-8", DASHBOARD),
        (Method::GET, "/data") => match handle.ask(Command::Data).await {
            Ok(payload) => httpd::json(StatusCode::OK, payload),
            Err(err) => unavailable(&err),
        },
        (Method::GET, "/config") => match handle.ask(Command::Config).await {
            Ok(config) => httpd::json(StatusCode::OK, config),
            Err(err) => unavailable(&err),
        },
        (Method::GET, "/sse") => match handle.ask(Command::Subscribe).await {
            Ok((initial, updates)) => event_stream(initial, updates),
            Err(err) => unavailable(&err),
        },
        (Method::POST, "/resolution") => {
            let body = request.into_body().collect().await?.to_bytes();
            set_resolution(&handle, &body).await
        }
        (Method::POST, "/reload") => match handle.ask(Command::Reload).await {
            Ok(Ok(())) => httpd::json(StatusCode::OK, r#"{"reloaded":true}"#),
            Ok(Err(err)) => httpd::json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
            Err(err) => unavailable(&err),
        },
        _ => httpd::respond(StatusCode::NOT_FOUND, "text/plain", "Not found"),
    };
    Ok(response)
}

async fn set_resolution(handle: &Handle, body: &[u8]) -> Response<Body> {
    let requested = match serde_json::from_slice::<ResolutionRequest>(body) {
        Ok(request) => request.resolution,
        Err(err) => {
            return httpd::json_error(StatusCode::BAD_REQUEST, &format!("Invalid resolution request: {err}"));
        }
    };
    let result = handle
        .ask(|reply| Command::Resolution { requested, reply })
        .await;
    match result {
        Ok(Ok(resolution)) => {
            let body = serde_json::json!({ "resolution": resolution.get() }).to_string();
            httpd::json(StatusCode::OK, body)
        }
        Ok(Err(err)) => httpd::json_error(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(err) => unavailable(&err),
    }
}

fn unavailable(err: &Error) -> Response<Body> {
    httpd::json_error(StatusCode::SERVICE_UNAVAILABLE, &err.to_string())
}

fn sse_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 8);
    frame.put_slice(b"data: ");
    frame.put_slice(payload);
    frame.put_slice(b"\n\n");
    frame.freeze()
}

/// The stream ends when the session task drops its sender.
fn event_stream(initial: Bytes, updates: broadcast::Receiver<Bytes>) -> Response<Body> {
    let later = stream::unfold(updates, |mut updates| async move {
        loop {
            match updates.recv().await {
                Ok(payload) => return Some((payload, updates)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("event stream lagged, skipped {skipped} updates");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    let frames = stream::once(async move { initial })
        .chain(later)
        .map(|payload| Ok::<_, Infallible>(Frame::data(sse_frame(&payload))));

    let body = StreamBody::new(frames)
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write, path::Path, time::Duration};

    use serde_json::Value;

    use super::*;
    use crate::signals;

    fn append(path: &Path, from: i64, count: i64) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open");
        for i in from..from + count {
            writeln!(
                file,
                r#"{{"timestamp":{ts},"heapUsed":"{i}.00","rss":"{rss}.50"}}"#,
                ts = 1_000 * i,
                rss = i * 2
            )
            .expect("write");
        }
    }

    fn config(path: &Path) -> Config {
        let mut config = Config::default();
        config.file = path.to_path_buf();
        config.web.addr = SocketAddr::from(([127, 0, 0, 1], 0));
        config
    }

    async fn next_event(response: &mut reqwest::Response) -> Value {
        let mut buffer = Vec::new();
        loop {
            let chunk = response.chunk().await.expect("chunk").expect("stream open");
            buffer.extend_from_slice(&chunk);
            if buffer.ends_with(b"\n\n") {
                break;
            }
        }
        let text = String::from_utf8(buffer).expect("utf8");
        let json = text
            .trim_end()
            .strip_prefix("data: ")
            .expect("data frame");
        serde_json::from_str(json).expect("json")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dashboard_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heap.log");
        append(&path, 0, 3);

        let (watcher, broadcaster) = signals::signal();
        let server = Server::new(&config(&path), watcher).await.expect("server");
        let base = format!("http://{}", server.local_addr().expect("addr"));
        let running = tokio::spawn(server.run());
        let client = reqwest::Client::new();

        let page = client.get(format!("{base}/")).send().await.expect("page");
        assert_eq!(page.status(), reqwest::StatusCode::OK);
        assert!(page.text().await.expect("html").contains("/sse"));

        let data: Value = client
            .get(format!("{base}/data"))
            .send()
            .await
            .expect("data")
            .json()
            .await
            .expect("json");
        assert_eq!(data["type"], "update");
        assert_eq!(data["metric"], "heapUsed");
        assert_eq!(data["totalPoints"], 3);
        assert_eq!(data["stats"]["max"], 2.0);
        assert_eq!(data["allStats"]["rss"]["max"], 4.5);
        assert_eq!(data["allStats"]["cpuPercent"]["max"], 0.0);

        let config: Value = client
            .get(format!("{base}/config"))
            .send()
            .await
            .expect("config")
            .json()
            .await
            .expect("json");
        assert_eq!(config["resolution"], 300);
        assert_eq!(config["maxDataPoints"], 100);
        assert_eq!(config["accumulate"], false);
        assert_eq!(config["refreshRate"], 100);
        assert_eq!(config["metricLabel"], "Heap Used (MB)");
        assert_eq!(config["style"], "line");

        let rejected = client
            .post(format!("{base}/resolution"))
            .body(r#"{"resolution": 20}"#)
            .send()
            .await
            .expect("resolution");
        assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);
        let error: Value = rejected.json().await.expect("json");
        assert!(error["error"].is_string());

        let malformed = client
            .post(format!("{base}/resolution"))
            .body(r#"{"resolution": "500"}"#)
            .send()
            .await
            .expect("resolution");
        assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);

        let missing = client.get(format!("{base}/nope")).send().await.expect("404");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let mut events = client.get(format!("{base}/sse")).send().await.expect("sse");
        assert_eq!(
            events.headers()[reqwest::header::CONTENT_TYPE],
            "text/event-stream"
        );
        let initial = tokio::time::timeout(Duration::from_secs(5), next_event(&mut events))
            .await
            .expect("initial event");
        assert_eq!(initial["totalPoints"], 3);

        let accepted = client
            .post(format!("{base}/resolution"))
            .body(r#"{"resolution": 500}"#)
            .send()
            .await
            .expect("resolution");
        assert_eq!(accepted.status(), reqwest::StatusCode::OK);
        let update = tokio::time::timeout(Duration::from_secs(5), next_event(&mut events))
            .await
            .expect("resolution event");
        assert_eq!(update["resolution"], 500);

        append(&path, 3, 1);
        let update = tokio::time::timeout(Duration::from_secs(5), next_event(&mut events))
            .await
            .expect("data event");
        assert_eq!(update["totalPoints"], 4);

        let reload = client
            .post(format!("{base}/reload"))
            .send()
            .await
            .expect("reload");
        assert_eq!(reload.status(), reqwest::StatusCode::OK);
        let reloaded = tokio::time::timeout(Duration::from_secs(5), next_event(&mut events))
            .await
            .expect("reload event");
        assert_eq!(reloaded["totalPoints"], 4);

        broadcaster.signal();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("server stopped")
            .expect("joined")
            .expect("clean exit");
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let taken = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let mut config = config(&dir.path().join("heap.log"));
        config.web.addr = taken.local_addr().expect("addr");
        let (watcher, _broadcaster) = signals::signal();
        assert!(matches!(
            Server::new(&config, watcher).await,
            Err(Error::Httpd(httpd::Error::Bind { .. }))
        ));
    }

    #[test]
    fn frames_are_event_stream_data() {
        assert_eq!(&sse_frame(br#"{"a":1}"#)[..], b"data: {\"a\":1}\n\n");
    }
}
