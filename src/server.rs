//! HTTP server and graceful shutdown.
//!
//! Each accepted connection runs in its own tokio task, so a slow body read
//! or a blocking handler only ever stalls its own connection. The request
//! pipeline itself spawns nothing.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. Immediately stops `listener.accept()`; no new connections are made.
//! 2. Tells every open connection to finish: idle keep-alive connections close
//!    at once, busy ones close after their current response.
//! 3. Waits for the connection tasks for up to the shutdown grace period.
//! 4. Aborts whatever is still running and returns from [`Server::serve`].
//!
//! # Timeouts
//!
//! | Setting | Bounds |
//! |---|---|
//! | read timeout | receiving a complete request head |
//! | write timeout | producing the response once the head is in |
//! | idle timeout | a keep-alive connection waiting for its next request |
//!
//! A request that misses its write timeout gets no response; its connection
//! is dropped.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::handler::{BoxedService, Service};
use crate::middleware::AbortHandler;
use crate::request::Request;
use crate::writer::ResponseBuffer;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

enum Bind {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    keep_alive: bool,
    shutdown_grace: Duration,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use fulfill::Server;
    /// let server = Server::bind(([0, 0, 0, 0], 8080).into());
    /// ```
    pub fn bind(addr: SocketAddr) -> Self {
        Self::with_bind(Bind::Addr(addr))
    }

    /// Serves on an already-bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self::with_bind(Bind::Listener(listener))
    }

    fn with_bind(bind: Bind) -> Self {
        Self {
            bind,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            keep_alive: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long a client may take to send a complete request head.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// How long the pipeline may take to produce a response once the request
    /// head has been read. A request that runs over is dropped unanswered.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// How long a connection may sit between requests before it is closed.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Whether HTTP/1.1 connections are reused across requests. On by default.
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// How long in-flight connections may keep running after shutdown starts.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Starts accepting connections and dispatching them through `service`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C).
    pub async fn serve(self, service: BoxedService) -> Result<(), Error> {
        self.serve_with_shutdown(service, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but shuts down when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, service: BoxedService, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = match self.bind {
            Bind::Addr(addr) => TcpListener::bind(addr).await?,
            Bind::Listener(listener) => listener,
        };
        info!(addr = %listener.local_addr()?, "fulfill listening");

        let mut conn_builder = ConnBuilder::new(TokioExecutor::new());
        conn_builder.http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout)
            .keep_alive(self.keep_alive);
        let conn_builder = Arc::new(conn_builder);

        // Every connection task, so shutdown can wait for them.
        let mut tasks = JoinSet::new();
        // Flipped once the signal arrives; each connection then finishes up.
        let (stopping_tx, stopping) = watch::channel(false);
        let write_timeout = self.write_timeout;
        let idle_timeout = self.idle_timeout;

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal immediately stops accepting,
                // even if more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let service = Arc::clone(&service);
                    let conn_builder = Arc::clone(&conn_builder);
                    let io = TokioIo::new(stream);
                    let mut stopping = stopping.clone();

                    tasks.spawn(async move {
                        let activity = Arc::new(Activity::new());

                        // Called once per request on the connection.
                        let svc = service_fn({
                            let activity = Arc::clone(&activity);
                            move |req| {
                                let service = Arc::clone(&service);
                                let in_flight = activity.begin();
                                async move {
                                    let res = tokio::time::timeout(
                                        write_timeout,
                                        dispatch(&*service, req, peer_addr),
                                    ).await;
                                    drop(in_flight);
                                    res.map_err(|_| {
                                        warn!(peer = %peer_addr, "write timeout elapsed, dropping connection");
                                        io::Error::new(io::ErrorKind::TimedOut, "write timeout")
                                    })
                                }
                            }
                        });

                        let conn = conn_builder.serve_connection(io, svc);
                        tokio::pin!(conn);
                        let mut closing = false;

                        loop {
                            tokio::select! {
                                res = conn.as_mut() => {
                                    if let Err(e) = res {
                                        debug!(peer = %peer_addr, "connection error: {e}");
                                    }
                                    break;
                                }
                                _ = stopping.changed(), if !closing => {
                                    closing = true;
                                    conn.as_mut().graceful_shutdown();
                                }
                                () = tokio::time::sleep_until(activity.idle_deadline(idle_timeout)), if !closing => {
                                    if activity.idle_expired(idle_timeout) {
                                        debug!(peer = %peer_addr, "closing idle connection");
                                        closing = true;
                                        conn.as_mut().graceful_shutdown();
                                    }
                                }
                            }
                        }
                    });
                }

                // Reap finished tasks so the set does not grow without bound.
                Some(res) = tasks.join_next(), if !tasks.is_empty() => reap(res),
            }
        }

        drop(listener);
        let _ = stopping_tx.send(true);

        let drain = async {
            while let Some(res) = tasks.join_next().await {
                reap(res);
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(remaining = tasks.len(), "shutdown grace period elapsed, closing remaining connections");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!("fulfill stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the pipeline and collects the response.
///
/// An [`AbortHandler`] panic is not caught here: it unwinds into the
/// connection task, which drops the connection without answering.
async fn dispatch(
    service: &dyn Service,
    req: hyper::Request<Incoming>,
    peer_addr: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let mut req = Request::from_http(req, peer_addr);
    let mut writer = ResponseBuffer::new();
    service.serve(&mut req, &mut writer).await;
    writer.into_response()
}

// ── Connection activity ───────────────────────────────────────────────────────

/// Per-connection bookkeeping for the idle timeout.
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds after `opened` at which the last request finished.
    last_done: AtomicU64,
}

/// Marks one request as running until dropped.
struct InFlight(Arc<Activity>);

impl Activity {
    fn new() -> Self {
        Self { opened: Instant::now(), in_flight: AtomicUsize::new(0), last_done: AtomicU64::new(0) }
    }

    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }

    /// When the connection would become idle for too long. A busy connection
    /// is never idle, so the deadline keeps moving.
    fn idle_deadline(&self, idle: Duration) -> Instant {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return Instant::now() + idle;
        }
        self.opened + Duration::from_millis(self.last_done.load(Ordering::SeqCst)) + idle
    }

    fn idle_expired(&self, idle: Duration) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && Instant::now() >= self.idle_deadline(idle)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let elapsed = self.0.opened.elapsed().as_millis() as u64;
        self.0.last_done.store(elapsed, Ordering::SeqCst);
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reap(res: Result<(), JoinError>) {
    let Err(e) = res else { return };
    if !e.is_panic() {
        return;
    }
    let payload = e.into_panic();
    if payload.is::<AbortHandler>() {
        debug!("connection aborted by handler");
    } else {
        error!("connection task panicked outside the request pipeline");
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
