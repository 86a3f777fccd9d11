//! Structured access logging.
//!
//! One `http request` event per request, emitted after the rest of the chain
//! returns. The event's level follows the response status:
//!
//! | Status | Level |
//! |---|---|
//! | `>= 400` | `ERROR` |
//! | `300..=399` | `WARN` |
//! | `200..=299` | `INFO` |
//! | anything lower, or never written | `DEBUG` |
//!
//! Fields: `remote_ip` (the resolved client IP, or the peer `ip:port`),
//! `host`, `user_agent`, `method`, `path`, `body`, `body_truncated`,
//! `status_code`, `latency` (milliseconds, two decimals), `request_id`.
//! Downstream log consumers key on these names.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::IgnoredAny;

use super::{BoxedMiddleware, Middleware};
use crate::body::Capture;
use crate::handler::{BoxFuture, BoxedService, Service};
use crate::request::Request;
use crate::writer::{ResponseWriter, StatusRecorder};

/// Bodies larger than this are not buffered for the log record.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

type Filter = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Access-log middleware. See the [module docs](self).
#[derive(Clone)]
pub struct AccessLog {
    filter: Option<Filter>,
    body_limit: usize,
}

impl AccessLog {
    pub fn new() -> Self {
        Self { filter: None, body_limit: DEFAULT_BODY_LIMIT }
    }

    /// Requests for which `filter` returns `true` pass through untouched and
    /// are not logged. Typically used for health checks.
    pub fn filter(mut self, filter: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Maximum number of body bytes buffered for the record.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl Default for AccessLog {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLog")
            .field("filter", &self.filter.is_some())
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

impl Middleware for AccessLog {
    fn wrap(self: Box<Self>, next: BoxedService) -> BoxedService {
        Arc::new(AccessLogService { config: *self, next })
    }
}

impl From<AccessLog> for BoxedMiddleware {
    fn from(m: AccessLog) -> Self { Box::new(m) }
}

// ── Severity ─────────────────────────────────────────────────────────────────

/// Log level of an access record, derived from the response status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// `0` stands for "no status was ever written".
    pub fn from_status(status: u16) -> Self {
        match status {
            400.. => Self::Error,
            300.. => Self::Warn,
            200.. => Self::Info,
            _ => Self::Debug,
        }
    }

    pub fn level(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// `tracing` macros take their level as a constant; this picks one at runtime.
macro_rules! event_at {
    ($severity:expr, $($rest:tt)+) => {
        match $severity {
            Severity::Error => tracing::error!($($rest)+),
            Severity::Warn => tracing::warn!($($rest)+),
            Severity::Info => tracing::info!($($rest)+),
            Severity::Debug => tracing::debug!($($rest)+),
        }
    };
}

// ── Service ──────────────────────────────────────────────────────────────────

struct AccessLogService {
    config: AccessLog,
    next: BoxedService,
}

impl Service for AccessLogService {
    fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        if self.config.filter.as_ref().is_some_and(|skip| skip(&*req)) {
            return self.next.serve(req, w);
        }

        Box::pin(async move {
            let start = Instant::now();

            let (body, captured) = std::mem::take(req.body_mut()).capture(self.config.body_limit).await;
            *req.body_mut() = body;

            let mut recorder = StatusRecorder::new(w);
            self.next.serve(req, &mut recorder).await;
            let status = recorder.status().map_or(0, |s| s.as_u16());

            let latency = latency_millis(start.elapsed());
            let (body, body_truncated) = match captured {
                Capture::Complete(bytes) => (format_body(&bytes), false),
                Capture::Truncated => (String::new(), true),
            };
            let request_id = req.request_id()
                .or_else(|| req.header(super::X_REQUEST_ID.as_str()))
                .unwrap_or_default();

            event_at!(
                Severity::from_status(status),
                remote_ip = %req.remote_addr(),
                host = req.host(),
                user_agent = req.user_agent(),
                method = %req.method(),
                path = req.path(),
                body = body.as_str(),
                body_truncated,
                status_code = status,
                latency,
                request_id,
                "http request"
            );
        })
    }
}

/// Milliseconds, truncated to two decimals.
fn latency_millis(elapsed: Duration) -> f64 {
    (elapsed.as_nanos() / 10_000) as f64 / 100.0
}

/// Renders a captured body for the record: a JSON object is logged with the
/// insignificant whitespace removed, anything else as (lossy UTF-8) text.
///
/// Compaction works on the original bytes, so key order, duplicate keys and
/// number literals come through exactly as the client sent them.
fn format_body(bytes: &[u8]) -> String {
    if !is_json_object(bytes) {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match String::from_utf8(compact_json(bytes)) {
        Ok(compact) => compact,
        Err(e) => {
            tracing::error!(error = %e, "error compacting request body json");
            String::new()
        }
    }
}

/// Well-formed JSON whose top-level value is an object.
fn is_json_object(bytes: &[u8]) -> bool {
    let starts_with_brace = bytes.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{');
    starts_with_brace && serde_json::from_slice::<IgnoredAny>(bytes).is_ok()
}

/// Drops whitespace outside string literals. `bytes` must be valid JSON.
fn compact_json(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;
    for &b in bytes {
        if in_string {
            out.push(b);
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    out
}
