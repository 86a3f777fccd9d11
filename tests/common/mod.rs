//! Shared test helpers: a JSON log sink that can be read back, and a way to
//! push one request through a service without a socket.

#![allow(dead_code)]

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use fulfill::{Request, ResponseBuffer, Service};
use http_body_util::{BodyExt, Full};
use serde_json::Value;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const PEER: &str = "192.0.2.10:40000";

/// Log lines written by the test subscriber.
#[derive(Clone, Default)]
pub struct Logs(Arc<Mutex<Vec<u8>>>);

pub struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl<'a> MakeWriter<'a> for Logs {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(Arc::clone(&self.0))
    }
}

impl Logs {
    /// Every record, parsed.
    pub fn records(&self) -> Vec<Value> {
        let raw = self.0.lock().unwrap().clone();
        String::from_utf8(raw).unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Records whose message is `message`.
    pub fn with_message(&self, message: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r["fields"]["message"] == message)
            .collect()
    }

    pub fn access_records(&self) -> Vec<Value> {
        self.with_message("http request")
    }
}

/// Installs a JSON subscriber for the current thread, capturing every level.
pub fn capture_logs() -> (Logs, DefaultGuard) {
    let logs = Logs::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(logs.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

/// Runs `req` through `service` the way the server does, minus the socket.
pub async fn send(service: &dyn Service, req: http::Request<Bytes>) -> (http::StatusCode, http::HeaderMap, Bytes) {
    let peer: SocketAddr = PEER.parse().unwrap();
    let mut req = Request::from_http(req, peer);
    let mut writer = ResponseBuffer::new();
    service.serve(&mut req, &mut writer).await;
    into_parts(writer.into_response()).await
}

async fn into_parts(res: http::Response<Full<Bytes>>) -> (http::StatusCode, http::HeaderMap, Bytes) {
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, body)
}
