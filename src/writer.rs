//! The send-only response interface and its instrumented wrapper.
//!
//! Middleware and the terminal router commit a response through a
//! [`ResponseWriter`]. The writer only goes one way: once a status is written
//! there is no method to ask what it was. Anything that needs to know after
//! the fact (the access logger) wraps the writer in a [`StatusRecorder`]
//! before handing it down the chain.
//!
//! ```text
//! Recover ──► AccessLog ──► RealIp ──► RequestId ──► Router
//!    │            │
//!    │            └─ StatusRecorder(&mut ResponseBuffer)
//!    └─ &mut ResponseBuffer            (owned by the connection task)
//! ```

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

/// Send-only sink for one HTTP response.
///
/// Mirrors the transport convention: the first [`write_header`] wins and
/// later calls are ignored; [`write`] begins the response with `200 OK` if no
/// status has been written yet.
///
/// [`write_header`]: ResponseWriter::write_header
/// [`write`]: ResponseWriter::write
pub trait ResponseWriter: Send {
    /// Response headers. Changes after the status is written have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Begins the response with `status`.
    fn write_header(&mut self, status: StatusCode);

    /// Appends `chunk` to the response body.
    fn write(&mut self, chunk: &[u8]);
}

// ── ResponseBuffer ───────────────────────────────────────────────────────────

/// The transport-side writer: collects one response for hyper to send once
/// the middleware chain returns.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    sent_headers: HeaderMap,
    body: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self { Self::default() }

    /// Builds the hyper response. A handler that wrote nothing yields
    /// `200 OK` with an empty body.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let (status, headers) = match self.status {
            Some(status) => (status, self.sent_headers),
            None => (StatusCode::OK, self.headers),
        };
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        res
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_some() {
            tracing::debug!(%status, "superfluous write_header call ignored");
            return;
        }
        self.status = Some(status);
        // Snapshot: the head is on the wire from this point on.
        self.sent_headers = self.headers.clone();
    }

    fn write(&mut self, chunk: &[u8]) {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(chunk);
    }
}

// ── StatusRecorder ───────────────────────────────────────────────────────────

/// Wraps a [`ResponseWriter`] and remembers the first status written through
/// it.
pub struct StatusRecorder<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: Option<StatusCode>,
}

impl<'a> StatusRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { inner, status: None }
    }

    /// The first status written, or `None` if the response was never begun.
    pub fn status(&self) -> Option<StatusCode> { self.status }
}

impl ResponseWriter for StatusRecorder<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
            self.inner.write_header(status);
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.inner.write(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn recorder_keeps_first_status() {
        let mut buf = ResponseBuffer::new();
        let mut rec = StatusRecorder::new(&mut buf);
        rec.write_header(StatusCode::CREATED);
        rec.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(rec.status(), Some(StatusCode::CREATED));
        assert_eq!(buf.into_response().status(), StatusCode::CREATED);
    }

    #[test]
    fn recorder_is_unset_until_written() {
        let mut buf = ResponseBuffer::new();
        let rec = StatusRecorder::new(&mut buf);
        assert_eq!(rec.status(), None);
    }

    #[test]
    fn write_without_header_begins_with_ok() {
        let mut buf = ResponseBuffer::new();
        let mut rec = StatusRecorder::new(&mut buf);
        rec.write(b"ok");
        rec.write_header(StatusCode::NOT_FOUND);
        assert_eq!(rec.status(), Some(StatusCode::OK));
        let res = buf.into_response();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn untouched_buffer_is_empty_ok() {
        let res = ResponseBuffer::new().into_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().is_empty());
    }

    #[test]
    fn headers_after_status_are_not_sent() {
        let mut buf = ResponseBuffer::new();
        buf.headers_mut().insert("x-before", HeaderValue::from_static("1"));
        buf.write_header(StatusCode::ACCEPTED);
        buf.headers_mut().insert("x-after", HeaderValue::from_static("1"));
        let res = buf.into_response();
        assert!(res.headers().contains_key("x-before"));
        assert!(!res.headers().contains_key("x-after"));
    }
}
