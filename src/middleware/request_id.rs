//! Request id: propagates or generates a unique id per request.

use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use tracing::Instrument;
use uuid::Uuid;

use super::{BoxedMiddleware, Middleware};
use crate::context::RequestContext;
use crate::handler::{BoxFuture, BoxedService, Service};
use crate::request::Request;
use crate::writer::ResponseWriter;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Ensures every request carries an `X-Request-Id` header.
///
/// A non-empty incoming id is used verbatim; otherwise a UUID v4 is
/// generated and set on the request headers. The id is then:
/// - bound into a [`RequestContext`] on the request,
/// - attached to a tracing span the rest of the chain runs inside,
/// - echoed on the response headers for client correlation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestId;

impl Middleware for RequestId {
    fn wrap(self: Box<Self>, next: BoxedService) -> BoxedService {
        Arc::new(RequestIdService { next })
    }
}

impl From<RequestId> for BoxedMiddleware {
    fn from(m: RequestId) -> Self { Box::new(m) }
}

struct RequestIdService {
    next: BoxedService,
}

impl Service for RequestIdService {
    fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        let value = match req.headers().get(&X_REQUEST_ID).filter(|v| !v.is_empty()) {
            Some(value) => value.clone(),
            None => {
                let generated = HeaderValue::try_from(Uuid::new_v4().to_string())
                    .expect("a UUID is a valid header value");
                req.headers_mut().insert(X_REQUEST_ID.clone(), generated.clone());
                generated
            }
        };

        // Ids that are not visible ASCII still correlate, lossily.
        let id = String::from_utf8_lossy(value.as_bytes()).into_owned();
        let context = RequestContext::new(id);
        let span = context.span().clone();
        req.set_context(context);
        w.headers_mut().insert(X_REQUEST_ID.clone(), value);

        Box::pin(self.next.serve(req, w).instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseBuffer;

    struct Capture;

    impl Service for Capture {
        fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
            Box::pin(async move {
                let id = req.request_id().unwrap_or_default().to_owned();
                w.write(id.as_bytes());
            })
        }
    }

    async fn run(incoming: Option<&'static str>) -> (Request, http::Response<http_body_util::Full<bytes::Bytes>>) {
        let mut builder = http::Request::builder();
        if let Some(id) = incoming {
            builder = builder.header("x-request-id", id);
        }
        let mut req = Request::from_http(builder.body(()).unwrap(), "127.0.0.1:1".parse().unwrap());
        let svc = Box::new(RequestId).wrap(Arc::new(Capture));
        let mut buf = ResponseBuffer::new();
        svc.serve(&mut req, &mut buf).await;
        (req, buf.into_response())
    }

    #[tokio::test]
    async fn supplied_id_is_used_verbatim() {
        let (req, res) = run(Some("abc-123")).await;
        assert_eq!(req.request_id(), Some("abc-123"));
        assert_eq!(req.header("x-request-id"), Some("abc-123"));
        assert_eq!(res.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn missing_id_is_generated_and_set_on_request() {
        let (req, res) = run(None).await;
        let id = req.request_id().unwrap().to_owned();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(req.header("x-request-id"), Some(id.as_str()));
        assert_eq!(res.headers()["x-request-id"], id.as_str());
    }

    #[tokio::test]
    async fn empty_id_is_replaced() {
        let (req, _) = run(Some("")).await;
        assert!(!req.request_id().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generated_ids_differ() {
        let (a, _) = run(None).await;
        let (b, _) = run(None).await;
        assert_ne!(a.request_id(), b.request_id());
    }
}
