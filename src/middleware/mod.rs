//! Middleware layer.
//!
//! A middleware wraps the rest of the pipeline and does its work before
//! and/or after delegating to it. Each one here is a [`Service`] holding the
//! next link:
//!
//! | Middleware | Concern |
//! |---|---|
//! | [`Recover`] | catches handler panics, answers `500` |
//! | [`AccessLog`] | one structured record per request |
//! | [`RealIp`] | client address from trusted proxy headers |
//! | [`RequestId`] | `x-request-id` read-or-generate, per-request span |
//!
//! [`chain`] composes them around a terminal handler; the first middleware
//! listed is the outermost:
//!
//! ```rust,no_run
//! use fulfill::middleware::{chain, AccessLog, BoxedMiddleware, RealIp, Recover, RequestId};
//! use fulfill::{Request, Router};
//!
//! let middlewares: [BoxedMiddleware; 4] = [
//!     Recover.into(),
//!     AccessLog::new().filter(|req: &Request| req.path() == "/").into(),
//!     RealIp.into(),
//!     RequestId.into(),
//! ];
//! let app = chain(Router::new(), middlewares);
//! ```

mod access_log;
mod real_ip;
mod recover;
mod request_id;

use std::sync::Arc;

pub use access_log::{AccessLog, DEFAULT_BODY_LIMIT, Severity};
pub use real_ip::{RealIp, real_ip};
pub use recover::{AbortHandler, Recover, abort};
pub use request_id::{RequestId, X_REQUEST_ID};

use crate::handler::{BoxedService, Service};

/// Constructs one pipeline link around `next`.
pub trait Middleware: Send + 'static {
    fn wrap(self: Box<Self>, next: BoxedService) -> BoxedService;
}

/// A boxed [`Middleware`], the element type accepted by [`chain`].
pub type BoxedMiddleware = Box<dyn Middleware>;

/// Wraps `handler` in `middlewares` so the first one listed is outermost.
pub fn chain<S, I>(handler: S, middlewares: I) -> BoxedService
where
    S: Service,
    I: IntoIterator<Item = BoxedMiddleware>,
    I::IntoIter: DoubleEndedIterator,
{
    middlewares
        .into_iter()
        .rev()
        .fold(Arc::new(handler) as BoxedService, |next, middleware| middleware.wrap(next))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::handler::BoxFuture;
    use crate::request::Request;
    use crate::writer::{ResponseBuffer, ResponseWriter};

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    struct Tag { name: &'static str, trace: Trace }

    struct Tagged { name: &'static str, trace: Trace, next: BoxedService }

    impl Middleware for Tag {
        fn wrap(self: Box<Self>, next: BoxedService) -> BoxedService {
            Arc::new(Tagged { name: self.name, trace: self.trace, next })
        }
    }

    impl Service for Tagged {
        fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
            Box::pin(async move {
                self.trace.lock().unwrap().push(self.name);
                self.next.serve(req, w).await;
            })
        }
    }

    struct Terminal(Trace);

    impl Service for Terminal {
        fn serve<'a>(&'a self, _req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
            Box::pin(async move {
                self.0.lock().unwrap().push("terminal");
                w.write(b"done");
            })
        }
    }

    #[tokio::test]
    async fn first_listed_is_outermost() {
        let trace = Trace::default();
        let tag = |name| Box::new(Tag { name, trace: Arc::clone(&trace) }) as BoxedMiddleware;
        let svc = chain(Terminal(Arc::clone(&trace)), [tag("a"), tag("b"), tag("c")]);

        let mut req = Request::from_http(http::Request::new(()), "127.0.0.1:1".parse().unwrap());
        let mut buf = ResponseBuffer::new();
        svc.serve(&mut req, &mut buf).await;

        assert_eq!(*trace.lock().unwrap(), ["a", "b", "c", "terminal"]);
    }

    #[tokio::test]
    async fn empty_chain_is_the_handler() {
        let trace = Trace::default();
        let svc = chain(Terminal(Arc::clone(&trace)), Vec::new());

        let mut req = Request::from_http(http::Request::new(()), "127.0.0.1:1".parse().unwrap());
        let mut buf = ResponseBuffer::new();
        svc.serve(&mut req, &mut buf).await;

        assert_eq!(*trace.lock().unwrap(), ["terminal"]);
    }
}
