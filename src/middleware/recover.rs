//! Panic recovery.
//!
//! [`Recover`] must be the outermost middleware so it sees panics raised by
//! every later stage, the access logger included. A caught panic is logged at
//! `ERROR` with the stack captured where it was raised, and the client gets a
//! bare `500`, unless the response head was already written, in which case
//! the writer's first-write-wins rule keeps what was sent.
//!
//! One panic payload is never recovered: [`AbortHandler`], raised through
//! [`abort`]. It is re-raised unchanged, unwinds out of the connection task
//! and the connection is dropped without a response.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use futures_util::FutureExt;
use http::StatusCode;

use super::{BoxedMiddleware, Middleware};
use crate::handler::{BoxFuture, BoxedService, Service};
use crate::request::Request;
use crate::writer::ResponseWriter;

/// Panic payload meaning "drop the connection without a response".
#[derive(Clone, Copy, Debug)]
pub struct AbortHandler;

impl fmt::Display for AbortHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("abort handler")
    }
}

/// Aborts the current request: the connection is closed and nothing is
/// written, not even by [`Recover`].
pub fn abort() -> ! {
    panic::panic_any(AbortHandler)
}

/// A recovered panic, normalized to something error-shaped.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct PanicError(String);

impl PanicError {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(e) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
            e.to_string()
        } else if let Some(e) = payload.downcast_ref::<crate::Error>() {
            e.to_string()
        } else {
            "panic with a non-string payload".to_owned()
        };
        Self(message)
    }
}

// ── Stack capture ────────────────────────────────────────────────────────────

thread_local! {
    /// Backtrace of the last panic raised on this thread. The unwind is caught
    /// on the same thread, inside the same poll, so this is always ours.
    static LAST_PANIC: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a hook in front of the current one that records a backtrace for
/// every panic except [`AbortHandler`], which is not reported at all.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<AbortHandler>() {
                return;
            }
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

fn take_backtrace() -> Option<Backtrace> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Panic-recovery middleware. See the [module docs](self).
#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl Middleware for Recover {
    fn wrap(self: Box<Self>, next: BoxedService) -> BoxedService {
        install_panic_hook();
        Arc::new(RecoverService { next })
    }
}

impl From<Recover> for BoxedMiddleware {
    fn from(m: Recover) -> Self { Box::new(m) }
}

struct RecoverService {
    next: BoxedService,
}

impl Service for RecoverService {
    fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.next.serve(&mut *req, &mut *w))
                .catch_unwind()
                .await;
            let Err(payload) = outcome else { return };

            if payload.is::<AbortHandler>() {
                panic::resume_unwind(payload);
            }

            let error = PanicError::from_payload(payload.as_ref());
            let stack = take_backtrace()
                .map_or_else(|| "unavailable".to_owned(), |bt| bt.to_string());
            tracing::error!(
                error = %error,
                stack = stack.as_str(),
                request_id = req.request_id().unwrap_or_default(),
                "panic recover"
            );

            w.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseBuffer;

    enum Behaviour { PanicStr, PanicAfterWrite, Abort }

    struct Faulty(Behaviour);

    impl Service for Faulty {
        fn serve<'a>(&'a self, _: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
            Box::pin(async move { fail(&self.0, w) })
        }
    }

    fn fail(behaviour: &Behaviour, w: &mut dyn ResponseWriter) {
        match behaviour {
            Behaviour::PanicStr => panic!("boom"),
            Behaviour::PanicAfterWrite => {
                w.write_header(StatusCode::ACCEPTED);
                panic!("late boom");
            }
            Behaviour::Abort => abort(),
        }
    }

    fn request() -> Request {
        Request::from_http(http::Request::new(()), "127.0.0.1:1".parse().unwrap())
    }

    #[tokio::test]
    async fn panic_becomes_500() {
        let svc = Box::new(Recover).wrap(Arc::new(Faulty(Behaviour::PanicStr)));
        let mut buf = ResponseBuffer::new();
        svc.serve(&mut request(), &mut buf).await;
        assert_eq!(buf.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn written_status_survives_panic() {
        let svc = Box::new(Recover).wrap(Arc::new(Faulty(Behaviour::PanicAfterWrite)));
        let mut buf = ResponseBuffer::new();
        svc.serve(&mut request(), &mut buf).await;
        assert_eq!(buf.into_response().status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn abort_is_re_raised() {
        let svc = Box::new(Recover).wrap(Arc::new(Faulty(Behaviour::Abort)));
        let mut req = request();
        let mut buf = ResponseBuffer::new();
        let outcome = AssertUnwindSafe(svc.serve(&mut req, &mut buf)).catch_unwind().await;
        let payload = outcome.expect_err("abort must propagate");
        assert!(payload.is::<AbortHandler>());
    }

    #[test]
    fn payloads_are_normalized() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(PanicError::from_payload(s.as_ref()).to_string(), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(PanicError::from_payload(s.as_ref()).to_string(), "owned");
        let s: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(PanicError::from_payload(s.as_ref()).to_string(), "panic with a non-string payload");
    }
}
