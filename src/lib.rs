//! # fulfill
//!
//! A Dialogflow fulfillment webhook and the small HTTP pipeline it runs on.
//!
//! Dialogflow posts an intent classification to `POST /wh/dialogflow`; the
//! service checks the order details in the user's text against known
//! customers and answers with the follow-up event the conversation should
//! take next. `GET /` is a liveness probe.
//!
//! ## The pipeline
//!
//! Every request passes through the same chain, outermost first:
//!
//! ```text
//! Recover → AccessLog → RealIp → RequestId → Router → handler
//! ```
//!
//! - [`middleware::Recover`] turns a handler panic into a logged `500`,
//!   except the [`middleware::abort`] sentinel, which drops the connection.
//! - [`middleware::AccessLog`] writes one structured record per request:
//!   client address, body, status, latency and request id.
//! - [`middleware::RealIp`] trusts `True-Client-IP`, `X-Real-IP` and
//!   `X-Forwarded-For`, in that order.
//! - [`middleware::RequestId`] reads or generates `X-Request-Id` and runs the
//!   rest of the request inside a span carrying it.
//!
//! Responses are committed through a send-only [`ResponseWriter`]; the
//! access logger learns the status by wrapping it in a [`StatusRecorder`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use fulfill::middleware::{chain, AccessLog, BoxedMiddleware, RealIp, Recover, RequestId};
//! use fulfill::{dialogflow, health, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new()
//!         .get("/", health::liveness)
//!         .post(dialogflow::WEBHOOK_PATH, dialogflow::webhook);
//!
//!     let middlewares: [BoxedMiddleware; 4] = [
//!         Recover.into(),
//!         AccessLog::new().filter(health::is_probe).into(),
//!         RealIp.into(),
//!         RequestId.into(),
//!     ];
//!     let app = chain(router, middlewares);
//!
//!     Server::bind(([0, 0, 0, 0], 8080).into()).serve(app).await.unwrap();
//! }
//! ```

mod body;
mod context;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod writer;

pub mod config;
pub mod dialogflow;
pub mod health;
pub mod logging;
pub mod middleware;

pub use body::Body;
pub use config::Config;
pub use context::RequestContext;
pub use error::Error;
pub use handler::{BoxFuture, BoxedService, Handler, Service};
pub use request::Request;
pub use response::{IntoResponse, Json, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use writer::{ResponseBuffer, ResponseWriter, StatusRecorder};

/// The service's routes wrapped in its middleware chain.
pub fn app(config: &Config) -> BoxedService {
    use middleware::{AccessLog, BoxedMiddleware, RealIp, Recover, RequestId, chain};

    let router = Router::new()
        .get("/", health::liveness)
        .post(dialogflow::WEBHOOK_PATH, dialogflow::webhook);

    let middlewares: [BoxedMiddleware; 4] = [
        Recover.into(),
        AccessLog::new()
            .filter(health::is_probe)
            .body_limit(config.log_body_limit)
            .into(),
        RealIp.into(),
        RequestId.into(),
    ];
    chain(router, middlewares)
}
