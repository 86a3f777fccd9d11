//! Per-request logging context.
//!
//! Created once by the [`RequestId`](crate::middleware::RequestId) stage and
//! carried on the [`Request`](crate::Request) for the rest of the chain.
//! Every event emitted while the downstream future runs is recorded inside
//! [`RequestContext::span`], so it carries the `request_id` field. Code that
//! logs *outside* that future (the access logger, panic recovery) reads the id
//! from the context explicitly.

use tracing::Span;

/// Request id plus the tracing span bound to it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    request_id: String,
    span: Span,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!("request", request_id = %request_id);
        Self { request_id, span }
    }

    pub fn request_id(&self) -> &str { &self.request_id }

    /// The span every downstream event must be emitted under.
    pub fn span(&self) -> &Span { &self.span }
}
