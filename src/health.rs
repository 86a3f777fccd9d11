//! Liveness probe.
//!
//! Registered at `GET /` and skipped by the access logger, so load-balancer
//! and Kubernetes probes do not flood the request log.

use crate::{Request, Response};

/// Liveness probe handler.
///
/// Always returns `200 OK` with body `"ok"`. If the process can respond to
/// HTTP at all, it is alive.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Access-log filter matching the liveness route.
pub fn is_probe(req: &Request) -> bool {
    req.path() == "/"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_is_ok() {
        let req = Request::from_http(http::Request::new(()), "127.0.0.1:1".parse().unwrap());
        assert!(is_probe(&req));
        let res = liveness(req).await;
        assert_eq!(res.status_code(), http::StatusCode::OK);
        assert_eq!(res.body(), b"ok");
    }
}
