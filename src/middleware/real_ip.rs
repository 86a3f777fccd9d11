//! Client address resolution from proxy headers.

use std::net::IpAddr;
use std::sync::Arc;

use http::HeaderMap;

use super::{BoxedMiddleware, Middleware};
use crate::handler::{BoxFuture, BoxedService, Service};
use crate::request::Request;
use crate::writer::ResponseWriter;

const TRUE_CLIENT_IP: &str = "true-client-ip";
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolves the originating client address from proxy headers.
///
/// Headers are tried in trust order and the first non-empty one is the only
/// candidate: `True-Client-IP`, then `X-Real-IP`, then the left-most hop of
/// `X-Forwarded-For`. The candidate must parse as an IPv4 or IPv6 literal;
/// anything else, non-ASCII bytes included, yields `None` and the later
/// headers are not consulted.
pub fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let (name, value) = [TRUE_CLIENT_IP, X_REAL_IP, X_FORWARDED_FOR]
        .into_iter()
        .find_map(|name| headers.get(name).filter(|v| !v.is_empty()).map(|v| (name, v)))?;

    let value = value.to_str().ok()?;
    let candidate = if name == X_FORWARDED_FOR {
        value.split(',').next().unwrap_or(value)
    } else {
        value
    };
    candidate.parse().ok()
}

/// Overwrites [`Request::client_ip`] with the [`real_ip`] for every later stage.
/// Without a usable header the peer address is kept.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealIp;

impl Middleware for RealIp {
    fn wrap(self: Box<Self>, next: BoxedService) -> BoxedService {
        Arc::new(RealIpService { next })
    }
}

impl From<RealIp> for BoxedMiddleware {
    fn from(m: RealIp) -> Self { Box::new(m) }
}

struct RealIpService {
    next: BoxedService,
}

impl Service for RealIpService {
    fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        match real_ip(req.headers()) {
            Some(ip) => req.set_client_ip(ip),
            None => tracing::trace!(peer = %req.peer_addr(), "no usable proxy address header"),
        }
        self.next.serve(req, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseBuffer;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(http::HeaderName::from_bytes(k.as_bytes()).unwrap(), v.parse().unwrap());
        }
        map
    }

    #[test]
    fn true_client_ip_wins_over_forwarded_for() {
        let h = headers(&[("True-Client-IP", "1.2.3.4"), ("X-Forwarded-For", "9.9.9.9, 8.8.8.8")]);
        assert_eq!(real_ip(&h), Some("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn real_ip_before_forwarded_for() {
        let h = headers(&[("X-Real-IP", "2001:db8::1"), ("X-Forwarded-For", "9.9.9.9")]);
        assert_eq!(real_ip(&h), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn forwarded_for_takes_left_most_hop() {
        let h = headers(&[("X-Forwarded-For", "9.9.9.9, 8.8.8.8")]);
        assert_eq!(real_ip(&h), Some("9.9.9.9".parse().unwrap()));
        let h = headers(&[("X-Forwarded-For", "7.7.7.7")]);
        assert_eq!(real_ip(&h), Some("7.7.7.7".parse().unwrap()));
    }

    #[test]
    fn invalid_candidate_is_rejected_not_skipped() {
        let h = headers(&[("X-Forwarded-For", "not-an-ip, 8.8.8.8")]);
        assert_eq!(real_ip(&h), None);
        let h = headers(&[("True-Client-IP", "garbage"), ("X-Real-IP", "5.5.5.5")]);
        assert_eq!(real_ip(&h), None);
    }

    #[test]
    fn non_ascii_candidate_is_rejected_not_skipped() {
        let mut h = headers(&[("X-Real-IP", "5.5.5.5")]);
        h.insert(TRUE_CLIENT_IP, http::HeaderValue::from_bytes(b"\xff\xfe1.2.3.4").unwrap());
        assert_eq!(real_ip(&h), None);
    }

    #[test]
    fn empty_header_falls_through() {
        let h = headers(&[("True-Client-IP", ""), ("X-Real-IP", "5.5.5.5")]);
        assert_eq!(real_ip(&h), Some("5.5.5.5".parse().unwrap()));
        assert_eq!(real_ip(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn invalid_header_keeps_peer_address() {
        struct Noop;
        impl Service for Noop {
            fn serve<'a>(&'a self, _: &'a mut Request, _: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
                Box::pin(async {})
            }
        }

        let svc = Box::new(RealIp).wrap(Arc::new(Noop));
        let http_req = http::Request::builder()
            .header("x-forwarded-for", "not-an-ip, 8.8.8.8")
            .body(())
            .unwrap();
        let mut req = Request::from_http(http_req, "10.1.1.1:4000".parse().unwrap());
        svc.serve(&mut req, &mut ResponseBuffer::new()).await;
        assert_eq!(req.client_ip(), "10.1.1.1".parse::<IpAddr>().unwrap());

        let http_req = http::Request::builder().header("x-real-ip", "3.3.3.3").body(()).unwrap();
        let mut req = Request::from_http(http_req, "10.1.1.1:4000".parse().unwrap());
        svc.serve(&mut req, &mut ResponseBuffer::new()).await;
        assert_eq!(req.client_ip(), "3.3.3.3".parse::<IpAddr>().unwrap());
    }
}
