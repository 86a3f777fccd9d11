//! Incoming HTTP request type.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use serde::de::DeserializeOwned;

use crate::body::Body;
use crate::context::RequestContext;
use crate::error::Error;

/// An incoming HTTP request.
///
/// Middleware receives it as `&mut Request`, so what an inner stage records
/// (the resolved client IP, the request id) is still there when an outer
/// stage looks after `next` returns. Route handlers receive an owned copy.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) real_ip: Option<IpAddr>,
    pub(crate) context: Option<RequestContext>,
}

impl Request {
    /// Wraps an `http::Request` received from `peer_addr`.
    pub fn from_http<B: Into<Body>>(req: http::Request<B>, peer_addr: SocketAddr) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body: body.into(),
            peer_addr,
            real_ip: None,
            context: None,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    /// Header value as a string. Missing and non-visible-ASCII values are `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The transport-level peer address.
    pub fn peer_addr(&self) -> SocketAddr { self.peer_addr }

    /// The originating client address: the peer IP unless a trusted proxy
    /// header said otherwise.
    pub fn client_ip(&self) -> IpAddr { self.real_ip.unwrap_or(self.peer_addr.ip()) }

    pub fn set_client_ip(&mut self, ip: IpAddr) { self.real_ip = Some(ip); }

    /// The client as the access log reports it: the proxy-supplied IP when
    /// one was resolved, otherwise the peer address unchanged (`ip:port`).
    pub fn remote_addr(&self) -> String {
        match self.real_ip {
            Some(ip) => ip.to_string(),
            None => self.peer_addr.to_string(),
        }
    }

    /// `Host` header, falling back to the URI authority (HTTP/2).
    pub fn host(&self) -> &str {
        self.header(http::header::HOST.as_str())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
            .unwrap_or_default()
    }

    pub fn user_agent(&self) -> &str {
        self.header(http::header::USER_AGENT.as_str()).unwrap_or_default()
    }

    /// The per-request logging context, once the request-id stage has run.
    pub fn context(&self) -> Option<&RequestContext> { self.context.as_ref() }

    pub(crate) fn set_context(&mut self, context: RequestContext) {
        self.context = Some(context);
    }

    /// The request id, once the request-id stage has run.
    pub fn request_id(&self) -> Option<&str> {
        self.context.as_ref().map(RequestContext::request_id)
    }

    pub fn body_mut(&mut self) -> &mut Body { &mut self.body }

    /// Reads the whole body.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        self.body.into_bytes().await
    }

    /// Reads the whole body and decodes it as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let bytes = self.body.into_bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Produces the owned request a route handler receives. The body moves
    /// out; everything else is copied so outer middleware can still read it.
    pub(crate) fn hand_off(&mut self) -> Self {
        Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            body: std::mem::take(&mut self.body),
            peer_addr: self.peer_addr,
            real_ip: self.real_ip,
            context: self.context.clone(),
        }
    }
}
