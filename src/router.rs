//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is the
//! innermost [`Service`] of the pipeline: it finds the route handler, hands
//! it an owned request and writes whatever it returns.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxFuture, BoxedHandler, Handler, Service};
use crate::request::Request;
use crate::response::Response;
use crate::writer::ResponseWriter;

/// The application router.
///
/// Build it once at startup and pass it to [`chain`](crate::middleware::chain)
/// or straight to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers `handler` for `GET path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for the method.
    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::POST, path, handler)
    }

    fn add(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<BoxedHandler> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        Some(Arc::clone(matched.value))
    }

    /// Methods that have a route for `path`, sorted for a stable `Allow` header.
    fn allowed(&self, path: &str) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        methods.sort_unstable();
        methods
    }

    fn not_routed(&self, path: &str) -> Response {
        let allowed = self.allowed(path);
        if allowed.is_empty() {
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .text("404 page not found\n");
        }
        Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(http::header::ALLOW.as_str(), &allowed.join(", "))
            .text("Method Not Allowed\n")
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Service for Router {
    fn serve<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        Box::pin(async move {
            let route = self.lookup(req.method(), req.path());
            let response = match route {
                Some(handler) => handler.call(req.hand_off()).await,
                None => self.not_routed(req.path()),
            };
            response.write_to(w);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseBuffer;

    async fn item(_req: Request) -> &'static str {
        "item"
    }

    async fn run(router: &Router, method: Method, path: &str) -> http::Response<http_body_util::Full<bytes::Bytes>> {
        let http_req = http::Request::builder().method(method).uri(path).body(()).unwrap();
        let mut req = Request::from_http(http_req, "127.0.0.1:1".parse().unwrap());
        let mut buf = ResponseBuffer::new();
        router.serve(&mut req, &mut buf).await;
        buf.into_response()
    }

    #[tokio::test]
    async fn routes_parameterized_path() {
        let router = Router::new().get("/items/{id}", item);
        let res = run(&router, Method::GET, "/items/42").await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let router = Router::new().get("/items/{id}", item);
        let res = run(&router, Method::GET, "/nope").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let router = Router::new().get("/items/{id}", item).post("/items/{id}", item);
        let res = run(&router, Method::DELETE, "/items/1").await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()["allow"], "GET, POST");
    }
}
