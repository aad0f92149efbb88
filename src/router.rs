//! Request dispatch.
//!
//! The router owns the route table, the composed middleware chains and the
//! response callbacks. It is immutable once built and safe to share across
//! tasks behind an `Arc`.

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{info, warn};

use crate::context::Context;
use crate::controller::Controller;
use crate::cors::Cors;
use crate::error::{default_error_response, ApiError};
use crate::middleware::{compose, Middleware, SharedMiddleware};
use crate::request::Request;
use crate::response::Response;
use crate::route::{Handler, Route};

pub type ErrorTranslator = Arc<dyn Fn(&ApiError) -> Response + Send + Sync>;
pub type RequestResponder = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Body of the response to a CORS preflight.
pub const PREFLIGHT_BODY: &str = "Departed";

struct Entry {
    route: Route,
    handler: Handler,
}

pub struct RouterBuilder {
    global_prefix: String,
    controllers: Vec<Controller>,
    floating: Vec<Route>,
    middlewares: Vec<SharedMiddleware>,
    cors: Cors,
    on_error: ErrorTranslator,
    on_not_found: RequestResponder,
    on_method_not_allowed: RequestResponder,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            global_prefix: String::new(),
            controllers: Vec::new(),
            floating: Vec::new(),
            middlewares: Vec::new(),
            cors: Cors::default(),
            on_error: Arc::new(default_error_response),
            on_not_found: Arc::new(default_not_found),
            on_method_not_allowed: Arc::new(default_method_not_allowed),
        }
    }

    /// Prefix stripped from every request path before matching, e.g. `/api`.
    pub fn global_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.global_prefix = normalize_prefix(prefix.as_ref());
        self
    }

    pub fn controller(mut self, controller: Controller) -> Self {
        self.controllers.push(controller);
        self
    }

    /// A route outside any controller. Floating routes skip the middleware
    /// chain.
    pub fn route(mut self, route: Route) -> Self {
        self.floating.push(route);
        self
    }

    /// Installs a middleware around every controller route. The one
    /// installed last runs first.
    pub fn middleware<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.shared_middleware(Arc::new(middleware))
    }

    pub fn shared_middleware(mut self, middleware: SharedMiddleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn cors(mut self, cors: Cors) -> Self {
        self.cors = cors;
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ApiError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Arc::new(f);
        self
    }

    pub fn on_not_found<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.on_not_found = Arc::new(f);
        self
    }

    pub fn on_method_not_allowed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.on_method_not_allowed = Arc::new(f);
        self
    }

    pub fn build(self) -> Router {
        let mut table: Vec<Entry> = Vec::new();

        for route in self.controllers.into_iter().flat_map(Controller::into_routes) {
            let handler = compose(route.endpoint(), &self.middlewares);
            insert(&mut table, route, handler);
        }

        for route in self.floating {
            let handler = route.endpoint();
            insert(&mut table, route, handler);
        }

        info!(
            routes = table.len(),
            middlewares = self.middlewares.len(),
            global_prefix = %self.global_prefix,
            "Router built"
        );

        Router {
            global_prefix: self.global_prefix,
            table,
            cors: self.cors,
            on_error: self.on_error,
            on_not_found: self.on_not_found,
            on_method_not_allowed: self.on_method_not_allowed,
        }
    }
}

/// A second registration of the same method and path replaces the first
/// in place.
fn insert(table: &mut Vec<Entry>, route: Route, handler: Handler) {
    match table.iter_mut().find(|entry| entry.route.id() == route.id()) {
        Some(existing) => {
            warn!(route = %route.id(), "Route registered twice, keeping the last registration");
            *existing = Entry { route, handler };
        }
        None => table.push(Entry { route, handler }),
    }
}

pub struct Router {
    global_prefix: String,
    table: Vec<Entry>,
    cors: Cors,
    on_error: ErrorTranslator,
    on_not_found: RequestResponder,
    on_method_not_allowed: RequestResponder,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn global_prefix(&self) -> &str {
        &self.global_prefix
    }

    /// Registered routes in match order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.table.iter().map(|entry| &entry.route)
    }

    /// Dispatches one request. Never fails: every error becomes a response.
    pub async fn handle(&self, request: Request) -> Response {
        let request = Arc::new(request);
        let mut response = self.dispatch(&request).await;
        self.cors.apply(&request, &mut response);

        info!(
            target: "turnstile::router",
            method = %request.method(),
            uri = %request.uri(),
            status = %response.status(),
            "Request completed"
        );

        response
    }

    async fn dispatch(&self, request: &Arc<Request>) -> Response {
        if request.is_preflight() {
            return Response::text(StatusCode::OK, PREFLIGHT_BODY);
        }

        if !request.is_allowed_method() {
            return (self.on_method_not_allowed)(request.as_ref());
        }

        let Some(path) = strip_prefix(&self.global_prefix, request.path()) else {
            return (self.on_not_found)(request.as_ref());
        };

        let Some(entry) = self
            .table
            .iter()
            .find(|entry| entry.route.accepts(request.method(), path))
        else {
            return (self.on_not_found)(request.as_ref());
        };

        let ctx = Context::with_path(request.clone(), entry.route.path(), path, entry.route.schemas());

        match (entry.handler)(ctx.clone()).await {
            Ok(response) => response,
            Err(err) => {
                let mut response = (self.on_error)(&err);
                ctx.merge_into(&mut response);
                response
            }
        }
    }
}

pub fn default_not_found(request: &Request) -> Response {
    let err = ApiError::RouteNotFound {
        method: request.method().to_string(),
        path: request.uri().to_string(),
    };
    Response::text(err.status(), err.to_string())
}

pub fn default_method_not_allowed(request: &Request) -> Response {
    let err = ApiError::MethodNotAllowed {
        method: request.method().to_string(),
    };
    Response::text(err.status(), err.to_string())
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// `path` relative to `prefix`, or `None` when it lies outside it.
fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use crate::route::{RouteDefinition, RouteSchemas};
    use axum::http::{HeaderMap, HeaderValue, Method, Uri};
    use serde_json::{json, Value};

    fn request(method: Method, uri: &'static str) -> Request {
        Request::new(method, Uri::from_static(uri))
    }

    fn body(response: &Response) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    fn tagged(tag: &'static str) -> impl Fn(Context) -> futures_util::future::Ready<crate::error::Result<Value>> {
        move |_ctx| futures_util::future::ready(Ok(json!({ "route": tag })))
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/api", "/api/thing"), Some("/thing"));
        assert_eq!(strip_prefix("/api", "/api"), Some("/"));
        assert_eq!(strip_prefix("/api", "/apix/thing"), None);
        assert_eq!(strip_prefix("/api", "/thing"), None);
        assert_eq!(strip_prefix("", "/thing"), Some("/thing"));
        assert_eq!(normalize_prefix("api/"), "/api");
        assert_eq!(normalize_prefix("/"), "");
    }

    #[tokio::test]
    async fn test_dispatch_with_global_prefix() {
        let mut controller = Controller::new("/thing");
        controller.route(RouteDefinition::post("/:id/done"), tagged("done"), RouteSchemas::default());
        let router = Router::builder().global_prefix("/api").controller(controller).build();

        let response = router.handle(request(Method::POST, "/api/thing/3/done")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), json!({ "route": "done" }));

        let response = router.handle(request(Method::POST, "/thing/3/done")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_method_is_405() {
        let router = Router::builder().build();
        let method = Method::from_bytes(b"FOO").unwrap();

        let response = router.handle(request(method, "/thing")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.body().as_ref(), b"FOO does not exist.");
    }

    #[tokio::test]
    async fn test_unregistered_path_is_404() {
        let router = Router::builder().build();

        let response = router.handle(request(Method::GET, "/nowhere?x=1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_ref(), b"GET on /nowhere?x=1 does not exist.");
    }

    #[tokio::test]
    async fn test_method_mismatch_is_404() {
        let router = Router::builder()
            .route(Route::new(RouteDefinition::post("/thing"), tagged("post"), RouteSchemas::default()))
            .build();

        let response = router.handle(request(Method::GET, "/thing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let router = Router::builder()
            .route(Route::new("/thing", tagged("first"), RouteSchemas::default()))
            .route(Route::new("/other", tagged("other"), RouteSchemas::default()))
            .route(Route::new("/thing", tagged("second"), RouteSchemas::default()))
            .build();

        assert_eq!(router.routes().count(), 2);
        assert_eq!(router.routes().next().unwrap().path(), "/thing");

        let response = router.handle(request(Method::GET, "/thing")).await;
        assert_eq!(body(&response), json!({ "route": "second" }));
    }

    #[tokio::test]
    async fn test_overlap_resolves_to_first_inserted() {
        let router = Router::builder()
            .route(Route::new("/thing/:id", tagged("param"), RouteSchemas::default()))
            .route(Route::new("/thing/all", tagged("literal"), RouteSchemas::default()))
            .build();

        let response = router.handle(request(Method::GET, "/thing/all")).await;
        assert_eq!(body(&response), json!({ "route": "param" }));
    }

    #[tokio::test]
    async fn test_preflight_is_departed() {
        let cors = Cors::new().allow_origin("https://app.example.com").allow_methods(["GET"]);
        let router = Router::builder().cors(cors).build();

        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("https://app.example.com"));
        headers.insert("access-control-request-method", HeaderValue::from_static("POST"));
        let req = request(Method::OPTIONS, "/anything").with_headers(headers);

        let response = router.handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"Departed");
        assert_eq!(
            response.header("access-control-allow-origin"),
            Some("https://app.example.com")
        );
    }

    #[tokio::test]
    async fn test_floating_routes_skip_middleware() {
        let mut controller = Controller::new("/thing");
        controller.route("/", tagged("list"), RouteSchemas::default());

        let router = Router::builder()
            .controller(controller)
            .route(Route::new("/health", tagged("health"), RouteSchemas::default()))
            .middleware(from_fn(|_ctx: Context| async {
                Err::<Option<()>, ApiError>(ApiError::domain("closed", StatusCode::SERVICE_UNAVAILABLE))
            }))
            .build();

        let response = router.handle(request(Method::GET, "/thing")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body(&response), json!({ "message": "closed" }));

        let response = router.handle(request(Method::GET, "/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_response_keeps_context_headers() {
        let mut controller = Controller::new("/thing");
        controller.route("/", tagged("list"), RouteSchemas::default());

        let router = Router::builder()
            .controller(controller)
            .middleware(from_fn(|ctx: Context| async move {
                ctx.set_header("x-rl", "limit=1, remaining=0, reset=1")?;
                Err::<Option<()>, ApiError>(ApiError::RateLimitExceeded)
            }))
            .build();

        let response = router.handle(request(Method::GET, "/thing")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("x-rl"), Some("limit=1, remaining=0, reset=1"));
    }

    #[tokio::test]
    async fn test_custom_callbacks() {
        let router = Router::builder()
            .on_not_found(|_req| Response::json_with_status(StatusCode::NOT_FOUND, &json!({ "message": "nope" })))
            .on_method_not_allowed(|_req| Response::text(StatusCode::METHOD_NOT_ALLOWED, "no"))
            .build();

        let response = router.handle(request(Method::GET, "/missing")).await;
        assert_eq!(body(&response), json!({ "message": "nope" }));

        let response = router
            .handle(request(Method::from_bytes(b"BREW").unwrap(), "/missing"))
            .await;
        assert_eq!(response.body().as_ref(), b"no");
    }
}
