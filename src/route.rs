//! Route declarations and the path-pattern compiler.

use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::context::Context;
use crate::error::{ApiError, Result};
use crate::response::Response;
use crate::validation::{self, SharedSchema, ValidationTarget};

/// A request handler after middleware composition.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

type Callback = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Optional schemas for each validated part of a route.
#[derive(Clone, Default)]
pub struct RouteSchemas {
    pub body: Option<SharedSchema>,
    pub search: Option<SharedSchema>,
    pub params: Option<SharedSchema>,
    pub response: Option<SharedSchema>,
}

impl RouteSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, schema: SharedSchema) -> Self {
        self.body = Some(schema);
        self
    }

    pub fn search(mut self, schema: SharedSchema) -> Self {
        self.search = Some(schema);
        self
    }

    pub fn params(mut self, schema: SharedSchema) -> Self {
        self.params = Some(schema);
        self
    }

    pub fn response(mut self, schema: SharedSchema) -> Self {
        self.response = Some(schema);
        self
    }
}

/// Method plus path template. A bare path string means `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDefinition {
    pub method: Method,
    pub path: String,
}

impl RouteDefinition {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

impl From<&str> for RouteDefinition {
    fn from(path: &str) -> Self {
        Self::get(path)
    }
}

impl From<String> for RouteDefinition {
    fn from(path: String) -> Self {
        Self::get(path)
    }
}

impl From<(Method, &str)> for RouteDefinition {
    fn from((method, path): (Method, &str)) -> Self {
        Self::new(method, path)
    }
}

#[derive(Clone)]
pub struct Route {
    id: String,
    method: Method,
    path: String,
    pattern: Regex,
    param_names: Vec<String>,
    schemas: RouteSchemas,
    callback: Callback,
}

impl Route {
    /// Declares a route. The callback's output is serialized to JSON and,
    /// when a response schema is set, validated before it is sent.
    pub fn new<F, Fut, R>(
        definition: impl Into<RouteDefinition>,
        callback: F,
        schemas: RouteSchemas,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let RouteDefinition { method, path } = definition.into();
        let (pattern, param_names) = compile_pattern(&path);

        let callback: Callback = Arc::new(move |ctx: Context| {
            let fut = callback(ctx);
            async move {
                let output = fut.await?;
                serde_json::to_value(output)
                    .map_err(|e| ApiError::internal(format!("failed to serialize route output: {}", e)))
            }
            .boxed()
        });

        Self {
            id: route_id(&method, &path),
            method,
            path,
            pattern,
            param_names,
            schemas,
            callback,
        }
    }

    /// Identity used for duplicate detection: `[METHOD]:[path]`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn schemas(&self) -> &RouteSchemas {
        &self.schemas
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    /// Method comparison is case-insensitive.
    pub fn accepts(&self, method: &Method, path: &str) -> bool {
        self.method.as_str().eq_ignore_ascii_case(method.as_str()) && self.matches_path(path)
    }

    /// The innermost handler: runs the callback and builds the response
    /// from the context's accumulated status, headers and cookies.
    pub fn endpoint(&self) -> Handler {
        let callback = self.callback.clone();
        let response_schema = self.schemas.response.clone();

        Arc::new(move |ctx: Context| run_endpoint(callback.clone(), response_schema.clone(), ctx).boxed())
    }
}

async fn run_endpoint(
    callback: Callback,
    response_schema: Option<SharedSchema>,
    ctx: Context,
) -> Result<Response> {
    ctx.ensure_valid()?;
    let mut output = callback(ctx.clone()).await?;
    if let Some(schema) = &response_schema {
        output = validation::parse(output, schema.as_ref(), ValidationTarget::Response)?;
    }
    Ok(ctx.respond(&output))
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("param_names", &self.param_names)
            .finish()
    }
}

pub fn route_id(method: &Method, path: &str) -> String {
    format!("[{}]:[{}]", method.as_str().to_ascii_uppercase(), path)
}

/// Compiles a path template into an anchored regex.
///
/// `:name` segments capture one non-empty segment; everything else matches
/// literally. The segment count must match exactly.
pub fn compile_pattern(path: &str) -> (Regex, Vec<String>) {
    let mut param_names = Vec::new();

    let body = path
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => {
                param_names.push(name.to_string());
                "([^/]+)".to_string()
            }
            None => regex::escape(segment),
        })
        .collect::<Vec<_>>()
        .join("/");

    let pattern = Regex::new(&format!("^{}$", body)).expect("escaped path template is a valid regex");
    (pattern, param_names)
}

/// Joins path segments into `/a/b/c`, dropping empty pieces and stray slashes.
pub fn join_path(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::validation::JsonSchema;
    use axum::http::{StatusCode, Uri};
    use serde_json::json;

    fn ctx_for(route: &Route, method: Method, uri: &str) -> Context {
        let req = Arc::new(Request::new(method, uri.parse::<Uri>().unwrap()));
        Context::new(req, route.path(), route.schemas())
    }

    #[test]
    fn test_compile_pattern_captures_params() {
        let (pattern, names) = compile_pattern("/thing/:id/assign");
        assert_eq!(names, vec!["id".to_string()]);
        assert!(pattern.is_match("/thing/42/assign"));
        assert!(!pattern.is_match("/thing/42"));
        assert!(!pattern.is_match("/thing/42/assign/extra"));
        assert!(!pattern.is_match("/thing//assign"));
    }

    #[test]
    fn test_literal_segments_are_escaped() {
        let (pattern, _) = compile_pattern("/v1.0/thing");
        assert!(pattern.is_match("/v1.0/thing"));
        assert!(!pattern.is_match("/v1x0/thing"));
    }

    #[test]
    fn test_route_definition_from_str_defaults_to_get() {
        let def: RouteDefinition = "/health".into();
        assert_eq!(def.method, Method::GET);
        assert_eq!(def.path, "/health");
    }

    #[test]
    fn test_accepts_and_extracts_params() {
        let route = Route::new(
            RouteDefinition::post("/thing/:id/:action"),
            |_ctx| async { Ok::<_, ApiError>(json!({})) },
            RouteSchemas::default(),
        );

        assert_eq!(route.id(), "[POST]:[/thing/:id/:action]");
        assert!(route.accepts(&Method::POST, "/thing/7/done"));
        assert!(!route.accepts(&Method::GET, "/thing/7/done"));

        let ctx = ctx_for(&route, Method::POST, "/thing/7/done");
        assert_eq!(ctx.params(), &json!({ "id": "7", "action": "done" }));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["thing", "/"]), "/thing");
        assert_eq!(join_path(&["/thing/", ":id/update"]), "/thing/:id/update");
        assert_eq!(join_path(&["", ""]), "/");
    }

    #[tokio::test]
    async fn test_endpoint_uses_context_status() {
        let route = Route::new(
            RouteDefinition::post("/thing"),
            |ctx: Context| async move {
                ctx.set_status(StatusCode::CREATED);
                Ok::<_, ApiError>(json!({ "id": "1" }))
            },
            RouteSchemas::default(),
        );

        let ctx = ctx_for(&route, Method::POST, "/thing");
        let response = (route.endpoint())(ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body().as_ref(), br#"{"id":"1"}"#);
    }

    #[tokio::test]
    async fn test_response_schema_failure_is_internal() {
        let schema = JsonSchema::shared(&json!({
            "type": "object",
            "required": ["id"]
        }))
        .unwrap();
        let route = Route::new(
            "/thing",
            |_ctx| async { Ok::<_, ApiError>(json!({ "content": "no id" })) },
            RouteSchemas::new().response(schema),
        );

        let ctx = ctx_for(&route, Method::GET, "/thing");
        let err = (route.endpoint())(ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "unprocessable.response");
    }

    #[tokio::test]
    async fn test_endpoint_raises_params_error_before_callback() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let schema = JsonSchema::shared(&json!({
            "type": "object",
            "properties": { "id": { "type": "string", "pattern": "^[0-9]+$" } }
        }))
        .unwrap();
        let route = Route::new(
            "/thing/:id",
            move |_ctx| {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<_, ApiError>(json!({})) }
            },
            RouteSchemas::new().params(schema),
        );

        let ctx = ctx_for(&route, Method::GET, "/thing/abc");
        let err = (route.endpoint())(ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.to_string(), "unprocessable.params");
        assert!(!called.load(Ordering::SeqCst));
    }
}
