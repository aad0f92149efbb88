//! Per-request state shared by every middleware layer and the route callback.
//!
//! A `Context` is cheap to clone; clones share the same response state, so a
//! status, header, cookie or data value written by a middleware is visible
//! to the handler that runs after it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Extensions, HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cookies::{Cookie, CookieJar};
use crate::error::{ApiError, Result};
use crate::request::Request;
use crate::response::Response;
use crate::route::RouteSchemas;
use crate::validation::{self, SharedSchema, ValidationTarget};

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    request: Arc<Request>,
    path: String,
    params: Value,
    search: Value,
    body_schema: Option<SharedSchema>,
    rejection: Option<ApiError>,
    response: Mutex<ResponseState>,
}

struct ResponseState {
    status: StatusCode,
    status_text: Option<String>,
    headers: HeaderMap,
    cookies: CookieJar,
    data: Extensions,
}

impl Context {
    /// Builds the context for `request` matched against the template `path`.
    pub fn new(request: Arc<Request>, path: impl Into<String>, schemas: &RouteSchemas) -> Self {
        let request_path = request.path().to_string();
        Self::with_path(request, path, &request_path, schemas)
    }

    /// Like [`Context::new`], but params are read from `matched_path`
    /// (the request path with any global prefix removed).
    ///
    /// Path and search params are parsed and validated here; the body is
    /// left for [`Context::body`]. A validation failure does not stop
    /// construction: it is kept and reported by [`Context::ensure_valid`],
    /// so middleware still sees the request.
    pub fn with_path(
        request: Arc<Request>,
        path: impl Into<String>,
        matched_path: &str,
        schemas: &RouteSchemas,
    ) -> Self {
        let path = path.into();
        let mut rejection = None;

        let params = validate_eagerly(
            extract_params(&path, matched_path),
            schemas.params.as_ref(),
            ValidationTarget::Params,
            &mut rejection,
        );
        let search = validate_eagerly(
            parse_search(request.query()),
            schemas.search.as_ref(),
            ValidationTarget::SearchParams,
            &mut rejection,
        );

        Self {
            inner: Arc::new(Inner {
                request,
                path,
                params,
                search,
                body_schema: schemas.body.clone(),
                rejection,
                response: Mutex::new(ResponseState {
                    status: StatusCode::OK,
                    status_text: None,
                    headers: HeaderMap::new(),
                    cookies: CookieJar::new(),
                    data: Extensions::new(),
                }),
            }),
        }
    }

    /// Fails with the params or search validation error found at
    /// construction, if any.
    pub fn ensure_valid(&self) -> Result<()> {
        match &self.inner.rejection {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// The route template this request matched, e.g. `/thing/:id/update`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn params(&self) -> &Value {
        &self.inner.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).and_then(Value::as_str)
    }

    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        deserialize(self.inner.params.clone(), ValidationTarget::Params)
    }

    pub fn search(&self) -> &Value {
        &self.inner.search
    }

    pub fn search_as<T: DeserializeOwned>(&self) -> Result<T> {
        deserialize(self.inner.search.clone(), ValidationTarget::SearchParams)
    }

    /// Parses the request body.
    ///
    /// Only POST, PUT and PATCH carry a body; every other method yields `{}`.
    /// An empty or malformed JSON body also yields `{}` and skips the schema.
    pub async fn body(&self) -> Result<Value> {
        let request = self.request();
        if !request.carries_body() {
            return Ok(empty_object());
        }

        let parsed: Value = match serde_json::from_slice(request.body()) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "Treating unparseable request body as empty");
                return Ok(empty_object());
            }
        };

        match &self.inner.body_schema {
            Some(schema) => validation::parse(parsed, schema.as_ref(), ValidationTarget::Body),
            None => Ok(parsed),
        }
    }

    pub async fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body().await?;
        deserialize(body, ValidationTarget::Body)
    }

    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.state().status = status;
    }

    pub fn set_status_text(&self, text: impl Into<String>) {
        self.state().status_text = Some(text.into());
    }

    /// Sets a response header, replacing any previous value.
    pub fn set_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::internal(format!("invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::internal(format!("invalid value for header {}", name)))?;
        self.state().headers.insert(name, value);
        Ok(())
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.state()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn set_cookie(&self, cookie: Cookie) {
        self.state().cookies.set(cookie);
    }

    pub fn response_cookie(&self, name: &str) -> Option<String> {
        self.state().cookies.get(name).map(str::to_string)
    }

    /// Stores middleware output for later layers and the handler.
    /// One value per type; inserting again replaces it.
    pub fn insert_data<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.state().data.insert(value);
    }

    pub fn data<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.state().data.get::<T>().cloned()
    }

    /// Assembles the route response from the callback's value and every
    /// status, header and cookie mutation accumulated on this context.
    pub fn respond<T: Serialize + ?Sized>(&self, body: &T) -> Response {
        let state = self.state();
        let mut response = Response::json_with_status(state.status, body);
        if let Some(text) = &state.status_text {
            response.set_status_text(text.clone());
        }
        response.merge(&state.headers, &state.cookies);
        response
    }

    /// Carries accumulated headers and cookies onto a response produced
    /// elsewhere, e.g. by the error translator.
    pub fn merge_into(&self, response: &mut Response) {
        let state = self.state();
        response.merge(&state.headers, &state.cookies);
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        // Poisoning is ignored; a panicked writer leaves plain data behind.
        self.inner
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs `value` through `schema`. Only the first failure is recorded; the
/// unvalidated value is kept when the schema rejects it.
fn validate_eagerly(
    value: Value,
    schema: Option<&SharedSchema>,
    target: ValidationTarget,
    rejection: &mut Option<ApiError>,
) -> Value {
    let Some(schema) = schema else {
        return value;
    };
    if rejection.is_some() {
        return value;
    }
    match validation::parse(value.clone(), schema.as_ref(), target) {
        Ok(parsed) => parsed,
        Err(err) => {
            *rejection = Some(err);
            value
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn deserialize<T: DeserializeOwned>(value: Value, target: ValidationTarget) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ApiError::validation(target, e.to_string()))
}

/// Pairs template segments with request segments by position.
fn extract_params(template: &str, path: &str) -> Value {
    let mut params = Map::new();
    let segments: Vec<&str> = path.split('/').collect();

    for (index, part) in template.split('/').enumerate() {
        let Some(name) = part.strip_prefix(':') else {
            continue;
        };
        if let Some(value) = segments.get(index) {
            params.insert(name.to_string(), Value::String((*value).to_string()));
        }
    }

    Value::Object(params)
}

/// Query string to a flat object of strings; a repeated key keeps its last value.
fn parse_search(query: Option<&str>) -> Value {
    let pairs: BTreeMap<String, String> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}
