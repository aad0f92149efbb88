//! CORS headers applied to every response the router produces.

use axum::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, VARY,
};

use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cors {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
}

impl Cors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    pub fn allow_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods.extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_headers.extend(headers.into_iter().map(Into::into));
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }

    /// Adds the CORS headers for `request` to `response`.
    ///
    /// The origin is echoed back only when it is on the allow-list.
    pub fn apply(&self, request: &Request, response: &mut Response) {
        let headers = response.headers_mut();

        if let Some(origin) = request.header("origin") {
            if self.is_allowed_origin(origin) {
                if let Ok(value) = HeaderValue::from_str(origin) {
                    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    headers.append(VARY, HeaderValue::from_static("origin"));
                }
            }
        }

        if !self.allowed_methods.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.allowed_methods.join(", ")) {
                headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
            }
        }

        if !self.allowed_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.allowed_headers.join(", ")) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
        }

        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static(if self.allow_credentials { "true" } else { "false" }),
        );
    }
}
