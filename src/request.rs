//! Inbound request wrapper handed to the [`Router`](crate::router::Router).

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};

use crate::cookies::CookieJar;
use crate::headers;

/// Every method token the router recognizes; anything else is answered
/// with 405 before route matching.
pub const RECOGNIZED_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

/// A fully buffered request: method, URI, headers, parsed cookies and body.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    cookies: CookieJar,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub fn from_parts(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let cookies = CookieJar::from_request_headers(&headers);
        Self {
            method,
            uri,
            headers,
            cookies,
            body,
            remote_addr: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.cookies = CookieJar::from_request_headers(&headers);
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        headers::get_str(&self.headers, name)
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// True when the method token is one of [`RECOGNIZED_METHODS`],
    /// compared case-insensitively.
    pub fn is_allowed_method(&self) -> bool {
        RECOGNIZED_METHODS
            .iter()
            .any(|m| m.as_str().eq_ignore_ascii_case(self.method.as_str()))
    }

    /// CORS preflight: `OPTIONS` carrying `Access-Control-Request-Method`.
    pub fn is_preflight(&self) -> bool {
        self.method.as_str().eq_ignore_ascii_case(Method::OPTIONS.as_str())
            && self.headers.contains_key("access-control-request-method")
    }

    /// Methods whose body the context parses.
    pub fn carries_body(&self) -> bool {
        [Method::POST, Method::PUT, Method::PATCH]
            .iter()
            .any(|m| m.as_str().eq_ignore_ascii_case(self.method.as_str()))
    }
}
