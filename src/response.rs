//! Outbound response assembled by the router and serialized by the transport.

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::cookies::CookieJar;
use crate::headers;

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    status_text: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: None,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Plain-text response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status, body.into());
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// JSON response; serialization failures degrade to a bare 500.
    pub fn json_with_status<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                let mut response = Self::new(status, bytes);
                response
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to serialize response body");
                Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::json_with_status(StatusCode::OK, value)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn set_status_text(&mut self, text: impl Into<String>) {
        self.status_text = Some(text.into());
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        headers::get_str(&self.headers, name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Merges headers accumulated elsewhere (the request context) into this
    /// response, then appends one `Set-Cookie` per queued cookie.
    pub fn merge(&mut self, extra_headers: &HeaderMap, cookies: &CookieJar) {
        headers::combine(extra_headers, &mut self.headers);
        cookies.write_set_cookie_headers(&mut self.headers);
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;

        if let Some(text) = self.status_text {
            match hyper::ext::ReasonPhrase::try_from(text) {
                Ok(reason) => {
                    response.extensions_mut().insert(reason);
                }
                Err(_) => tracing::debug!("Ignoring status text that is not a valid reason phrase"),
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::Cookie;
    use serde_json::json;

    #[test]
    fn test_json_response_sets_content_type() {
        let response = Response::json(&json!({ "content": "buy milk" }));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body().as_ref(), br#"{"content":"buy milk"}"#);
    }

    #[test]
    fn test_text_response() {
        let response = Response::text(StatusCode::NOT_FOUND, "GET on /x does not exist.");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_merge_keeps_every_cookie() {
        let mut extra = HeaderMap::new();
        extra.insert("x-rl", HeaderValue::from_static("limit=60, remaining=59, reset=1"));

        let mut jar = CookieJar::new();
        jar.set(Cookie::new("a", "1"));
        jar.set(Cookie::new("b", "2"));

        let mut response = Response::json(&json!({}));
        response.merge(&extra, &jar);

        assert_eq!(response.header("x-rl"), Some("limit=60, remaining=59, reset=1"));
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
    }
}
