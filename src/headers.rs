//! Header multimap helpers on top of [`http::HeaderMap`](axum::http::HeaderMap).

use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;

/// Copies `source` into `target`.
///
/// `Set-Cookie` values are appended so that every cookie survives; any
/// other header replaces the value already present in `target`.
pub fn combine(source: &HeaderMap, target: &mut HeaderMap) {
    for name in source.keys() {
        if name == SET_COOKIE {
            for value in source.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        } else {
            target.remove(name);
            for value in source.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        }
    }
}

/// Reads a header as UTF-8, ignoring values that are not.
pub fn get_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
