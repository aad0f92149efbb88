//! Client identity resolution for rate limiting.
//!
//! Every request is counted against exactly one identity, picked from the
//! strongest signal available:
//!
//! | tier          | key                                  |
//! |---------------|--------------------------------------|
//! | authenticated | `u:` + hash(bearer token)            |
//! | cookie        | `c:` + identity cookie value         |
//! | ip            | `i:` + hash(client ip + salt)        |
//! | fingerprint   | `f:` + hash(ua, language, encoding + salt) |
//!
//! Salted hashes rotate with the salt, so raw IPs and fingerprints never
//! become long-lived identifiers.

use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use crate::request::Request;

/// Identity tier, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityTier {
    Authenticated,
    Cookie,
    Ip,
    Fingerprint,
}

impl IdentityTier {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdentityTier::Authenticated => "u:",
            IdentityTier::Cookie => "c:",
            IdentityTier::Ip => "i:",
            IdentityTier::Fingerprint => "f:",
        }
    }
}

/// The identity a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tier: IdentityTier,
    pub key: String,
    /// Set when a fresh identity cookie was issued for this request.
    pub minted_cookie: Option<String>,
}

impl Identity {
    fn new(tier: IdentityTier, value: &str) -> Self {
        Self {
            tier,
            key: format!("{}{}", tier.prefix(), value),
            minted_cookie: None,
        }
    }
}

/// Salt for the anonymized tiers, regenerated lazily once it expires.
#[derive(Debug, Clone)]
pub struct RotatingSalt {
    value: String,
    rotates_at: u64,
    interval_ms: u64,
}

impl RotatingSalt {
    pub fn new(now_ms: u64, interval_ms: u64) -> Self {
        Self {
            value: generate_salt(),
            rotates_at: now_ms.saturating_add(interval_ms),
            interval_ms,
        }
    }

    /// Current salt, rotating first if its lifetime has passed.
    pub fn current(&mut self, now_ms: u64) -> &str {
        if now_ms > self.rotates_at {
            self.value = generate_salt();
            self.rotates_at = now_ms.saturating_add(self.interval_ms);
            tracing::debug!("Rotated rate limit salt");
        }
        &self.value
    }

    pub fn rotates_at(&self) -> u64 {
        self.rotates_at
    }
}

fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Resolves request identities.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    cookies_enabled: bool,
    cookie_name: String,
}

impl KeyGenerator {
    pub fn new(cookies_enabled: bool, cookie_name: impl Into<String>) -> Self {
        Self {
            cookies_enabled,
            cookie_name: cookie_name.into(),
        }
    }

    /// Picks the strongest identity available for `request`.
    ///
    /// With cookies enabled a request always lands in the authenticated or
    /// cookie tier; a client without the cookie gets a newly minted one.
    pub fn resolve(&self, request: &Request, salt: &mut RotatingSalt, now_ms: u64) -> Identity {
        if let Some(token) = bearer_token(request) {
            return Identity::new(IdentityTier::Authenticated, &hash(token));
        }

        if self.cookies_enabled {
            if let Some(existing) = request.cookies().get(&self.cookie_name) {
                return Identity::new(IdentityTier::Cookie, existing);
            }

            let minted = Uuid::new_v4().to_string();
            let mut identity = Identity::new(IdentityTier::Cookie, &minted);
            identity.minted_cookie = Some(minted);
            return identity;
        }

        if let Some(ip) = extract_client_ip(request) {
            let salted = format!("{}{}", ip, salt.current(now_ms));
            return Identity::new(IdentityTier::Ip, &hash(&salted));
        }

        let salted = format!("{}{}", fingerprint_source(request), salt.current(now_ms));
        Identity::new(IdentityTier::Fingerprint, &hash(&salted))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(true, "__rlid")
    }
}

/// Bearer token from `Authorization: Bearer <token>`, if any.
pub fn bearer_token(request: &Request) -> Option<&str> {
    let header = request.header("authorization")?;
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Client IP from proxy headers, falling back to the peer address.
///
/// Checked in order: `cf-connecting-ip`, `x-real-ip`, the first entry of
/// `x-forwarded-for`. A candidate must parse as an IP address.
pub fn extract_client_ip(request: &Request) -> Option<IpAddr> {
    let forwarded = request
        .header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next());

    [request.header("cf-connecting-ip"), request.header("x-real-ip"), forwarded]
        .into_iter()
        .flatten()
        .find_map(|candidate| IpAddr::from_str(candidate.trim()).ok())
        .or_else(|| request.remote_addr().map(|addr| addr.ip()))
}

/// `user-agent|accept-language|accept-encoding`, with placeholders for
/// missing headers.
pub fn fingerprint_source(request: &Request) -> String {
    [
        request.header("user-agent").unwrap_or("no-ua"),
        request.header("accept-language").unwrap_or("no-lang"),
        request.header("accept-encoding").unwrap_or("no-enc"),
    ]
    .join("|")
}

/// First 16 hex characters of the SHA-256 digest.
pub fn hash(data: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(data.as_bytes()));
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Method, Uri};
    use std::net::SocketAddr;

    fn request_with(headers: &[(&'static str, &'static str)]) -> Request {
        let mut map = HeaderMap::new();
        for &(name, value) in headers {
            map.append(name, HeaderValue::from_static(value));
        }
        Request::new(Method::GET, Uri::from_static("/thing")).with_headers(map)
    }

    fn salt() -> RotatingSalt {
        RotatingSalt::new(0, 1_000)
    }

    #[test]
    fn test_hash_is_sixteen_hex_chars() {
        let h = hash("abc");
        assert_eq!(h, "ba7816bf8f01cfea");
        assert_eq!(hash("abc"), h);
    }

    #[test]
    fn test_bearer_token_wins() {
        let generator = KeyGenerator::default();
        let req = request_with(&[("authorization", "Bearer secret"), ("cookie", "__rlid=abc")]);

        let identity = generator.resolve(&req, &mut salt(), 0);
        assert_eq!(identity.tier, IdentityTier::Authenticated);
        assert_eq!(identity.key, format!("u:{}", hash("secret")));
        assert!(identity.minted_cookie.is_none());
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let req = request_with(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert!(bearer_token(&req).is_none());
    }

    #[test]
    fn test_existing_cookie_is_reused() {
        let generator = KeyGenerator::default();
        let req = request_with(&[("cookie", "__rlid=abc")]);

        let identity = generator.resolve(&req, &mut salt(), 0);
        assert_eq!(identity.key, "c:abc");
        assert!(identity.minted_cookie.is_none());
    }

    #[test]
    fn test_cookie_minted_when_missing() {
        let generator = KeyGenerator::default();
        let req = request_with(&[("x-real-ip", "203.0.113.1")]);

        let identity = generator.resolve(&req, &mut salt(), 0);
        let minted = identity.minted_cookie.clone().unwrap();
        assert_eq!(identity.tier, IdentityTier::Cookie);
        assert_eq!(identity.key, format!("c:{}", minted));
        assert!(Uuid::parse_str(&minted).is_ok());
    }

    #[test]
    fn test_ip_tier_without_cookies() {
        let generator = KeyGenerator::new(false, "__rlid");
        let req = request_with(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1")]);
        let mut salt = salt();

        let identity = generator.resolve(&req, &mut salt, 0);
        let expected = hash(&format!("192.168.1.1{}", salt.current(0)));
        assert_eq!(identity.tier, IdentityTier::Ip);
        assert_eq!(identity.key, format!("i:{}", expected));
    }

    #[test]
    fn test_fingerprint_tier_as_last_resort() {
        let generator = KeyGenerator::new(false, "__rlid");
        let req = request_with(&[("user-agent", "curl/8"), ("x-real-ip", "not-an-ip")]);

        let identity = generator.resolve(&req, &mut salt(), 0);
        assert_eq!(identity.tier, IdentityTier::Fingerprint);
        assert_eq!(fingerprint_source(&req), "curl/8|no-lang|no-enc");
    }

    #[test]
    fn test_extract_client_ip_precedence() {
        let req = request_with(&[
            ("x-forwarded-for", "192.168.1.1, 10.0.0.1"),
            ("x-real-ip", "203.0.113.1"),
            ("cf-connecting-ip", "198.51.100.7"),
        ]);
        assert_eq!(extract_client_ip(&req), "198.51.100.7".parse().ok());

        let req = request_with(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1"), ("x-real-ip", "203.0.113.1")]);
        assert_eq!(extract_client_ip(&req), "203.0.113.1".parse().ok());

        let req = request_with(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1")]);
        assert_eq!(extract_client_ip(&req), "192.168.1.1".parse().ok());
    }

    #[test]
    fn test_extract_client_ip_fallback() {
        let req = request_with(&[]);
        assert_eq!(extract_client_ip(&req), None);

        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let req = request_with(&[("x-real-ip", "garbage")]).with_remote_addr(peer);
        assert_eq!(extract_client_ip(&req), Some(peer.ip()));
    }

    #[test]
    fn test_salt_rotates_after_interval() {
        let mut salt = RotatingSalt::new(0, 1_000);
        let first = salt.current(1_000).to_string();
        assert_eq!(salt.current(500), first);

        let second = salt.current(1_001).to_string();
        assert_ne!(first, second);
        assert_eq!(salt.rotates_at(), 2_001);
    }
}
