use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::key_generator::IdentityTier;

/// Configuration for the fixed-window rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of one counting window.
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub window: Duration,

    /// How long an anonymizing salt lives before it is regenerated.
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub salt_rotation: Duration,

    /// Issue an identity cookie to clients that present none.
    pub cookies_enabled: bool,

    #[validate(custom(function = "valid_header_name"))]
    pub header_name: String,

    #[validate(length(min = 1))]
    pub cookie_name: String,

    #[serde(with = "humantime_serde")]
    pub cookie_max_age: Duration,

    #[validate(nested)]
    pub limits: TierLimits,

    /// Chance that a request triggers a sweep of expired entries.
    #[validate(range(min = 0.0, max = 1.0))]
    pub sweep_probability: f64,
}

/// Request ceilings per identity tier, per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TierLimits {
    #[validate(range(min = 1))]
    pub authenticated: u64,
    #[validate(range(min = 1))]
    pub cookie: u64,
    #[validate(range(min = 1))]
    pub ip: u64,
    #[validate(range(min = 1))]
    pub fingerprint: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            salt_rotation: Duration::from_secs(24 * 60 * 60),
            cookies_enabled: true,
            header_name: "x-rl".to_string(),
            cookie_name: "__rlid".to_string(),
            cookie_max_age: Duration::from_secs(365 * 24 * 60 * 60),
            limits: TierLimits::default(),
            sweep_probability: 0.001,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            authenticated: 60,
            cookie: 60,
            ip: 120,
            fingerprint: 30,
        }
    }
}

impl TierLimits {
    /// Ceiling for the given tier.
    pub fn for_tier(&self, tier: IdentityTier) -> u64 {
        match tier {
            IdentityTier::Authenticated => self.authenticated,
            IdentityTier::Cookie => self.cookie,
            IdentityTier::Ip => self.ip,
            IdentityTier::Fingerprint => self.fingerprint,
        }
    }
}

impl RateLimitConfig {
    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn salt_rotation_millis(&self) -> u64 {
        u64::try_from(self.salt_rotation.as_millis()).unwrap_or(u64::MAX)
    }
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

fn valid_header_name(value: &str) -> Result<(), ValidationError> {
    axum::http::HeaderName::from_bytes(value.as_bytes())
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_header_name"))
}
