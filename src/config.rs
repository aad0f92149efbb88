use std::net::SocketAddr;
use std::time::Duration;

use clap::{ArgAction, Parser};
use humantime_serde::re::humantime::parse_duration;
use thiserror::Error;
use validator::Validate;

use crate::cors::Cors;
use crate::rate_limit_config::{RateLimitConfig, TierLimits};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid rate limit configuration: {0}")]
    RateLimit(#[from] validator::ValidationErrors),
}

/// Service configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "turnstile", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Prefix every API path lives under
    #[arg(long, env = "GLOBAL_PREFIX", default_value = "/api")]
    pub global_prefix: String,

    /// Origins allowed by CORS (comma separated)
    #[arg(
        long = "client-url",
        env = "CLIENT_URL",
        value_delimiter = ',',
        default_value = "http://localhost:5173"
    )]
    pub client_urls: Vec<String>,

    #[arg(long, env = "CORS_ALLOWED_METHODS", value_delimiter = ',', default_value = "GET,POST")]
    pub cors_allowed_methods: Vec<String>,

    #[arg(
        long,
        env = "CORS_ALLOWED_HEADERS",
        value_delimiter = ',',
        default_value = "Content-Type,Authorization,x-group-id,x-lang,RateLimit"
    )]
    pub cors_allowed_headers: Vec<String>,

    #[arg(long, env = "CORS_CREDENTIALS", default_value_t = true, action = ArgAction::Set)]
    pub cors_credentials: bool,

    /// Rate limit window, e.g. `60s`
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value = "60s", value_parser = parse_duration)]
    pub rate_limit_window: Duration,

    /// Lifetime of the salt used to anonymize IPs and fingerprints
    #[arg(long, env = "RATE_LIMIT_SALT_ROTATION", default_value = "24h", value_parser = parse_duration)]
    pub rate_limit_salt_rotation: Duration,

    /// Issue identity cookies to anonymous clients
    #[arg(long, env = "RATE_LIMIT_COOKIES", default_value_t = false, action = ArgAction::Set)]
    pub rate_limit_cookies: bool,

    #[arg(long, env = "RATE_LIMIT_HEADER", default_value = "x-rl")]
    pub rate_limit_header: String,

    #[arg(long, env = "RATE_LIMIT_COOKIE", default_value = "__rlid")]
    pub rate_limit_cookie: String,

    #[arg(long, env = "RATE_LIMIT_USER", default_value_t = 60)]
    pub rate_limit_user: u64,

    #[arg(long, env = "RATE_LIMIT_COOKIE_MAX", default_value_t = 60)]
    pub rate_limit_cookie_max: u64,

    #[arg(long, env = "RATE_LIMIT_IP", default_value_t = 120)]
    pub rate_limit_ip: u64,

    #[arg(long, env = "RATE_LIMIT_FINGERPRINT", default_value_t = 30)]
    pub rate_limit_fingerprint: u64,

    #[arg(long, env = "RATE_LIMIT_SWEEP_PROBABILITY", default_value_t = 0.001)]
    pub rate_limit_sweep_probability: f64,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parses flags and environment, then validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::try_parse().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.global_prefix.is_empty() && !self.global_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "global prefix '{}' must start with '/'",
                self.global_prefix
            )));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max body bytes must be greater than 0".to_string(),
            ));
        }

        self.rate_limit().validate()?;
        Ok(())
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            window: self.rate_limit_window,
            salt_rotation: self.rate_limit_salt_rotation,
            cookies_enabled: self.rate_limit_cookies,
            header_name: self.rate_limit_header.clone(),
            cookie_name: self.rate_limit_cookie.clone(),
            limits: TierLimits {
                authenticated: self.rate_limit_user,
                cookie: self.rate_limit_cookie_max,
                ip: self.rate_limit_ip,
                fingerprint: self.rate_limit_fingerprint,
            },
            sweep_probability: self.rate_limit_sweep_probability,
            ..RateLimitConfig::default()
        }
    }

    pub fn cors(&self) -> Cors {
        Cors {
            allowed_origins: trimmed(&self.client_urls),
            allowed_methods: trimmed(&self.cors_allowed_methods),
            allowed_headers: trimmed(&self.cors_allowed_headers),
            allow_credentials: self.cors_credentials,
        }
    }
}

fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
