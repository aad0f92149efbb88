use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::warn;

use crate::context::Context;
use crate::cookies::{Cookie, SameSite};
use crate::error::{ApiError, Result};
use crate::key_generator::{Identity, KeyGenerator, RotatingSalt};
use crate::middleware::Middleware;
use crate::rate_limit_config::RateLimitConfig;
use crate::request::Request;

/// Source of the current time in milliseconds since the epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Hits counted for one identity in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub hits: u64,
    pub reset_at: u64,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub identity: Identity,
    pub limit: u64,
    pub hits: u64,
    pub remaining: u64,
    pub reset_at: u64,
    pub allowed: bool,
}

impl RateLimitDecision {
    /// `limit=<n>, remaining=<n>, reset=<unix seconds>`
    pub fn header_value(&self) -> String {
        format!(
            "limit={}, remaining={}, reset={}",
            self.limit,
            self.remaining,
            self.reset_at.div_ceil(1000)
        )
    }
}

struct LedgerState {
    entries: HashMap<String, RateLimitEntry>,
    salt: RotatingSalt,
}

/// Fixed-window rate limiter keyed by client identity.
///
/// The ledger lives in process memory; counts are lost on restart and are
/// not shared between instances.
pub struct RateLimiter {
    config: RateLimitConfig,
    keys: KeyGenerator,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let salt = RotatingSalt::new(clock.now_millis(), config.salt_rotation_millis());
        Self {
            keys: KeyGenerator::new(config.cookies_enabled, config.cookie_name.clone()),
            config,
            clock,
            state: Mutex::new(LedgerState {
                entries: HashMap::new(),
                salt,
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts `request` against its identity and reports whether it fits
    /// under the tier's ceiling.
    pub fn check(&self, request: &Request) -> Result<RateLimitDecision> {
        let now = self.clock.now_millis();
        let mut state = self.lock()?;

        if self.config.sweep_probability > 0.0 && rand::random::<f64>() < self.config.sweep_probability {
            let removed = sweep(&mut state.entries, now);
            tracing::debug!(removed, "Swept expired rate limit entries");
        }

        let LedgerState { entries, salt } = &mut *state;
        let identity = self.keys.resolve(request, salt, now);

        let window = self.config.window_millis();
        let entry = entries
            .entry(identity.key.clone())
            .and_modify(|entry| {
                if entry.reset_at > now {
                    entry.hits += 1;
                } else {
                    *entry = RateLimitEntry {
                        hits: 1,
                        reset_at: now.saturating_add(window),
                    };
                }
            })
            .or_insert(RateLimitEntry {
                hits: 1,
                reset_at: now.saturating_add(window),
            });

        let limit = self.config.limits.for_tier(identity.tier);
        Ok(RateLimitDecision {
            limit,
            hits: entry.hits,
            remaining: limit.saturating_sub(entry.hits),
            reset_at: entry.reset_at,
            allowed: entry.hits <= limit,
            identity,
        })
    }

    /// The cookie handed to a client whose identity was just minted.
    pub fn identity_cookie(&self, value: impl Into<String>) -> Cookie {
        Cookie::new(self.config.cookie_name.clone(), value)
            .path("/")
            .max_age(self.config.cookie_max_age)
            .http_only(true)
            .secure(true)
            .same_site(SameSite::None)
    }

    /// Drops every entry whose window has ended. Returns how many went.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut state = self.lock()?;
        Ok(sweep(&mut state.entries, now))
    }

    pub fn entry(&self, key: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self.lock()?.entries.get(key).copied())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Forgets every counted request.
    pub fn reset(&self) -> Result<()> {
        self.lock()?.entries.clear();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| ApiError::internal("Failed to acquire lock on rate limit ledger"))
    }
}

fn sweep(entries: &mut HashMap<String, RateLimitEntry>, now: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.reset_at > now);
    before - entries.len()
}

#[async_trait]
impl Middleware for RateLimiter {
    async fn handle(&self, ctx: &Context) -> Result<()> {
        let decision = self.check(ctx.request())?;

        if let Some(minted) = &decision.identity.minted_cookie {
            ctx.set_cookie(self.identity_cookie(minted.clone()));
        }
        ctx.set_header(&self.config.header_name, &decision.header_value())?;

        if !decision.allowed {
            warn!(
                target: "turnstile::rate_limiter",
                identity = %decision.identity.key,
                hits = decision.hits,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            return Err(ApiError::RateLimitExceeded);
        }

        Ok(())
    }
}
