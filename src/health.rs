use std::time::SystemTime;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::ApiError;
use crate::route::{Route, RouteSchemas};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

/// Marks the process start; uptime is measured from the first call.
pub fn mark_started() {
    std::sync::LazyLock::force(&START_TIME);
}

pub fn check_health() -> HealthStatus {
    let now = SystemTime::now();
    let uptime = now.duration_since(*START_TIME)
        .unwrap_or_default()
        .as_secs();

    HealthStatus {
        status: "healthy".to_string(),
        timestamp: now.duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
    }
}

/// `GET /health`, registered as a floating route so it is never rate limited.
pub fn health_route() -> Route {
    Route::new(
        "/health",
        |_ctx: Context| async { Ok::<_, ApiError>(check_health()) },
        RouteSchemas::default(),
    )
}
