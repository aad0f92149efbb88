pub mod config;
pub mod context;
pub mod controller;
pub mod cookies;
pub mod cors;
pub mod error;
pub mod headers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod things;
pub mod validation;

pub use config::Config;
pub use context::Context;
pub use controller::Controller;
pub use cors::Cors;
pub use error::{ApiError, Result};
pub use middleware::{from_fn, Middleware};
pub use rate_limiter::RateLimiter;
pub use request::Request;
pub use response::Response;
pub use route::{Route, RouteDefinition, RouteSchemas};
pub use router::{Router, RouterBuilder};
pub use server::create_app;
pub use validation::{JsonSchema, Schema, Validated};
