//! Middleware chain.
//!
//! A middleware runs before the route callback and either lets the request
//! through, optionally leaving data on the [`Context`], or aborts it with an
//! error. Chains are composed once, when the router is built: each layer
//! wraps the handler produced so far, so the middleware installed last is
//! the outermost and runs first.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::info;

use crate::context::Context;
use crate::error::{ApiError, Result};
use crate::key_generator::extract_client_ip;
use crate::response::Response;
use crate::route::Handler;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &Context) -> Result<()>;
}

pub type SharedMiddleware = Arc<dyn Middleware>;

/// Middleware built from an async closure. A `Some` result is stored on the
/// context and can be read back with [`Context::data`].
pub struct FnMiddleware<F, D> {
    f: F,
    _marker: PhantomData<fn() -> D>,
}

pub fn from_fn<F, Fut, D>(f: F) -> FnMiddleware<F, D>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<D>>> + Send + 'static,
    D: Clone + Send + Sync + 'static,
{
    FnMiddleware {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, D> Middleware for FnMiddleware<F, D>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<D>>> + Send + 'static,
    D: Clone + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &Context) -> Result<()> {
        if let Some(data) = (self.f)(ctx.clone()).await? {
            ctx.insert_data(data);
        }
        Ok(())
    }
}

/// Wraps `inner` so `middleware` runs first.
pub fn wrap(middleware: SharedMiddleware, inner: Handler) -> Handler {
    Arc::new(move |ctx: Context| run_layer(middleware.clone(), inner.clone(), ctx).boxed())
}

async fn run_layer(middleware: SharedMiddleware, inner: Handler, ctx: Context) -> Result<Response> {
    middleware.handle(&ctx).await?;
    inner(ctx).await
}

/// Folds `middlewares` around `endpoint` in installation order.
pub fn compose(endpoint: Handler, middlewares: &[SharedMiddleware]) -> Handler {
    middlewares
        .iter()
        .fold(endpoint, |handler, middleware| wrap(middleware.clone(), handler))
}

/// Logs every request that reaches a route.
#[derive(Debug, Clone, Default)]
pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(&self, ctx: &Context) -> Result<()> {
        let request = ctx.request();
        let client_ip = extract_client_ip(request)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        info!(
            target: "turnstile::middleware",
            method = %request.method(),
            uri = %request.uri(),
            route = %ctx.path(),
            client_ip = %client_ip,
            "Incoming request"
        );
        Ok(())
    }
}
