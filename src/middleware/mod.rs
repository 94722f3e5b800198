//! Middleware pipeline: before/after request logic with early exit.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by middleware "classes".
//! - [`Next`]: continuation into the rest of the pipeline; call [`Next::run`]
//!   to advance.
//! - [`Flow`] / [`Interrupt`]: what a pipeline stage returns. `Err(Interrupt::Halted)`
//!   travels up through every enclosing stage once something short-circuited.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`MiddlewareRef`]: how routes and groups refer to middleware: by name
//!   (alias or class) or by handler.
//! - [`LoggerMiddleware`]: built-in request logger, registered as `"logger"`.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::context::Context;
use crate::error::HandlerError;
use crate::http::Response;
use crate::router::BoxFuture;

pub mod chain;
pub mod registry;

pub use chain::{ChainOutcome, MiddlewareChain, Next};
pub use registry::{MiddlewareRegistry, MiddlewareTarget};

/// Why a stage returned without a response of its own.
#[derive(Debug)]
pub enum Interrupt {
    /// Some stage short-circuited; the response it produced is held by the
    /// chain and will be sent instead of anything returned upstream.
    Halted,
    /// Middleware or the handler failed.
    Failed(HandlerError),
}

impl From<HandlerError> for Interrupt {
    fn from(err: HandlerError) -> Self {
        Self::Failed(err)
    }
}

/// Result of one pipeline stage.
///
/// Middleware typically forwards with `let response = next.run(ctx).await?;`,
/// which propagates both halts and failures.
pub type Flow = Result<Response, Interrupt>;

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use switchyard::context::Context;
/// use switchyard::middleware::{MiddlewareHandler, Next};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler =
    Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Flow> + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wrap an async closure as a [`MiddlewareHandler`].
///
/// ```rust,no_run
/// use switchyard::http::{Response, StatusCode};
/// use switchyard::middleware::middleware_fn;
///
/// let deny = middleware_fn(|_ctx, _next| async {
///     Ok(Response::new(StatusCode::Forbidden))
/// });
/// ```
pub fn middleware_fn<F, Fut>(f: F) -> MiddlewareHandler
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |ctx: Context, next: Next| -> BoxFuture<'static, Flow> { Box::pin(f(ctx, next)) })
}

/// The contract every middleware class implements.
///
/// Implementors receive a [`Context`] and a [`Next`] continuation. They may:
///
/// - **Pass through**: `next.run(ctx).await`.
/// - **Short-circuit**: return a response without calling `next`, return a
///   finished response or a redirect, or call [`Next::halt`]. Nothing downstream runs and
///   nothing upstream can replace the response.
/// - **Decorate**: call `next.run(ctx).await?`, then adjust the response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Flow>;
}

/// How a route, group or the global list names a middleware.
#[derive(Clone)]
pub enum MiddlewareRef {
    /// An alias or a registered middleware class name.
    Named(String),
    /// A handler used directly.
    Handler(MiddlewareHandler),
}

impl PartialEq for MiddlewareRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Named(a), Self::Named(b)) => a == b,
            (Self::Handler(a), Self::Handler(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "Named({name})"),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

impl From<String> for MiddlewareRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<MiddlewareHandler> for MiddlewareRef {
    fn from(handler: MiddlewareHandler) -> Self {
        Self::Handler(handler)
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits one `tracing::info!` line after the rest of the pipeline completes:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// Short-circuits and failures further down are logged and passed through
/// untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Flow> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let path = ctx.request().path().to_owned();

            let flow = next.run(ctx).await;
            let duration = start.elapsed();

            match &flow {
                Ok(response) => {
                    tracing::info!("{} {} - {} ({:?})", method, path, response.status().as_u16(), duration);
                }
                Err(Interrupt::Halted) => {
                    tracing::info!("{} {} - short-circuited ({:?})", method, path, duration);
                }
                Err(Interrupt::Failed(error)) => {
                    tracing::info!(%error, "{} {} - failed ({:?})", method, path, duration);
                }
            }

            flow
        })
    }
}
