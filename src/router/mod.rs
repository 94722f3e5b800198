//! Route definition and matching.
//!
//! Routes are declared once, at startup, through the DSL on [`Router`]
//! (`get`, `post`, `group`, `middleware`, …). Paths use a placeholder grammar:
//!
//! | Segment              | Matches        | Notes                      |
//! |----------------------|----------------|----------------------------|
//! | `users`              | `users`        | literal                    |
//! | `{id}` / `{any:id}`  | `[^/]+`        |                            |
//! | `{num:id}`           | `[0-9]+`       |                            |
//! | `{(\d{4}):year}`     | `\d{4}`        | regex used verbatim        |
//! | `{id?}`              | optional       | only as a trailing run     |
//!
//! The router is then frozen into a [`RequestHandler`](crate::handler::RequestHandler),
//! which compiles every route into a [`RouteTable`] and serves requests from it.
//!
//! # Examples
//!
//! ```rust
//! use switchyard::http::{Response, StatusCode};
//! use switchyard::router::{Router, RouteAttributes, handler};
//!
//! # fn main() -> Result<(), switchyard::error::RouteDefinitionError> {
//! let mut router = Router::new();
//! router.get("/", handler(|_ctx| async { Ok(Response::new(StatusCode::Ok)) }))?;
//! router.group("admin", RouteAttributes::new().middleware("logger"), |r| {
//!     r.get("dashboard", "Dashboard@index")?;
//!     Ok(())
//! })?;
//! assert_eq!(router.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{HandlerError, RoutingError};
use crate::http::Response;
use crate::middleware::MiddlewareRegistry;

pub mod builder;
pub mod group;
pub mod param;
pub mod route;
pub mod table;

pub use group::{GroupContext, GroupMark};
pub use param::RouteParam;
pub use route::{Action, IntoAction, Route, RouteAttributes};
pub use table::{CompiledRoute, RouteLookup, RouteTable};

/// Heap-allocated, `Send` future used wherever handlers are type-erased.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a route handler produces.
pub type HandlerResult = Result<Response, HandlerError>;

/// Type-erased, heap-allocated async handler that processes a [`Context`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared
/// across threads without copying the underlying closure. Build one with
/// [`handler`].
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = HandlerResult> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket
/// impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(ctx))
    }
}

/// Erase an async closure into a [`Handler`].
///
/// The bounds name `Context` so closures like `|ctx| async move { .. }` need
/// no annotation.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx: Context| IntoHandler::call(&f, ctx))
}

impl IntoAction for Handler {
    fn into_action(self) -> Result<Action, crate::error::RouteDefinitionError> {
        Ok(Action::Handler(self))
    }
}

tokio::task_local! {
    static CURRENT_ROUTE: Arc<Route>;
}

/// The application's route collection plus the group context used while
/// defining it.
///
/// Routes keep registration order; the first compiled entry that matches a
/// request wins.
pub struct Router {
    routes: Vec<Arc<Route>>,
    names: HashSet<String>,
    groups: GroupContext,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    ///
    /// ```rust
    /// use switchyard::router::Router;
    ///
    /// let router = Router::new();
    /// assert!(router.is_empty());
    /// ```
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            names: HashSet::new(),
            groups: GroupContext::new(),
        }
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in registration order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn route_by_name(&self, name: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.name() == Some(name))
    }

    /// Build the path of the route registered as `name`.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnknownRoute`] when no route has that name, plus
    /// anything [`Route::url`] reports.
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Result<String, RoutingError> {
        self.route_by_name(name)
            .ok_or_else(|| RoutingError::UnknownRoute(name.to_owned()))?
            .url(params)
    }

    /// Compile every route, in registration order.
    ///
    /// Unnamed routes are called `__anonymous_route{N}`, counting only unnamed
    /// routes. The synthesized name is never stored on the route.
    pub fn compiled_routes(&self) -> Vec<CompiledRoute> {
        let mut anonymous = 0usize;
        self.routes
            .iter()
            .map(|route| match route.name() {
                Some(name) => route.compile(name),
                None => {
                    let name = format!("__anonymous_route{anonymous}");
                    anonymous += 1;
                    route.compile(name)
                }
            })
            .collect()
    }

    /// The group stacks and middleware registry.
    pub fn groups(&self) -> &GroupContext {
        &self.groups
    }

    pub fn registry(&self) -> &MiddlewareRegistry {
        self.groups.registry()
    }

    pub(crate) fn into_registry(self) -> MiddlewareRegistry {
        self.groups.into_registry()
    }

    /// The route being served by the current request task, if any.
    pub fn current_route() -> Option<Arc<Route>> {
        CURRENT_ROUTE.try_with(Arc::clone).ok()
    }

    /// Run `future` with `route` as the current route.
    ///
    /// The slot is task-local: concurrent requests each see their own route,
    /// and it is cleared when `future` completes.
    pub async fn with_current_route<F>(route: Arc<Route>, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_ROUTE.scope(route, future).await
    }
}
