//! Per-request orchestration.
//!
//! [`RequestHandler`] is the frozen form of a [`Router`]: the compiled route
//! table plus, for every entry, its resolved middleware queue. Each call to
//! [`RequestHandler::handle`] walks one request through
//!
//! ```text
//! Unmatched ──> Matched ──> Resolved ──> Dispatched ──> Completed
//!     │            │            │             │
//!     ├─> NotFound └────────────┴─────────────┴──> Failed
//!     └─> MethodNotAllowed
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::context::{Container, Context};
use crate::error::{Error, HandlerError, RouteDefinitionError, RoutingError};
use crate::http::{Request, Response, StatusCode};
use crate::middleware::{ChainOutcome, MiddlewareChain, MiddlewareHandler};
use crate::router::{Action, Handler, Route, RouteLookup, RouteTable, Router};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unmatched,
    Matched,
    Resolved,
    Dispatched,
    Completed,
    NotFound,
    MethodNotAllowed,
    Failed,
}

impl Stage {
    /// Whether `next` may follow `self`.
    ///
    /// `Unmatched → Completed` is the placeholder response served while no
    /// route is registered.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Unmatched, Matched | NotFound | MethodNotAllowed | Completed)
                | (Matched, Resolved | Failed)
                | (Resolved, Dispatched | Failed)
                | (Dispatched, Completed | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::NotFound | Self::MethodNotAllowed | Self::Failed
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Stage tracking for one request, logged at debug.
struct Progress {
    stage: Stage,
    method: String,
    path: String,
}

impl Progress {
    fn new(request: &Request) -> Self {
        Self {
            stage: Stage::Unmatched,
            method: request.method().to_string(),
            path: request.path().to_owned(),
        }
    }

    fn advance(&mut self, next: Stage) -> Result<(), HandlerError> {
        if !self.stage.can_advance_to(next) {
            return Err(HandlerError::msg(format!(
                "illegal request stage transition {} -> {}",
                self.stage, next
            )));
        }
        debug!(method = %self.method, path = %self.path, from = %self.stage, to = %next, "request stage");
        self.stage = next;
        Ok(())
    }

    fn fail(&mut self) {
        if self.stage.can_advance_to(Stage::Failed) {
            debug!(method = %self.method, path = %self.path, from = %self.stage, "request failed");
            self.stage = Stage::Failed;
        }
    }
}

type NotFoundCallback = Arc<dyn Fn(&Request, &RoutingError) -> Response + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Request, &Route, &HandlerError) -> Response + Send + Sync>;

/// A compiled, read-only router ready to serve requests.
///
/// `RequestHandler` is `Send + Sync`; share it behind an `Arc` across tasks.
///
/// # Examples
///
/// ```rust
/// use switchyard::config::{Environment, Settings};
/// use switchyard::handler::RequestHandler;
/// use switchyard::http::{Method, Request, Response, StatusCode};
/// use switchyard::router::{Router, handler};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut router = Router::new();
/// router.get("/hello/{name}", handler(|ctx| async move {
///     let name = ctx.param("name").unwrap_or("stranger").to_owned();
///     Ok(Response::new(StatusCode::Ok).body(format!("hello {name}")))
/// }))?;
///
/// let app = RequestHandler::new(router, Settings::for_environment(Environment::Production))?;
/// let response = app.handle(Request::new(Method::Get, "/hello/world")).await?;
/// assert_eq!(response.body_ref(), b"hello world");
/// # Ok(())
/// # }
/// ```
pub struct RequestHandler {
    table: RouteTable,
    // Resolved global ++ route middleware, one queue per table entry.
    pipelines: Vec<Vec<MiddlewareHandler>>,
    container: Arc<Container>,
    settings: Settings,
    not_found: Option<NotFoundCallback>,
    on_error: Option<ErrorCallback>,
}

impl RequestHandler {
    /// Compile `router` and resolve every middleware reference it uses.
    ///
    /// # Errors
    ///
    /// Any [`RouteDefinitionError`] from middleware resolution: an unknown
    /// name, an alias cycle, or an alias pointing nowhere.
    pub fn new(router: Router, settings: Settings) -> Result<Self, RouteDefinitionError> {
        let table = RouteTable::new(router.compiled_routes());
        let registry = router.into_registry();
        registry.validate()?;

        let pipelines = table
            .entries()
            .iter()
            .map(|entry| registry.resolve_all(&registry.queue(entry.route().middleware())))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            routes = table.len(),
            global_middleware = registry.global().len(),
            environment = %settings.environment,
            "route table compiled"
        );

        Ok(Self {
            table,
            pipelines,
            container: Arc::new(Container::new()),
            settings,
            not_found: None,
            on_error: None,
        })
    }

    /// Use `container` to resolve `Target@member` actions.
    #[must_use]
    pub fn with_container(mut self, container: Container) -> Self {
        self.container = Arc::new(container);
        self
    }

    /// Build the response for unmatched requests (outside development).
    #[must_use]
    pub fn on_not_found<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Request, &RoutingError) -> Response + Send + Sync + 'static,
    {
        self.not_found = Some(Arc::new(callback));
        self
    }

    /// Build the response when middleware or a handler fails. The error is
    /// logged; without a callback it is returned to the caller instead.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Request, &Route, &HandlerError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Path of the route registered as `name`.
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Result<String, RoutingError> {
        self.table
            .entries()
            .iter()
            .map(|entry| entry.route())
            .find(|route| route.name() == Some(name))
            .ok_or_else(|| RoutingError::UnknownRoute(name.to_owned()))?
            .url(params)
    }

    /// Route `request` and run it through its middleware and handler.
    ///
    /// # Errors
    ///
    /// - [`Error::Routing`]: no route matched, only in development.
    /// - [`Error::Handler`]: middleware or the handler failed and no error
    ///   callback is registered.
    pub async fn handle(&self, request: Request) -> Result<Response, Error> {
        let mut progress = Progress::new(&request);

        if self.table.is_empty() {
            if !self.settings.environment.is_production() {
                progress.advance(Stage::Completed)?;
                return Ok(Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(self.settings.placeholder_body.clone()));
            }
            progress.advance(Stage::NotFound)?;
            return self.routing_failure(&request, not_found(&request));
        }

        let (route, index, params) = match self.table.lookup(&request) {
            RouteLookup::Matched {
                route,
                index,
                params,
                ..
            } => (route, index, params),
            RouteLookup::NotFound => {
                progress.advance(Stage::NotFound)?;
                return self.routing_failure(&request, not_found(&request));
            }
            RouteLookup::MethodNotAllowed { allowed } => {
                progress.advance(Stage::MethodNotAllowed)?;
                let error = RoutingError::MethodNotAllowed {
                    method: request.method().clone(),
                    path: request.path().trim_matches('/').to_owned(),
                    allowed,
                };
                return self.routing_failure(&request, error);
            }
        };
        progress.advance(Stage::Matched)?;

        let ctx = Context::routed(request, Arc::clone(&route), params, Arc::clone(&self.container));
        // The error callback sees the request with its bound parameters; the
        // body is shared, not copied.
        let snapshot = self.on_error.as_ref().map(|_| ctx.request().clone());

        let dispatched = Router::with_current_route(
            Arc::clone(&route),
            AssertUnwindSafe(self.dispatch(&mut progress, ctx, &route, index)).catch_unwind(),
        )
        .await
        .unwrap_or_else(|payload| Err(panicked(&*payload)));

        match dispatched {
            Ok(response) => Ok(response),
            Err(error) => {
                progress.fail();
                self.handler_failure(snapshot, &route, error)
            }
        }
    }

    /// Like [`handle`](Self::handle) but never fails: errors become status
    /// responses (404, 405 with `Allow`, 500).
    pub async fn respond(&self, request: Request) -> Response {
        let keep_alive = request.is_keep_alive();
        match self.handle(request).await {
            Ok(response) => response,
            Err(err) => {
                if let Error::Handler(ref e) = err {
                    error!(error = %e, "request failed");
                }
                let mut response = Response::new(err.status())
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(err.status().canonical_reason())
                    .keep_alive(keep_alive);
                if let Some(allowed) = err.routing().and_then(RoutingError::allowed) {
                    response = response.allow(allowed);
                }
                response
            }
        }
    }

    async fn dispatch(
        &self,
        progress: &mut Progress,
        ctx: Context,
        route: &Route,
        index: usize,
    ) -> Result<Response, HandlerError> {
        let endpoint = self.resolve_action(route)?;
        progress.advance(Stage::Resolved)?;

        let stages = self.pipelines.get(index).cloned().unwrap_or_default();
        let chain = MiddlewareChain::new(stages, endpoint);
        progress.advance(Stage::Dispatched)?;

        let outcome = chain.dispatch(ctx).await?;
        if let ChainOutcome::ShortCircuited { stage, ref response } = outcome {
            debug!(stage, status = %response.status(), "pipeline short-circuited");
        }
        progress.advance(Stage::Completed)?;
        Ok(outcome.into_response())
    }

    // The endpoint for the route's action. Controllers are instantiated here,
    // once per request.
    fn resolve_action(&self, route: &Route) -> Result<Handler, HandlerError> {
        match route.action() {
            Action::Handler(handler) => Ok(Arc::clone(handler)),
            Action::Controller { member, .. } => {
                let target = route.controller_target().unwrap_or_default();
                let controller = self
                    .container
                    .controller(&target)
                    .ok_or_else(|| HandlerError::unresolved_controller(&target))?;
                if !controller.responds_to(member) {
                    return Err(HandlerError::unknown_member(&target, member));
                }
                let member = member.clone();
                let endpoint: Handler =
                    Arc::new(move |ctx: Context| Arc::clone(&controller).call(&member, ctx));
                Ok(endpoint)
            }
        }
    }

    fn routing_failure(&self, request: &Request, error: RoutingError) -> Result<Response, Error> {
        warn!(method = %request.method(), path = %request.path(), error = %error, "routing failed");

        if self.settings.environment.is_development() {
            return Err(error.into());
        }
        if let Some(callback) = &self.not_found {
            return Ok(callback(request, &error));
        }
        Ok(default_routing_response(request, &error))
    }

    fn handler_failure(
        &self,
        request: Option<Request>,
        route: &Route,
        error: HandlerError,
    ) -> Result<Response, Error> {
        match (&self.on_error, request) {
            (Some(callback), Some(request)) => {
                error!(route = %route.full_path(), error = %error, "handler failed");
                Ok(callback(&request, route, &error))
            }
            _ => Err(Error::Handler(error)),
        }
    }
}

// A panic in middleware or a handler becomes an ordinary handler failure.
fn panicked(payload: &(dyn Any + Send)) -> HandlerError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned());
    HandlerError::msg(format!("panicked: {message}"))
}

fn not_found(request: &Request) -> RoutingError {
    RoutingError::NotFound {
        method: request.method().clone(),
        path: request.path().trim_matches('/').to_owned(),
    }
}

// JSON when the client accepts it, plain text otherwise. 405 carries `Allow`.
fn default_routing_response(request: &Request, error: &RoutingError) -> Response {
    let status = error.status();
    let plain = || {
        Response::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(status.canonical_reason())
    };

    let mut response = if request.accepts_json() {
        let body = serde_json::json!({
            "status": status.as_u16(),
            "error": status.canonical_reason(),
            "message": error.to_string(),
        });
        Response::json(status, &body).unwrap_or_else(|_| plain())
    } else {
        plain()
    };

    if let Some(allowed) = error.allowed() {
        response = response.allow(allowed);
    }
    response.keep_alive(request.is_keep_alive())
}
