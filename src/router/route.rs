//! A single registered endpoint and the attributes that shape it.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::group::GroupContext;
use super::param::RouteParam;
use super::table::CompiledRoute;
use super::{Handler, HandlerResult};
use crate::context::Context;
use crate::error::{RouteDefinitionError, RoutingError};
use crate::http::Method;
use crate::middleware::MiddlewareRef;

/// What a route invokes once the middleware queue is exhausted.
#[derive(Clone)]
pub enum Action {
    /// A closure or function taking the request [`Context`](crate::context::Context).
    Handler(Handler),
    /// A `Target@member` descriptor resolved through the
    /// [`Container`](crate::context::Container) at request time.
    Controller { target: String, member: String },
}

impl Action {
    /// Wrap an async handler.
    pub fn handler<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Handler(super::handler(f))
    }

    /// Parse a `Target@member` descriptor.
    ///
    /// # Errors
    ///
    /// [`RouteDefinitionError::InvalidAction`] unless the string contains exactly
    /// one `@` with something on both sides.
    ///
    /// # Examples
    ///
    /// ```
    /// use switchyard::router::Action;
    ///
    /// assert!(Action::parse("Users@show").is_ok());
    /// assert!(Action::parse("Users").is_err());
    /// assert!(Action::parse("Users@show@twice").is_err());
    /// ```
    pub fn parse(descriptor: &str) -> Result<Self, RouteDefinitionError> {
        let invalid = || RouteDefinitionError::InvalidAction {
            action: descriptor.to_owned(),
        };
        let (target, member) = descriptor.split_once('@').ok_or_else(invalid)?;
        if target.trim().is_empty() || member.trim().is_empty() || member.contains('@') {
            return Err(invalid());
        }
        Ok(Self::Controller {
            target: target.trim().to_owned(),
            member: member.trim().to_owned(),
        })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::Controller { target, member } => write!(f, "Controller({target}@{member})"),
        }
    }
}

/// Anything a verb method accepts as its action.
pub trait IntoAction {
    fn into_action(self) -> Result<Action, RouteDefinitionError>;
}

impl IntoAction for Action {
    fn into_action(self) -> Result<Action, RouteDefinitionError> {
        Ok(self)
    }
}

impl IntoAction for &str {
    fn into_action(self) -> Result<Action, RouteDefinitionError> {
        Action::parse(self)
    }
}

impl IntoAction for String {
    fn into_action(self) -> Result<Action, RouteDefinitionError> {
        Action::parse(&self)
    }
}

/// Per-route (and per-group) modifiers.
///
/// `name` is the route alias (`as`). Inside a group it becomes a prefix for
/// the names of the routes registered in that group.
#[derive(Debug, Clone, Default)]
pub struct RouteAttributes {
    pub(crate) prefix: Option<String>,
    pub(crate) namespace: Option<String>,
    pub(crate) middleware: Vec<MiddlewareRef>,
    pub(crate) host: Option<String>,
    pub(crate) schemes: Vec<String>,
    pub(crate) name: Option<String>,
}

impl RouteAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add one middleware reference; call repeatedly for a list.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.schemes.push(scheme.into().to_ascii_lowercase());
        self
    }

    /// The route alias, `as` in the route DSL.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// A path segment after prefixing: either literal text or a parameter index.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Parameter(usize),
}

/// One registered endpoint.
///
/// Routes are immutable once built and shared as `Arc<Route>` between the
/// router, the compiled table and in-flight requests.
pub struct Route {
    methods: Vec<Method>,
    path: String,
    full_path: String,
    name: Option<String>,
    params: Vec<RouteParam>,
    segments: Vec<Segment>,
    middleware: Vec<MiddlewareRef>,
    namespace: Option<String>,
    host: Option<String>,
    schemes: Vec<String>,
    action: Action,
    pattern: Regex,
}

impl Route {
    /// Build a route under the modifiers currently pushed on `groups`.
    pub(crate) fn new(
        methods: Vec<Method>,
        path: &str,
        action: Action,
        attributes: RouteAttributes,
        groups: &GroupContext,
    ) -> Result<Self, RouteDefinitionError> {
        let RouteAttributes {
            prefix,
            namespace,
            middleware,
            host,
            schemes,
            name,
        } = attributes;

        let full_path = join_path(
            groups
                .prefixes()
                .chain(prefix.as_deref())
                .chain(std::iter::once(path)),
        );

        let mut unique_methods: Vec<Method> = Vec::with_capacity(methods.len());
        for method in methods {
            if !unique_methods.contains(&method) {
                unique_methods.push(method);
            }
        }
        if unique_methods.is_empty() {
            return Err(RouteDefinitionError::EmptyMethods { path: full_path });
        }

        let namespace = groups
            .namespaces()
            .chain(namespace.as_deref())
            .map(|ns| ns.trim_matches(':'))
            .filter(|ns| !ns.is_empty())
            .collect::<Vec<_>>()
            .join("::");

        let mut route_middleware = Vec::new();
        for reference in groups.route_middleware().chain(middleware) {
            if !route_middleware.contains(&reference) {
                route_middleware.push(reference);
            }
        }

        let (segments, params) = parse_segments(&full_path)?;
        let pattern = build_pattern(&segments, &params)?;

        Ok(Self {
            methods: unique_methods,
            path: path.to_owned(),
            name: name.map(|n| groups.qualify_name(&n)),
            params,
            segments,
            middleware: route_middleware,
            namespace: (!namespace.is_empty()).then_some(namespace),
            host: host.or_else(|| groups.host().map(str::to_owned)),
            schemes: if schemes.is_empty() {
                groups.schemes().to_vec()
            } else {
                schemes
            },
            action,
            pattern,
            full_path,
        })
    }

    /// The methods this route was registered for.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// `true` if `method` may be dispatched to this route. `HEAD` is accepted
    /// wherever `GET` is.
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method)
            || (*method == Method::Head && self.methods.contains(&Method::Get))
    }

    /// The path exactly as passed to the verb method.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Prefix + path, without leading or trailing slash.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Parameters in left-to-right order of appearance.
    pub fn params(&self) -> &[RouteParam] {
        &self.params
    }

    /// Route middleware: group scope first, then route-specific, de-duplicated.
    pub fn middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// `namespace::Target` for controller actions.
    pub fn controller_target(&self) -> Option<String> {
        match &self.action {
            Action::Controller { target, .. } => Some(match &self.namespace {
                Some(ns) => format!("{ns}::{target}"),
                None => target.clone(),
            }),
            Action::Handler(_) => None,
        }
    }

    /// Produce the match-table entry for this route.
    ///
    /// The entry keeps a reference to `self` so the matcher hands back the
    /// original route, not just the captured strings.
    pub fn compile(self: &Arc<Self>, name: impl Into<String>) -> CompiledRoute {
        CompiledRoute::new(
            name.into(),
            self.pattern.clone(),
            self.params
                .iter()
                .map(|p| (p.name().to_owned(), p.regex().to_owned()))
                .collect(),
            Arc::clone(self),
        )
    }

    /// Build a concrete path (with a leading slash) from parameter values.
    ///
    /// Optional parameters may be omitted; everything after the first omitted
    /// optional parameter is dropped.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::MissingParameter`]: a required parameter has no value.
    /// - [`RoutingError::InvalidParameter`]: a value violates its requirement.
    pub fn url(&self, values: &[(&str, &str)]) -> Result<String, RoutingError> {
        let mut parts: Vec<&str> = Vec::with_capacity(self.segments.len());

        for segment in &self.segments {
            match segment {
                Segment::Static(text) => parts.push(text),
                Segment::Parameter(index) => {
                    let param = &self.params[*index];
                    let value = values
                        .iter()
                        .find(|(name, _)| *name == param.name())
                        .map(|(_, value)| *value);
                    match value {
                        Some(value) if param.accepts(value) => parts.push(value),
                        Some(value) => {
                            return Err(RoutingError::InvalidParameter {
                                name: param.name().to_owned(),
                                value: value.to_owned(),
                            });
                        }
                        None if param.is_optional() => break,
                        None => {
                            return Err(RoutingError::MissingParameter {
                                route: self.name.clone().unwrap_or_else(|| self.full_path.clone()),
                                name: param.name().to_owned(),
                            });
                        }
                    }
                }
            }
        }

        Ok(format!("/{}", parts.join("/")))
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("full_path", &self.full_path)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("middleware", &self.middleware)
            .field("namespace", &self.namespace)
            .field("host", &self.host)
            .field("schemes", &self.schemes)
            .field("action", &self.action)
            .finish()
    }
}

/// Join path fragments into `a/b/c`: no leading, trailing or doubled slashes.
pub(crate) fn join_path<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_segments(
    full_path: &str,
) -> Result<(Vec<Segment>, Vec<RouteParam>), RouteDefinitionError> {
    let mut segments = Vec::new();
    let mut params: Vec<RouteParam> = Vec::new();
    let mut after_optional = false;

    for raw in full_path.split('/').filter(|s| !s.is_empty()) {
        let Some(param) = RouteParam::parse(raw)? else {
            if after_optional {
                return Err(RouteDefinitionError::SegmentAfterOptional {
                    path: full_path.to_owned(),
                    segment: raw.to_owned(),
                });
            }
            segments.push(Segment::Static(raw.to_owned()));
            continue;
        };

        if params.iter().any(|p| p.name() == param.name()) {
            return Err(RouteDefinitionError::DuplicateParameter {
                path: full_path.to_owned(),
                name: param.name().to_owned(),
            });
        }
        if after_optional && !param.is_optional() {
            return Err(RouteDefinitionError::RequiredAfterOptional {
                path: full_path.to_owned(),
                name: param.name().to_owned(),
            });
        }
        after_optional |= param.is_optional();

        segments.push(Segment::Parameter(params.len()));
        params.push(param);
    }

    Ok((segments, params))
}

// Anchored pattern over the slash-trimmed request path. Parameter `i` is
// captured as `p{i}`; the trailing run of optional parameters nests so that
// each one can only appear when the one before it did.
fn build_pattern(segments: &[Segment], params: &[RouteParam]) -> Result<Regex, RouteDefinitionError> {
    let mut pattern = String::from("^");
    let mut open_optional = 0;

    for (position, segment) in segments.iter().enumerate() {
        let separator = if position == 0 { "" } else { "/" };
        match segment {
            Segment::Static(text) => {
                pattern.push_str(separator);
                pattern.push_str(&regex::escape(text));
            }
            Segment::Parameter(index) => {
                let param = &params[*index];
                if param.is_optional() {
                    pattern.push_str("(?:");
                    open_optional += 1;
                }
                pattern.push_str(separator);
                pattern.push_str(&format!("(?P<p{index}>{})", param.regex()));
            }
        }
    }

    for _ in 0..open_optional {
        pattern.push_str(")?");
    }
    pattern.push('$');

    Regex::new(&pattern).map_err(|e| RouteDefinitionError::InvalidRequirement {
        name: params
            .iter()
            .map(RouteParam::name)
            .collect::<Vec<_>>()
            .join(", "),
        message: e.to_string(),
    })
}
