//! The compiled match table.
//!
//! Matching is two-phase so that "wrong method" can be told apart from "no
//! such path": every entry whose pattern, host and scheme fit the request is a
//! path match, and only then is the method checked.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::route::Route;
use crate::context::Parameters;
use crate::http::{Method, Request};

/// One match-table entry derived from a [`Route`].
#[derive(Clone)]
pub struct CompiledRoute {
    name: String,
    pattern: Regex,
    requirements: Vec<(String, String)>,
    methods: Vec<Method>,
    host: Option<String>,
    schemes: Vec<String>,
    route: Arc<Route>,
}

impl CompiledRoute {
    pub(crate) fn new(
        name: String,
        pattern: Regex,
        requirements: Vec<(String, String)>,
        route: Arc<Route>,
    ) -> Self {
        Self {
            name,
            pattern,
            requirements,
            methods: route.methods().to_vec(),
            host: route.host().map(str::to_owned),
            schemes: route.schemes().to_vec(),
            route,
        }
    }

    /// The route's name, or the synthesized `__anonymous_route{N}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The anchored regex matched against the slash-trimmed request path.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// `(parameter name, regex)` in declaration order.
    pub fn requirements(&self) -> &[(String, String)] {
        &self.requirements
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// The route this entry was compiled from.
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    fn fits(&self, host: Option<&str>, scheme: &str) -> bool {
        let host_ok = match (&self.host, host) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        };
        let scheme_ok = self.schemes.is_empty()
            || self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme));
        host_ok && scheme_ok
    }

    // Bound values in declaration order; absent optional parameters are `None`.
    fn bind(&self, path: &str) -> Option<Parameters> {
        let captures = self.pattern.captures(path)?;
        let mut params = Parameters::new();
        for (index, (name, _)) in self.requirements.iter().enumerate() {
            let value = captures
                .name(&format!("p{index}"))
                .map(|m| m.as_str().to_owned());
            params.insert(name.clone(), value);
        }
        Some(params)
    }
}

impl PartialEq for CompiledRoute {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.pattern.as_str() == other.pattern.as_str()
            && self.requirements == other.requirements
            && self.methods == other.methods
            && self.host == other.host
            && self.schemes == other.schemes
            && Arc::ptr_eq(&self.route, &other.route)
    }
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("requirements", &self.requirements)
            .field("methods", &self.methods)
            .field("host", &self.host)
            .field("schemes", &self.schemes)
            .finish()
    }
}

/// Result of looking a request up in the [`RouteTable`].
#[derive(Debug)]
pub enum RouteLookup {
    Matched {
        route: Arc<Route>,
        name: String,
        /// Position of the matching entry in the table.
        index: usize,
        params: Parameters,
    },
    /// Some route matches the path, none of them the method.
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

/// Compiled routes in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    entries: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn new(entries: Vec<CompiledRoute>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CompiledRoute] {
        &self.entries
    }

    /// Look up a request by its method, path, `Host` and scheme.
    pub fn lookup(&self, request: &Request) -> RouteLookup {
        self.find(request.method(), request.path(), request.host(), request.scheme())
    }

    /// The first entry matching everything wins. `HEAD` is served by `GET`
    /// routes.
    pub fn find(&self, method: &Method, path: &str, host: Option<&str>, scheme: &str) -> RouteLookup {
        let path = path.trim_matches('/');
        let mut allowed: Vec<Method> = Vec::new();

        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.fits(host, scheme) {
                continue;
            }
            let Some(params) = entry.bind(path) else {
                continue;
            };
            if entry.route.allows(method) {
                return RouteLookup::Matched {
                    route: Arc::clone(&entry.route),
                    name: entry.name.clone(),
                    index,
                    params,
                };
            }
            for m in &entry.methods {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }

        if allowed.is_empty() {
            return RouteLookup::NotFound;
        }
        if allowed.contains(&Method::Get) && !allowed.contains(&Method::Head) {
            allowed.push(Method::Head);
        }
        RouteLookup::MethodNotAllowed { allowed }
    }
}
