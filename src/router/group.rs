//! Scoped modifiers applied while a route-definition block runs.
//!
//! A [`GroupContext`] is a set of stacks. Entering a group pushes onto some of
//! them; leaving it truncates every stack back to the depth it had on entry.
//! The context also owns the [`MiddlewareRegistry`], which is append-only and
//! outlives every group.

use crate::middleware::MiddlewareRef;
use crate::middleware::registry::MiddlewareRegistry;

use super::route::RouteAttributes;

/// Stack depths at one point in time. Two equal marks mean no scope leaked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupMark {
    pub prefix: usize,
    pub namespace: usize,
    pub middleware: usize,
    pub host: usize,
    pub schemes: usize,
    pub name: usize,
}

/// Prefix, namespace, route middleware, host, scheme and name stacks, plus
/// the middleware registry.
#[derive(Debug, Default)]
pub struct GroupContext {
    prefix: Vec<String>,
    namespace: Vec<String>,
    middleware: Vec<Vec<MiddlewareRef>>,
    host: Vec<String>,
    schemes: Vec<Vec<String>>,
    name: Vec<String>,
    registry: MiddlewareRegistry,
}

impl GroupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current depth of every stack.
    pub fn mark(&self) -> GroupMark {
        GroupMark {
            prefix: self.prefix.len(),
            namespace: self.namespace.len(),
            middleware: self.middleware.len(),
            host: self.host.len(),
            schemes: self.schemes.len(),
            name: self.name.len(),
        }
    }

    /// Push a group scope and return the mark to restore afterwards.
    ///
    /// The prefix is always pushed (an empty prefix is a no-op when joined);
    /// the other stacks only receive an entry when the attribute is present.
    pub(crate) fn enter(&mut self, prefix: &str, attributes: RouteAttributes) -> GroupMark {
        let mark = self.mark();

        let prefix = match attributes.prefix {
            Some(extra) => super::route::join_path([prefix, extra.as_str()]),
            None => super::route::join_path([prefix]),
        };
        self.prefix.push(prefix);

        if let Some(namespace) = attributes.namespace {
            self.namespace.push(namespace);
        }
        if !attributes.middleware.is_empty() {
            self.middleware.push(attributes.middleware);
        }
        if let Some(host) = attributes.host {
            self.host.push(host);
        }
        if !attributes.schemes.is_empty() {
            self.schemes.push(attributes.schemes);
        }
        if let Some(name) = attributes.name {
            self.name.push(name);
        }

        mark
    }

    /// Push a route-middleware scope only.
    pub(crate) fn enter_middleware(&mut self, middleware: Vec<MiddlewareRef>) -> GroupMark {
        let mark = self.mark();
        self.middleware.push(middleware);
        mark
    }

    /// Pop every stack back to `mark`, innermost entries first.
    pub(crate) fn restore(&mut self, mark: GroupMark) {
        self.name.truncate(mark.name);
        self.schemes.truncate(mark.schemes);
        self.host.truncate(mark.host);
        self.middleware.truncate(mark.middleware);
        self.namespace.truncate(mark.namespace);
        self.prefix.truncate(mark.prefix);
    }

    /// Prefixes from outermost to innermost.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.prefix.iter().map(String::as_str)
    }

    /// Namespaces from outermost to innermost.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespace.iter().map(String::as_str)
    }

    /// Scoped route middleware, outermost scope first.
    pub fn route_middleware(&self) -> impl Iterator<Item = MiddlewareRef> + '_ {
        self.middleware.iter().flatten().cloned()
    }

    /// Innermost host constraint.
    pub fn host(&self) -> Option<&str> {
        self.host.last().map(String::as_str)
    }

    /// Innermost scheme constraint; empty when unconstrained.
    pub fn schemes(&self) -> &[String] {
        self.schemes.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Prefix `name` with every enclosing group name.
    pub(crate) fn qualify_name(&self, name: &str) -> String {
        let mut qualified: String = self.name.concat();
        qualified.push_str(name);
        qualified
    }

    pub fn registry(&self) -> &MiddlewareRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut MiddlewareRegistry {
        &mut self.registry
    }

    pub(crate) fn into_registry(self) -> MiddlewareRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_restore_round_trip() {
        let mut groups = GroupContext::new();
        let before = groups.mark();

        let mark = groups.enter(
            "/api/",
            RouteAttributes::new()
                .prefix("v1")
                .namespace("api")
                .middleware("auth")
                .host("api.example.com")
                .scheme("https")
                .name("api."),
        );
        assert_eq!(mark, before);
        assert_eq!(groups.prefixes().collect::<Vec<_>>(), vec!["api/v1"]);
        assert_eq!(groups.namespaces().collect::<Vec<_>>(), vec!["api"]);
        assert_eq!(groups.route_middleware().count(), 1);
        assert_eq!(groups.host(), Some("api.example.com"));
        assert_eq!(groups.schemes(), &["https".to_owned()]);
        assert_eq!(groups.qualify_name("users"), "api.users");

        groups.restore(mark);
        assert_eq!(groups.mark(), before);
        assert_eq!(groups.host(), None);
        assert!(groups.schemes().is_empty());
    }

    #[test]
    fn absent_attributes_push_nothing() {
        let mut groups = GroupContext::new();
        groups.enter("admin", RouteAttributes::new());
        let mark = groups.mark();
        assert_eq!(mark.prefix, 1);
        assert_eq!(mark.namespace, 0);
        assert_eq!(mark.middleware, 0);
        assert_eq!(mark.host, 0);
    }

    #[test]
    fn inner_scope_overrides_host() {
        let mut groups = GroupContext::new();
        groups.enter("", RouteAttributes::new().host("a.test"));
        let inner = groups.enter("", RouteAttributes::new().host("b.test"));
        assert_eq!(groups.host(), Some("b.test"));
        groups.restore(inner);
        assert_eq!(groups.host(), Some("a.test"));
    }
}
