//! Per-request context handed to middleware and handlers.
//!
//! A [`Context`] is the explicit execution context of one request: the
//! request itself, the matched route, its bound parameters, the shared
//! service [`Container`] and a type-keyed [`Extensions`] map for state
//! middleware wants to pass downstream.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::http::Request;
use crate::router::Route;

pub mod container;

pub use container::{Container, Controller};

/// Type-erased request extensions map: used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters bound by the matched route, in declaration order.
///
/// An optional parameter missing from the request path is present with a
/// `None` value.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    entries: Vec<(String, Option<String>)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing an earlier value of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// The bound value, `None` when absent or not declared.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// `true` if the route declares `name`, bound or not.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every declared parameter with its value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Bound values in order, skipping absent optional parameters.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|(_, value)| value.as_deref())
    }
}

/// Per-request context: the request, its route and bindings, services and
/// request extensions.
pub struct Context {
    request: Request,
    route: Option<Arc<Route>>,
    params: Parameters,
    container: Arc<Container>,
    extensions: Extensions,
}

impl Context {
    /// A context for a request that has not been routed.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            route: None,
            params: Parameters::new(),
            container: Arc::new(Container::new()),
            extensions: Extensions::new(),
        }
    }

    /// A context for a matched request. Bound values are also copied into
    /// the request attributes.
    pub fn routed(
        mut request: Request,
        route: Arc<Route>,
        params: Parameters,
        container: Arc<Container>,
    ) -> Self {
        for (name, value) in params.iter() {
            if let Some(value) = value {
                request.set_attribute(name, value);
            }
        }
        Self {
            request,
            route: Some(route),
            params,
            container,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The matched route, `None` before routing.
    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Shorthand for `ctx.params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Handler arguments: bound parameters in declaration order, with absent
    /// optional parameters dropped.
    pub fn args(&self) -> Vec<&str> {
        self.params.values().collect()
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Deserialize the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[test]
    fn args_drop_absent_optionals_but_param_keeps_them() {
        let mut params = Parameters::new();
        params.insert("id", Some("5".into()));
        params.insert("slug", None);

        let route = {
            let mut router = crate::router::Router::new();
            router.get("posts/{id}/{slug?}", "Posts@show").unwrap()
        };
        let ctx = Context::routed(
            Request::new(Method::Get, "/posts/5"),
            route,
            params,
            Arc::new(Container::new()),
        );

        assert_eq!(ctx.args(), vec!["5"]);
        assert_eq!(ctx.param("id"), Some("5"));
        assert_eq!(ctx.param("slug"), None);
        assert!(ctx.params().contains("slug"));
        assert_eq!(ctx.request().attribute("id"), Some("5"));
        assert_eq!(ctx.request().attribute("slug"), None);
    }

    #[test]
    fn parameters_keep_declaration_order() {
        let mut params = Parameters::new();
        params.insert("b", Some("2".into()));
        params.insert("a", Some("1".into()));
        params.insert("b", Some("3".into()));
        let names: Vec<_> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(params.get("b"), Some("3"));
    }

    #[test]
    fn extensions_are_keyed_by_type() {
        #[derive(Debug, PartialEq)]
        struct UserId(u64);

        let mut ctx = Context::new(Request::new(Method::Get, "/"));
        assert!(ctx.extensions_mut().insert(UserId(7)).is_none());
        assert_eq!(ctx.extensions().get::<UserId>(), Some(&UserId(7)));
        assert_eq!(ctx.extensions_mut().insert(UserId(8)), Some(UserId(7)));
        assert_eq!(ctx.extensions_mut().remove::<UserId>(), Some(UserId(8)));
        assert!(ctx.extensions().get::<u32>().is_none());
    }

    #[test]
    fn json_body() {
        #[derive(serde::Deserialize)]
        struct Payload {
            name: String,
        }
        let ctx = Context::new(
            Request::new(Method::Post, "/").with_body(r#"{"name":"ada"}"#),
        );
        let payload: Payload = ctx.json().unwrap();
        assert_eq!(payload.name, "ada");
    }
}
