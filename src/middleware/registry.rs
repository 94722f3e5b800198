//! Middleware aliases, middleware classes and the global middleware list.
//!
//! The registry is written while routes are being defined and only read
//! afterwards, so a frozen registry can be shared across request tasks.
//!
//! Name resolution order for [`MiddlewareRef::Named`]:
//!
//! 1. alias table: an alias may point at a handler or at another name;
//! 2. class table: types implementing [`Middleware`], instantiated on resolve.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{LoggerMiddleware, Middleware, MiddlewareHandler, MiddlewareRef, from_middleware};
use crate::error::RouteDefinitionError;

/// What an alias points at.
#[derive(Clone)]
pub enum MiddlewareTarget {
    Handler(MiddlewareHandler),
    /// Another alias or a class name.
    Name(String),
}

impl From<&str> for MiddlewareTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for MiddlewareTarget {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<MiddlewareHandler> for MiddlewareTarget {
    fn from(handler: MiddlewareHandler) -> Self {
        Self::Handler(handler)
    }
}

type MiddlewareFactory = Arc<dyn Fn() -> MiddlewareHandler + Send + Sync>;

/// Append-only tables of middleware known to the application.
pub struct MiddlewareRegistry {
    aliases: HashMap<String, MiddlewareTarget>,
    classes: HashMap<String, MiddlewareFactory>,
    global: Vec<MiddlewareRef>,
}

impl Default for MiddlewareRegistry {
    fn default() -> Self {
        let mut registry = Self {
            aliases: HashMap::new(),
            classes: HashMap::new(),
            global: Vec::new(),
        };
        registry.insert_class::<LoggerMiddleware>("logger");
        registry
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut aliases: Vec<_> = self.aliases.keys().collect();
        aliases.sort();
        let mut classes: Vec<_> = self.classes.keys().collect();
        classes.sort();
        f.debug_struct("MiddlewareRegistry")
            .field("aliases", &aliases)
            .field("classes", &classes)
            .field("global", &self.global)
            .finish()
    }
}

impl MiddlewareRegistry {
    /// A registry holding only the built-in `"logger"` class.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` → `target`.
    ///
    /// Name targets may refer to aliases or classes registered later; they are
    /// checked by [`validate`](Self::validate) before serving.
    ///
    /// # Errors
    ///
    /// - [`RouteDefinitionError::InvalidMiddleware`]: empty alias or target name.
    /// - [`RouteDefinitionError::DuplicateAlias`]: the alias already exists.
    pub fn alias(
        &mut self,
        alias: impl Into<String>,
        target: impl Into<MiddlewareTarget>,
    ) -> Result<(), RouteDefinitionError> {
        let alias = alias.into();
        let target = target.into();

        if alias.trim().is_empty() {
            return Err(RouteDefinitionError::InvalidMiddleware {
                reason: "alias name is empty".into(),
            });
        }
        if matches!(&target, MiddlewareTarget::Name(name) if name.trim().is_empty()) {
            return Err(RouteDefinitionError::InvalidMiddleware {
                reason: format!("alias `{alias}` points at an empty name"),
            });
        }
        if self.aliases.contains_key(&alias) {
            return Err(RouteDefinitionError::DuplicateAlias { alias });
        }

        tracing::debug!(alias = %alias, "middleware alias registered");
        self.aliases.insert(alias, target);
        Ok(())
    }

    /// Register a middleware class under `name`; a fresh `M::default()` is
    /// created every time the name resolves.
    ///
    /// # Errors
    ///
    /// [`RouteDefinitionError::DuplicateAlias`] if a class already uses `name`.
    pub fn class<M>(&mut self, name: impl Into<String>) -> Result<(), RouteDefinitionError>
    where
        M: Middleware + Default + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RouteDefinitionError::InvalidMiddleware {
                reason: "class name is empty".into(),
            });
        }
        if self.classes.contains_key(&name) {
            return Err(RouteDefinitionError::DuplicateAlias { alias: name });
        }
        self.insert_class::<M>(name);
        Ok(())
    }

    fn insert_class<M>(&mut self, name: impl Into<String>)
    where
        M: Middleware + Default + 'static,
    {
        let factory: MiddlewareFactory = Arc::new(|| from_middleware(Arc::new(M::default())));
        self.classes.insert(name.into(), factory);
    }

    /// Append to the global list unless already present.
    pub fn push_global(&mut self, reference: MiddlewareRef) {
        if !self.global.contains(&reference) {
            self.global.push(reference);
        }
    }

    /// Middleware applied to every route, in registration order.
    pub fn global(&self) -> &[MiddlewareRef] {
        &self.global
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    /// Turn a reference into something the chain can call.
    ///
    /// # Errors
    ///
    /// - [`RouteDefinitionError::UnresolvedMiddleware`]: unknown name.
    /// - [`RouteDefinitionError::MiddlewareCycle`]: an alias chain loops.
    pub fn resolve(&self, reference: &MiddlewareRef) -> Result<MiddlewareHandler, RouteDefinitionError> {
        match reference {
            MiddlewareRef::Handler(handler) => Ok(Arc::clone(handler)),
            MiddlewareRef::Named(name) => self.resolve_name(name, &mut Vec::new()),
        }
    }

    fn resolve_name<'a>(
        &'a self,
        name: &'a str,
        trail: &mut Vec<&'a str>,
    ) -> Result<MiddlewareHandler, RouteDefinitionError> {
        if trail.contains(&name) {
            return Err(RouteDefinitionError::MiddlewareCycle {
                name: name.to_owned(),
            });
        }

        if let Some(target) = self.aliases.get(name) {
            trail.push(name);
            return match target {
                MiddlewareTarget::Handler(handler) => Ok(Arc::clone(handler)),
                MiddlewareTarget::Name(next) => self.resolve_name(next, trail),
            };
        }

        match self.classes.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(RouteDefinitionError::UnresolvedMiddleware {
                name: name.to_owned(),
            }),
        }
    }

    /// Global middleware followed by `route`, first occurrence wins.
    pub fn queue(&self, route: &[MiddlewareRef]) -> Vec<MiddlewareRef> {
        let mut queue: Vec<MiddlewareRef> = Vec::with_capacity(self.global.len() + route.len());
        for reference in self.global.iter().chain(route) {
            if !queue.contains(reference) {
                queue.push(reference.clone());
            }
        }
        queue
    }

    /// Resolve a queue built by [`queue`](Self::queue).
    pub fn resolve_all(
        &self,
        references: &[MiddlewareRef],
    ) -> Result<Vec<MiddlewareHandler>, RouteDefinitionError> {
        references.iter().map(|r| self.resolve(r)).collect()
    }

    /// Check that every alias and every global reference resolves.
    pub fn validate(&self) -> Result<(), RouteDefinitionError> {
        let mut aliases: Vec<&String> = self.aliases.keys().collect();
        aliases.sort();
        for alias in aliases {
            self.resolve_name(alias, &mut Vec::new())?;
        }
        for reference in &self.global {
            self.resolve(reference)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Next, middleware_fn};

    fn noop() -> MiddlewareHandler {
        middleware_fn(|ctx, next: Next| next.run(ctx))
    }

    #[test]
    fn builtin_logger_class_resolves() {
        let registry = MiddlewareRegistry::new();
        assert!(registry.resolve(&"logger".into()).is_ok());
    }

    #[test]
    fn alias_to_handler_returns_same_handler() {
        let handler = noop();
        let mut registry = MiddlewareRegistry::new();
        registry.alias("auth", handler.clone()).unwrap();
        let resolved = registry.resolve(&"auth".into()).unwrap();
        assert!(Arc::ptr_eq(&resolved, &handler));
    }

    #[test]
    fn alias_chain_resolves_recursively() {
        let handler = noop();
        let mut registry = MiddlewareRegistry::new();
        // Forward reference: `a` is registered before `b` exists.
        registry.alias("a", "b").unwrap();
        registry.alias("b", handler.clone()).unwrap();
        let resolved = registry.resolve(&"a".into()).unwrap();
        assert!(Arc::ptr_eq(&resolved, &handler));
    }

    #[test]
    fn alias_to_class_name() {
        let mut registry = MiddlewareRegistry::new();
        registry.alias("log", "logger").unwrap();
        assert!(registry.resolve(&"log".into()).is_ok());
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn direct_handler_reference_is_returned_as_is() {
        let handler = noop();
        let registry = MiddlewareRegistry::new();
        let resolved = registry.resolve(&handler.clone().into()).unwrap();
        assert!(Arc::ptr_eq(&resolved, &handler));
    }

    #[test]
    fn unknown_name_is_unresolved() {
        let registry = MiddlewareRegistry::new();
        let err = registry.resolve(&"csrf".into()).err().unwrap();
        assert_eq!(err, RouteDefinitionError::UnresolvedMiddleware { name: "csrf".into() });
    }

    #[test]
    fn cycles_are_detected() {
        let mut registry = MiddlewareRegistry::new();
        registry.alias("a", "b").unwrap();
        registry.alias("b", "a").unwrap();
        assert!(matches!(
            registry.resolve(&"a".into()),
            Err(RouteDefinitionError::MiddlewareCycle { .. })
        ));
        assert!(registry.validate().is_err());
    }

    #[test]
    fn aliases_are_append_only() {
        let mut registry = MiddlewareRegistry::new();
        registry.alias("auth", noop()).unwrap();
        assert_eq!(
            registry.alias("auth", noop()).unwrap_err(),
            RouteDefinitionError::DuplicateAlias { alias: "auth".into() }
        );
    }

    #[test]
    fn empty_names_are_invalid() {
        let mut registry = MiddlewareRegistry::new();
        assert!(matches!(
            registry.alias("", noop()),
            Err(RouteDefinitionError::InvalidMiddleware { .. })
        ));
        assert!(matches!(
            registry.alias("x", ""),
            Err(RouteDefinitionError::InvalidMiddleware { .. })
        ));
    }

    #[test]
    fn duplicate_class_is_rejected() {
        let mut registry = MiddlewareRegistry::new();
        assert!(registry.class::<LoggerMiddleware>("logger").is_err());
        assert!(registry.class::<LoggerMiddleware>("access_log").is_ok());
    }

    #[test]
    fn global_list_is_idempotent() {
        let mut registry = MiddlewareRegistry::new();
        registry.push_global("logger".into());
        registry.push_global("logger".into());
        assert_eq!(registry.global().len(), 1);
    }

    #[test]
    fn queue_puts_global_first_and_drops_duplicates() {
        let mut registry = MiddlewareRegistry::new();
        registry.push_global("logger".into());
        registry.push_global("session".into());
        let queue = registry.queue(&["auth".into(), "logger".into()]);
        assert_eq!(
            queue,
            vec![
                MiddlewareRef::from("logger"),
                MiddlewareRef::from("session"),
                MiddlewareRef::from("auth"),
            ]
        );
    }
}
