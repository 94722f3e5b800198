//! The route-definition DSL on [`Router`].
//!
//! Every verb method has a `*_with` twin taking [`RouteAttributes`]. All of
//! them funnel into [`Router::register`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

use super::group::GroupMark;
use super::route::{IntoAction, Route, RouteAttributes};
use super::Router;
use crate::error::RouteDefinitionError;
use crate::http::Method;
use crate::middleware::{Middleware, MiddlewareRef, MiddlewareTarget};

type Registered = Result<Arc<Route>, RouteDefinitionError>;

macro_rules! verb {
    ($name:ident, $with:ident, $method:expr, $verb:literal) => {
        #[doc = concat!("Register a `", $verb, "` route.")]
        pub fn $name(&mut self, path: &str, action: impl IntoAction) -> Registered {
            self.register([$method], path, action, RouteAttributes::new())
        }

        #[doc = concat!("[`", stringify!($name), "`](Self::", stringify!($name), ") with route attributes.")]
        pub fn $with(
            &mut self,
            path: &str,
            action: impl IntoAction,
            attributes: RouteAttributes,
        ) -> Registered {
            self.register([$method], path, action, attributes)
        }
    };
}

impl Router {
    verb!(get, get_with, Method::Get, "GET");
    verb!(post, post_with, Method::Post, "POST");
    verb!(put, put_with, Method::Put, "PUT");
    verb!(patch, patch_with, Method::Patch, "PATCH");
    verb!(delete, delete_with, Method::Delete, "DELETE");
    verb!(head, head_with, Method::Head, "HEAD");
    verb!(options, options_with, Method::Options, "OPTIONS");
    verb!(trace, trace_with, Method::Trace, "TRACE");

    /// Register a route answering every routable method.
    pub fn any(&mut self, path: &str, action: impl IntoAction) -> Registered {
        self.register(Method::ROUTABLE, path, action, RouteAttributes::new())
    }

    /// Register one route for an explicit list of methods.
    pub fn match_methods(&mut self, methods: &[Method], path: &str, action: impl IntoAction) -> Registered {
        self.register(methods.iter().cloned(), path, action, RouteAttributes::new())
    }

    /// Build a route under the current group scope and append it.
    ///
    /// # Errors
    ///
    /// Anything [`Route`] construction rejects, plus
    /// [`RouteDefinitionError::DuplicateName`] when `attributes.name` (after
    /// group name prefixing) is already taken.
    pub fn register(
        &mut self,
        methods: impl IntoIterator<Item = Method>,
        path: &str,
        action: impl IntoAction,
        attributes: RouteAttributes,
    ) -> Registered {
        let action = action.into_action()?;
        let route = Route::new(methods.into_iter().collect(), path, action, attributes, &self.groups)?;

        if let Some(name) = route.name() {
            if !self.names.insert(name.to_owned()) {
                return Err(RouteDefinitionError::DuplicateName { name: name.to_owned() });
            }
        }

        debug!(
            methods = ?route.methods(),
            path = %route.full_path(),
            name = route.name().unwrap_or(""),
            "route registered"
        );

        let route = Arc::new(route);
        self.routes.push(Arc::clone(&route));
        Ok(route)
    }

    /// Run `define` with `prefix` and `attributes` applied to every route it
    /// registers.
    ///
    /// The group stacks are restored to their depth on entry when `define`
    /// returns, whether it returned `Ok`, returned `Err` or panicked. A panic
    /// is resumed after restoring.
    pub fn group<F>(&mut self, prefix: &str, attributes: RouteAttributes, define: F) -> Result<(), RouteDefinitionError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouteDefinitionError>,
    {
        let mark = self.groups.enter(prefix, attributes);
        debug!(prefix, depth = mark.prefix + 1, "entering route group");
        self.scoped(mark, define)
    }

    /// Apply `middleware` as route middleware to every route `define` registers.
    pub fn middleware_scope<I, F>(&mut self, middleware: I, define: F) -> Result<(), RouteDefinitionError>
    where
        I: IntoIterator,
        I::Item: Into<MiddlewareRef>,
        F: FnOnce(&mut Router) -> Result<(), RouteDefinitionError>,
    {
        let middleware = middleware.into_iter().map(Into::into).collect();
        let mark = self.groups.enter_middleware(middleware);
        self.scoped(mark, define)
    }

    fn scoped<F>(&mut self, mark: GroupMark, define: F) -> Result<(), RouteDefinitionError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouteDefinitionError>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| define(self)));
        self.groups.restore(mark);
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Add middleware that runs for every route. Adding the same reference
    /// twice has no effect.
    pub fn middleware(&mut self, middleware: impl Into<MiddlewareRef>) {
        self.groups.registry_mut().push_global(middleware.into());
    }

    /// Register a middleware alias.
    ///
    /// # Errors
    ///
    /// See [`MiddlewareRegistry::alias`](crate::middleware::MiddlewareRegistry::alias).
    pub fn middleware_alias(
        &mut self,
        alias: impl Into<String>,
        target: impl Into<MiddlewareTarget>,
    ) -> Result<(), RouteDefinitionError> {
        self.groups.registry_mut().alias(alias, target)
    }

    /// Register a middleware class: `name` resolves to a fresh `M::default()`.
    pub fn middleware_class<M>(&mut self, name: impl Into<String>) -> Result<(), RouteDefinitionError>
    where
        M: Middleware + Default + 'static,
    {
        self.groups.registry_mut().class::<M>(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Response, StatusCode};
    use crate::router::{Action, Handler, handler};

    fn ok() -> Handler {
        handler(|_ctx| async { Ok(Response::new(StatusCode::Ok)) })
    }

    #[test]
    fn verbs_register_single_method() {
        let mut router = Router::new();
        let route = router.delete("users/{id}", "Users@destroy").unwrap();
        assert_eq!(route.methods(), &[Method::Delete]);
        assert!(matches!(route.action(), Action::Controller { member, .. } if member == "destroy"));

        let route = router.trace("echo", ok()).unwrap();
        assert_eq!(route.methods(), &[Method::Trace]);
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn any_and_match_methods() {
        let mut router = Router::new();
        let any = router.any("ping", ok()).unwrap();
        assert_eq!(any.methods(), &Method::ROUTABLE);

        let some = router
            .match_methods(&[Method::Get, Method::Post], "form", ok())
            .unwrap();
        assert_eq!(some.methods(), &[Method::Get, Method::Post]);
    }

    #[test]
    fn invalid_action_is_rejected() {
        let mut router = Router::new();
        let err = router.get("x", "NoMember").unwrap_err();
        assert!(matches!(err, RouteDefinitionError::InvalidAction { .. }));
        assert!(router.is_empty());
    }

    #[test]
    fn group_applies_prefix_and_middleware() {
        let mut router = Router::new();
        router
            .group("admin", RouteAttributes::new().middleware("auth"), |r| {
                r.get("/dashboard", "Dashboard@index")?;
                Ok(())
            })
            .unwrap();

        let compiled = router.compiled_routes();
        assert_eq!(compiled.len(), 1);
        let route = compiled[0].route();
        assert_eq!(route.full_path(), "admin/dashboard");
        assert!(route.middleware().contains(&MiddlewareRef::from("auth")));
    }

    #[test]
    fn nested_groups_accumulate() {
        let mut router = Router::new();
        router
            .group(
                "api",
                RouteAttributes::new().namespace("api").middleware("throttle").name("api."),
                |r| {
                    r.group(
                        "v1",
                        RouteAttributes::new().namespace("v1").middleware("auth").name("v1."),
                        |r| {
                            r.get_with("users", "Users@index", RouteAttributes::new().name("users").middleware("throttle"))?;
                            Ok(())
                        },
                    )?;
                    r.get("status", "Status@show")?;
                    Ok(())
                },
            )
            .unwrap();

        let users = router.route_by_name("api.v1.users").unwrap();
        assert_eq!(users.full_path(), "api/v1/users");
        assert_eq!(users.namespace(), Some("api::v1"));
        assert_eq!(users.controller_target().as_deref(), Some("api::v1::Users"));
        assert_eq!(
            users.middleware(),
            &[MiddlewareRef::from("throttle"), MiddlewareRef::from("auth")]
        );

        let status = &router.routes()[1];
        assert_eq!(status.full_path(), "api/status");
        assert_eq!(status.middleware(), &[MiddlewareRef::from("throttle")]);
    }

    #[test]
    fn group_restores_stacks_after_success() {
        let mut router = Router::new();
        let before = router.groups().mark();
        router
            .group(
                "a",
                RouteAttributes::new().namespace("n").host("h.test").scheme("https").middleware("m"),
                |r| {
                    r.group("b", RouteAttributes::new().middleware("m2"), |r| {
                        r.get("c", "C@c")?;
                        Ok(())
                    })
                },
            )
            .unwrap();
        assert_eq!(router.groups().mark(), before);

        let outside = router.get("plain", "P@p").unwrap();
        assert_eq!(outside.full_path(), "plain");
        assert!(outside.middleware().is_empty());
        assert!(outside.host().is_none());
        assert!(outside.schemes().is_empty());
        assert!(outside.namespace().is_none());
    }

    #[test]
    fn group_restores_stacks_after_error() {
        let mut router = Router::new();
        let before = router.groups().mark();

        let err = router
            .group("outer", RouteAttributes::new().middleware("auth"), |r| {
                r.group("inner", RouteAttributes::new().namespace("x"), |r| {
                    r.get("{a?}/{b}", "A@b")?;
                    Ok(())
                })
            })
            .unwrap_err();
        assert!(matches!(err, RouteDefinitionError::RequiredAfterOptional { .. }));
        assert_eq!(router.groups().mark(), before);
        assert_eq!(router.groups().prefixes().count(), 0);
    }

    #[test]
    fn group_restores_stacks_after_panic() {
        let mut router = Router::new();
        router
            .group("kept", RouteAttributes::new(), |r| {
                let before = r.groups().mark();
                let caught = panic::catch_unwind(AssertUnwindSafe(|| {
                    r.group("doomed", RouteAttributes::new().middleware("auth"), |_| {
                        panic!("definition block failed")
                    })
                }));
                assert!(caught.is_err());
                assert_eq!(r.groups().mark(), before);
                assert_eq!(r.groups().prefixes().collect::<Vec<_>>(), vec!["kept"]);
                Ok(())
            })
            .unwrap();
        assert_eq!(router.groups().mark(), GroupMark::default());
    }

    #[test]
    fn middleware_scope_only_covers_its_block() {
        let mut router = Router::new();
        router
            .middleware_scope(["auth", "verified"], |r| {
                r.get("inside", "I@i")?;
                Ok(())
            })
            .unwrap();
        router.get("outside", "O@o").unwrap();

        assert_eq!(
            router.routes()[0].middleware(),
            &[MiddlewareRef::from("auth"), MiddlewareRef::from("verified")]
        );
        assert!(router.routes()[1].middleware().is_empty());
    }

    #[test]
    fn global_middleware_is_idempotent() {
        let mut router = Router::new();
        router.middleware("logger");
        router.middleware("logger");
        assert_eq!(router.registry().global(), &[MiddlewareRef::from("logger")]);
    }

    #[test]
    fn duplicate_route_names_are_rejected() {
        let mut router = Router::new();
        router
            .get_with("a", "A@a", RouteAttributes::new().name("home"))
            .unwrap();
        let err = router
            .get_with("b", "B@b", RouteAttributes::new().name("home"))
            .unwrap_err();
        assert_eq!(err, RouteDefinitionError::DuplicateName { name: "home".into() });
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn aliases_are_registered_through_the_router() {
        let mut router = Router::new();
        router.middleware_alias("log", "logger").unwrap();
        assert!(router.registry().has_alias("log"));
        assert!(router.middleware_alias("log", "logger").is_err());
    }
}
