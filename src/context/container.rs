//! Service container consulted when resolving `Target@member` actions.
//!
//! The container is built before serving and shared read-only behind an
//! `Arc` by every request.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Context;
use crate::router::{BoxFuture, HandlerResult};

/// A controller whose actions are addressed by member name.
///
/// ```rust
/// use std::sync::Arc;
/// use switchyard::context::{Context, Controller};
/// use switchyard::http::{Response, StatusCode};
/// use switchyard::router::{BoxFuture, HandlerResult};
///
/// struct Users;
///
/// impl Controller for Users {
///     fn responds_to(&self, member: &str) -> bool {
///         member == "show"
///     }
///
///     fn call(self: Arc<Self>, _member: &str, ctx: Context) -> BoxFuture<'static, HandlerResult> {
///         let id = ctx.param("id").unwrap_or_default().to_owned();
///         Box::pin(async move { Ok(Response::new(StatusCode::Ok).body(id)) })
///     }
/// }
/// ```
pub trait Controller: Send + Sync {
    /// Whether `member` names one of this controller's actions.
    fn responds_to(&self, member: &str) -> bool;

    /// Run action `member`. Only called after `responds_to(member)`.
    fn call(self: Arc<Self>, member: &str, ctx: Context) -> BoxFuture<'static, HandlerResult>;
}

type ControllerFactory = Arc<dyn Fn() -> Arc<dyn Controller> + Send + Sync>;

/// Named services and controller factories.
#[derive(Default)]
pub struct Container {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    controllers: HashMap<String, ControllerFactory>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if a service or a controller is registered as `name`.
    pub fn has(&self, name: &str) -> bool {
        self.services.contains_key(name) || self.controllers.contains_key(name)
    }

    /// Register a service, replacing any previous one of the same name.
    pub fn insert<T>(&mut self, name: impl Into<String>, service: T)
    where
        T: Send + Sync + 'static,
    {
        self.services.insert(name.into(), Arc::new(service));
    }

    /// The service registered as `name`, if it has type `T`.
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let service = Arc::clone(self.services.get(name)?);
        service.downcast::<T>().ok()
    }

    /// Register a controller. `factory` runs once per request that targets it.
    ///
    /// Namespaced routes look controllers up by their full name, e.g.
    /// `admin::Reports`.
    pub fn register_controller<C, F>(&mut self, name: impl Into<String>, factory: F)
    where
        C: Controller + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let factory: ControllerFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Controller>);
        self.controllers.insert(name.into(), factory);
    }

    /// A fresh controller instance.
    pub fn controller(&self, name: &str) -> Option<Arc<dyn Controller>> {
        self.controllers.get(name).map(|factory| factory())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<_> = self.services.keys().collect();
        services.sort();
        let mut controllers: Vec<_> = self.controllers.keys().collect();
        controllers.sort();
        f.debug_struct("Container")
            .field("services", &services)
            .field("controllers", &controllers)
            .finish()
    }
}
