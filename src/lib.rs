//! # switchyard
//!
//! A declarative HTTP route table with scoped route groups and a
//! short-circuiting middleware pipeline.
//!
//! - [`router`]: placeholder grammar (`{id}`, `{num:id?}`, `{(\d+):id}`),
//!   routes, groups and the compiled match table.
//! - [`middleware`]: continuation-passing middleware with early exit, plus
//!   the alias/class registry.
//! - [`handler`]: the per-request state machine tying both together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchyard::config::Settings;
//! use switchyard::handler::RequestHandler;
//! use switchyard::http::{Response, StatusCode};
//! use switchyard::router::{RouteAttributes, Router, handler};
//! use switchyard::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.middleware("logger");
//!     router.get("/hello/{name}", handler(|ctx| async move {
//!         let name = ctx.param("name").unwrap_or("world").to_owned();
//!         Ok(Response::new(StatusCode::Ok).body(format!("Hello, {name}!")))
//!     }))?;
//!     router.group("admin", RouteAttributes::new().namespace("admin"), |r| {
//!         r.get("reports/{num:id?}", "Reports@show")?;
//!         Ok(())
//!     })?;
//!
//!     let app = RequestHandler::new(router, Settings::from_env()?)?;
//!     Server::bind("127.0.0.1:8080").await?.serve(app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub use config::{Environment, Settings};
pub use context::Context;
pub use error::{Error, HandlerError, RouteDefinitionError, RoutingError};
pub use handler::RequestHandler;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Route, RouteAttributes, Router};
pub use server::{Server, ServerError};
