//! Error taxonomy for route definition, matching, and request handling.
//!
//! | Error                    | When                                   | Recoverable |
//! |--------------------------|----------------------------------------|-------------|
//! | [`RouteDefinitionError`] | building the route table at startup    | no          |
//! | [`RoutingError`]         | no route / wrong method / reverse URL  | yes         |
//! | [`HandlerError`]         | raised by middleware or the handler    | via callback|

use std::fmt;

use thiserror::Error;

use crate::http::{Method, StatusCode};

/// Errors raised while registering routes, groups, or middleware.
///
/// These are fatal: an application whose route table cannot be built must not
/// start serving requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteDefinitionError {
    #[error("invalid action `{action}`: expected a handler or `Target@member`")]
    InvalidAction { action: String },

    #[error("route `{path}` declares parameter `{name}` more than once")]
    DuplicateParameter { path: String, name: String },

    #[error("route `{path}`: required parameter `{name}` follows an optional parameter")]
    RequiredAfterOptional { path: String, name: String },

    #[error("route `{path}`: segment `{segment}` follows an optional parameter")]
    SegmentAfterOptional { path: String, segment: String },

    #[error("malformed placeholder `{segment}`: {reason}")]
    MalformedPattern { segment: String, reason: &'static str },

    #[error("invalid requirement for parameter `{name}`: {message}")]
    InvalidRequirement { name: String, message: String },

    #[error("route `{path}` must allow at least one method")]
    EmptyMethods { path: String },

    #[error("route name `{name}` is already registered")]
    DuplicateName { name: String },

    #[error("middleware alias `{alias}` is already registered")]
    DuplicateAlias { alias: String },

    #[error("invalid middleware definition: {reason}")]
    InvalidMiddleware { reason: String },

    #[error("middleware `{name}` is neither a registered alias nor a middleware class")]
    UnresolvedMiddleware { name: String },

    #[error("middleware alias `{name}` resolves to itself")]
    MiddlewareCycle { name: String },
}

/// Errors produced while matching a request or generating a URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no route matches {method} /{path}")]
    NotFound { method: Method, path: String },

    #[error("{method} is not allowed for /{path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    #[error("no route is named `{0}`")]
    UnknownRoute(String),

    #[error("route `{route}` requires parameter `{name}`")]
    MissingParameter { route: String, name: String },

    #[error("value `{value}` does not satisfy the requirement of parameter `{name}`")]
    InvalidParameter { name: String, value: String },
}

impl RoutingError {
    /// The status code a transport should answer with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::MethodNotAllowed,
            Self::NotFound { .. } => StatusCode::NotFound,
            _ => StatusCode::InternalServerError,
        }
    }

    /// The methods the path does answer to, for a method mismatch.
    pub fn allowed(&self) -> Option<&[Method]> {
        match self {
            Self::MethodNotAllowed { allowed, .. } => Some(allowed),
            _ => None,
        }
    }

    /// Value for the `Allow` header, when the error carries an allow list.
    pub fn allow_header(&self) -> Option<String> {
        self.allowed()
            .map(|allowed| allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", "))
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error raised by middleware or by the final handler.
///
/// Carries a human-readable message and, optionally, the underlying cause.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
    source: Option<BoxError>,
}

impl HandlerError {
    /// Create an error with only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it reachable through `source()`.
    pub fn wrap<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn unresolved_controller(target: &str) -> Self {
        Self::msg(format!("controller `{target}` is not registered in the container"))
    }

    pub fn unknown_member(target: &str, member: &str) -> Self {
        Self::msg(format!("controller `{target}` has no action `{member}`"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::wrap("JSON error", err)
    }
}

/// Everything [`RequestHandler::handle`](crate::handler::RequestHandler::handle)
/// can surface to its caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] RouteDefinitionError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
}

impl Error {
    /// The status code a transport should answer with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Routing(e) => e.status(),
            Self::Definition(_) | Self::Handler(_) => StatusCode::InternalServerError,
        }
    }

    pub fn routing(&self) -> Option<&RoutingError> {
        match self {
            Self::Routing(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn allow_header_lists_methods_in_order() {
        let err = RoutingError::MethodNotAllowed {
            method: Method::Post,
            path: "users".into(),
            allowed: vec![Method::Get, Method::Head],
        };
        assert_eq!(err.allow_header().as_deref(), Some("GET, HEAD"));
        assert_eq!(err.status(), StatusCode::MethodNotAllowed);
    }

    #[test]
    fn not_found_has_no_allow_header() {
        let err = RoutingError::NotFound {
            method: Method::Get,
            path: "missing".into(),
        };
        assert!(err.allow_header().is_none());
        assert_eq!(err.to_string(), "no route matches GET /missing");
    }

    #[test]
    fn handler_error_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let err = HandlerError::wrap("could not load", io);
        assert_eq!(err.to_string(), "could not load");
        assert_eq!(err.source().unwrap().to_string(), "disk gone");
    }

    #[test]
    fn crate_error_status_mapping() {
        let err: Error = HandlerError::msg("boom").into();
        assert_eq!(err.status(), StatusCode::InternalServerError);
        let err: Error = RoutingError::NotFound {
            method: Method::Get,
            path: String::new(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NotFound);
    }
}
