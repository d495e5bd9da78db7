// Error types for the Fulcrum framework core

use http::{Method, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Container errors
    #[error("Unresolvable dependency: {0}")]
    UnresolvableDependency(String),

    #[error("Binding error: {0}")]
    Binding(String),

    // Routing errors
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed, expected one of: {}", join_methods(.allowed))]
    MethodNotAllowed { allowed: Vec<Method> },

    // Typed HTTP errors raised by filters and controllers
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Hyper(#[from] hyper::Error),
}

fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::RouteNotFound(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::BadRequest(_) | Error::Deserialization(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Http { status, .. } => *status,

            // Container, serialization and transport failures are server errors
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// The verbs a `405` response should advertise in its `Allow` header
    pub fn allowed_methods(&self) -> Option<&[Method]> {
        match self {
            Error::MethodNotAllowed { allowed } => Some(allowed),
            _ => None,
        }
    }

    /// Value for the `Allow` header of a `405` response
    pub fn allow_header(&self) -> Option<String> {
        self.allowed_methods().map(join_methods)
    }
}

/// Build a typed HTTP error for an arbitrary status code.
///
/// Well-known client statuses map onto their dedicated variants so callers can
/// match on them; everything else becomes [`Error::Http`].
pub fn abort(status: StatusCode, message: impl Into<String>) -> Error {
    let message = message.into();
    match status {
        StatusCode::BAD_REQUEST => Error::BadRequest(message),
        StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
        StatusCode::FORBIDDEN => Error::Forbidden(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => Error::Http { status, message },
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::RouteNotFound("GET /x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::UnresolvableDependency("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(Error::Forbidden("nope".into()).is_client_error());
        assert!(Error::Internal("boom".into()).is_server_error());
    }

    #[test]
    fn test_method_not_allowed_allow_header() {
        let err = Error::MethodNotAllowed {
            allowed: vec![Method::GET, Method::HEAD],
        };
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(err.allow_header().as_deref(), Some("GET,HEAD"));
        assert_eq!(
            err.to_string(),
            "Method not allowed, expected one of: GET,HEAD"
        );
    }

    #[test]
    fn test_abort_uses_dedicated_variants() {
        assert!(matches!(
            abort(StatusCode::NOT_FOUND, "missing"),
            Error::NotFound(_)
        ));
        let teapot = abort(StatusCode::IM_A_TEAPOT, "short and stout");
        assert_eq!(teapot.status_code(), StatusCode::IM_A_TEAPOT);
    }
}
