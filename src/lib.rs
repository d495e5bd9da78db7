// Fulcrum - An HTTP framework for Rust built around a service container
//
// This library re-exports the container, router, dispatch pipeline and
// kernel stack from fulcrum-core, plus the optional satellite crates.

// Re-export core functionality
pub use fulcrum_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use fulcrum_config;

#[cfg(feature = "testing")]
pub use fulcrum_testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Application,
        ApplicationOptions,
        Arguments,
        Constructible,
        Container,
        Controller,
        ControllerFilter,
        Error,
        FilterContext,
        GroupAttributes,
        HandlerContext,
        Method,
        Middleware,
        MiddlewareSpec,
        Next,
        Parameter,
        Payload,
        Request,
        Response,
        Result,
        Router,
        StatusCode,
        handler,
    };
    pub use async_trait::async_trait;
}
