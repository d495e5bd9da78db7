// Core library for the Fulcrum HTTP framework
// Container, routing, filters, dispatch pipeline and kernel stack

pub mod application;
pub mod autowire;
pub mod compiler;
pub mod container;
pub mod content_negotiation;
pub mod controller;
pub mod cookie;
pub mod error;
pub mod events;
pub mod filter;
pub mod kernel;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route;
pub mod route_collection;
pub mod router;

// Re-export commonly used types
pub use application::{Application, ApplicationOptions, DispatchKernel, FinishCallback};
pub use autowire::{Arguments, Constructible, DefaultValue, Instance, ParamKind, Parameter, Parameters};
pub use container::{Concrete, Container};
pub use content_negotiation::{Accept, MediaType};
pub use controller::{Controller, ControllerFilter, missing_method};
pub use cookie::{Cookie, CookieJar, SameSite};
pub use error::*;
pub use events::{Dispatcher, RouteMatched};
pub use filter::{Filter, FilterContext, FilterRef, FilterSpec, FnFilter};
pub use kernel::{HttpKernel, KernelRef, Middleware, MiddlewareSpec, Next, StackBuilder, StackedKernel};
pub use middleware::{AddQueuedCookies, HandleErrors, LogRequests, RequestId};
pub use request::Request;
pub use response::{Body, Payload, Response};
pub use route::{Action, BoundRoute, HandlerContext, HandlerFn, ParamValue, Route, handler};
pub use route_collection::RouteCollection;
pub use router::{GroupAttributes, Router};

pub use http::{Method, StatusCode};
