//! Testing utilities for the Fulcrum framework.
//!
//! Requests go through the application's whole kernel stack in-process, with
//! termination hooks run afterwards, so middleware, filters and controllers
//! behave as they would behind a real listener.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fulcrum_testing::*;
//! use fulcrum_core::{HandlerContext, handler};
//!
//! # tokio_test::block_on(async {
//! let app = TestAppBuilder::new()
//!     .get("/hello", handler(|_: HandlerContext| async { Ok("Hello!") }))
//!     .build();
//!
//! let client = app.client();
//! let response = client.get("/hello").await;
//! assert_status(&response, 200);
//! assert_body_contains(&response, "Hello!");
//! # });
//! ```
//!
//! ## Building Requests
//!
//! ```no_run
//! use fulcrum_testing::*;
//! use fulcrum_core::Method;
//!
//! # tokio_test::block_on(async {
//! # let app = TestAppBuilder::new().build();
//! let client = app.client();
//! let response = client
//!     .build(Method::POST, "/api/users")
//!     .header("authorization", "Bearer token")
//!     .json(&serde_json::json!({ "name": "Alice" }))
//!     .unwrap()
//!     .send(&client)
//!     .await;
//! assert_json_content_type(&response);
//! # });
//! ```

mod assertions;
mod test_app;
mod test_client;

pub use assertions::{
    assert_body_contains, assert_client_error, assert_header, assert_json, assert_json_content_type,
    assert_server_error, assert_status, assert_success,
};
pub use test_app::{TestApp, TestAppBuilder};
pub use test_client::{TestClient, TestRequestBuilder, TestResponse};

// Re-export common testing utilities
pub use tokio::test as tokio_test;
