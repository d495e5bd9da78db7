// Built-in middleware for the kernel stack

use crate::autowire::{Arguments, Constructible, Parameter};
use crate::kernel::{HttpKernel, KernelRef, Middleware, Next};
use crate::logging::{debug, error, info, trace, warn};
use crate::request::Request;
use crate::response::Response;
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::{ALLOW, HeaderName, HeaderValue};

/// Error boundary: turns any error from the inner kernel into a response.
///
/// Requests that want JSON get `{"error": {"status", "message"}}`, everyone
/// else a plain-text body. `405` responses carry `Allow`. Outside debug mode
/// server errors hide their message.
pub struct HandleErrors {
    debug: bool,
}

impl HandleErrors {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Render an error for a client.
    pub fn render(&self, error: &Error, wants_json: bool) -> Response {
        let status = error.status_code();
        let message = if status.is_server_error() && !self.debug {
            status.canonical_reason().unwrap_or("Server Error").to_string()
        } else {
            error.to_string()
        };

        let mut response = if wants_json {
            let body = serde_json::json!({
                "error": {
                    "status": status.as_u16(),
                    "message": message,
                }
            });
            Response::json(&body)
                .unwrap_or_else(|_| Response::text(message.clone()))
                .with_status(status)
        } else {
            Response::text(message)
                .with_status(status)
                .with_header(http::header::CONTENT_TYPE, "text/plain")
        };

        if let Some(allow) = error.allow_header() {
            response = response.with_header(ALLOW, allow);
        }
        response
    }
}

impl Default for HandleErrors {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl Middleware for HandleErrors {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        let wants_json = request.wants_json();
        let method = request.method.clone();
        let path = request.path.clone();

        match next(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_server_error() {
                    error!(method = %method, path = %path, error = %e, "Request failed");
                } else {
                    debug!(method = %method, path = %path, error = %e, status = %e.status_code(), "Request rejected");
                }
                Ok(self.render(&e, wants_json))
            }
        }
    }
}

/// Attaches the cookies queued on a request's jar to its response, and
/// empties that jar once the response is sent.
pub struct AddQueuedCookies {
    app: KernelRef,
}

impl AddQueuedCookies {
    pub fn new(app: KernelRef) -> Self {
        Self { app }
    }
}

impl Constructible for AddQueuedCookies {
    const NAME: &'static str = "AddQueuedCookies";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::primitive("app")]
    }

    fn construct(args: &Arguments) -> Result<Self> {
        let app = args.get::<KernelRef>("app")?;
        Ok(Self::new((*app).clone()))
    }
}

#[async_trait]
impl HttpKernel for AddQueuedCookies {
    async fn handle(&self, request: Request) -> Result<Response> {
        let jar = request.cookie_jar().clone();
        let mut response = self.app.handle(request).await?;
        let queued = jar.queued();
        if !queued.is_empty() {
            trace!(count = queued.len(), "Attaching queued cookies");
            response.cookies.extend(queued);
        }
        Ok(response)
    }

    fn terminate(&self, request: &Request, _response: &Response) {
        let flushed = request.cookie_jar().drain();
        trace!(count = flushed.len(), "Cookie queue cleared");
    }
}

/// Propagates `x-request-id`, generating one when the client sent none.
pub struct RequestId;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        let id = match request.headers.get(&REQUEST_ID) {
            Some(id) => id.clone(),
            None => HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                .map_err(|e| Error::Internal(e.to_string()))?,
        };
        request.headers.insert(REQUEST_ID, id.clone());

        let mut response = next(request).await?;
        response.headers.insert(REQUEST_ID, id);
        Ok(response)
    }
}

/// Logs each request and its outcome at `info`.
#[derive(Default)]
pub struct LogRequests;

#[async_trait]
impl Middleware for LogRequests {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        let start = std::time::Instant::now();
        let method = request.method.clone();
        let path = request.path.clone();

        let result = next(request).await;
        let elapsed = start.elapsed();
        match &result {
            Ok(response) => info!(
                method = %method,
                path = %path,
                status = response.status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Request handled"
            ),
            Err(e) => warn!(
                method = %method,
                path = %path,
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request failed"
            ),
        }
        result
    }
}
