// Application composition root and HTTP server

use crate::autowire::{Constructible, Instance};
use crate::container::Container;
use crate::events::Dispatcher;
use crate::filter::{FilterContext, FnFilter};
use crate::kernel::{HttpKernel, MiddlewareSpec, StackBuilder, StackedKernel};
use crate::logging::{debug, error, info, trace, warn};
use crate::middleware::{AddQueuedCookies, HandleErrors, RequestId};
use crate::request::Request;
use crate::response::{Body, Payload, Response};
use crate::router::Router;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::SET_COOKIE;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::net::TcpListener;

/// Runtime knobs the application boots with.
#[derive(Debug, Clone)]
pub struct ApplicationOptions {
    /// Charset appended to `text/*` content types
    pub charset: String,
    /// Proxies whose `X-Forwarded-*` headers are believed
    pub trusted_proxies: Vec<IpAddr>,
    pub filters_enabled: bool,
    /// Show server error messages to clients
    pub debug: bool,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            charset: "UTF-8".to_string(),
            trusted_proxies: Vec::new(),
            filters_enabled: true,
            debug: false,
        }
    }
}

/// Called with the request and response once the response has been sent.
pub type FinishCallback = Arc<dyn Fn(&Request, &Response) + Send + Sync>;

/// The innermost kernel: the router's dispatch pipeline.
pub struct DispatchKernel {
    router: Arc<Router>,
    finish: Arc<[FinishCallback]>,
}

impl DispatchKernel {
    pub fn new(router: Arc<Router>, finish: Vec<FinishCallback>) -> Self {
        Self {
            router,
            finish: finish.into(),
        }
    }
}

#[async_trait]
impl HttpKernel for DispatchKernel {
    async fn handle(&self, request: Request) -> Result<Response> {
        self.router.dispatch(request).await
    }

    fn terminate(&self, request: &Request, response: &Response) {
        for callback in self.finish.iter() {
            callback(request, response);
        }
    }
}

/// The composition root: container, router, kernel stack and options.
///
/// ```ignore
/// let mut app = Application::new(ApplicationOptions::default());
/// app.router_mut().get("/", handler(|_| async { Ok("hello") }));
/// app.listen("127.0.0.1:8080".parse()?).await?;
/// ```
pub struct Application {
    container: Container,
    events: Dispatcher,
    router: Arc<Router>,
    stack: StackBuilder,
    options: ApplicationOptions,
    finish: Vec<FinishCallback>,
    kernel: OnceLock<Arc<StackedKernel>>,
}

impl Application {
    pub fn new(options: ApplicationOptions) -> Self {
        let container = Container::new();
        let events = Dispatcher::new();
        container.instance("events", Arc::new(events.clone()));

        let mut router = Router::new(container.clone(), events.clone());
        router.set_charset(&options.charset);
        if !options.filters_enabled {
            router.disable_filters();
        }

        let mut stack = StackBuilder::new();
        stack.register::<AddQueuedCookies>(&container);

        debug!(charset = %options.charset, debug = options.debug, "Application created");
        Self {
            container,
            events,
            router: Arc::new(router),
            stack,
            options,
            finish: Vec::new(),
            kernel: OnceLock::new(),
        }
    }

    /// An application with the standard stack: request ids outermost, then
    /// the error boundary, then queued cookies.
    pub fn with_default_middleware(options: ApplicationOptions) -> Self {
        let debug = options.debug;
        let mut app = Self::new(options);
        app.middleware(MiddlewareSpec::middleware(RequestId))
            .middleware(MiddlewareSpec::middleware(HandleErrors::new(debug)))
            .middleware(MiddlewareSpec::resolved(AddQueuedCookies::NAME));
        app
    }

    // ========== Accessors ==========

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn events(&self) -> &Dispatcher {
        &self.events
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Mutable router access; recomposes the kernel on the next request.
    pub fn router_mut(&mut self) -> &mut Router {
        self.kernel = OnceLock::new();
        Arc::make_mut(&mut self.router)
    }

    pub fn options(&self) -> &ApplicationOptions {
        &self.options
    }

    // ========== Kernel stack ==========

    /// Add a middleware inside those added so far.
    pub fn middleware(&mut self, spec: MiddlewareSpec) -> &mut Self {
        self.kernel = OnceLock::new();
        self.stack.push(spec);
        self
    }

    /// Add a middleware outside every other.
    pub fn prepend_middleware(&mut self, spec: MiddlewareSpec) -> &mut Self {
        self.kernel = OnceLock::new();
        self.stack.unshift(spec);
        self
    }

    /// Make a kernel type resolvable by name for [`MiddlewareSpec::Resolved`].
    pub fn register_middleware<K: HttpKernel + Constructible>(&mut self) {
        self.kernel = OnceLock::new();
        self.stack.register::<K>(&self.container);
    }

    // ========== Lifecycle hooks ==========

    /// Global before filter.
    pub fn before<F>(&mut self, callback: F)
    where
        F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync + 'static,
    {
        self.router_mut().before(callback);
    }

    /// Global after filter.
    pub fn after<F>(&mut self, callback: F)
    where
        F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync + 'static,
    {
        self.router_mut().after(callback);
    }

    /// Run a callback on every response before the pipeline returns it.
    pub fn close<F>(&mut self, callback: F)
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        let filter = FnFilter::new(move |ctx: &FilterContext<'_>| -> Result<Option<Payload>> {
            if let Some(response) = ctx.response {
                callback(ctx.request, response);
            }
            Ok(None)
        });
        self.router_mut().after_filter(Arc::new(filter), 0);
    }

    /// Run a callback once the response has been sent.
    pub fn finish<F>(&mut self, callback: F)
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        self.kernel = OnceLock::new();
        self.finish.push(Arc::new(callback));
    }

    // ========== Handling ==========

    /// The composed kernel, built on first use.
    pub fn kernel(&self) -> Result<Arc<StackedKernel>> {
        if let Some(kernel) = self.kernel.get() {
            return Ok(kernel.clone());
        }
        let kernel = Arc::new(self.compose()?);
        Ok(self.kernel.get_or_init(|| kernel).clone())
    }

    fn compose(&self) -> Result<StackedKernel> {
        self.container.instance("router", self.router.clone() as Instance);
        let base = Arc::new(DispatchKernel::new(self.router.clone(), self.finish.clone()));
        let kernel = self.stack.resolve(&self.container, base)?;
        let broken = self.router.routes().compile_all();
        if broken > 0 {
            warn!(routes = broken, "Some routes failed to compile and will never match");
        }
        debug!(
            routes = self.router.routes().len(),
            middleware = kernel.layers(),
            "Application kernel composed"
        );
        Ok(kernel)
    }

    fn prepare_request(&self, mut request: Request) -> Request {
        if !self.options.trusted_proxies.is_empty() {
            request.trusted_proxies = Arc::from(self.options.trusted_proxies.as_slice());
        }
        request
    }

    /// Run a request through the kernel stack.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        let kernel = self.kernel()?;
        kernel.handle(self.prepare_request(request)).await
    }

    /// Run every termination hook for a request that has been answered.
    pub fn terminate(&self, request: &Request, response: &Response) {
        match self.kernel() {
            Ok(kernel) => kernel.terminate(request, response),
            Err(e) => error!(error = %e, "Cannot terminate: kernel failed to compose"),
        }
    }

    // ========== Server ==========

    /// Serve HTTP/1.1 on `addr` until the listener fails.
    pub async fn listen(self, addr: SocketAddr) -> Result<()> {
        self.kernel()?;
        let app = Arc::new(self);
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Server listening");

        loop {
            let (stream, remote) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let app = app.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<Incoming>| {
                    let app = app.clone();
                    async move { serve(app, req, remote).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(remote = %remote, error = %err, "Error serving connection");
                }
            });
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("router", &self.router)
            .field("stack", &self.stack)
            .field("options", &self.options)
            .finish()
    }
}

async fn serve(
    app: Arc<Application>,
    req: hyper::Request<Incoming>,
    remote: SocketAddr,
) -> std::result::Result<hyper::Response<TerminatingBody>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut request = Request::new(parts.method.clone(), target)
        .with_version(parts.version)
        .with_remote_addr(remote.ip());
    request.headers = parts.headers;
    request.body = body.collect().await?.to_bytes();
    trace!(method = %request.method, path = %request.path, "Request received");

    let wants_json = request.wants_json();
    let kept = request.clone();
    let mut response = match app.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Unhandled error reached the transport");
            HandleErrors::new(app.options().debug).render(&e, wants_json)
        }
    };

    let body = match std::mem::replace(&mut response.body, Body::Empty) {
        Body::Empty => Full::new(Bytes::new()).map_err(|never| match never {}).boxed(),
        Body::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed(),
        Body::Stream(stream) => BodyExt::boxed(StreamBody::new(stream.map_ok(Frame::data))),
    };

    let mut builder = hyper::Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(response.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        for cookie in response.cookie_headers() {
            headers.append(SET_COOKIE, cookie);
        }
    }

    let body = TerminatingBody {
        inner: body,
        pending: Some((app, kept, response)),
    };
    match builder.body(body) {
        Ok(response) => Ok(response),
        Err(e) => {
            error!(error = %e, "Failed to build response");
            let mut fallback = hyper::Response::new(TerminatingBody::empty());
            *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            Ok(fallback)
        }
    }
}

/// Response body that runs the application's termination hooks once hyper
/// has finished with it.
pub struct TerminatingBody {
    inner: BoxBody<Bytes, std::io::Error>,
    pending: Option<(Arc<Application>, Request, Response)>,
}

impl TerminatingBody {
    fn empty() -> Self {
        Self {
            inner: Full::new(Bytes::new()).map_err(|never| match never {}).boxed(),
            pending: None,
        }
    }
}

impl HttpBody for TerminatingBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TerminatingBody {
    fn drop(&mut self) {
        if let Some((app, request, response)) = self.pending.take() {
            app.terminate(&request, &response);
        }
    }
}
