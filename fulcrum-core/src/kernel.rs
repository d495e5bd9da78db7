//! The kernel stack: the dispatch pipeline wrapped in middleware layers.
//!
//! Every layer is an [`HttpKernel`] holding the kernel it wraps. Layers are
//! described by [`MiddlewareSpec`]s on a [`StackBuilder`] and composed once
//! into a [`StackedKernel`]. For specs pushed as `[A, B]` a request passes
//! `A`, then `B`, then the pipeline, and the response comes back out through
//! `B` and then `A`.

use crate::autowire::{Constructible, Instance, Parameters};
use crate::container::Container;
use crate::logging::{debug, trace};
use crate::request::Request;
use crate::response::Response;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Something that turns a request into a response.
#[async_trait]
pub trait HttpKernel: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response>;

    /// Cleanup after the response has been sent. Covers this layer only;
    /// the stack calls every layer itself.
    fn terminate(&self, _request: &Request, _response: &Response) {}
}

/// A shared kernel, as handed to the layer that wraps it.
pub type KernelRef = Arc<dyn HttpKernel>;

/// The rest of the chain, as seen by a [`Middleware`].
pub type Next = Box<dyn FnOnce(Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send>> + Send>;

/// Middleware that processes the request and decides whether to call `next`.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: Request, next: Next) -> Result<Response>;

    fn terminate(&self, _request: &Request, _response: &Response) {}
}

/// A [`Middleware`] wrapped around an inner kernel.
pub struct MiddlewareLayer {
    middleware: Arc<dyn Middleware>,
    inner: KernelRef,
}

impl MiddlewareLayer {
    pub fn new(middleware: Arc<dyn Middleware>, inner: KernelRef) -> Self {
        Self { middleware, inner }
    }
}

#[async_trait]
impl HttpKernel for MiddlewareLayer {
    async fn handle(&self, request: Request) -> Result<Response> {
        let inner = self.inner.clone();
        let next: Next = Box::new(move |request| Box::pin(async move { inner.handle(request).await }));
        self.middleware.handle(request, next).await
    }

    fn terminate(&self, request: &Request, response: &Response) {
        self.middleware.terminate(request, response);
    }
}

/// Builds a layer around the kernel it is given.
pub type LayerFactory = Arc<dyn Fn(KernelRef) -> Result<KernelRef> + Send + Sync>;

/// One entry of the kernel stack.
#[derive(Clone)]
pub enum MiddlewareSpec {
    /// A closure building the layer around the inner kernel.
    Factory(LayerFactory),
    /// A container-resolved kernel type or `Arc<dyn Middleware>` binding.
    /// The inner kernel is passed as the `app` argument, next to the given
    /// constructor arguments.
    Resolved { name: String, arguments: Parameters },
    Middleware(Arc<dyn Middleware>),
}

impl MiddlewareSpec {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(KernelRef) -> Result<KernelRef> + Send + Sync + 'static,
    {
        MiddlewareSpec::Factory(Arc::new(factory))
    }

    pub fn resolved(name: &str) -> Self {
        MiddlewareSpec::Resolved {
            name: name.to_string(),
            arguments: Parameters::new(),
        }
    }

    /// Add a constructor argument to a `Resolved` spec.
    pub fn with_argument<T: std::any::Any + Send + Sync>(mut self, name: &str, value: T) -> Self {
        if let MiddlewareSpec::Resolved { arguments, .. } = &mut self {
            arguments.insert(name.to_string(), Arc::new(value) as Instance);
        }
        self
    }

    pub fn middleware(middleware: impl Middleware + 'static) -> Self {
        MiddlewareSpec::Middleware(Arc::new(middleware))
    }
}

impl std::fmt::Debug for MiddlewareSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareSpec::Factory(_) => f.write_str("Factory(..)"),
            MiddlewareSpec::Resolved { name, arguments } => f
                .debug_struct("Resolved")
                .field("name", name)
                .field("arguments", &arguments.keys().collect::<Vec<_>>())
                .finish(),
            MiddlewareSpec::Middleware(_) => f.write_str("Middleware(..)"),
        }
    }
}

type KernelCaster = fn(Instance) -> Option<KernelRef>;

fn cast<K: HttpKernel + 'static>(instance: Instance) -> Option<KernelRef> {
    instance.downcast::<K>().ok().map(|kernel| kernel as KernelRef)
}

/// Ordered middleware specs, composed around a base kernel on demand.
#[derive(Clone, Default)]
pub struct StackBuilder {
    specs: Vec<MiddlewareSpec>,
    casters: HashMap<String, KernelCaster>,
}

impl StackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer inside every layer pushed so far.
    pub fn push(&mut self, spec: MiddlewareSpec) -> &mut Self {
        self.specs.push(spec);
        self
    }

    /// Add a layer outside every layer registered so far.
    pub fn unshift(&mut self, spec: MiddlewareSpec) -> &mut Self {
        self.specs.insert(0, spec);
        self
    }

    /// Make a kernel type resolvable for [`MiddlewareSpec::Resolved`] under its name.
    pub fn register<K: HttpKernel + Constructible>(&mut self, container: &Container) {
        container.register_type::<K>();
        self.casters.insert(K::NAME.to_string(), cast::<K>);
    }

    pub fn specs(&self) -> &[MiddlewareSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Compose the stack around `base`, innermost spec first.
    pub fn resolve(&self, container: &Container, base: KernelRef) -> Result<StackedKernel> {
        let mut layers: Vec<KernelRef> = Vec::with_capacity(self.specs.len());
        let mut inner = base.clone();

        for spec in self.specs.iter().rev() {
            let layer = self.build_layer(spec, container, inner)?;
            layers.push(layer.clone());
            inner = layer;
        }
        layers.reverse();

        debug!(layers = layers.len(), "Kernel stack composed");
        Ok(StackedKernel {
            outermost: inner,
            layers,
            base,
        })
    }

    fn build_layer(&self, spec: &MiddlewareSpec, container: &Container, inner: KernelRef) -> Result<KernelRef> {
        match spec {
            MiddlewareSpec::Factory(factory) => factory(inner),
            MiddlewareSpec::Middleware(middleware) => {
                Ok(Arc::new(MiddlewareLayer::new(middleware.clone(), inner)))
            }
            MiddlewareSpec::Resolved { name, arguments } => {
                let mut arguments = arguments.clone();
                arguments.insert("app".to_string(), Arc::new(inner) as Instance);
                let instance = container.make_with(name, &arguments)?;

                if let Some(kernel) = self.casters.get(name).and_then(|caster| caster(instance.clone())) {
                    return Ok(kernel);
                }
                if let Ok(kernel) = instance.clone().downcast::<KernelRef>() {
                    return Ok((*kernel).clone());
                }
                let inner = arguments
                    .remove("app")
                    .and_then(|app| app.downcast::<KernelRef>().ok())
                    .map(|app| (*app).clone())
                    .ok_or_else(|| Error::Internal("kernel argument went missing".to_string()))?;
                instance
                    .downcast::<Arc<dyn Middleware>>()
                    .map(|middleware| Arc::new(MiddlewareLayer::new((*middleware).clone(), inner)) as KernelRef)
                    .map_err(|_| Error::Binding(format!("[{}] is not a middleware.", name)))
            }
        }
    }
}

impl std::fmt::Debug for StackBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackBuilder").field("specs", &self.specs).finish()
    }
}

/// A composed kernel stack.
pub struct StackedKernel {
    outermost: KernelRef,
    /// Outermost first
    layers: Vec<KernelRef>,
    base: KernelRef,
}

impl StackedKernel {
    pub fn layers(&self) -> usize {
        self.layers.len()
    }
}

#[async_trait]
impl HttpKernel for StackedKernel {
    async fn handle(&self, request: Request) -> Result<Response> {
        self.outermost.handle(request).await
    }

    /// Every layer's hook once, outermost first, then the base kernel's.
    fn terminate(&self, request: &Request, response: &Response) {
        for (index, layer) in self.layers.iter().enumerate() {
            trace!(layer = index, "Terminating middleware");
            layer.terminate(request, response);
        }
        self.base.terminate(request, response);
    }
}
