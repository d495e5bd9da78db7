// Controller-backed route actions

use crate::autowire::{Constructible, Instance};
use crate::container::Container;
use crate::filter::{Filter, FilterRegistry, FilterSpec};
use crate::logging::{debug, trace};
use crate::request::Request;
use crate::response::Payload;
use crate::route::{BoundRoute, HandlerContext, ParamValue};
use crate::{Error, Result};
use async_trait::async_trait;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

/// A controller: a container-built object whose methods serve routes.
///
/// ```ignore
/// struct Users { repo: Arc<UserRepository> }
///
/// #[async_trait]
/// impl Controller for Users {
///     fn filters(&self) -> Vec<ControllerFilter> {
///         vec![ControllerFilter::before("auth").except(&["index"])]
///     }
///
///     async fn call_action(&self, method: &str, params: Vec<ParamValue>, ctx: HandlerContext) -> Result<Payload> {
///         match method {
///             "index" => Ok(self.repo.all().into()),
///             "show" => self.show(params[0].as_str().unwrap_or_default()),
///             other => Err(missing_method(other)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Controller: Send + Sync {
    /// Filters this controller declares for its own methods.
    fn filters(&self) -> Vec<ControllerFilter> {
        Vec::new()
    }

    /// Run `method` with the route's non-null parameters, in order.
    async fn call_action(
        &self,
        method: &str,
        parameters: Vec<ParamValue>,
        ctx: HandlerContext,
    ) -> Result<Payload>;
}

/// The error for a controller method that doesn't exist.
pub fn missing_method(method: &str) -> Error {
    Error::NotFound(format!("Controller method [{}] not found.", method))
}

/// A filter a controller declares, with its method and verb restrictions.
#[derive(Debug, Clone)]
pub struct ControllerFilter {
    pub filter: FilterSpec,
    pub before: bool,
    pub only: Option<Vec<String>>,
    pub except: Option<Vec<String>>,
    pub on: Option<Vec<Method>>,
}

impl ControllerFilter {
    fn new(filter: FilterSpec, before: bool) -> Self {
        Self {
            filter,
            before,
            only: None,
            except: None,
            on: None,
        }
    }

    /// A named before filter (`"auth"`, `"throttle:60"`).
    pub fn before(filter: &str) -> Self {
        Self::new(FilterSpec::from(filter), true)
    }

    pub fn after(filter: &str) -> Self {
        Self::new(FilterSpec::from(filter), false)
    }

    pub fn before_with(filter: Arc<dyn Filter>) -> Self {
        Self::new(FilterSpec::Inline(filter), true)
    }

    pub fn after_with(filter: Arc<dyn Filter>) -> Self {
        Self::new(FilterSpec::Inline(filter), false)
    }

    /// Apply only to these methods.
    pub fn only(mut self, methods: &[&str]) -> Self {
        self.only = Some(methods.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Apply to every method but these.
    pub fn except(mut self, methods: &[&str]) -> Self {
        self.except = Some(methods.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Apply only to requests with these verbs.
    pub fn on(mut self, verbs: &[Method]) -> Self {
        self.on = Some(verbs.to_vec());
        self
    }

    pub fn applies(&self, method: &str, verb: &Method) -> bool {
        let fails_only = self
            .only
            .as_ref()
            .is_some_and(|only| !only.iter().any(|m| m == method));
        let fails_except = self
            .except
            .as_ref()
            .is_some_and(|except| except.iter().any(|m| m == method));
        let fails_on = self.on.as_ref().is_some_and(|on| !on.contains(verb));
        !(fails_only || fails_except || fails_on)
    }
}

type Caster = fn(Instance) -> Option<Arc<dyn Controller>>;

fn cast<C: Controller + 'static>(instance: Instance) -> Option<Arc<dyn Controller>> {
    instance
        .downcast::<C>()
        .ok()
        .map(|controller| controller as Arc<dyn Controller>)
}

/// Resolves controllers through the container and runs their actions.
#[derive(Clone, Default)]
pub struct ControllerDispatcher {
    casters: HashMap<String, Caster>,
}

impl ControllerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `C` resolvable as a controller under [`Constructible::NAME`].
    pub fn register<C: Controller + Constructible>(&mut self, container: &Container) {
        container.register_type::<C>();
        self.casters.insert(C::NAME.to_string(), cast::<C>);
        debug!(controller = C::NAME, "Controller registered");
    }

    /// Resolve a controller by name.
    ///
    /// Values of a registered controller type are used directly; anything else
    /// must have been bound as an `Arc<dyn Controller>`.
    pub fn make(&self, container: &Container, name: &str) -> Result<Arc<dyn Controller>> {
        let instance = container.make(name)?;
        if let Some(caster) = self.casters.get(name) {
            if let Some(controller) = caster(instance.clone()) {
                return Ok(controller);
            }
        }
        instance
            .downcast::<Arc<dyn Controller>>()
            .map(|controller| (*controller).clone())
            .map_err(|_| Error::Binding(format!("[{}] is not a controller.", name)))
    }

    /// Run a controller action for a bound route.
    ///
    /// After filters that apply are queued on the route first; before filters
    /// may short-circuit the action.
    pub async fn dispatch(
        &self,
        route: &mut BoundRoute,
        request: Arc<Request>,
        container: &Container,
        filters: &FilterRegistry,
        controller: &str,
        method: &str,
    ) -> Result<Payload> {
        if method.is_empty() {
            return Err(Error::Internal(format!(
                "Controller action for [{}] names no method",
                controller
            )));
        }

        let instance = self.make(container, controller)?;
        let declared = instance.filters();

        for filter in declared.iter().filter(|f| !f.before) {
            if filter.applies(method, &request.method) {
                route.queue_after(filter.filter.clone());
            }
        }

        for filter in declared.iter().filter(|f| f.before) {
            if !filter.applies(method, &request.method) {
                continue;
            }
            let result = filters
                .call(&filter.filter, Some(&*route), &request, None, container)
                .await?;
            if let Some(payload) = result {
                debug!(controller, method, filter = ?filter.filter, "Controller filter short-circuited");
                return Ok(payload);
            }
        }

        trace!(controller, method, "Calling controller action");
        let parameters = route.parameters_without_nulls();
        let ctx = HandlerContext {
            request,
            route: route.clone(),
            container: container.clone(),
        };
        instance.call_action(method, parameters, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autowire::Arguments;

    #[test]
    fn test_filter_applicability() {
        let filter = ControllerFilter::before("auth").only(&["edit", "update"]);
        assert!(filter.applies("edit", &Method::GET));
        assert!(!filter.applies("index", &Method::GET));

        let filter = ControllerFilter::before("auth").except(&["index"]);
        assert!(!filter.applies("index", &Method::GET));
        assert!(filter.applies("show", &Method::GET));

        let filter = ControllerFilter::before("csrf").on(&[Method::POST]);
        assert!(filter.applies("store", &Method::POST));
        assert!(!filter.applies("store", &Method::GET));
    }

    struct Echo;

    impl Constructible for Echo {
        const NAME: &'static str = "Echo";

        fn construct(_: &Arguments) -> Result<Self> {
            Ok(Echo)
        }
    }

    #[async_trait]
    impl Controller for Echo {
        async fn call_action(
            &self,
            method: &str,
            _: Vec<ParamValue>,
            _: HandlerContext,
        ) -> Result<Payload> {
            match method {
                "ping" => Ok("pong".into()),
                other => Err(missing_method(other)),
            }
        }
    }

    #[test]
    fn test_make_registered_and_bound_controllers() {
        let container = Container::new();
        let mut dispatcher = ControllerDispatcher::new();
        dispatcher.register::<Echo>(&container);
        assert!(dispatcher.make(&container, "Echo").is_ok());

        container.bind(
            "Dynamic",
            |_, _| Ok(Arc::new(Arc::new(Echo) as Arc<dyn Controller>) as Instance),
            false,
        );
        assert!(dispatcher.make(&container, "Dynamic").is_ok());

        container.instance("NotAController", Arc::new(5u8));
        assert!(matches!(
            dispatcher.make(&container, "NotAController"),
            Err(Error::Binding(_))
        ));
    }
}
