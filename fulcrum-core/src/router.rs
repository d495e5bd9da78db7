// Router: route registration and the dispatch pipeline

use crate::autowire::{Constructible, Instance};
use crate::container::Container;
use crate::controller::{Controller, ControllerDispatcher};
use crate::events::{Dispatcher, RouteMatched};
use crate::filter::{Filter, FilterContext, FilterRef, FilterRegistry, FilterSpec, FnFilter};
use crate::logging::{debug, trace};
use crate::request::Request;
use crate::response::{Payload, Response};
use crate::route::{Action, BoundRoute, ParamValue, Route};
use crate::route_collection::{RouteCollection, VERBS};
use crate::{Error, Result};
use http::Method;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Turns a raw route parameter into a domain value.
pub type ModelBinder = Arc<dyn Fn(&str, &BoundRoute) -> Result<Instance> + Send + Sync>;

/// Attributes shared by the routes of a group.
#[derive(Debug, Clone, Default)]
pub struct GroupAttributes {
    pub prefix: Option<String>,
    pub domain: Option<String>,
    pub before: Vec<FilterRef>,
    pub after: Vec<FilterRef>,
}

impl GroupAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn before(mut self, filters: &str) -> Self {
        self.before.extend(FilterRef::parse_list(filters));
        self
    }

    pub fn after(mut self, filters: &str) -> Self {
        self.after.extend(FilterRef::parse_list(filters));
        self
    }

    /// Nest `self` inside `outer`: prefixes join, the inner domain wins,
    /// outer filters run first.
    fn merged_into(self, outer: &GroupAttributes) -> Self {
        let prefix = match (&outer.prefix, &self.prefix) {
            (Some(outer), Some(inner)) => Some(format!(
                "{}/{}",
                outer.trim_matches('/'),
                inner.trim_matches('/')
            )),
            (Some(outer), None) => Some(outer.clone()),
            (None, inner) => inner.clone(),
        };
        Self {
            prefix,
            domain: self.domain.or_else(|| outer.domain.clone()),
            before: outer.before.iter().cloned().chain(self.before).collect(),
            after: outer.after.iter().cloned().chain(self.after).collect(),
        }
    }
}

/// Route registration plus the per-request dispatch pipeline.
///
/// Cloning copies the route table and filter tables; the container and event
/// dispatcher are shared.
#[derive(Clone)]
pub struct Router {
    routes: RouteCollection,
    filters: FilterRegistry,
    binders: HashMap<String, ModelBinder>,
    patterns: HashMap<String, String>,
    group_stack: Vec<GroupAttributes>,
    controllers: ControllerDispatcher,
    events: Dispatcher,
    container: Container,
    charset: String,
}

impl Router {
    pub fn new(container: Container, events: Dispatcher) -> Self {
        Self {
            routes: RouteCollection::new(),
            filters: FilterRegistry::new(),
            binders: HashMap::new(),
            patterns: HashMap::new(),
            group_stack: Vec::new(),
            controllers: ControllerDispatcher::new(),
            events,
            container,
            charset: "UTF-8".to_string(),
        }
    }

    // ========== Route registration ==========

    /// `GET` (and `HEAD`) route.
    pub fn get(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&[Method::GET], uri, action.into())
    }

    pub fn post(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&[Method::POST], uri, action.into())
    }

    pub fn put(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&[Method::PUT], uri, action.into())
    }

    pub fn patch(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&[Method::PATCH], uri, action.into())
    }

    pub fn delete(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&[Method::DELETE], uri, action.into())
    }

    pub fn options(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&[Method::OPTIONS], uri, action.into())
    }

    /// Route answering every verb.
    pub fn any(&mut self, uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(&VERBS, uri, action.into())
    }

    pub fn matching(&mut self, methods: &[Method], uri: &str, action: impl Into<Action>) -> &mut Route {
        self.add_route(methods, uri, action.into())
    }

    fn add_route(&mut self, methods: &[Method], uri: &str, action: Action) -> &mut Route {
        let group = self.group_stack.last().cloned().unwrap_or_default();

        let mut route = Route::new(methods, uri, action);
        if let Some(prefix) = &group.prefix {
            let joined = format!("{}/{}", prefix.trim_matches('/'), route.uri().trim_matches('/'));
            let joined = joined.trim_matches('/');
            route.set_uri(if joined.is_empty() { "/".to_string() } else { joined.to_string() });
        }
        if let Some(domain) = &group.domain {
            route.domain(domain);
        }
        for filter in &group.before {
            route.before(&filter.to_string());
        }
        for filter in &group.after {
            route.after(&filter.to_string());
        }

        for name in route.parameter_names() {
            if let Some(pattern) = self.patterns.get(&name) {
                route.where_default(&name, pattern);
            }
        }

        self.routes.add(route)
    }

    /// Register routes sharing a prefix, domain or filters.
    pub fn group<F>(&mut self, attributes: GroupAttributes, routes: F)
    where
        F: FnOnce(&mut Router),
    {
        let attributes = match self.group_stack.last() {
            Some(outer) => attributes.merged_into(outer),
            None => attributes,
        };
        self.group_stack.push(attributes);
        routes(self);
        self.group_stack.pop();
    }

    /// Constrain a parameter name on every route registered after this call.
    pub fn pattern(&mut self, name: &str, pattern: &str) {
        self.patterns.insert(name.to_string(), pattern.to_string());
    }

    /// Make a controller type resolvable for `"Name@method"` actions.
    pub fn register_controller<C: Controller + Constructible>(&mut self) {
        self.controllers.register::<C>(&self.container);
    }

    // ========== Filters ==========

    /// Register a named filter.
    pub fn filter(&mut self, name: &str, filter: impl Filter + 'static) {
        self.filters.register(name, Arc::new(filter));
    }

    /// Global before filter.
    pub fn before<F>(&mut self, callback: F)
    where
        F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync + 'static,
    {
        self.before_filter(Arc::new(FnFilter::new(callback)), 0);
    }

    /// Global after filter.
    pub fn after<F>(&mut self, callback: F)
    where
        F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync + 'static,
    {
        self.after_filter(Arc::new(FnFilter::new(callback)), 0);
    }

    pub fn before_filter(&mut self, filter: Arc<dyn Filter>, priority: i32) {
        self.filters.add_global_before(filter, priority);
    }

    pub fn after_filter(&mut self, filter: Arc<dyn Filter>, priority: i32) {
        self.filters.add_global_after(filter, priority);
    }

    /// Run the named filter before requests whose path matches a glob.
    pub fn when(&mut self, pattern: &str, filter: &str, methods: Option<&[Method]>) {
        self.filters.when(pattern, filter, methods);
    }

    pub fn when_regex(&mut self, pattern: &str, filter: &str, methods: Option<&[Method]>) -> Result<()> {
        self.filters.when_regex(pattern, filter, methods)
    }

    pub fn enable_filters(&mut self) {
        self.filters.enable();
    }

    pub fn disable_filters(&mut self) {
        self.filters.disable();
    }

    pub fn filters_enabled(&self) -> bool {
        self.filters.enabled()
    }

    // ========== Model binding ==========

    /// Replace the parameter `key` with the binder's value on every match.
    pub fn bind<F>(&mut self, key: &str, binder: F)
    where
        F: Fn(&str, &BoundRoute) -> Result<Instance> + Send + Sync + 'static,
    {
        self.binders.insert(key.to_string(), Arc::new(binder));
    }

    /// Bind `key` to a lookup; a miss is a `404`.
    pub fn model<T, F>(&mut self, key: &str, finder: F)
    where
        T: Any + Send + Sync,
        F: Fn(&str) -> Result<Option<T>> + Send + Sync + 'static,
    {
        let key_name = key.to_string();
        self.bind(key, move |value, _| match finder(value)? {
            Some(model) => Ok(Arc::new(model) as Instance),
            None => Err(Error::NotFound(format!(
                "No model for route parameter [{}] = {}",
                key_name, value
            ))),
        });
    }

    /// Bind `key` to a lookup, calling `fallback` on a miss.
    pub fn model_or<T, F, G>(&mut self, key: &str, finder: F, fallback: G)
    where
        T: Any + Send + Sync,
        F: Fn(&str) -> Result<Option<T>> + Send + Sync + 'static,
        G: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.bind(key, move |value, _| {
            let model = match finder(value)? {
                Some(model) => model,
                None => fallback()?,
            };
            Ok(Arc::new(model) as Instance)
        });
    }

    fn substitute_bindings(&self, route: &mut BoundRoute) -> Result<()> {
        if self.binders.is_empty() {
            return Ok(());
        }
        let raw: Vec<(String, String)> = route
            .parameters()
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
            .collect();
        for (key, value) in raw {
            if let Some(binder) = self.binders.get(&key) {
                trace!(parameter = %key, "Substituting route binding");
                let bound = binder(&value, route)?;
                route.set_parameter(&key, ParamValue::Bound(bound));
            }
        }
        Ok(())
    }

    // ========== Accessors ==========

    pub fn routes(&self) -> &RouteCollection {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteCollection {
        &mut self.routes
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn events(&self) -> &Dispatcher {
        &self.events
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn set_charset(&mut self, charset: &str) {
        self.charset = charset.to_string();
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Listen for `router.matched`.
    pub fn matched<F>(&self, callback: F)
    where
        F: Fn(&RouteMatched) + Send + Sync + 'static,
    {
        self.events.listen_for::<RouteMatched, _>("router.matched", callback);
    }

    // ========== Dispatch ==========

    /// Carry a request through the filters and the matched route to a response.
    ///
    /// Global before filters may answer the request outright. The response is
    /// prepared against the request before global after filters see it.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        let request = Arc::new(request);

        let before = self.filters.global_before();
        let short_circuit = self
            .filters
            .call_global(&before, &request, None, &self.container)
            .await?;

        let mut response = match short_circuit {
            Some(payload) => {
                debug!(path = %request.path(), "Global before filter answered the request");
                payload.into_response()?
            }
            None => self.dispatch_to_route(request.clone()).await?,
        };
        response.prepare(&request, &self.charset);

        let after = self.filters.global_after();
        self.filters
            .call_global_after(&after, &request, &response, &self.container)
            .await?;

        Ok(response)
    }

    /// Match a route, bind its parameters and fire `router.matched`.
    pub fn find_route(&self, request: &Arc<Request>) -> Result<BoundRoute> {
        let mut route = self.routes.match_request(request)?;
        self.substitute_bindings(&mut route)?;

        debug!(
            uri = %route.route().uri(),
            name = route.name().unwrap_or(""),
            "router.matched"
        );
        self.events.fire(
            "router.matched",
            &RouteMatched {
                route: route.clone(),
                request: request.clone(),
            },
        );
        Ok(route)
    }

    async fn dispatch_to_route(&self, request: Arc<Request>) -> Result<Response> {
        let mut route = self.find_route(&request)?;

        let payload = match self.call_route_before(&route, &request).await? {
            Some(payload) => {
                debug!(uri = %route.route().uri(), "Route before filter answered the request");
                payload
            }
            None => self.run_route(&mut route, request.clone()).await?,
        };

        let mut response = payload.into_response()?;
        response.prepare(&request, &self.charset);

        for filter in route.after_filters() {
            self.filters
                .call(&filter, Some(&route), &request, Some(&response), &self.container)
                .await?;
        }

        Ok(response)
    }

    /// Pattern filters, then the route's own before filters.
    async fn call_route_before(&self, route: &BoundRoute, request: &Request) -> Result<Option<Payload>> {
        let pattern_filters = self.filters.pattern_filters_for(request);
        let attached = route.route().before_filters().iter().cloned();

        for filter in pattern_filters.into_iter().chain(attached) {
            let spec = FilterSpec::Named(filter);
            if let Some(payload) = self
                .filters
                .call(&spec, Some(route), request, None, &self.container)
                .await?
            {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    async fn run_route(&self, route: &mut BoundRoute, request: Arc<Request>) -> Result<Payload> {
        match route.route().action().clone() {
            Action::Handler(handler) => {
                let ctx = crate::route::HandlerContext {
                    request,
                    route: route.clone(),
                    container: self.container.clone(),
                };
                handler(ctx).await
            }
            Action::Controller { controller, method } => {
                self.controllers
                    .dispatch(route, request, &self.container, &self.filters, &controller, &method)
                    .await
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("filters_enabled", &self.filters.enabled())
            .field("binders", &self.binders.keys().collect::<Vec<_>>())
            .finish()
    }
}
