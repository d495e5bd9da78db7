// Route definitions and per-request bound routes

use crate::autowire::Instance;
use crate::compiler::{CompiledRoute, compile_route, parameter_names};
use crate::container::Container;
use crate::cookie::CookieJar;
use crate::filter::{FilterRef, FilterSpec};
use crate::logging::error;
use crate::request::Request;
use crate::response::Payload;
use crate::{Error, Result};
use http::Method;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

/// Everything a closure action receives.
#[derive(Clone)]
pub struct HandlerContext {
    pub request: Arc<Request>,
    pub route: BoundRoute,
    pub container: Container,
}

impl HandlerContext {
    /// A route parameter, as text.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route.param(name)
    }

    /// A route parameter replaced by a model binder.
    pub fn model<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.route.model(name)
    }

    pub fn make_as<T: Any + Send + Sync>(&self, abstract_: &str) -> Result<Arc<T>> {
        self.container.make_as(abstract_)
    }

    /// Cookies queued here go out with this request's response.
    pub fn cookies(&self) -> &CookieJar {
        self.request.cookie_jar()
    }
}

/// A closure route action.
pub type HandlerFn = Arc<
    dyn Fn(HandlerContext) -> Pin<Box<dyn Future<Output = Result<Payload>> + Send>> + Send + Sync,
>;

/// Wrap an async closure into a [`HandlerFn`].
pub fn handler<F, Fut, R>(f: F) -> HandlerFn
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Payload>,
{
    Arc::new(move |ctx| {
        let fut = f(ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    })
}

/// What a route runs.
#[derive(Clone)]
pub enum Action {
    Handler(HandlerFn),
    /// A container-resolved controller and the method to call on it.
    Controller { controller: String, method: String },
}

impl Action {
    /// Parse `"Controller@method"`.
    pub fn controller(action: &str) -> Result<Self> {
        match action.split_once('@') {
            Some((controller, method)) if !controller.is_empty() && !method.is_empty() => {
                Ok(Action::Controller {
                    controller: controller.to_string(),
                    method: method.to_string(),
                })
            }
            _ => Err(Error::Internal(format!(
                "Controller action \"{}\" must look like Controller@method",
                action
            ))),
        }
    }

    /// `Controller@method`, or `None` for closures.
    pub fn name(&self) -> Option<String> {
        match self {
            Action::Handler(_) => None,
            Action::Controller { controller, method } => Some(format!("{}@{}", controller, method)),
        }
    }
}

impl From<HandlerFn> for Action {
    fn from(handler: HandlerFn) -> Self {
        Action::Handler(handler)
    }
}

/// `"Controller@method"`. A string without `@` names no method and fails at dispatch.
impl From<&str> for Action {
    fn from(action: &str) -> Self {
        let (controller, method) = action.split_once('@').unwrap_or((action, ""));
        Action::Controller {
            controller: controller.to_string(),
            method: method.to_string(),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(&name),
            None => f.write_str("Closure"),
        }
    }
}

/// A value bound to a route parameter.
#[derive(Clone)]
pub enum ParamValue {
    /// Optional parameter that was not supplied
    Null,
    Text(String),
    /// Replaced by a model binder
    Bound(Instance),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            ParamValue::Bound(instance) => instance.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("Null"),
            ParamValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ParamValue::Bound(_) => f.write_str("Bound(..)"),
        }
    }
}

impl PartialEq<&str> for ParamValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

/// A URI pattern, its verbs and its action.
#[derive(Clone)]
pub struct Route {
    uri: String,
    methods: Vec<Method>,
    action: Action,
    wheres: HashMap<String, String>,
    defaults: HashMap<String, String>,
    domain: Option<String>,
    name: Option<String>,
    secure: bool,
    http_only: bool,
    before: Vec<FilterRef>,
    after: Vec<FilterRef>,
    compiled: OnceLock<std::result::Result<Arc<CompiledRoute>, String>>,
}

impl Route {
    /// A route for `uri`; `GET` routes also answer `HEAD`.
    pub fn new(methods: &[Method], uri: &str, action: Action) -> Self {
        let mut methods = methods.to_vec();
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        let uri = uri.trim_matches('/');
        Self {
            uri: if uri.is_empty() { "/".to_string() } else { uri.to_string() },
            methods,
            action,
            wheres: HashMap::new(),
            defaults: HashMap::new(),
            domain: None,
            name: None,
            secure: false,
            http_only: false,
            before: Vec::new(),
            after: Vec::new(),
            compiled: OnceLock::new(),
        }
    }

    // ========== Modifiers ==========

    /// Constrain a parameter with a regex.
    pub fn where_(&mut self, name: &str, pattern: &str) -> &mut Self {
        self.wheres.insert(name.to_string(), pattern.to_string());
        self.invalidate()
    }

    /// Constrain a parameter unless a constraint was already set.
    pub(crate) fn where_default(&mut self, name: &str, pattern: &str) {
        if !self.wheres.contains_key(name) {
            self.wheres.insert(name.to_string(), pattern.to_string());
            self.invalidate();
        }
    }

    /// Value for a parameter when the request doesn't supply one.
    pub fn defaults(&mut self, name: &str, value: &str) -> &mut Self {
        self.defaults.insert(name.to_string(), value.to_string());
        self
    }

    pub fn domain(&mut self, domain: &str) -> &mut Self {
        self.domain = Some(domain.to_string());
        self.invalidate()
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }

    /// Only match HTTPS requests.
    pub fn secure(&mut self) -> &mut Self {
        self.secure = true;
        self.http_only = false;
        self
    }

    /// Only match plain HTTP requests.
    pub fn http_only(&mut self) -> &mut Self {
        self.http_only = true;
        self.secure = false;
        self
    }

    /// Attach before filters (`"auth|csrf"`).
    pub fn before(&mut self, filters: &str) -> &mut Self {
        self.before.extend(FilterRef::parse_list(filters));
        self
    }

    pub fn after(&mut self, filters: &str) -> &mut Self {
        self.after.extend(FilterRef::parse_list(filters));
        self
    }

    pub(crate) fn set_uri(&mut self, uri: String) {
        self.uri = uri;
        self.invalidate();
    }

    fn invalidate(&mut self) -> &mut Self {
        self.compiled = OnceLock::new();
        self
    }

    // ========== Accessors ==========

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn action_name(&self) -> Option<String> {
        self.action.name()
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    pub fn before_filters(&self) -> &[FilterRef] {
        &self.before
    }

    pub fn after_filters(&self) -> &[FilterRef] {
        &self.after
    }

    pub fn default_for(&self, name: &str) -> Option<&str> {
        self.defaults.get(name).map(String::as_str)
    }

    /// Every parameter name in the domain and URI, in order.
    pub fn parameter_names(&self) -> Vec<String> {
        parameter_names(&self.uri, self.domain.as_deref())
    }

    /// The compiled matcher, compiling on first use.
    ///
    /// A failure is logged once and then cached until the route changes.
    pub fn compile(&self) -> Result<Arc<CompiledRoute>> {
        self.compiled
            .get_or_init(|| {
                compile_route(
                    &self.uri,
                    self.domain.as_deref(),
                    &self.wheres,
                    &HashSet::new(),
                )
                .map(Arc::new)
                .map_err(|e| {
                    error!(uri = %self.uri, error = %e, "Route failed to compile");
                    e.to_string()
                })
            })
            .clone()
            .map_err(Error::Internal)
    }

    // ========== Matching ==========

    /// Whether the route matches the request.
    ///
    /// Validators run in order (method, scheme, host, URI) and the first
    /// failure means no match. A route that fails to compile never matches.
    pub fn matches(&self, request: &Request, including_method: bool) -> bool {
        if including_method && !self.methods.contains(&request.method) {
            return false;
        }

        let Ok(compiled) = self.compile() else {
            return false;
        };

        if self.http_only && request.is_secure() {
            return false;
        }
        if self.secure && !request.is_secure() {
            return false;
        }

        if let Some(host) = &compiled.host {
            if !host.regex.is_match(&request.host()) {
                return false;
            }
        }

        compiled.path.regex.is_match(&Self::match_subject(request))
    }

    fn match_subject(request: &Request) -> String {
        let path = request.decoded_path();
        if path == "/" { path } else { format!("/{}", path) }
    }

    /// Bind the request's values to this route's parameters.
    ///
    /// Host captures come first, then path captures; parameters the request
    /// left out take the route default or `Null`.
    pub fn bind(self: &Arc<Self>, request: &Request) -> Result<BoundRoute> {
        let compiled = self.compile()?;

        let mut captured: HashMap<String, String> = HashMap::new();
        if let Some(host) = &compiled.host {
            captured.extend(host.captures(&request.host()).unwrap_or_default());
        }
        captured.extend(
            compiled
                .path
                .captures(&Self::match_subject(request))
                .unwrap_or_default(),
        );

        let parameters = compiled
            .variables
            .iter()
            .map(|name| {
                let value = match captured.remove(name) {
                    Some(value) => ParamValue::Text(value),
                    None => match self.defaults.get(name) {
                        Some(default) => ParamValue::Text(default.clone()),
                        None => ParamValue::Null,
                    },
                };
                (name.clone(), value)
            })
            .collect();

        Ok(BoundRoute {
            route: self.clone(),
            parameters,
            queued_after: Vec::new(),
        })
    }

    /// Bind a route that takes no parameters without compiling it.
    pub(crate) fn bind_literal(self: &Arc<Self>) -> BoundRoute {
        BoundRoute {
            route: self.clone(),
            parameters: Vec::new(),
            queued_after: Vec::new(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("uri", &self.uri)
            .field("action", &self.action)
            .field("name", &self.name)
            .finish()
    }
}

/// A matched route and the parameter values of one request.
#[derive(Clone, Debug)]
pub struct BoundRoute {
    route: Arc<Route>,
    parameters: Vec<(String, ParamValue)>,
    queued_after: Vec<FilterSpec>,
}

impl BoundRoute {
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn name(&self) -> Option<&str> {
        self.route.get_name()
    }

    pub fn action_name(&self) -> Option<String> {
        self.route.action_name()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// A parameter as text; `None` when missing, null or model-bound.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameter(name).and_then(ParamValue::as_str)
    }

    pub fn parameter_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.param(name).unwrap_or(default)
    }

    pub fn model<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.parameter(name).and_then(ParamValue::downcast)
    }

    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }

    /// Non-null parameter values, in parameter order.
    pub fn parameters_without_nulls(&self) -> Vec<ParamValue> {
        self.parameters
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Replace a parameter value, appending it if absent.
    pub fn set_parameter(&mut self, name: &str, value: ParamValue) {
        match self.parameters.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.parameters.push((name.to_string(), value)),
        }
    }

    pub fn forget_parameter(&mut self, name: &str) {
        self.parameters.retain(|(key, _)| key != name);
    }

    /// Queue an extra after filter for this request only.
    pub fn queue_after(&mut self, filter: FilterSpec) {
        self.queued_after.push(filter);
    }

    /// Route after filters followed by filters queued during dispatch.
    pub fn after_filters(&self) -> Vec<FilterSpec> {
        self.route
            .after_filters()
            .iter()
            .cloned()
            .map(FilterSpec::Named)
            .chain(self.queued_after.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(methods: &[Method], uri: &str) -> Route {
        Route::new(methods, uri, Action::controller("Home@index").unwrap())
    }

    #[test]
    fn test_get_adds_head() {
        let r = route(&[Method::GET], "/users/");
        assert_eq!(r.methods(), &[Method::GET, Method::HEAD]);
        assert_eq!(r.uri(), "users");
        assert_eq!(route(&[Method::GET], "/").uri(), "/");
    }

    #[test]
    fn test_bind_optional_and_defaults() {
        let mut r = route(&[Method::GET], "users/{id}/posts/{post?}/{tab?}");
        r.defaults("tab", "recent");
        let r = Arc::new(r);

        let req = Request::get("/users/42/posts/7");
        assert!(r.matches(&req, true));
        let bound = r.bind(&req).unwrap();
        assert_eq!(bound.param("id"), Some("42"));
        assert_eq!(bound.param("post"), Some("7"));
        assert_eq!(bound.param("tab"), Some("recent"));

        let req = Request::get("/users/42/posts");
        let bound = r.bind(&req).unwrap();
        assert!(bound.parameter("post").unwrap().is_null());
        let values = bound.parameters_without_nulls();
        assert_eq!(values.len(), 2);
        assert!(values[0] == "42");
        assert!(values[1] == "recent");
    }

    #[test]
    fn test_scheme_validators() {
        let mut secure = route(&[Method::GET], "pay");
        secure.secure();
        assert!(!secure.matches(&Request::get("/pay"), true));
        assert!(secure.matches(&Request::get("/pay").with_secure(true), true));

        let mut plain = route(&[Method::GET], "pay");
        plain.http_only();
        assert!(!plain.matches(&Request::get("/pay").with_secure(true), true));
    }

    #[test]
    fn test_method_validator_can_be_skipped() {
        let r = route(&[Method::GET], "items");
        assert!(!r.matches(&Request::post("/items"), true));
        assert!(r.matches(&Request::post("/items"), false));
    }

    #[test]
    fn test_domain_parameters_come_first() {
        let mut r = route(&[Method::GET], "users/{id}");
        r.domain("{account}.example.com");
        let r = Arc::new(r);

        let req = Request::get("/users/3").with_header("host", "acme.example.com");
        assert!(r.matches(&req, true));
        let names: Vec<_> = r.bind(&req).unwrap().parameters().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(names, vec!["account", "id"]);

        let other = Request::get("/users/3").with_header("host", "example.org");
        assert!(!r.matches(&other, true));
    }

    #[test]
    fn test_where_constraint_and_bad_pattern() {
        let mut r = route(&[Method::GET], "users/{id}");
        r.where_("id", "[0-9]+");
        assert!(r.matches(&Request::get("/users/12"), true));
        assert!(!r.matches(&Request::get("/users/ada"), true));

        r.where_("id", "[0-9");
        assert!(r.compile().is_err());
        assert!(!r.matches(&Request::get("/users/12"), true));
    }

    #[test]
    fn test_method_checked_before_compiling() {
        let r = route(&[Method::POST], "{a}/{a}");
        assert!(!r.matches(&Request::get("/x/y"), true));
        assert!(r.compiled.get().is_none());

        assert!(!r.matches(&Request::post("/x/y"), true));
        assert!(matches!(r.compiled.get(), Some(Err(_))));
    }

    #[test]
    fn test_decoded_path_matching() {
        let r = Arc::new(route(&[Method::GET], "files/{name}"));
        let req = Request::get("/files/annual%20report");
        assert!(r.matches(&req, true));
        assert_eq!(r.bind(&req).unwrap().param("name"), Some("annual report"));
    }

    #[test]
    fn test_controller_action_parsing() {
        assert_eq!(Action::controller("Users@show").unwrap().name().as_deref(), Some("Users@show"));
        assert!(Action::controller("Users").is_err());
        assert!(Action::controller("@show").is_err());
    }
}
