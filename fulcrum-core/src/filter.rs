// Route filters: named, pattern-scoped and global before/after hooks

use crate::container::Container;
use crate::logging::{debug, trace, warn};
use crate::request::Request;
use crate::response::{Payload, Response};
use crate::route::BoundRoute;
use crate::{Error, Result};
use async_trait::async_trait;
use http::Method;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a filter sees when it runs.
pub struct FilterContext<'a> {
    /// The matched route; `None` for global filters.
    pub route: Option<&'a BoundRoute>,
    pub request: &'a Request,
    /// The finished response, for after filters.
    pub response: Option<&'a Response>,
    /// Arguments from the filter string (`"throttle:60,1"` gives `["60", "1"]`).
    pub parameters: &'a [String],
    pub container: &'a Container,
}

impl FilterContext<'_> {
    pub fn parameter(&self, index: usize) -> Option<&str> {
        self.parameters.get(index).map(String::as_str)
    }

    /// A route parameter, as text.
    pub fn route_parameter(&self, name: &str) -> Option<&str> {
        self.route.and_then(|route| route.param(name))
    }
}

/// A filter hook.
///
/// Returning `Some` from a before filter short-circuits the request with that
/// payload. The return value of after filters is ignored.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn filter(&self, ctx: &FilterContext<'_>) -> Result<Option<Payload>>;
}

/// Filter built from a synchronous closure.
pub struct FnFilter<F>
where
    F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync,
{
    callback: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(&FilterContext<'_>) -> Result<Option<Payload>> + Send + Sync,
{
    async fn filter(&self, ctx: &FilterContext<'_>) -> Result<Option<Payload>> {
        (self.callback)(ctx)
    }
}

/// A reference to a registered filter, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRef {
    pub name: String,
    pub parameters: Vec<String>,
}

impl FilterRef {
    /// Parse `name` or `name:arg1,arg2`.
    pub fn parse(filter: &str) -> Self {
        match filter.trim().split_once(':') {
            Some((name, args)) => Self {
                name: name.trim().to_string(),
                parameters: args.split(',').map(|a| a.trim().to_string()).collect(),
            },
            None => Self {
                name: filter.trim().to_string(),
                parameters: Vec::new(),
            },
        }
    }

    /// Parse a pipe-separated list: `"auth|csrf|throttle:60,1"`.
    pub fn parse_list(filters: &str) -> Vec<Self> {
        filters
            .split('|')
            .filter(|f| !f.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for FilterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.parameters.is_empty() {
            write!(f, ":{}", self.parameters.join(","))?;
        }
        Ok(())
    }
}

/// A filter to run: either registered by name, or held directly.
#[derive(Clone)]
pub enum FilterSpec {
    Named(FilterRef),
    Inline(Arc<dyn Filter>),
}

impl fmt::Debug for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::Named(filter) => write!(f, "Named({})", filter),
            FilterSpec::Inline(_) => f.write_str("Inline(..)"),
        }
    }
}

impl From<&str> for FilterSpec {
    fn from(filter: &str) -> Self {
        FilterSpec::Named(FilterRef::parse(filter))
    }
}

impl From<Arc<dyn Filter>> for FilterSpec {
    fn from(filter: Arc<dyn Filter>) -> Self {
        FilterSpec::Inline(filter)
    }
}

/// A named filter attached to a URI pattern, optionally for some verbs only.
#[derive(Debug, Clone)]
struct PatternEntry {
    filter: FilterRef,
    methods: Option<Vec<Method>>,
}

impl PatternEntry {
    fn applies_to(&self, method: &Method) -> bool {
        self.methods.as_ref().is_none_or(|methods| methods.contains(method))
    }
}

#[derive(Clone)]
struct GlobalFilter {
    priority: i32,
    sequence: usize,
    filter: Arc<dyn Filter>,
}

/// Every filter table the router consults.
#[derive(Clone)]
pub struct FilterRegistry {
    named: HashMap<String, Arc<dyn Filter>>,
    /// Glob patterns in first-registration order
    patterns: Vec<(String, Vec<PatternEntry>)>,
    regexes: Vec<(Regex, Vec<PatternEntry>)>,
    global_before: Vec<GlobalFilter>,
    global_after: Vec<GlobalFilter>,
    sequence: usize,
    enabled: bool,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            named: HashMap::new(),
            patterns: Vec::new(),
            regexes: Vec::new(),
            global_before: Vec::new(),
            global_after: Vec::new(),
            sequence: 0,
            enabled: true,
        }
    }

    /// Register a named filter, replacing any filter of the same name.
    pub fn register(&mut self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        let name = name.into();
        debug!(filter = %name, "Filter registered");
        self.named.insert(name, filter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.named.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Run `filter` before every request whose path matches the glob `pattern`.
    pub fn when(&mut self, pattern: &str, filter: &str, methods: Option<&[Method]>) {
        let entry = PatternEntry {
            filter: FilterRef::parse(filter),
            methods: methods.map(<[Method]>::to_vec),
        };
        match self.patterns.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, entries)) => entries.push(entry),
            None => self.patterns.push((pattern.to_string(), vec![entry])),
        }
    }

    /// Run `filter` before every request whose path matches `pattern`.
    pub fn when_regex(&mut self, pattern: &str, filter: &str, methods: Option<&[Method]>) -> Result<()> {
        let entry = PatternEntry {
            filter: FilterRef::parse(filter),
            methods: methods.map(<[Method]>::to_vec),
        };
        match self.regexes.iter_mut().find(|(r, _)| r.as_str() == pattern) {
            Some((_, entries)) => entries.push(entry),
            None => {
                let regex = Regex::new(pattern)
                    .map_err(|e| Error::Internal(format!("Invalid filter pattern \"{}\": {}", pattern, e)))?;
                self.regexes.push((regex, vec![entry]));
            }
        }
        Ok(())
    }

    pub fn add_global_before(&mut self, filter: Arc<dyn Filter>, priority: i32) {
        let global = self.global(filter, priority);
        self.global_before.push(global);
    }

    pub fn add_global_after(&mut self, filter: Arc<dyn Filter>, priority: i32) {
        let global = self.global(filter, priority);
        self.global_after.push(global);
    }

    fn global(&mut self, filter: Arc<dyn Filter>, priority: i32) -> GlobalFilter {
        self.sequence += 1;
        GlobalFilter {
            priority,
            sequence: self.sequence,
            filter,
        }
    }

    /// Global before filters: highest priority first, later registrations first on ties.
    pub fn global_before(&self) -> Vec<Arc<dyn Filter>> {
        Self::ordered(&self.global_before)
    }

    /// Global after filters, in the same order as [`FilterRegistry::global_before`].
    pub fn global_after(&self) -> Vec<Arc<dyn Filter>> {
        Self::ordered(&self.global_after)
    }

    fn ordered(filters: &[GlobalFilter]) -> Vec<Arc<dyn Filter>> {
        let mut sorted: Vec<&GlobalFilter> = filters.iter().collect();
        sorted.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        sorted.into_iter().map(|g| g.filter.clone()).collect()
    }

    /// Pattern filters applying to a request: glob tables first, then regex
    /// tables. A filter named twice keeps its first position and its last arguments.
    pub fn pattern_filters_for(&self, request: &Request) -> Vec<FilterRef> {
        let path = request.path();
        let globs = self
            .patterns
            .iter()
            .filter(|(pattern, _)| glob_matches(pattern, &path))
            .flat_map(|(_, entries)| entries.iter());
        let regexes = self
            .regexes
            .iter()
            .filter(|(regex, _)| regex.is_match(&path))
            .flat_map(|(_, entries)| entries.iter());

        let mut found: Vec<FilterRef> = Vec::new();
        for entry in globs.chain(regexes) {
            if !entry.applies_to(&request.method) {
                continue;
            }
            match found.iter_mut().find(|f| f.name == entry.filter.name) {
                Some(existing) => existing.parameters = entry.filter.parameters.clone(),
                None => found.push(entry.filter.clone()),
            }
        }
        found
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Run one filter. Disabled filtering and unknown names both continue.
    pub async fn call(
        &self,
        spec: &FilterSpec,
        route: Option<&BoundRoute>,
        request: &Request,
        response: Option<&Response>,
        container: &Container,
    ) -> Result<Option<Payload>> {
        if !self.enabled {
            return Ok(None);
        }

        let (filter, parameters): (&Arc<dyn Filter>, &[String]) = match spec {
            FilterSpec::Inline(filter) => (filter, &[]),
            FilterSpec::Named(reference) => match self.named.get(&reference.name) {
                Some(filter) => (filter, &reference.parameters),
                None => {
                    warn!(filter = %reference.name, "Skipping unregistered filter");
                    return Ok(None);
                }
            },
        };

        trace!(filter = ?spec, "Calling filter");
        let ctx = FilterContext {
            route,
            request,
            response,
            parameters,
            container,
        };
        filter.filter(&ctx).await
    }

    /// Run global filters in order, with no route.
    pub(crate) async fn call_global(
        &self,
        filters: &[Arc<dyn Filter>],
        request: &Request,
        response: Option<&Response>,
        container: &Container,
    ) -> Result<Option<Payload>> {
        for filter in filters {
            let spec = FilterSpec::Inline(filter.clone());
            if let Some(payload) = self.call(&spec, None, request, response, container).await? {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    /// Run every global after filter in order. Returned payloads are dropped.
    pub(crate) async fn call_global_after(
        &self,
        filters: &[Arc<dyn Filter>],
        request: &Request,
        response: &Response,
        container: &Container,
    ) -> Result<()> {
        for filter in filters {
            let spec = FilterSpec::Inline(filter.clone());
            if self
                .call(&spec, None, request, Some(response), container)
                .await?
                .is_some()
            {
                trace!("Ignoring payload returned by an after filter");
            }
        }
        Ok(())
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `*` matches any run of characters; everything else is literal.
pub fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return false;
    };
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard and not equal.
        return false;
    };
    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(&'static str);

    #[async_trait]
    impl Filter for Constant {
        async fn filter(&self, _: &FilterContext<'_>) -> Result<Option<Payload>> {
            Ok(Some(Payload::from(self.0)))
        }
    }

    fn text(payload: Option<Payload>) -> Option<String> {
        match payload {
            Some(Payload::Text(t)) => Some(t),
            _ => None,
        }
    }

    #[test]
    fn test_filter_ref_parsing() {
        let list = FilterRef::parse_list("auth| csrf |throttle:60,1|");
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].name, "csrf");
        assert_eq!(list[2].parameters, vec!["60", "1"]);
        assert_eq!(list[2].to_string(), "throttle:60,1");
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("admin/*", "admin/users/1"));
        assert!(glob_matches("admin", "admin"));
        assert!(glob_matches("*/edit", "posts/9/edit"));
        assert!(glob_matches("a*c*e", "abcde"));
        assert!(!glob_matches("admin/*", "public/admin/x"));
        assert!(!glob_matches("admin", "admin/x"));
    }

    #[test]
    fn test_global_ordering() {
        let mut registry = FilterRegistry::new();
        let a: Arc<dyn Filter> = Arc::new(Constant("a"));
        let b: Arc<dyn Filter> = Arc::new(Constant("b"));
        let c: Arc<dyn Filter> = Arc::new(Constant("c"));
        registry.add_global_before(a.clone(), 0);
        registry.add_global_before(b.clone(), 0);
        registry.add_global_before(c.clone(), 10);

        let order = registry.global_before();
        assert!(Arc::ptr_eq(&order[0], &c));
        assert!(Arc::ptr_eq(&order[1], &b));
        assert!(Arc::ptr_eq(&order[2], &a));
    }

    #[test]
    fn test_pattern_filters_by_method() {
        let mut registry = FilterRegistry::new();
        registry.when("admin/*", "auth", None);
        registry.when("admin/*", "csrf", Some(&[Method::POST]));
        registry.when_regex("^admin/[0-9]+$", "auth:admin", None).unwrap();

        let get = registry.pattern_filters_for(&Request::get("/admin/42"));
        assert_eq!(get.len(), 1);
        assert_eq!(get[0].parameters, vec!["admin"]);

        let post = registry.pattern_filters_for(&Request::post("/admin/users"));
        let names: Vec<_> = post.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["auth", "csrf"]);

        assert!(registry.when_regex("(", "auth", None).is_err());
    }

    #[tokio::test]
    async fn test_call_named_and_disabled() {
        let container = Container::new();
        let request = Request::get("/");
        let mut registry = FilterRegistry::new();
        registry.register(
            "echo",
            Arc::new(FnFilter::new(|ctx: &FilterContext<'_>| {
                Ok(ctx.parameter(0).map(|p| Payload::Text(p.to_string())))
            })),
        );

        let spec = FilterSpec::from("echo:hello");
        let result = registry.call(&spec, None, &request, None, &container).await.unwrap();
        assert_eq!(text(result).as_deref(), Some("hello"));

        let missing = FilterSpec::from("nope");
        assert!(registry.call(&missing, None, &request, None, &container).await.unwrap().is_none());

        registry.disable();
        assert!(registry.call(&spec, None, &request, None, &container).await.unwrap().is_none());
    }
}
