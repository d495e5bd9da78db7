// Route table: registration-ordered routes indexed by verb, name and action

use crate::logging::debug;
use crate::request::Request;
use crate::response::{Payload, Response};
use crate::route::{Action, BoundRoute, Route, handler};
use crate::{Error, Result};
use http::header::ALLOW;
use http::Method;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Verbs the router knows, in the order alternate verbs are reported.
pub const VERBS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Every route, in registration order.
#[derive(Clone, Default)]
pub struct RouteCollection {
    routes: Vec<Arc<Route>>,
    by_method: HashMap<Method, Vec<usize>>,
    /// `Controller@method` to first route registered with it
    actions: HashMap<String, usize>,
    /// Built on first lookup; route names can change after registration
    names: OnceLock<HashMap<String, usize>>,
}

impl RouteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route and hand it back for further configuration.
    pub fn add(&mut self, route: Route) -> &mut Route {
        let index = self.routes.len();
        for method in route.methods() {
            self.by_method.entry(method.clone()).or_default().push(index);
        }
        if let Some(action) = route.action_name() {
            self.actions.entry(action).or_insert(index);
        }
        debug!(methods = ?route.methods(), uri = %route.uri(), "Route registered");

        self.routes.push(Arc::new(route));
        self.names = OnceLock::new();
        Arc::make_mut(&mut self.routes[index])
    }

    /// Mutable access to a registered route.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Route> {
        self.names = OnceLock::new();
        self.routes.get_mut(index).map(Arc::make_mut)
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes answering a verb, in registration order.
    pub fn for_method(&self, method: &Method) -> impl Iterator<Item = &Arc<Route>> {
        self.by_method
            .get(method)
            .into_iter()
            .flatten()
            .filter_map(|index| self.routes.get(*index))
    }

    /// The first route registered under a name.
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<Route>> {
        let names = self.names.get_or_init(|| {
            let mut names = HashMap::new();
            for (index, route) in self.routes.iter().enumerate() {
                if let Some(name) = route.get_name() {
                    names.entry(name.to_string()).or_insert(index);
                }
            }
            names
        });
        names.get(name).and_then(|index| self.routes.get(*index))
    }

    pub fn has_named_route(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    /// The first route registered for a `Controller@method` action.
    pub fn get_by_action(&self, action: &str) -> Option<&Arc<Route>> {
        self.actions.get(action).and_then(|index| self.routes.get(*index))
    }

    /// Find the route for a request.
    ///
    /// When no route answers the request's verb but routes for other verbs
    /// match the URI, `OPTIONS` gets a synthesized route listing them in
    /// `Allow` and any other verb fails with [`Error::MethodNotAllowed`].
    pub fn match_request(&self, request: &Request) -> Result<BoundRoute> {
        if let Some(route) = self.for_method(&request.method).find(|r| r.matches(request, true)) {
            debug!(uri = %route.uri(), method = %request.method, "Route matched");
            return route.bind(request);
        }

        let others = self.alternate_verbs(request);
        if others.is_empty() {
            debug!(method = %request.method, path = %request.path(), "No route matched");
            return Err(Error::RouteNotFound(format!(
                "{} {}",
                request.method,
                request.path()
            )));
        }

        if request.method == Method::OPTIONS {
            debug!(path = %request.path(), allowed = ?others, "Answering OPTIONS from other verbs");
            return Ok(Arc::new(Self::options_route(request, &others)).bind_literal());
        }

        debug!(method = %request.method, allowed = ?others, "Method not allowed");
        Err(Error::MethodNotAllowed { allowed: others })
    }

    /// Verbs other than the request's under which some route matches the URI.
    ///
    /// Standard verbs come in [`VERBS`] order, custom ones after them by name.
    pub fn alternate_verbs(&self, request: &Request) -> Vec<Method> {
        let mut verbs: Vec<&Method> = self
            .by_method
            .keys()
            .filter(|verb| **verb != request.method)
            .collect();
        verbs.sort_by(|a, b| {
            verb_rank(a)
                .cmp(&verb_rank(b))
                .then_with(|| a.as_str().cmp(b.as_str()))
        });
        verbs
            .into_iter()
            .filter(|verb| self.for_method(verb).any(|r| r.matches(request, false)))
            .cloned()
            .collect()
    }

    /// Compile every route ahead of the first request. Returns how many failed.
    pub fn compile_all(&self) -> usize {
        self.routes.iter().filter(|route| route.compile().is_err()).count()
    }

    /// A parameterless `OPTIONS` route answering with `Allow`. The request
    /// path is only a label and is never compiled.
    fn options_route(request: &Request, allowed: &[Method]) -> Route {
        let allow = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let action = Action::Handler(handler(move |_| {
            let response = Response::ok().with_header(ALLOW, allow.as_str());
            async move { Ok(Payload::Response(response)) }
        }));
        Route::new(&[Method::OPTIONS], &request.path(), action)
    }
}

fn verb_rank(verb: &Method) -> usize {
    VERBS
        .iter()
        .position(|known| known == verb)
        .unwrap_or(VERBS.len())
}

impl std::fmt::Debug for RouteCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.routes.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::HandlerContext;

    fn action(name: &str) -> Action {
        Action::controller(name).unwrap()
    }

    fn closure() -> Action {
        Action::Handler(handler(|_: HandlerContext| async { Ok("ok") }))
    }

    #[test]
    fn test_first_match_wins() {
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[Method::GET], "users/{id}", action("A@first")));
        routes.add(Route::new(&[Method::GET], "users/{slug}", action("B@second")));

        let bound = routes.match_request(&Request::get("/users/1")).unwrap();
        assert_eq!(bound.action_name().as_deref(), Some("A@first"));
    }

    #[test]
    fn test_method_not_allowed_lists_alternates() {
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[Method::GET], "items", closure()));

        match routes.match_request(&Request::post("/items")) {
            Err(Error::MethodNotAllowed { allowed }) => {
                assert_eq!(allowed, vec![Method::GET, Method::HEAD]);
            }
            other => panic!("expected MethodNotAllowed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_options_synthesized() {
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[Method::GET], "items", closure()));

        let bound = routes
            .match_request(&Request::new(Method::OPTIONS, "/items"))
            .unwrap();
        assert_eq!(bound.route().methods(), &[Method::OPTIONS]);
        assert_eq!(bound.route().uri(), "items");
    }

    #[test]
    fn test_options_for_paths_with_braces() {
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[Method::GET], "files/{name}", closure()));

        let path = "/files/{a}{a}";
        assert!(routes.match_request(&Request::get(path)).is_ok());

        let bound = routes
            .match_request(&Request::new(Method::OPTIONS, path))
            .unwrap();
        assert_eq!(bound.route().methods(), &[Method::OPTIONS]);
        assert!(bound.parameters().is_empty());
    }

    #[test]
    fn test_custom_verbs_are_reported() {
        let purge = Method::from_bytes(b"PURGE").unwrap();
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[purge.clone()], "cache", closure()));
        routes.add(Route::new(&[Method::DELETE], "cache", closure()));

        match routes.match_request(&Request::get("/cache")) {
            Err(Error::MethodNotAllowed { allowed }) => {
                assert_eq!(allowed, vec![Method::DELETE, purge]);
            }
            other => panic!("expected MethodNotAllowed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_compile_all_counts_failures() {
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[Method::GET], "users/{id}", closure()));
        routes.add(Route::new(&[Method::GET], "{a}/{a}", closure()));
        assert_eq!(routes.compile_all(), 1);
    }

    #[test]
    fn test_not_found() {
        let routes = RouteCollection::new();
        assert!(matches!(
            routes.match_request(&Request::get("/nothing")),
            Err(Error::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_name_and_action_lookup_first_wins() {
        let mut routes = RouteCollection::new();
        routes.add(Route::new(&[Method::GET], "a", action("Pages@show"))).name("page");
        routes.add(Route::new(&[Method::GET], "b", action("Pages@show"))).name("page");

        assert_eq!(routes.get_by_name("page").unwrap().uri(), "a");
        assert_eq!(routes.get_by_action("Pages@show").unwrap().uri(), "a");

        routes.get_mut(1).unwrap().name("other");
        assert_eq!(routes.get_by_name("other").unwrap().uri(), "b");
        assert!(!routes.has_named_route("missing"));
    }
}
