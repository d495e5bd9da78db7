// Dependency injection container

use crate::autowire::{Arguments, Constructible, Instance, ParamKind, Parameters, TypeEntry};
use crate::logging::{debug, trace, warn};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Produces a value for an abstract, given the container and caller overrides.
pub type Factory = Arc<dyn Fn(&Container, &Parameters) -> Result<Instance> + Send + Sync>;

/// Post-construction hook: `(object, container)`.
pub type ResolvingCallback = Arc<dyn Fn(&Instance, &Container) + Send + Sync>;

/// Rebind notification: `(container, new_instance)`.
pub type ReboundCallback = Arc<dyn Fn(&Container, &Instance) + Send + Sync>;

/// Decorates a resolved value: `(object, container) -> decorated`.
pub type Extender = Arc<dyn Fn(Instance, &Container) -> Result<Instance> + Send + Sync>;

/// How a binding produces its value.
#[derive(Clone)]
pub enum Concrete {
    Factory(Factory),
    /// Another abstract name. Equal to the bound abstract means "build that type".
    Type(String),
}

#[derive(Clone)]
struct Binding {
    concrete: Concrete,
    shared: bool,
}

#[derive(Default)]
struct State {
    bindings: HashMap<String, Binding>,
    instances: HashMap<String, Instance>,
    aliases: HashMap<String, String>,
    types: HashMap<String, TypeEntry>,
    resolved: HashSet<String>,
    rebound_callbacks: HashMap<String, Vec<ReboundCallback>>,
    resolving_callbacks: HashMap<String, Vec<ResolvingCallback>>,
    global_resolving_callbacks: Vec<ResolvingCallback>,
}

/// The dependency injection container.
///
/// Cloning is cheap and every clone shares the same registry. All maps sit
/// behind one lock that is never held while user code (factories, extenders,
/// callbacks) runs, so factories may call back into [`Container::make`].
#[derive(Clone)]
pub struct Container {
    state: Arc<RwLock<State>>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new DI container");
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    // ========== Registration ==========

    /// Register (or replace) a binding.
    ///
    /// Replacing something already bound fires the abstract's rebind callbacks.
    pub fn bind<F>(&self, abstract_: impl Into<String>, factory: F, shared: bool)
    where
        F: Fn(&Container, &Parameters) -> Result<Instance> + Send + Sync + 'static,
    {
        self.bind_concrete(abstract_, Concrete::Factory(Arc::new(factory)), shared);
    }

    /// Shared binding: the first resolution is cached for the container's lifetime.
    pub fn singleton<F>(&self, abstract_: impl Into<String>, factory: F)
    where
        F: Fn(&Container, &Parameters) -> Result<Instance> + Send + Sync + 'static,
    {
        self.bind(abstract_, factory, true);
    }

    /// Bind only if nothing is bound under the abstract yet.
    pub fn bind_if<F>(&self, abstract_: impl Into<String>, factory: F, shared: bool) -> bool
    where
        F: Fn(&Container, &Parameters) -> Result<Instance> + Send + Sync + 'static,
    {
        let abstract_ = abstract_.into();
        if self.bound(&abstract_) {
            return false;
        }
        self.bind(abstract_, factory, shared);
        true
    }

    /// Bind an abstract to a constructible type, registering the type as well.
    pub fn bind_type<T: Constructible>(&self, abstract_: impl Into<String>, shared: bool) {
        self.register_type::<T>();
        self.bind_concrete(abstract_, Concrete::Type(T::NAME.to_string()), shared);
    }

    /// Shared variant of [`Container::bind_type`].
    pub fn singleton_type<T: Constructible>(&self, abstract_: impl Into<String>) {
        self.bind_type::<T>(abstract_, true);
    }

    /// Bind an abstract to another abstract name, resolved on demand.
    pub fn bind_name(&self, abstract_: impl Into<String>, concrete: impl Into<String>, shared: bool) {
        self.bind_concrete(abstract_, Concrete::Type(concrete.into()), shared);
    }

    pub fn bind_concrete(&self, abstract_: impl Into<String>, concrete: Concrete, shared: bool) {
        let abstract_ = abstract_.into();

        let was_bound = {
            let mut state = self.state.write();
            let was_bound = Self::is_bound(&state, &abstract_);
            state.instances.remove(&abstract_);
            state.aliases.remove(&abstract_);
            state
                .bindings
                .insert(abstract_.clone(), Binding { concrete, shared });
            was_bound
        };

        debug!(abstract_name = %abstract_, shared, "Binding registered");

        if was_bound {
            self.rebound(&abstract_);
        }
    }

    /// Register a pre-built value as the shared instance of an abstract.
    pub fn instance(&self, abstract_: impl Into<String>, value: Instance) {
        let abstract_ = abstract_.into();

        let was_bound = {
            let mut state = self.state.write();
            state.aliases.remove(&abstract_);
            let was_bound = Self::is_bound(&state, &abstract_);
            state.instances.insert(abstract_.clone(), value);
            was_bound
        };

        debug!(abstract_name = %abstract_, "Instance registered");

        if was_bound {
            self.rebound(&abstract_);
        }
    }

    /// Resolve `name` as `target` from now on.
    pub fn alias(&self, name: impl Into<String>, target: impl Into<String>) {
        let (name, target) = (name.into(), target.into());
        debug!(alias = %name, target = %target, "Alias registered");
        self.state.write().aliases.insert(name, target);
    }

    /// Declare an autowirable type under its [`Constructible::NAME`].
    pub fn register_type<T: Constructible>(&self) {
        let entry = TypeEntry::of::<T>();
        trace!(type_name = entry.name, "Constructible type registered");
        self.state.write().types.insert(entry.name.to_string(), entry);
    }

    /// Wrap a factory so it only ever runs once, caching its first result.
    pub fn share<F>(factory: F) -> impl Fn(&Container, &Parameters) -> Result<Instance> + Send + Sync + 'static
    where
        F: Fn(&Container, &Parameters) -> Result<Instance> + Send + Sync + 'static,
    {
        let cached: Arc<Mutex<Option<Instance>>> = Arc::new(Mutex::new(None));
        move |container, parameters| {
            if let Some(object) = cached.lock().as_ref() {
                return Ok(object.clone());
            }
            let object = factory(container, parameters)?;
            Ok(cached.lock().get_or_insert(object).clone())
        }
    }

    // ========== Decoration & observers ==========

    /// Decorate whatever the abstract resolves to.
    ///
    /// An already-cached shared instance is decorated immediately and the
    /// abstract's rebind callbacks fire; otherwise the binding is wrapped and the
    /// decorator runs on each later resolution.
    pub fn extend<F>(&self, abstract_: &str, decorator: F) -> Result<()>
    where
        F: Fn(Instance, &Container) -> Result<Instance> + Send + Sync + 'static,
    {
        let abstract_ = self.get_alias(abstract_);
        let decorator: Extender = Arc::new(decorator);

        let (existing, binding) = {
            let state = self.state.read();
            (
                state.instances.get(&abstract_).cloned(),
                state.bindings.get(&abstract_).cloned(),
            )
        };

        if let Some(object) = existing {
            let decorated = decorator(object, self)?;
            self.state
                .write()
                .instances
                .insert(abstract_.clone(), decorated);
            debug!(abstract_name = %abstract_, "Shared instance extended");
            self.rebound(&abstract_);
            return Ok(());
        }

        let Some(binding) = binding else {
            return Err(Error::Binding(format!("Type [{}] is not bound.", abstract_)));
        };

        let previous = binding.concrete;
        let target = abstract_.clone();
        let wrapped: Factory = Arc::new(move |container, parameters| {
            let object = container.produce(&target, &previous, parameters)?;
            decorator(object, container)
        });

        self.state.write().bindings.insert(
            abstract_.clone(),
            Binding {
                concrete: Concrete::Factory(wrapped),
                shared: binding.shared,
            },
        );
        debug!(abstract_name = %abstract_, "Binding extended");
        Ok(())
    }

    /// Observe rebinds of an abstract.
    ///
    /// Returns the current value when the abstract is already bound.
    pub fn rebinding<F>(&self, abstract_: &str, callback: F) -> Result<Option<Instance>>
    where
        F: Fn(&Container, &Instance) + Send + Sync + 'static,
    {
        let abstract_ = self.get_alias(abstract_);
        let bound = {
            let mut state = self.state.write();
            state
                .rebound_callbacks
                .entry(abstract_.clone())
                .or_default()
                .push(Arc::new(callback));
            Self::is_bound(&state, &abstract_)
        };

        if bound {
            self.make(&abstract_).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Observe every resolution of one abstract.
    pub fn resolving<F>(&self, abstract_: &str, callback: F)
    where
        F: Fn(&Instance, &Container) + Send + Sync + 'static,
    {
        let abstract_ = self.get_alias(abstract_);
        self.state
            .write()
            .resolving_callbacks
            .entry(abstract_)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Observe every resolution of any abstract.
    pub fn resolving_any<F>(&self, callback: F)
    where
        F: Fn(&Instance, &Container) + Send + Sync + 'static,
    {
        self.state
            .write()
            .global_resolving_callbacks
            .push(Arc::new(callback));
    }

    // ========== Resolution ==========

    pub fn make(&self, abstract_: &str) -> Result<Instance> {
        self.make_with(abstract_, &Parameters::new())
    }

    /// Resolve with constructor overrides keyed by parameter name.
    pub fn make_with(&self, abstract_: &str, parameters: &Parameters) -> Result<Instance> {
        self.resolve(abstract_, parameters, &mut Vec::new())
    }

    /// Resolve and downcast to a concrete type.
    pub fn make_as<T: Any + Send + Sync>(&self, abstract_: &str) -> Result<Arc<T>> {
        self.make_as_with(abstract_, &Parameters::new())
    }

    pub fn make_as_with<T: Any + Send + Sync>(
        &self,
        abstract_: &str,
        parameters: &Parameters,
    ) -> Result<Arc<T>> {
        self.make_with(abstract_, parameters)?
            .downcast::<T>()
            .map_err(|_| {
                Error::Binding(format!(
                    "[{}] did not resolve to a {}",
                    abstract_,
                    std::any::type_name::<T>()
                ))
            })
    }

    fn resolve(&self, abstract_: &str, parameters: &Parameters, stack: &mut Vec<String>) -> Result<Instance> {
        let abstract_ = self.get_alias(abstract_);

        let (shared, concrete, seen) = {
            let state = self.state.read();
            (
                state.instances.get(&abstract_).cloned(),
                state.bindings.get(&abstract_).map(|b| b.concrete.clone()),
                state.resolved.contains(&abstract_),
            )
        };
        if !seen {
            self.state.write().resolved.insert(abstract_.clone());
        }
        if let Some(object) = shared {
            trace!(abstract_name = %abstract_, "Resolved shared instance");
            return Ok(object);
        }

        if stack.contains(&abstract_) {
            return Err(Error::UnresolvableDependency(format!(
                "Circular dependency while resolving [{}]: {} -> {}",
                abstract_,
                stack.join(" -> "),
                abstract_
            )));
        }

        stack.push(abstract_.clone());
        let built = match concrete {
            Some(Concrete::Factory(factory)) => factory(self, parameters),
            Some(Concrete::Type(name)) if name != abstract_ => self.resolve(&name, parameters, stack),
            _ => self.build(&abstract_, parameters, stack),
        };
        stack.pop();
        let object = built?;

        let object = {
            let mut state = self.state.write();
            if Self::shared(&state, &abstract_) {
                // First writer wins so concurrent resolutions agree on identity.
                state
                    .instances
                    .entry(abstract_.clone())
                    .or_insert(object)
                    .clone()
            } else {
                object
            }
        };

        self.fire_resolving_callbacks(&abstract_, &object);
        trace!(abstract_name = %abstract_, "Resolved");
        Ok(object)
    }

    /// Produce a value from a concrete without consulting the instance cache.
    fn produce(&self, abstract_: &str, concrete: &Concrete, parameters: &Parameters) -> Result<Instance> {
        match concrete {
            Concrete::Factory(factory) => factory(self, parameters),
            Concrete::Type(name) if name != abstract_ => self.make_with(name, parameters),
            Concrete::Type(_) => self.build(abstract_, parameters, &mut vec![abstract_.to_string()]),
        }
    }

    /// Autowire a registered constructible type.
    fn build(&self, class: &str, overrides: &Parameters, stack: &mut Vec<String>) -> Result<Instance> {
        let entry = self.state.read().types.get(class).copied();
        let Some(entry) = entry else {
            return Err(Error::UnresolvableDependency(format!(
                "Target [{}] is not instantiable.",
                class
            )));
        };

        let mut arguments = Arguments::new(entry.name);
        for parameter in (entry.parameters)() {
            if let Some(value) = overrides.get(&parameter.name) {
                arguments.insert(parameter.name.clone(), Some(value.clone()));
                continue;
            }

            let value = match &parameter.kind {
                ParamKind::Primitive => parameter.default_value().ok_or_else(|| {
                    Error::UnresolvableDependency(format!(
                        "Unresolvable dependency resolving [{}] in class {}",
                        parameter.name, class
                    ))
                })?,
                ParamKind::Class(dependency) => {
                    trace!(class, parameter = %parameter.name, dependency = %dependency, "Autowiring parameter");
                    match self.resolve(dependency, &Parameters::new(), stack) {
                        Ok(object) => Some(object),
                        Err(Error::UnresolvableDependency(reason)) => match parameter.default_value() {
                            Some(default) => {
                                debug!(class, parameter = %parameter.name, %reason, "Falling back to parameter default");
                                default
                            }
                            None => return Err(Error::UnresolvableDependency(reason)),
                        },
                        Err(e) => return Err(e),
                    }
                }
            };
            arguments.insert(parameter.name.clone(), value);
        }

        (entry.construct)(&arguments)
    }

    fn fire_resolving_callbacks(&self, abstract_: &str, object: &Instance) {
        let callbacks: Vec<ResolvingCallback> = {
            let state = self.state.read();
            state
                .resolving_callbacks
                .get(abstract_)
                .into_iter()
                .flatten()
                .chain(state.global_resolving_callbacks.iter())
                .cloned()
                .collect()
        };
        for callback in callbacks {
            callback(object, self);
        }
    }

    fn rebound(&self, abstract_: &str) {
        let callbacks = self
            .state
            .read()
            .rebound_callbacks
            .get(abstract_)
            .cloned()
            .unwrap_or_default();
        if callbacks.is_empty() {
            return;
        }

        match self.make(abstract_) {
            Ok(object) => {
                debug!(abstract_name = %abstract_, listeners = callbacks.len(), "Firing rebind callbacks");
                for callback in callbacks {
                    callback(self, &object);
                }
            }
            Err(e) => warn!(abstract_name = %abstract_, error = %e, "Rebound abstract failed to resolve"),
        }
    }

    // ========== Introspection ==========

    /// Canonical name after one alias hop.
    pub fn get_alias(&self, name: &str) -> String {
        self.state
            .read()
            .aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.state.read().aliases.contains_key(name)
    }

    /// Bound via binding, instance or alias.
    pub fn bound(&self, abstract_: &str) -> bool {
        Self::is_bound(&self.state.read(), abstract_)
    }

    /// Whether the abstract has been requested at least once.
    pub fn resolved(&self, abstract_: &str) -> bool {
        let abstract_ = self.get_alias(abstract_);
        self.state.read().resolved.contains(&abstract_)
    }

    pub fn is_shared(&self, abstract_: &str) -> bool {
        Self::shared(&self.state.read(), abstract_)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.state.read().types.contains_key(name)
    }

    fn is_bound(state: &State, abstract_: &str) -> bool {
        state.bindings.contains_key(abstract_)
            || state.instances.contains_key(abstract_)
            || state.aliases.contains_key(abstract_)
    }

    fn shared(state: &State, abstract_: &str) -> bool {
        state.instances.contains_key(abstract_)
            || state.bindings.get(abstract_).is_some_and(|b| b.shared)
    }

    // ========== Invalidation ==========

    pub fn forget_instance(&self, abstract_: &str) {
        let abstract_ = self.get_alias(abstract_);
        self.state.write().instances.remove(&abstract_);
        trace!(abstract_name = %abstract_, "Shared instance forgotten");
    }

    pub fn forget_instances(&self) {
        let mut state = self.state.write();
        let count = state.instances.len();
        state.instances.clear();
        debug!(instance_count = count, "Cleared shared instances");
    }

    /// Drop every binding, instance, alias, type and callback.
    pub fn flush(&self) {
        *self.state.write() = State::default();
        debug!("Container flushed");
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Container")
            .field("bindings", &state.bindings.len())
            .field("instances", &state.instances.len())
            .field("aliases", &state.aliases)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_share_caches_first_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let container = Container::new();
        container.bind(
            "clock",
            Container::share(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(42u64))
            }),
            false,
        );

        let a = container.make_as::<u64>("clock").unwrap();
        let b = container.make_as::<u64>("clock").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bind_if_keeps_existing() {
        let container = Container::new();
        assert!(container.bind_if("name", |_, _| Ok(Arc::new("first")), false));
        assert!(!container.bind_if("name", |_, _| Ok(Arc::new("second")), false));
        assert_eq!(*container.make_as::<&str>("name").unwrap(), "first");
    }

    #[test]
    fn test_make_as_type_mismatch() {
        let container = Container::new();
        container.instance("port", Arc::new(8080u16));
        assert!(matches!(container.make_as::<String>("port"), Err(Error::Binding(_))));
    }

    #[test]
    fn test_resolved_tracking() {
        let container = Container::new();
        container.bind("thing", |_, _| Ok(Arc::new(1u8)), false);
        assert!(!container.resolved("thing"));
        container.make("thing").unwrap();
        assert!(container.resolved("thing"));
    }

    #[test]
    fn test_concurrent_resolution_of_shared_instance() {
        let container = Container::new();
        container.instance("config", Arc::new(String::from("shared")));
        let first = container.make("config").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let again = container.make("config").unwrap();
                        assert!(Arc::ptr_eq(&first, &again));
                    }
                });
            }
        });
        assert!(container.resolved("config"));
    }

    #[test]
    fn test_flush() {
        let container = Container::new();
        container.instance("a", Arc::new(1u8));
        container.alias("b", "a");
        container.flush();
        assert!(!container.bound("a"));
        assert!(!container.is_alias("b"));
    }
}
