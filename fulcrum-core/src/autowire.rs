//! Constructor descriptions for autowiring.
//!
//! Rust has no runtime constructor reflection, so a type opts into autowiring
//! by implementing [`Constructible`]: it names itself, lists its constructor
//! [`Parameter`]s and builds itself from the resolved [`Arguments`]. The
//! [`Container`](crate::Container) walks that description exactly like a
//! reflective container would walk a constructor signature.
//!
//! ```
//! use fulcrum_core::{Arguments, Constructible, Container, Parameter};
//! use std::sync::Arc;
//!
//! struct Logger;
//!
//! impl Constructible for Logger {
//!     const NAME: &'static str = "Logger";
//!
//!     fn construct(_: &Arguments) -> fulcrum_core::Result<Self> {
//!         Ok(Logger)
//!     }
//! }
//!
//! struct Mailer {
//!     logger: Arc<Logger>,
//!     retries: u32,
//! }
//!
//! impl Constructible for Mailer {
//!     const NAME: &'static str = "Mailer";
//!
//!     fn parameters() -> Vec<Parameter> {
//!         vec![
//!             Parameter::class::<Logger>("logger"),
//!             Parameter::primitive("retries").with_default(3u32),
//!         ]
//!     }
//!
//!     fn construct(args: &Arguments) -> fulcrum_core::Result<Self> {
//!         Ok(Mailer {
//!             logger: args.get("logger")?,
//!             retries: args.value("retries")?,
//!         })
//!     }
//! }
//!
//! let container = Container::new();
//! container.register_type::<Logger>();
//! container.register_type::<Mailer>();
//!
//! let mailer = container.make_as::<Mailer>("Mailer").unwrap();
//! assert_eq!(mailer.retries, 3);
//! ```

use crate::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A resolved value, shared or not, as held by the container.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Caller-supplied constructor overrides, keyed by parameter name.
pub type Parameters = HashMap<String, Instance>;

/// What a constructor parameter asks the container for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// A scalar with no resolvable type; only an override or a default can satisfy it.
    Primitive,
    /// A dependency resolved by recursively making this abstract name.
    Class(String),
}

/// Declared default of a parameter.
#[derive(Clone)]
pub enum DefaultValue {
    /// The parameter is optional and defaults to "nothing".
    Null,
    Value(Instance),
}

impl DefaultValue {
    fn to_option(&self) -> Option<Instance> {
        match self {
            DefaultValue::Null => None,
            DefaultValue::Value(v) => Some(v.clone()),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Null => f.write_str("Null"),
            DefaultValue::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// One constructor parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<DefaultValue>,
}

impl Parameter {
    /// A dependency on another constructible type.
    pub fn class<T: Constructible>(name: impl Into<String>) -> Self {
        Self::abstract_name(name, T::NAME)
    }

    /// A dependency on an arbitrary abstract name (e.g. `"db"`).
    pub fn abstract_name(name: impl Into<String>, abstract_: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Class(abstract_.into()),
            default: None,
        }
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Primitive,
            default: None,
        }
    }

    pub fn with_default<V: Any + Send + Sync>(mut self, value: V) -> Self {
        self.default = Some(DefaultValue::Value(Arc::new(value)));
        self
    }

    /// Mark the parameter optional with an empty default.
    pub fn optional(mut self) -> Self {
        self.default = Some(DefaultValue::Null);
        self
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }

    pub(crate) fn default_value(&self) -> Option<Option<Instance>> {
        self.default.as_ref().map(DefaultValue::to_option)
    }
}

/// Resolved constructor arguments handed to [`Constructible::construct`].
pub struct Arguments {
    class: String,
    values: HashMap<String, Option<Instance>>,
}

impl Arguments {
    pub(crate) fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            values: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Option<Instance>) {
        self.values.insert(name.into(), value);
    }

    /// The raw resolved value, if the parameter resolved to something.
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.values.get(name).and_then(Option::as_ref)
    }

    /// A required argument, downcast to its concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.optional(name)?.ok_or_else(|| {
            Error::UnresolvableDependency(format!(
                "Parameter [{}] of [{}] resolved to nothing",
                name, self.class
            ))
        })
    }

    /// An argument that may have resolved to its empty default.
    pub fn optional<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        match self.instance(name) {
            None => Ok(None),
            Some(value) => value.clone().downcast::<T>().map(Some).map_err(|_| {
                Error::Binding(format!(
                    "Parameter [{}] of [{}] is not a {}",
                    name,
                    self.class,
                    std::any::type_name::<T>()
                ))
            }),
        }
    }

    /// A required argument, cloned out of its shared wrapper (handy for scalars).
    pub fn value<T: Any + Send + Sync + Clone>(&self, name: &str) -> Result<T> {
        self.get::<T>(name).map(|v| (*v).clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instance(name).is_some()
    }
}

/// A type the container can build by resolving its constructor parameters.
pub trait Constructible: Any + Send + Sync + Sized {
    /// The abstract name the type is registered under.
    const NAME: &'static str;

    /// Constructor signature, in declaration order. Empty for zero-argument types.
    fn parameters() -> Vec<Parameter> {
        Vec::new()
    }

    fn construct(args: &Arguments) -> Result<Self>;
}

/// Type-erased constructor registered in the container.
#[derive(Clone, Copy)]
pub(crate) struct TypeEntry {
    pub name: &'static str,
    pub parameters: fn() -> Vec<Parameter>,
    pub construct: fn(&Arguments) -> Result<Instance>,
}

fn construct_erased<T: Constructible>(args: &Arguments) -> Result<Instance> {
    T::construct(args).map(|value| Arc::new(value) as Instance)
}

impl TypeEntry {
    pub fn of<T: Constructible>() -> Self {
        Self {
            name: T::NAME,
            parameters: T::parameters,
            construct: construct_erased::<T>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_builders() {
        let p = Parameter::primitive("retries").with_default(3u32);
        assert_eq!(p.kind, ParamKind::Primitive);
        assert!(p.is_optional());

        let p = Parameter::abstract_name("db", "database").optional();
        assert_eq!(p.kind, ParamKind::Class("database".into()));
        assert!(matches!(p.default_value(), Some(None)));

        assert!(!Parameter::primitive("name").is_optional());
    }

    #[test]
    fn test_arguments_access() {
        let mut args = Arguments::new("Mailer");
        args.insert("retries", Some(Arc::new(5u32)));
        args.insert("cache", None);

        assert_eq!(args.value::<u32>("retries").unwrap(), 5);
        assert!(args.optional::<String>("cache").unwrap().is_none());
        assert!(matches!(
            args.get::<String>("cache"),
            Err(Error::UnresolvableDependency(_))
        ));
        assert!(matches!(
            args.get::<String>("retries"),
            Err(Error::Binding(_))
        ));
    }
}
