use fulcrum_core::{Arguments, Constructible, Container, Error, Instance, Parameter, Parameters};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Logger;

impl Constructible for Logger {
    const NAME: &'static str = "Logger";

    fn construct(_: &Arguments) -> fulcrum_core::Result<Self> {
        Ok(Logger)
    }
}

struct Service {
    logger: Arc<Logger>,
}

impl Constructible for Service {
    const NAME: &'static str = "Service";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::class::<Logger>("logger")]
    }

    fn construct(args: &Arguments) -> fulcrum_core::Result<Self> {
        Ok(Service {
            logger: args.get("logger")?,
        })
    }
}

struct Report {
    logger: Option<Arc<Logger>>,
    pages: u32,
}

impl Constructible for Report {
    const NAME: &'static str = "Report";

    fn parameters() -> Vec<Parameter> {
        vec![
            Parameter::class::<Logger>("logger").optional(),
            Parameter::primitive("pages").with_default(10u32),
        ]
    }

    fn construct(args: &Arguments) -> fulcrum_core::Result<Self> {
        Ok(Report {
            logger: args.optional("logger")?,
            pages: args.value("pages")?,
        })
    }
}

struct Mailer {
    from: String,
}

impl Constructible for Mailer {
    const NAME: &'static str = "Mailer";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::primitive("from")]
    }

    fn construct(args: &Arguments) -> fulcrum_core::Result<Self> {
        Ok(Mailer {
            from: args.value("from")?,
        })
    }
}

fn text(value: &str) -> Instance {
    Arc::new(value.to_string())
}

#[test]
fn test_singleton_logger_shared_by_services() {
    let container = Container::new();
    container.singleton_type::<Logger>("Logger");
    container.bind_type::<Service>("Service", false);

    let first = container.make_as::<Service>("Service").unwrap();
    let second = container.make_as::<Service>("Service").unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.logger, &second.logger));
}

#[test]
fn test_singleton_and_transient_bindings() {
    let container = Container::new();
    container.singleton("shared", |_, _| Ok(text("one")));
    container.bind("fresh", |_, _| Ok(text("one")), false);

    let a = container.make_as::<String>("shared").unwrap();
    let b = container.make_as::<String>("shared").unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let c = container.make_as::<String>("fresh").unwrap();
    let d = container.make_as::<String>("fresh").unwrap();
    assert!(!Arc::ptr_eq(&c, &d));
    assert!(container.is_shared("shared"));
    assert!(!container.is_shared("fresh"));
}

#[test]
fn test_most_recent_binding_wins() {
    let container = Container::new();
    container.bind("greeting", |_, _| Ok(text("hello")), false);
    container.bind("greeting", |_, _| Ok(text("hi")), false);
    assert_eq!(*container.make_as::<String>("greeting").unwrap(), "hi");

    let value: Arc<String> = Arc::new("exact".to_string());
    container.instance("greeting", value.clone());
    for _ in 0..3 {
        let resolved = container.make_as::<String>("greeting").unwrap();
        assert!(Arc::ptr_eq(&resolved, &value));
    }

    container.bind("greeting", |_, _| Ok(text("rebound")), false);
    assert_eq!(*container.make_as::<String>("greeting").unwrap(), "rebound");
}

#[test]
fn test_alias_transparency() {
    let container = Container::new();
    container.alias("log", "Logger");
    container.singleton_type::<Logger>("Logger");

    let through_alias = container.make_as::<Logger>("log").unwrap();
    let direct = container.make_as::<Logger>("Logger").unwrap();
    assert!(Arc::ptr_eq(&through_alias, &direct));
    assert!(container.is_alias("log"));
    assert_eq!(container.get_alias("log"), "Logger");
}

#[test]
fn test_instance_clears_alias() {
    let container = Container::new();
    container.alias("cache", "memory");
    container.instance("cache", text("redis"));
    assert!(!container.is_alias("cache"));
    assert_eq!(*container.make_as::<String>("cache").unwrap(), "redis");
}

#[test]
fn test_autowiring_optional_dependency_and_defaults() {
    let container = Container::new();
    container.register_type::<Report>();

    let report = container.make_as::<Report>("Report").unwrap();
    assert!(report.logger.is_none());
    assert_eq!(report.pages, 10);

    container.register_type::<Logger>();
    let mut overrides = Parameters::new();
    overrides.insert("pages".to_string(), Arc::new(3u32));
    let report = container.make_as_with::<Report>("Report", &overrides).unwrap();
    assert!(report.logger.is_some());
    assert_eq!(report.pages, 3);
}

#[test]
fn test_autowiring_failures() {
    let container = Container::new();
    container.register_type::<Service>();
    assert!(matches!(
        container.make("Service"),
        Err(Error::UnresolvableDependency(_))
    ));

    container.register_type::<Mailer>();
    assert!(matches!(
        container.make("Mailer"),
        Err(Error::UnresolvableDependency(_))
    ));

    let mut overrides = Parameters::new();
    overrides.insert("from".to_string(), text("noreply@example.com"));
    let mailer = container.make_as_with::<Mailer>("Mailer", &overrides).unwrap();
    assert_eq!(mailer.from, "noreply@example.com");

    assert!(matches!(
        container.make("Nothing"),
        Err(Error::UnresolvableDependency(_))
    ));
}

struct Chicken;
struct Egg;

impl Constructible for Chicken {
    const NAME: &'static str = "Chicken";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::abstract_name("egg", "Egg")]
    }

    fn construct(_: &Arguments) -> fulcrum_core::Result<Self> {
        Ok(Chicken)
    }
}

impl Constructible for Egg {
    const NAME: &'static str = "Egg";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::abstract_name("chicken", "Chicken")]
    }

    fn construct(_: &Arguments) -> fulcrum_core::Result<Self> {
        Ok(Egg)
    }
}

#[test]
fn test_circular_dependency_is_reported() {
    let container = Container::new();
    container.register_type::<Chicken>();
    container.register_type::<Egg>();

    match container.make("Chicken") {
        Err(Error::UnresolvableDependency(reason)) => assert!(reason.contains("Circular")),
        other => panic!("expected a circular dependency error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_extend_binding_and_shared_instance() {
    let container = Container::new();
    container.bind("greeting", |_, _| Ok(text("hi")), false);
    container
        .extend("greeting", |object, _| {
            let greeting = object.downcast::<String>().map_err(|_| Error::Binding("not text".into()))?;
            Ok(Arc::new(format!("{}!", greeting)) as Instance)
        })
        .unwrap();
    assert_eq!(*container.make_as::<String>("greeting").unwrap(), "hi!");

    let rebinds = Arc::new(AtomicUsize::new(0));
    container.instance("motd", text("welcome"));
    let counter = rebinds.clone();
    container
        .rebinding("motd", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    container
        .extend("motd", |object, _| {
            let motd = object.downcast::<String>().map_err(|_| Error::Binding("not text".into()))?;
            Ok(Arc::new(motd.to_uppercase()) as Instance)
        })
        .unwrap();
    assert_eq!(*container.make_as::<String>("motd").unwrap(), "WELCOME");
    assert_eq!(rebinds.load(Ordering::SeqCst), 1);

    assert!(matches!(
        container.extend("unknown", |object, _| Ok(object)),
        Err(Error::Binding(_))
    ));
}

#[test]
fn test_rebinding_callbacks() {
    let container = Container::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let log = seen.clone();
    let current = container
        .rebinding("db", move |_, object| {
            if let Ok(name) = object.clone().downcast::<String>() {
                log.lock().push((*name).clone());
            }
        })
        .unwrap();
    assert!(current.is_none());

    container.bind("db", |_, _| Ok(text("sqlite")), false);
    assert!(seen.lock().is_empty());

    container.bind("db", |_, _| Ok(text("postgres")), false);
    container.instance("db", text("mysql"));
    assert_eq!(*seen.lock(), vec!["postgres", "mysql"]);

    let current = container.rebinding("db", |_, _| {}).unwrap();
    assert!(current.is_some());
}

#[test]
fn test_resolving_callbacks() {
    let container = Container::new();
    let specific = Arc::new(AtomicUsize::new(0));
    let global = Arc::new(AtomicUsize::new(0));

    container.singleton_type::<Logger>("Logger");
    let counter = specific.clone();
    container.resolving("Logger", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = global.clone();
    container.resolving_any(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    container.make("Logger").unwrap();
    container.make("Logger").unwrap();
    assert_eq!(specific.load(Ordering::SeqCst), 1);
    assert_eq!(global.load(Ordering::SeqCst), 1);

    container.bind("other", |_, _| Ok(text("x")), false);
    container.make("other").unwrap();
    assert_eq!(specific.load(Ordering::SeqCst), 1);
    assert_eq!(global.load(Ordering::SeqCst), 2);
}

#[test]
fn test_forget_instance_rebuilds_singleton() {
    let container = Container::new();
    container.singleton_type::<Logger>("Logger");
    let first = container.make_as::<Logger>("Logger").unwrap();
    container.forget_instance("Logger");
    let second = container.make_as::<Logger>("Logger").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(container.resolved("Logger"));
}
