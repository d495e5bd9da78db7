//! Integration tests for common Fulcrum workflows.
//!
//! A configured application with services, controllers, grouped routes,
//! filters and middleware, driven through the test client.

use fulcrum::prelude::*;
use fulcrum::{Cookie, Instance, ParamValue, missing_method};
use fulcrum_config::{AppConfig, ConfigManager, FileFormat};
use fulcrum_testing::*;
use store::Inventory;
use std::sync::Arc;

/// Minimal in-memory service used by the controller below.
mod store {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Inventory {
        items: Mutex<BTreeMap<u32, String>>,
    }

    impl Inventory {
        pub fn add(&self, id: u32, name: &str) {
            if let Ok(mut items) = self.items.lock() {
                items.insert(id, name.to_string());
            }
        }

        pub fn find(&self, id: u32) -> Option<String> {
            self.items.lock().ok()?.get(&id).cloned()
        }

        pub fn names(&self) -> Vec<String> {
            self.items
                .lock()
                .map(|items| items.values().cloned().collect())
                .unwrap_or_default()
        }
    }
}

struct ItemsController {
    inventory: Arc<Inventory>,
}

impl Constructible for ItemsController {
    const NAME: &'static str = "ItemsController";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::class::<Inventory>("inventory")]
    }

    fn construct(args: &Arguments) -> Result<Self> {
        Ok(Self {
            inventory: args.get("inventory")?,
        })
    }
}

impl Constructible for Inventory {
    const NAME: &'static str = "Inventory";

    fn construct(_: &Arguments) -> Result<Self> {
        Ok(Inventory::default())
    }
}

#[async_trait]
impl Controller for ItemsController {
    fn filters(&self) -> Vec<ControllerFilter> {
        vec![ControllerFilter::before("auth").except(&["index", "show"])]
    }

    async fn call_action(&self, method: &str, parameters: Vec<ParamValue>, ctx: HandlerContext) -> Result<Payload> {
        match method {
            "index" => Payload::json(&self.inventory.names()),
            "show" => {
                let id: u32 = parameters
                    .first()
                    .and_then(ParamValue::as_str)
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(|| Error::BadRequest("item id must be a number".into()))?;
                self.inventory
                    .find(id)
                    .map(Payload::from)
                    .ok_or_else(|| Error::NotFound(format!("item {}", id)))
            }
            "store" => {
                let name = ctx
                    .request
                    .input("name")
                    .ok_or_else(|| Error::BadRequest("name is required".into()))?;
                self.inventory.add(99, &name);
                Ok(Response::text(name).with_status(StatusCode::CREATED).into())
            }
            other => Err(missing_method(other)),
        }
    }
}

fn build_app() -> TestApp {
    let manager = ConfigManager::new();
    manager
        .load_str("name = \"shop\"\ncharset = \"UTF-8\"\n[log]\nlevel = \"debug\"", FileFormat::Toml)
        .unwrap();
    let config = AppConfig::from_manager(&manager).unwrap();

    TestAppBuilder::with_default_middleware(config.application_options().unwrap())
        .configure(|app| {
            manager.register(app.container());
            app.container().singleton_type::<Inventory>("Inventory");
            if let Ok(inventory) = app.container().make_as::<Inventory>("Inventory") {
                inventory.add(1, "anvil");
                inventory.add(2, "bellows");
            }
        })
        .routes(|router| {
            router.register_controller::<ItemsController>();
            router.filter(
                "auth",
                fulcrum::FnFilter::new(|ctx: &FilterContext<'_>| -> Result<Option<Payload>> {
                    match ctx.request.header("authorization") {
                        Some("Bearer secret") => Ok(None),
                        _ => Err(Error::Unauthorized("missing token".into())),
                    }
                }),
            );
            router.group(GroupAttributes::new().prefix("api"), |r| {
                r.get("/items", "ItemsController@index");
                r.get("/items/{id}", "ItemsController@show").where_("id", "[0-9]+");
                r.post("/items", "ItemsController@store");
                r.get(
                    "/whoami",
                    handler(|ctx: HandlerContext| async move {
                        ctx.make_as::<ConfigManager>("config")
                            .map(|config| config.get_or("name", String::new()))
                    }),
                );
            });
            router.get(
                "/login",
                handler(|ctx: HandlerContext| async move {
                    ctx.cookies().queue(Cookie::new("token", "secret").http_only(true));
                    Ok("ok")
                }),
            );
        })
        .build()
}

#[tokio::test]
async fn test_controller_actions_through_the_stack() {
    let client = build_app().client();

    let response = client.get("/api/items").await;
    assert_status(&response, 200);
    assert_json(&response, &serde_json::json!(["anvil", "bellows"]));

    let response = client.get("/api/items/2").await;
    assert_status(&response, 200);
    assert_header(&response, "content-type", "text/html; charset=UTF-8");
    assert_body_contains(&response, "bellows");

    let response = client.get("/api/items/7").await;
    assert_status(&response, 404);

    // Non-numeric ids never match the constrained route.
    let response = client.get("/api/items/abc").await;
    assert_status(&response, 404);
}

#[tokio::test]
async fn test_controller_filter_guards_writes() {
    let client = build_app().client();

    let response = client
        .build(Method::POST, "/api/items")
        .form(&[("name", "tongs")])
        .unwrap()
        .send(&client)
        .await;
    assert_status(&response, 401);

    let response = client
        .build(Method::POST, "/api/items")
        .header("authorization", "Bearer secret")
        .form(&[("name", "tongs")])
        .unwrap()
        .send(&client)
        .await;
    assert_status(&response, 201);
    assert_body_contains(&response, "tongs");

    let response = client.get("/api/items/99").await;
    assert_body_contains(&response, "tongs");
}

#[tokio::test]
async fn test_config_is_resolvable_from_handlers() {
    let client = build_app().client();
    let response = client.get("/api/whoami").await;
    assert_body_contains(&response, "shop");
}

#[tokio::test]
async fn test_queued_cookies_reach_the_response() {
    let client = build_app().client();
    let response = client.get("/login").await;
    let cookies = response.assert_success().cookie_headers();
    assert_eq!(cookies.len(), 1);
    let header = cookies[0].to_str().unwrap();
    assert!(header.starts_with("token=secret"));
    assert!(header.contains("HttpOnly"));

    // Cookies belong to the request that queued them.
    let response = client.get("/api/items").await;
    assert!(response.assert_success().cookie_headers().is_empty());
}

#[tokio::test]
async fn test_shared_services_are_singletons() {
    let app = build_app();
    let first = app.container().make_as::<Inventory>("Inventory").unwrap();
    let second = app.container().make_as::<Inventory>("Inventory").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let as_instance: Instance = first.clone();
    assert!(as_instance.downcast::<Inventory>().is_ok());
}
