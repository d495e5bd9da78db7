// Test Application Builder

use fulcrum_core::{
    Action, Application, ApplicationOptions, Container, Instance, Method, MiddlewareSpec, Router,
};
use std::sync::Arc;

/// A composed application, ready to take test requests.
pub struct TestApp {
    app: Arc<Application>,
}

impl TestApp {
    pub fn new(app: Application) -> Self {
        Self { app: Arc::new(app) }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn container(&self) -> &Container {
        self.app.container()
    }

    pub fn client(&self) -> crate::TestClient {
        crate::TestClient::new(self.app.clone())
    }
}

/// Builder for test applications
pub struct TestAppBuilder {
    app: Application,
}

impl TestAppBuilder {
    /// An application without middleware.
    pub fn new() -> Self {
        Self {
            app: Application::new(ApplicationOptions::default()),
        }
    }

    /// An application with the standard middleware stack.
    pub fn with_default_middleware(options: ApplicationOptions) -> Self {
        Self {
            app: Application::with_default_middleware(options),
        }
    }

    pub fn with_options(options: ApplicationOptions) -> Self {
        Self {
            app: Application::new(options),
        }
    }

    pub fn route(mut self, method: Method, uri: &str, action: impl Into<Action>) -> Self {
        self.app.router_mut().matching(&[method], uri, action);
        self
    }

    pub fn get(self, uri: &str, action: impl Into<Action>) -> Self {
        self.route(Method::GET, uri, action)
    }

    pub fn post(self, uri: &str, action: impl Into<Action>) -> Self {
        self.route(Method::POST, uri, action)
    }

    /// Register routes, filters or bindings directly on the router.
    pub fn routes(mut self, define: impl FnOnce(&mut Router)) -> Self {
        define(self.app.router_mut());
        self
    }

    pub fn middleware(mut self, spec: MiddlewareSpec) -> Self {
        self.app.middleware(spec);
        self
    }

    /// Share an instance through the container.
    pub fn instance(self, name: &str, value: Instance) -> Self {
        self.app.container().instance(name, value);
        self
    }

    /// Anything else the application exposes.
    pub fn configure(mut self, configure: impl FnOnce(&mut Application)) -> Self {
        configure(&mut self.app);
        self
    }

    pub fn build(self) -> TestApp {
        TestApp::new(self.app)
    }
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulcrum_core::{HandlerContext, handler};

    #[tokio::test]
    async fn test_builder_routes_and_instances() {
        let app = TestAppBuilder::new()
            .instance("greeting", Arc::new("hello".to_string()))
            .get(
                "/greet/{name}",
                handler(|ctx: HandlerContext| async move {
                    let greeting = ctx.make_as::<String>("greeting");
                    Ok(format!(
                        "{} {}",
                        greeting.map(|g| (*g).clone()).unwrap_or_default(),
                        ctx.param("name").unwrap_or("nobody")
                    ))
                }),
            )
            .build();

        let response = app.client().get("/greet/ada").await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_string().as_deref(), Some("hello ada"));
    }
}
