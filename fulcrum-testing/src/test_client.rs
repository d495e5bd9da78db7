// Test HTTP Client

use fulcrum_core::{Application, Body, Error, Method, Request, Response};
use std::sync::Arc;

/// Drives an [`Application`] in-process, through its whole kernel stack.
///
/// Every request is handled, its body collected, and then the stack's
/// termination hooks run, as they would after a real response was sent.
#[derive(Clone)]
pub struct TestClient {
    app: Arc<Application>,
}

impl TestClient {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request(Method::DELETE, path, None).await
    }

    pub async fn patch(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> TestResponse {
        let mut request = Request::new(method, path);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.send(request).await
    }

    /// Start building a request with headers, query or body.
    pub fn build(&self, method: Method, path: &str) -> TestRequestBuilder {
        TestRequestBuilder::new(method, path)
    }

    pub async fn send(&self, request: Request) -> TestResponse {
        let mut response = match self.app.handle(request.clone()).await {
            Ok(response) => response,
            Err(error) => return TestResponse::Error(error),
        };

        let body = std::mem::take(&mut response.body);
        match body.collect().await {
            Ok(bytes) => response.body = Body::Full(bytes),
            Err(error) => return TestResponse::Error(error),
        }

        self.app.terminate(&request, &response);
        TestResponse::Success(response)
    }
}

/// Builder for test requests
pub struct TestRequestBuilder {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    query_params: Vec<(String, String)>,
    secure: bool,
}

impl TestRequestBuilder {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            query_params: Vec::new(),
            secure: false,
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and its content type.
    pub fn json<T: serde::Serialize>(mut self, data: &T) -> Result<Self, Error> {
        self.body = serde_json::to_vec(data).map_err(|e| Error::Serialization(e.to_string()))?;
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    /// Set an urlencoded form body and its content type.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, Error> {
        let encoded =
            serde_urlencoded::to_string(fields).map_err(|e| Error::Serialization(e.to_string()))?;
        self.body = encoded.into_bytes();
        self.headers.push((
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        ));
        Ok(self)
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn build(self) -> Request {
        let mut target = self.path;
        if !self.query_params.is_empty() {
            if let Ok(query) = serde_urlencoded::to_string(&self.query_params) {
                target = format!("{}?{}", target, query);
            }
        }

        let mut request = Request::new(self.method, &target)
            .with_body(self.body)
            .with_secure(self.secure);
        for (key, value) in self.headers {
            request = request.with_header(key, value);
        }
        request
    }

    pub async fn send(self, client: &TestClient) -> TestResponse {
        client.send(self.build()).await
    }
}

/// Outcome of a test request: a response, or the error that escaped the
/// kernel stack.
#[derive(Debug)]
pub enum TestResponse {
    Success(Response),
    Error(Error),
}

impl TestResponse {
    /// Panics unless the stack produced a response.
    pub fn assert_success(&self) -> &Response {
        match self {
            TestResponse::Success(response) => response,
            TestResponse::Error(error) => {
                panic!("Expected a response, got error: {:?}", error)
            }
        }
    }

    /// Panics unless the stack returned an error.
    pub fn assert_error(&self) -> &Error {
        match self {
            TestResponse::Error(error) => error,
            TestResponse::Success(response) => {
                panic!("Expected an error, got a {} response", response.status)
            }
        }
    }

    /// The response status, or the status an escaped error maps to.
    pub fn status(&self) -> u16 {
        match self {
            TestResponse::Success(response) => response.status.as_u16(),
            TestResponse::Error(error) => error.status_code().as_u16(),
        }
    }

    pub fn body_string(&self) -> Option<String> {
        match self {
            TestResponse::Success(response) => response
                .body_bytes()
                .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok()),
            TestResponse::Error(_) => None,
        }
    }

    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        match self {
            TestResponse::Success(response) => {
                let bytes = response.body_bytes().map(|b| &b[..]).unwrap_or_default();
                serde_json::from_slice(bytes).map_err(|e| format!("Deserialization error: {}", e))
            }
            TestResponse::Error(error) => Err(format!("{:?}", error)),
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        match self {
            TestResponse::Success(response) => response.header(key),
            TestResponse::Error(_) => None,
        }
    }
}
