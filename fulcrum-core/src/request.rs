// HTTP request abstraction

use crate::content_negotiation::{Accept, MediaType, format_for_mime_type};
use crate::cookie::CookieJar;
use crate::logging::warn;
use crate::{Error, Result};
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Version};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// An incoming HTTP request, independent of the transport it arrived on.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Raw (still percent-encoded) path, without the query string
    pub path: String,
    pub query_string: Option<String>,
    pub query_params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub version: Version,
    /// Connection-level TLS flag as reported by the transport
    pub secure: bool,
    pub remote_addr: Option<IpAddr>,
    pub trusted_proxies: Arc<[IpAddr]>,
    /// Explicit request format, overriding `Accept` negotiation
    pub format: Option<String>,
    /// Cookies queued for this request's response; clones share it
    jar: Arc<CookieJar>,
}

impl Request {
    /// Build a request from a method and a request target (`/path?query`).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let query_params = query_string
            .as_deref()
            .map(parse_urlencoded)
            .unwrap_or_default();

        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query_string,
            query_params,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            version: Version::HTTP_11,
            secure: false,
            remote_addr: None,
            trusted_proxies: Arc::from(Vec::new()),
            format: None,
            jar: Arc::new(CookieJar::new()),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    // ========== Builders ==========

    /// Add a header; invalid names or values are logged and skipped.
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        match (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!("Ignoring invalid request header"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_trusted_proxies(mut self, proxies: impl Into<Arc<[IpAddr]>>) -> Self {
        self.trusted_proxies = proxies.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    // ========== Path ==========

    /// Path without surrounding slashes; `/` for the root.
    pub fn path(&self) -> String {
        let trimmed = self.path.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// [`Request::path`] with percent-encoding removed.
    pub fn decoded_path(&self) -> String {
        let path = self.path();
        urlencoding::decode(&path)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(path)
    }

    pub fn segments(&self) -> Vec<String> {
        self.decoded_path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_method(&self, method: &Method) -> bool {
        &self.method == method
    }

    // ========== Input ==========

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Body input (form or JSON object) merged over the query string.
    pub fn all_input(&self) -> HashMap<String, String> {
        let mut input = self.query_params.clone();
        input.extend(self.body_input());
        input
    }

    pub fn input(&self, name: &str) -> Option<String> {
        self.body_input()
            .remove(name)
            .or_else(|| self.query(name).map(str::to_string))
    }

    fn body_input(&self) -> HashMap<String, String> {
        if self.body.is_empty() {
            return HashMap::new();
        }
        if self.is_json() {
            return match serde_json::from_slice::<serde_json::Value>(&self.body) {
                Ok(serde_json::Value::Object(map)) => map
                    .into_iter()
                    .map(|(key, value)| {
                        let value = match value {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, value)
                    })
                    .collect(),
                _ => HashMap::new(),
            };
        }
        let form = self
            .content_type()
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if form {
            std::str::from_utf8(&self.body)
                .map(parse_urlencoded)
                .unwrap_or_default()
        } else {
            HashMap::new()
        }
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Deserialization(e.to_string()))
    }

    // ========== Headers & cookies ==========

    /// The jar of cookies to send back with this request's response.
    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn cookies(&self) -> HashMap<String, String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let value = urlencoding::decode(value.trim())
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.trim().to_string());
                Some((name.trim().to_string(), value))
            })
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }

    /// Whether the peer is one of the configured trusted proxies.
    pub fn is_from_trusted_proxy(&self) -> bool {
        self.remote_addr
            .is_some_and(|addr| self.trusted_proxies.contains(&addr))
    }

    fn forwarded(&self, name: &str) -> Option<&str> {
        if !self.is_from_trusted_proxy() {
            return None;
        }
        self.header(name)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// HTTPS, either on this connection or as reported by a trusted proxy.
    pub fn is_secure(&self) -> bool {
        match self.forwarded("x-forwarded-proto") {
            Some(proto) => proto.eq_ignore_ascii_case("https") || proto.eq_ignore_ascii_case("on"),
            None => self.secure,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.is_secure() { "https" } else { "http" }
    }

    /// Lower-cased host name without port.
    pub fn host(&self) -> String {
        let raw = self
            .forwarded("x-forwarded-host")
            .or_else(|| self.header(header::HOST.as_str()))
            .unwrap_or("");
        let host = match raw.strip_prefix('[') {
            // IPv6 literal
            Some(rest) => rest.split(']').next().unwrap_or(""),
            None => raw.rsplit_once(':').map(|(h, _)| h).unwrap_or(raw),
        };
        host.to_ascii_lowercase()
    }

    // ========== Content negotiation ==========

    pub fn accept(&self) -> Accept {
        Accept::parse(self.header(header::ACCEPT.as_str()).unwrap_or(""))
    }

    /// Acceptable content types in quality order.
    pub fn acceptable_content_types(&self) -> Vec<String> {
        self.accept().content_types()
    }

    /// The client prefers a JSON representation.
    pub fn wants_json(&self) -> bool {
        self.accept().preferred().is_some_and(MediaType::is_json)
    }

    /// The request body is declared as JSON.
    pub fn is_json(&self) -> bool {
        self.content_type()
            .and_then(MediaType::parse)
            .is_some_and(|mt| mt.is_json())
    }

    pub fn ajax(&self) -> bool {
        self.header("x-requested-with") == Some("XMLHttpRequest")
    }

    /// The format the response should be rendered in.
    ///
    /// An explicit format wins; otherwise the most preferred acceptable type
    /// with a known format; otherwise `html`.
    pub fn format(&self) -> String {
        if let Some(format) = &self.format {
            return format.clone();
        }
        self.accept()
            .media_types
            .iter()
            .filter(|(mt, q)| *q > 0.0 && !mt.is_wildcard())
            .find_map(|(mt, _)| format_for_mime_type(&mt.to_string()))
            .unwrap_or("html")
            .to_string()
    }
}

fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(input)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_target_parsing() {
        let req = Request::get("/search/?q=rust%20lang&page=2");
        assert_eq!(req.path(), "search");
        assert_eq!(req.query("q"), Some("rust lang"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(Request::get("/").path(), "/");
        assert_eq!(Request::get("").path, "/");
    }

    #[test]
    fn test_decoded_path_and_segments() {
        let req = Request::get("/files/my%20doc/v2");
        assert_eq!(req.decoded_path(), "files/my doc/v2");
        assert_eq!(req.segments(), vec!["files", "my doc", "v2"]);
    }

    #[test]
    fn test_form_and_json_input() {
        let form = Request::post("/login?remember=1")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body("user=ada&remember=0");
        assert_eq!(form.input("user").as_deref(), Some("ada"));
        assert_eq!(form.input("remember").as_deref(), Some("0"));
        assert_eq!(form.all_input().len(), 2);

        let json = Request::post("/items")
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"widget","count":3}"#);
        assert_eq!(json.input("count").as_deref(), Some("3"));
        assert!(json.is_json());
    }

    #[test]
    fn test_cookies() {
        let req = Request::get("/").with_header("cookie", "session=abc%3D; theme=dark");
        assert_eq!(req.cookie("session").as_deref(), Some("abc="));
        assert_eq!(req.cookie("theme").as_deref(), Some("dark"));
        assert!(req.cookie("missing").is_none());
    }

    #[test]
    fn test_forwarded_headers_require_trusted_proxy() {
        let proxy = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let base = Request::get("/")
            .with_header("host", "internal:8080")
            .with_header("x-forwarded-proto", "https")
            .with_header("x-forwarded-host", "Example.COM");

        let untrusted = base.clone().with_remote_addr(proxy);
        assert!(!untrusted.is_secure());
        assert_eq!(untrusted.host(), "internal");

        let trusted = base.with_remote_addr(proxy).with_trusted_proxies(vec![proxy]);
        assert!(trusted.is_secure());
        assert_eq!(trusted.scheme(), "https");
        assert_eq!(trusted.host(), "example.com");
    }

    #[test]
    fn test_format_negotiation() {
        let req = Request::get("/").with_header("accept", "application/json, text/html;q=0.9");
        assert_eq!(req.format(), "json");
        assert!(req.wants_json());

        assert_eq!(Request::get("/").format(), "html");
        assert_eq!(
            Request::get("/").with_header("accept", "*/*").format(),
            "html"
        );
        assert_eq!(Request::get("/").with_format("xml").format(), "xml");
    }
}
