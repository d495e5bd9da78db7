// HTTP response abstraction and action results

use crate::content_negotiation::mime_type_for_format;
use crate::cookie::Cookie;
use crate::logging::warn;
use crate::request::Request;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use serde::Serialize;
use std::fmt;
use std::io;
use std::pin::Pin;

/// A streamed response body.
pub type BodyStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, io::Error>> + Send + Sync>>;

/// Response content.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
    Stream(BodyStream),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(bytes) => bytes.is_empty(),
            Body::Stream(_) => false,
        }
    }

    /// Length when known up front.
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Empty => Some(0),
            Body::Full(bytes) => Some(bytes.len()),
            Body::Stream(_) => None,
        }
    }

    /// Collect the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Full(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Full(Bytes::from(v))
    }
}

/// HTTP response
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// HTTP/1.0 until [`Response::prepare`] upgrades it
    pub version: Version,
    /// Overrides the application charset in [`Response::prepare`]
    pub charset: Option<String>,
    pub cookies: Vec<Cookie>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
            version: Version::HTTP_10,
            charset: None,
            cookies: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn created() -> Self {
        Self::new(StatusCode::CREATED)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// `200` with a body; the content type is settled by [`Response::prepare`].
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok().with_body(body.into())
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::text(body).with_header(header::CONTENT_TYPE, "text/html")
    }

    /// `200` with `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Self::ok()
            .with_header(header::CONTENT_TYPE, "application/json")
            .with_body(body))
    }

    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::FOUND).with_header(header::LOCATION, location)
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Send + Sync + 'static,
    {
        Self::ok().with_body(Body::Stream(Box::pin(stream)))
    }

    // ========== Builders ==========

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set a header, replacing existing values; invalid ones are logged and skipped.
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        match (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("Ignoring invalid response header"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    // ========== Accessors ==========

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body, when it is held in memory.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Full(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    /// `204` and `304` carry no content.
    pub fn is_empty(&self) -> bool {
        self.status == StatusCode::NO_CONTENT || self.status == StatusCode::NOT_MODIFIED
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    /// `Set-Cookie` values for every attached cookie.
    pub fn cookie_headers(&self) -> Vec<HeaderValue> {
        self.cookies
            .iter()
            .filter_map(Cookie::to_header_value)
            .collect()
    }

    /// Fill in the headers and protocol details the request implies.
    ///
    /// * 1xx, 204 and 304 lose their body and content headers.
    /// * Without a `Content-Type`, the request format's MIME type is used, and
    ///   failing that `text/html`; `text/*` types get the charset appended.
    /// * `Transfer-Encoding` drops `Content-Length`.
    /// * `HEAD` responses lose their body but keep their length.
    /// * The protocol is HTTP/1.1 unless the request was HTTP/1.0, where a
    ///   `no-cache` directive also gets `Pragma` and `Expires`.
    pub fn prepare(&mut self, request: &Request, default_charset: &str) {
        if self.is_informational() || self.is_empty() {
            self.body = Body::Empty;
            self.headers.remove(header::CONTENT_TYPE);
            self.headers.remove(header::CONTENT_LENGTH);
        } else {
            if !self.headers.contains_key(header::CONTENT_TYPE) {
                if let Some(mime) = mime_type_for_format(&request.format()) {
                    self.headers
                        .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
                }
            }

            let charset = self.charset.as_deref().unwrap_or(default_charset);
            let content_type = self.header(header::CONTENT_TYPE.as_str()).map(str::to_string);
            let fixed = match content_type {
                None => Some(format!("text/html; charset={}", charset)),
                Some(ct) if ct.starts_with("text/") && !ct.contains("charset") => {
                    Some(format!("{}; charset={}", ct, charset))
                }
                Some(_) => None,
            };
            if let Some(value) = fixed.and_then(|v| HeaderValue::from_str(&v).ok()) {
                self.headers.insert(header::CONTENT_TYPE, value);
            }

            if self.headers.contains_key(header::TRANSFER_ENCODING) {
                self.headers.remove(header::CONTENT_LENGTH);
            }

            if request.method == Method::HEAD {
                let length = match self.headers.get(header::CONTENT_LENGTH) {
                    Some(existing) => Some(existing.clone()),
                    None => self.body.len().filter(|len| *len > 0).map(HeaderValue::from),
                };
                self.body = Body::Empty;
                if let Some(length) = length {
                    self.headers.insert(header::CONTENT_LENGTH, length);
                }
            }
        }

        if request.version != Version::HTTP_10 {
            self.version = Version::HTTP_11;
        }

        let no_cache = self
            .header(header::CACHE_CONTROL.as_str())
            .is_some_and(|cc| cc.contains("no-cache"));
        if self.version == Version::HTTP_10 && no_cache {
            self.headers
                .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            self.headers
                .insert(header::EXPIRES, HeaderValue::from_static("-1"));
        }
    }

    /// Collect the body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

/// The raw result of a filter or action, before normalization.
#[derive(Debug)]
pub enum Payload {
    Response(Response),
    Text(String),
    Json(serde_json::Value),
    /// Nothing returned; becomes an empty `200`.
    Empty,
}

impl Payload {
    /// Serialize any value into a JSON payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Wrap the payload in a response if it is not one already.
    pub fn into_response(self) -> Result<Response> {
        match self {
            Payload::Response(response) => Ok(response),
            Payload::Text(text) => Ok(Response::text(text)),
            Payload::Json(value) => Response::json(&value),
            Payload::Empty => Ok(Response::ok()),
        }
    }
}

impl From<Response> for Payload {
    fn from(response: Response) -> Self {
        Payload::Response(response)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(mut response: Response, request: &Request) -> Response {
        response.prepare(request, "UTF-8");
        response
    }

    #[test]
    fn test_default_content_type_and_charset() {
        let res = prepared(Response::text("hi"), &Request::get("/"));
        assert_eq!(res.header("content-type"), Some("text/html; charset=UTF-8"));
        assert_eq!(res.version, Version::HTTP_11);

        let res = prepared(
            Response::text("hi").with_header("content-type", "text/plain"),
            &Request::get("/"),
        );
        assert_eq!(res.header("content-type"), Some("text/plain; charset=UTF-8"));
    }

    #[test]
    fn test_content_type_from_request_format() {
        let req = Request::get("/").with_header("accept", "application/json");
        let res = prepared(Response::text("{}"), &req);
        assert_eq!(res.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_empty_statuses_lose_body() {
        let res = prepared(
            Response::no_content()
                .with_header("content-type", "text/plain")
                .with_body("ignored"),
            &Request::get("/"),
        );
        assert!(res.body.is_empty());
        assert!(res.header("content-type").is_none());
    }

    #[test]
    fn test_head_strips_body_keeps_length() {
        let req = Request::new(Method::HEAD, "/");
        let res = prepared(Response::text("hello"), &req);
        assert!(res.body.is_empty());
        assert_eq!(res.header("content-length"), Some("5"));
    }

    #[test]
    fn test_transfer_encoding_drops_length() {
        let res = prepared(
            Response::text("x")
                .with_header("transfer-encoding", "chunked")
                .with_header("content-length", "1"),
            &Request::get("/"),
        );
        assert!(res.header("content-length").is_none());
    }

    #[test]
    fn test_http10_no_cache() {
        let req = Request::get("/").with_version(Version::HTTP_10);
        let res = prepared(
            Response::text("x").with_header("cache-control", "no-cache"),
            &req,
        );
        assert_eq!(res.version, Version::HTTP_10);
        assert_eq!(res.header("pragma"), Some("no-cache"));
        assert_eq!(res.header("expires"), Some("-1"));
    }

    #[tokio::test]
    async fn test_payload_normalization() {
        let res = Payload::from(serde_json::json!({"ok": true}))
            .into_response()
            .unwrap();
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.into_bytes().await.unwrap(), Bytes::from(r#"{"ok":true}"#));

        let res = Payload::from(()).into_response().unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.is_empty());
    }

    #[tokio::test]
    async fn test_stream_body_collects() {
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);
        let res = Response::stream(chunks);
        assert_eq!(res.body.len(), None);
        assert_eq!(res.into_bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }
}
