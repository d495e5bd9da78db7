//! Response cookies and the per-application cookie queue.

use http::HeaderValue;
use parking_lot::Mutex;
use std::fmt;

/// `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => f.write_str("Strict"),
            SameSite::Lax => f.write_str("Lax"),
            SameSite::None => f.write_str("None"),
        }
    }
}

/// A cookie to be sent with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds; `None` is a session cookie, `0` expires it immediately.
    pub max_age: Option<i64>,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

/// Five years, in seconds.
const FOREVER: i64 = 5 * 365 * 24 * 60 * 60;

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: None,
        }
    }

    /// A cookie that lasts five years.
    pub fn forever(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value).max_age(FOREVER)
    }

    /// A cookie that tells the client to delete `name`.
    pub fn forget(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(0)
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn is_cleared(&self) -> bool {
        self.max_age.is_some_and(|age| age <= 0)
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.to_string()).ok()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, urlencoding::encode(&self.value))?;
        if let Some(age) = self.max_age {
            write!(f, "; Max-Age={}", age.max(0))?;
        }
        if self.is_cleared() {
            f.write_str("; Expires=Thu, 01 Jan 1970 00:00:00 GMT")?;
        }
        write!(f, "; Path={}", self.path)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site)?;
        }
        Ok(())
    }
}

/// Cookies queued during a request, attached to the outgoing response by
/// [`AddQueuedCookies`](crate::middleware::AddQueuedCookies).
///
/// Every [`Request`](crate::Request) carries its own jar, shared by its clones.
#[derive(Debug)]
pub struct CookieJar {
    path: String,
    domain: Option<String>,
    queued: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::with_defaults("/", None)
    }

    /// A jar whose [`CookieJar::make`] uses the given path and domain.
    pub fn with_defaults(path: impl Into<String>, domain: Option<String>) -> Self {
        Self {
            path: path.into(),
            domain,
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Build a cookie with the jar's default path and domain.
    pub fn make(&self, name: impl Into<String>, value: impl Into<String>) -> Cookie {
        let cookie = Cookie::new(name, value).path(self.path.clone());
        match &self.domain {
            Some(domain) => cookie.domain(domain.clone()),
            None => cookie,
        }
    }

    /// Queue a cookie; a later cookie with the same name replaces it.
    pub fn queue(&self, cookie: Cookie) {
        let mut queued = self.queued.lock();
        queued.retain(|c| c.name != cookie.name);
        queued.push(cookie);
    }

    pub fn unqueue(&self, name: &str) {
        self.queued.lock().retain(|c| c.name != name);
    }

    pub fn has_queued(&self, name: &str) -> bool {
        self.queued.lock().iter().any(|c| c.name == name)
    }

    pub fn queued(&self) -> Vec<Cookie> {
        self.queued.lock().clone()
    }

    /// Take every queued cookie, leaving the queue empty.
    pub fn drain(&self) -> Vec<Cookie> {
        std::mem::take(&mut *self.queued.lock())
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}
