//! `Accept` header parsing and request-format lookup.
//!
//! ```
//! use fulcrum_core::content_negotiation::{Accept, MediaType};
//!
//! let accept = Accept::parse("text/html;q=0.8, application/json, */*;q=0.1");
//! assert_eq!(accept.preferred(), Some(&MediaType::new("application", "json")));
//! assert_eq!(accept.quality_for(&MediaType::new("image", "png")), 0.1);
//! ```

use std::cmp::Ordering;
use std::fmt;

/// Known request formats and the MIME types that identify them.
/// The first MIME type of each entry is the canonical one.
const FORMATS: &[(&str, &[&str])] = &[
    ("html", &["text/html", "application/xhtml+xml"]),
    ("txt", &["text/plain"]),
    ("js", &["application/javascript", "application/x-javascript", "text/javascript"]),
    ("css", &["text/css"]),
    ("json", &["application/json", "application/x-json"]),
    ("xml", &["text/xml", "application/xml", "application/x-xml"]),
    ("rdf", &["application/rdf+xml"]),
    ("atom", &["application/atom+xml"]),
    ("rss", &["application/rss+xml"]),
    ("form", &["application/x-www-form-urlencoded"]),
];

/// Canonical MIME type of a request format (`"json"` → `application/json`).
pub fn mime_type_for_format(format: &str) -> Option<&'static str> {
    FORMATS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(format))
        .map(|(_, mimes)| mimes[0])
}

/// Request format identified by a MIME type (`text/xml` → `"xml"`).
pub fn format_for_mime_type(mime: &str) -> Option<&'static str> {
    let mime = mime.split(';').next().unwrap_or("").trim();
    FORMATS
        .iter()
        .find(|(_, mimes)| mimes.iter().any(|m| m.eq_ignore_ascii_case(mime)))
        .map(|(name, _)| *name)
}

/// A media type without its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub type_: String,
    pub subtype: String,
}

impl MediaType {
    pub fn new(type_: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            subtype: subtype.into(),
        }
    }

    pub fn any() -> Self {
        Self::new("*", "*")
    }

    pub fn json() -> Self {
        Self::new("application", "json")
    }

    pub fn html() -> Self {
        Self::new("text", "html")
    }

    /// Parse `type/subtype[;params]`, ignoring parameters.
    pub fn parse(s: &str) -> Option<Self> {
        let essence = s.split(';').next()?.trim();
        let (type_, subtype) = essence.split_once('/')?;
        let (type_, subtype) = (type_.trim(), subtype.trim());
        if type_.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self::new(type_.to_ascii_lowercase(), subtype.to_ascii_lowercase()))
    }

    /// Wildcard-aware match in either direction.
    pub fn matches(&self, other: &MediaType) -> bool {
        let type_matches = self.type_ == "*" || other.type_ == "*" || self.type_ == other.type_;
        let subtype_matches =
            self.subtype == "*" || other.subtype == "*" || self.subtype == other.subtype;
        type_matches && subtype_matches
    }

    pub fn is_wildcard(&self) -> bool {
        self.type_ == "*" || self.subtype == "*"
    }

    /// `application/json`, `application/problem+json`, ...
    pub fn is_json(&self) -> bool {
        self.subtype == "json" || self.subtype.ends_with("+json")
    }

    fn specificity(&self) -> u8 {
        u8::from(self.type_ != "*") * 2 + u8::from(self.subtype != "*")
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}

/// A parsed `Accept` header, ordered by preference.
#[derive(Debug, Clone, Default)]
pub struct Accept {
    /// Highest quality first; ties keep the more specific type first, then header order.
    pub media_types: Vec<(MediaType, f32)>,
}

impl Accept {
    pub fn parse(header: &str) -> Self {
        let mut media_types: Vec<(MediaType, f32)> = header
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let quality = part
                    .split(';')
                    .skip(1)
                    .filter_map(|param| param.split_once('='))
                    .find(|(key, _)| key.trim().eq_ignore_ascii_case("q"))
                    .and_then(|(_, value)| value.trim().parse::<f32>().ok())
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0);
                MediaType::parse(part).map(|mt| (mt, quality))
            })
            .collect();

        // Stable sort keeps header order among equals.
        media_types.sort_by(|a, b| match b.1.partial_cmp(&a.1) {
            Some(Ordering::Equal) | None => b.0.specificity().cmp(&a.0.specificity()),
            Some(ord) => ord,
        });

        Self { media_types }
    }

    /// Quality of the first (most preferred) matching entry; `0.0` if none match.
    pub fn quality_for(&self, media_type: &MediaType) -> f32 {
        self.media_types
            .iter()
            .find(|(mt, _)| mt.matches(media_type))
            .map(|(_, q)| *q)
            .unwrap_or(0.0)
    }

    pub fn accepts(&self, media_type: &MediaType) -> bool {
        self.media_types.is_empty() || self.quality_for(media_type) > 0.0
    }

    pub fn preferred(&self) -> Option<&MediaType> {
        self.media_types.first().map(|(mt, _)| mt)
    }

    /// Media types in preference order, as strings, excluding refused (`q=0`) ones.
    pub fn content_types(&self) -> Vec<String> {
        self.media_types
            .iter()
            .filter(|(_, q)| *q > 0.0)
            .map(|(mt, _)| mt.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_ordering() {
        let accept = Accept::parse("text/*;q=0.5, text/html, application/json;q=0.9");
        assert_eq!(
            accept.content_types(),
            vec!["text/html", "application/json", "text/*"]
        );
    }

    #[test]
    fn test_specificity_breaks_ties() {
        let accept = Accept::parse("*/*, application/json");
        assert_eq!(accept.preferred(), Some(&MediaType::json()));
    }

    #[test]
    fn test_refused_types() {
        let accept = Accept::parse("application/json, text/html;q=0");
        assert!(!accept.accepts(&MediaType::html()));
        assert_eq!(accept.content_types(), vec!["application/json"]);
    }

    #[test]
    fn test_format_table() {
        assert_eq!(mime_type_for_format("json"), Some("application/json"));
        assert_eq!(format_for_mime_type("application/xml; charset=utf-8"), Some("xml"));
        assert_eq!(format_for_mime_type("image/png"), None);
    }

    #[test]
    fn test_json_detection() {
        assert!(MediaType::parse("application/problem+json").unwrap().is_json());
        assert!(!MediaType::html().is_json());
        assert!(MediaType::parse("nonsense").is_none());
    }
}
