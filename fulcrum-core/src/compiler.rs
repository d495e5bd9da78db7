//! Route pattern compilation.
//!
//! A URI such as `users/{id}/posts/{post?}` becomes an anchored regex with one
//! named group per variable. Trailing variables that have a default become
//! nested optional groups, so `/users/42/posts` still matches. A host pattern
//! (`{account}.example.com`) compiles the same way, case-insensitively, with
//! `.` as the default separator and no optional groups.

use crate::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};

/// Characters that, when they directly precede a variable, become the
/// variable's separator rather than static text.
const SEPARATORS: &str = "/,;.:-_~+*=@|";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Variable {
        separator: String,
        regex: String,
        name: String,
    },
}

/// One compiled pattern (path or host).
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub regex: Regex,
    pub static_prefix: String,
    /// Variable names in the order they appear
    pub variables: Vec<String>,
}

impl CompiledPattern {
    /// Named captures of a match, in variable order, skipping empty ones.
    pub fn captures(&self, subject: &str) -> Option<Vec<(String, String)>> {
        let caps = self.regex.captures(subject)?;
        Some(
            self.variables
                .iter()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| m.as_str())
                        .filter(|v| !v.is_empty())
                        .map(|v| (name.clone(), v.to_string()))
                })
                .collect(),
        )
    }
}

/// A route's compiled path and optional host patterns.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub path: CompiledPattern,
    pub host: Option<CompiledPattern>,
    /// Host variables followed by path variables, without duplicates
    pub variables: Vec<String>,
}

/// Compile a route.
///
/// `uri` may carry `{name?}` markers; those names are optional in addition to
/// anything listed in `optionals`. `requirements` overrides the default
/// regex of a variable.
pub fn compile_route(
    uri: &str,
    host: Option<&str>,
    requirements: &HashMap<String, String>,
    optionals: &HashSet<String>,
) -> Result<CompiledRoute> {
    let (uri, mut optional) = strip_optional_markers(uri);
    optional.extend(optionals.iter().cloned());

    let path = format!("/{}", uri.trim_matches('/'));
    let path = compile_pattern(&path, false, requirements, &optional)?;

    let host = match host.filter(|h| !h.is_empty()) {
        Some(host) => Some(compile_pattern(host, true, requirements, &HashSet::new())?),
        None => None,
    };

    let mut variables: Vec<String> = Vec::new();
    for name in host
        .iter()
        .flat_map(|h| h.variables.iter())
        .chain(path.variables.iter())
    {
        if !variables.contains(name) {
            variables.push(name.clone());
        }
    }

    Ok(CompiledRoute {
        path,
        host,
        variables,
    })
}

/// Parameter names of a URI and optional domain, in order, without the `?` marker.
pub fn parameter_names(uri: &str, domain: Option<&str>) -> Vec<String> {
    let source = format!("{}{}", domain.unwrap_or(""), uri);
    let mut names = Vec::new();
    let mut rest = source.as_str();
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        names.push(after[..end].trim_end_matches('?').to_string());
        rest = &after[end + 1..];
    }
    names
}

/// Rewrite `{name?}` as `{name}`, collecting the optional names.
fn strip_optional_markers(uri: &str) -> (String, HashSet<String>) {
    let mut optional = HashSet::new();
    let mut out = String::with_capacity(uri.len());
    let mut rest = uri;
    while let Some((start, name, end)) = next_variable(rest, true) {
        out.push_str(&rest[..start]);
        let bare = name.trim_end_matches('?');
        if bare.len() != name.len() {
            optional.insert(bare.to_string());
        }
        out.push('{');
        out.push_str(bare);
        out.push('}');
        rest = &rest[end..];
    }
    out.push_str(rest);
    (out, optional)
}

/// Locate the next `{word}` (or `{word?}` when `allow_optional`) in `s`.
/// Returns the byte offset of `{`, the inner name, and the offset after `}`.
fn next_variable(s: &str, allow_optional: bool) -> Option<(usize, &str, usize)> {
    let mut search_from = 0;
    while let Some(rel) = s[search_from..].find('{') {
        let start = search_from + rel;
        let after = &s[start + 1..];
        if let Some(close) = after.find('}') {
            let inner = &after[..close];
            let word = if allow_optional {
                inner.strip_suffix('?').unwrap_or(inner)
            } else {
                inner
            };
            if !word.is_empty() && word.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Some((start, inner, start + 1 + close + 1));
            }
        }
        search_from = start + 1;
    }
    None
}

fn compile_pattern(
    pattern: &str,
    is_host: bool,
    requirements: &HashMap<String, String>,
    optional: &HashSet<String>,
) -> Result<CompiledPattern> {
    let default_separator = if is_host { '.' } else { '/' };
    let mut tokens = Vec::new();
    let mut variables: Vec<String> = Vec::new();
    let mut pos = 0;

    while let Some((start, name, end)) = next_variable(&pattern[pos..], false) {
        let (start, end) = (pos + start, pos + end);
        let preceding = &pattern[pos..start];
        pos = end;

        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::Internal(format!(
                "Variable name \"{}\" cannot be numeric in route pattern \"{}\"",
                name, pattern
            )));
        }
        if variables.iter().any(|v| v == name) {
            return Err(Error::Internal(format!(
                "Route pattern \"{}\" cannot reference variable name \"{}\" more than once",
                pattern, name
            )));
        }

        let preceding_char = preceding.chars().last();
        let is_separator = preceding_char.is_some_and(|c| SEPARATORS.contains(c));
        if is_separator && preceding.len() > 1 {
            let text = &preceding[..preceding.len() - preceding_char.map_or(0, char::len_utf8)];
            tokens.push(Token::Text(text.to_string()));
        } else if !is_separator && !preceding.is_empty() {
            tokens.push(Token::Text(preceding.to_string()));
        }

        let regex = match requirements.get(name) {
            Some(requirement) => sanitize_requirement(requirement),
            None => {
                let next = next_separator(&pattern[pos..]);
                let mut class = regex::escape(&default_separator.to_string());
                if let Some(next) = next.filter(|c| *c != default_separator) {
                    class.push_str(&regex::escape(&next.to_string()));
                }
                format!("[^{}]+", class)
            }
        };

        tokens.push(Token::Variable {
            separator: if is_separator {
                preceding_char.map(String::from).unwrap_or_default()
            } else {
                String::new()
            },
            regex,
            name: name.to_string(),
        });
        variables.push(name.to_string());
    }

    if pos < pattern.len() {
        tokens.push(Token::Text(pattern[pos..].to_string()));
    }

    // Trailing run of variables with defaults, found from the end.
    let mut first_optional = usize::MAX;
    if !is_host {
        for (i, token) in tokens.iter().enumerate().rev() {
            match token {
                Token::Variable { name, .. } if optional.contains(name) => first_optional = i,
                _ => break,
            }
        }
    }

    let mut expression = String::new();
    for index in 0..tokens.len() {
        expression.push_str(&token_regex(&tokens, index, first_optional));
    }

    let flags = if is_host { "(?si)" } else { "(?s)" };
    let regex = RegexBuilder::new(&format!("{}^{}$", flags, expression))
        .build()
        .map_err(|e| {
            Error::Internal(format!("Invalid route pattern \"{}\": {}", pattern, e))
        })?;

    let static_prefix = match tokens.first() {
        Some(Token::Text(text)) => text.clone(),
        _ => String::new(),
    };

    Ok(CompiledPattern {
        regex,
        static_prefix,
        variables,
    })
}

fn token_regex(tokens: &[Token], index: usize, first_optional: usize) -> String {
    match &tokens[index] {
        Token::Text(text) => regex::escape(text),
        Token::Variable {
            separator,
            regex,
            name,
        } => {
            let separator = regex::escape(separator);
            if index == 0 && first_optional == 0 {
                // A lone optional variable still requires its separator.
                return format!("{}(?P<{}>{})?", separator, name, regex);
            }
            let mut expression = format!("{}(?P<{}>{})", separator, name, regex);
            if index >= first_optional {
                expression = format!("(?:{}", expression);
                if index == tokens.len() - 1 {
                    let open = tokens.len() - first_optional - usize::from(first_optional == 0);
                    expression.push_str(&")?".repeat(open));
                }
            }
            expression
        }
    }
}

/// First character after `s` loses its leading variables, if it is a separator.
fn next_separator(s: &str) -> Option<char> {
    let mut rest = s;
    while let Some((0, _, end)) = next_variable(rest, false) {
        rest = &rest[end..];
    }
    rest.chars().next().filter(|c| SEPARATORS.contains(*c))
}

fn sanitize_requirement(requirement: &str) -> String {
    let requirement = requirement.strip_prefix('^').unwrap_or(requirement);
    match requirement.strip_suffix('$') {
        Some(stripped) if !stripped.ends_with('\\') => stripped.to_string(),
        _ => requirement.to_string(),
    }
}
