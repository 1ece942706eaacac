//! Request matching primitives.
//!
//! Path patterns, exact header requirements, and query string parsing
//! shared by the route table and the handlers.

use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderMap;
use regex::Regex;

/// A compiled path pattern such as `/team/{id}` or `/api/{rest:.*}`.
///
/// `{name}` matches one path segment; `{name:regex}` matches the regex.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
    params: Vec<String>,
}

enum Segment {
    Literal(String),
    Param { name: String, pattern: Option<String> },
}

impl PathPattern {
    /// Compile a path pattern.
    pub fn parse(template: &str) -> Result<Self, regex::Error> {
        let segments = split_segments(template);

        let mut source = String::from("^");
        let mut params = Vec::new();
        for segment in &segments {
            match segment {
                Segment::Literal(lit) => source.push_str(&regex::escape(lit)),
                Segment::Param { name, pattern } => {
                    let pattern = pattern.as_deref().unwrap_or("[^/]+");
                    source.push_str(&format!("(?P<{name}>{pattern})"));
                    params.push(name.clone());
                }
            }
        }
        source.push('$');

        Ok(Self {
            raw: template.to_string(),
            regex: Regex::new(&source)?,
            params,
        })
    }

    /// The pattern as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the path variables, in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The pattern with regex constraints removed, e.g. `/api/{rest}`.
    pub fn display_path(&self) -> String {
        split_segments(&self.raw)
            .into_iter()
            .map(|segment| match segment {
                Segment::Literal(lit) => lit,
                Segment::Param { name, .. } => format!("{{{name}}}"),
            })
            .collect()
    }

    /// Match a path, returning the captured variables percent-decoded.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.clone(), percent_decode(m.as_str(), false)))
                })
                .collect(),
        )
    }
}

fn split_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut param = String::new();
    let mut depth = 0usize;

    for ch in template.chars() {
        match ch {
            '{' if depth == 0 => {
                if !current.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut current)));
                }
                depth = 1;
            }
            '{' => {
                depth += 1;
                param.push(ch);
            }
            '}' if depth == 1 => {
                depth = 0;
                segments.push(param_segment(&std::mem::take(&mut param)));
            }
            '}' if depth > 1 => {
                depth -= 1;
                param.push(ch);
            }
            _ if depth > 0 => param.push(ch),
            _ => current.push(ch),
        }
    }

    // An unterminated `{` is kept as literal text.
    if depth > 0 {
        current.push('{');
        current.push_str(&param);
    }
    if !current.is_empty() {
        segments.push(Segment::Literal(current));
    }
    segments
}

fn param_segment(body: &str) -> Segment {
    match body.split_once(':') {
        Some((name, pattern)) => Segment::Param {
            name: name.trim().to_string(),
            pattern: Some(pattern.to_string()),
        },
        None => Segment::Param {
            name: body.trim().to_string(),
            pattern: None,
        },
    }
}

/// Whether every required header is present with exactly the given value.
///
/// Header names compare case-insensitively, values exactly.
pub fn headers_match(required: &BTreeMap<String, String>, headers: &HeaderMap) -> bool {
    required.iter().all(|(name, expected)| {
        headers
            .get_all(name.as_str())
            .iter()
            .any(|value| value.to_str().map(|v| v == expected).unwrap_or(false))
    })
}

/// Parse a query string into key-value pairs, keeping the first value of
/// repeated keys.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params
            .entry(percent_decode(key, true))
            .or_insert_with(|| percent_decode(value, true));
    }

    params
}

/// Decode `%XX` escapes. `+` becomes a space only in query components.
fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while let Some(&current) = bytes.get(i) {
        match current {
            b'%' => {
                let byte = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match byte {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
