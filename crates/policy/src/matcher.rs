//! Matcher parameter descriptor.
//!
//! The descriptor pairs the request definition (`r = sub, obj, act`) with the
//! matcher expression. A request position is bundle-typed when the matcher
//! reads an attribute of it (`r.obj.Owner`, or the engine's escaped form
//! `r_obj.Owner`); every other position is a plain scalar.

use crate::{Error, Param, Result};
use serde_json::{Map, Value};

/// Declared shape of one request position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamShape {
    Scalar,
    /// Attribute paths the matcher reads, e.g. `Owner` or `Owner.Name`.
    Bundle { attributes: Vec<String> },
}

impl ParamShape {
    pub fn is_bundle(&self) -> bool {
        matches!(self, ParamShape::Bundle { .. })
    }
}

/// A matcher attribute access found in the expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    start: usize,
    end: usize,
    position: usize,
    attribute: Vec<String>,
}

/// Request tokens plus the matcher text they are evaluated against.
#[derive(Debug, Clone)]
pub struct MatcherDescriptor {
    tokens: Vec<String>,
    matcher: String,
}

impl MatcherDescriptor {
    /// Build a descriptor from bare request token names and a matcher.
    pub fn new<I, S>(tokens: I, matcher: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| {
                    let t = t.as_ref().trim();
                    t.strip_prefix("r_").unwrap_or(t).to_string()
                })
                .filter(|t| !t.is_empty())
                .collect(),
            matcher: matcher.into(),
        }
    }

    pub fn matcher(&self) -> &str {
        &self.matcher
    }

    /// Declared shape of each request position, in request order.
    pub fn shapes(&self) -> Vec<ParamShape> {
        let mut attributes: Vec<Vec<String>> = vec![Vec::new(); self.tokens.len()];
        for reference in self.references() {
            let path = reference.attribute.join(".");
            let seen = &mut attributes[reference.position];
            if !seen.contains(&path) {
                seen.push(path);
            }
        }
        attributes
            .into_iter()
            .map(|attributes| {
                if attributes.is_empty() {
                    ParamShape::Scalar
                } else {
                    ParamShape::Bundle { attributes }
                }
            })
            .collect()
    }

    /// Substitute bundle attribute reads with literal values.
    ///
    /// Returns `None` when no parameter is a bundle, meaning the matcher
    /// can be evaluated as is.
    pub fn rewrite(&self, params: &[Param]) -> Result<Option<String>> {
        if !params.iter().any(Param::is_bundle) {
            return Ok(None);
        }

        let mut out = String::with_capacity(self.matcher.len());
        let mut cursor = 0;
        for reference in self.references() {
            let Some(Param::Bundle(attributes)) = params.get(reference.position) else {
                continue;
            };
            let value = lookup(attributes, &reference.attribute).ok_or_else(|| {
                Error::MissingAttribute {
                    position: reference.position,
                    attribute: reference.attribute.join("."),
                }
            })?;
            out.push_str(&self.matcher[cursor..reference.start]);
            if !render(value, &mut out) {
                return Err(Error::UnsupportedValue {
                    position: reference.position,
                    attribute: reference.attribute.join("."),
                });
            }
            cursor = reference.end;
        }
        out.push_str(&self.matcher[cursor..]);
        Ok(Some(out))
    }

    /// Scan the matcher for attribute reads on request tokens.
    fn references(&self) -> Vec<Reference> {
        let src = self.matcher.as_bytes();
        let mut found = Vec::new();
        let mut i = 0;

        while i < src.len() {
            let c = src[i];

            // Skip string literals
            if c == b'"' || c == b'\'' {
                i += 1;
                while i < src.len() && src[i] != c {
                    if src[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                continue;
            }

            let at_boundary = i == 0 || !(is_ident(src[i - 1]) || src[i - 1] == b'.');
            if !(at_boundary && is_ident_start(c)) {
                i += 1;
                continue;
            }

            // Read a dotted path: ident(.ident)*
            let start = i;
            let mut segments: Vec<(usize, usize)> = Vec::new();
            loop {
                let seg_start = i;
                while i < src.len() && is_ident(src[i]) {
                    i += 1;
                }
                segments.push((seg_start, i));
                if i + 1 < src.len() && src[i] == b'.' && is_ident_start(src[i + 1]) {
                    i += 1;
                } else {
                    break;
                }
            }

            // A trailing segment followed by `(` is a method call, not an attribute
            let mut end = i;
            if src.get(i) == Some(&b'(') && segments.len() > 1 {
                segments.pop();
                end = segments.last().map_or(end, |s| s.1);
            }

            let names: Vec<&str> = segments.iter().map(|&(a, b)| &self.matcher[a..b]).collect();
            if let Some((position, attribute)) = self.classify(&names) {
                found.push(Reference {
                    start,
                    end,
                    position,
                    attribute,
                });
            }
        }

        found
    }

    /// Map `r.tok.attr...` or `r_tok.attr...` to (position, attribute path).
    fn classify(&self, names: &[&str]) -> Option<(usize, Vec<String>)> {
        let (token, rest) = match names {
            ["r", token, rest @ ..] => (*token, rest),
            [head, rest @ ..] => (head.strip_prefix("r_")?, rest),
            [] => return None,
        };
        if rest.is_empty() {
            return None;
        }
        let position = self.tokens.iter().position(|t| t == token)?;
        Some((position, rest.iter().map(|s| s.to_string()).collect()))
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn lookup<'a>(attributes: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut value = attributes.get(first)?;
    for segment in rest {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}

/// Render a JSON value as an expression literal.
///
/// The engine's expressions only carry 32-bit integers and no floats, so
/// anything else cannot be rendered and yields `false`.
fn render(value: &Value, out: &mut String) -> bool {
    match value {
        Value::Null => out.push_str("()"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => out.push_str(&i.to_string()),
            None => return false,
        },
        Value::String(s) => render_str(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if !render(item, out) {
                    return false;
                }
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("#{");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_str(key, out);
                out.push_str(": ");
                if !render(item, out) {
                    return false;
                }
            }
            out.push('}');
        }
    }
    true
}

fn render_str(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}
