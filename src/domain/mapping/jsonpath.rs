//! Compiled JSONPath expressions used by `$.`-style column mappings.
//!
//! Only the deterministic subset that addresses a single value is accepted:
//! dotted member names, `[n]` array indices and `['quoted']` member names.

use serde_json::Value as JsonValue;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Compiles `expr`, which must start with `$`.
    pub fn compile(expr: &str) -> Result<Self, String> {
        let rest = expr
            .strip_prefix('$')
            .ok_or_else(|| format!("JSONPath '{}' must start with '$'", expr))?;

        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    let name: String = chars[start..i].iter().collect();
                    if name.is_empty() {
                        return Err(format!("JSONPath '{}' has an empty member name", expr));
                    }
                    if name == "*" {
                        return Err(format!("JSONPath '{}': wildcards are not supported", expr));
                    }
                    segments.push(PathSegment::Field(name));
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| format!("JSONPath '{}' has an unclosed '['", expr))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(parse_bracket(expr, inner.trim())?);
                    i = close + 1;
                }
                other => {
                    return Err(format!(
                        "JSONPath '{}': unexpected character '{}'",
                        expr, other
                    ))
                }
            }
        }

        if segments.is_empty() {
            return Err(format!("JSONPath '{}' does not address a member", expr));
        }

        Ok(Self {
            source: expr.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Resolves the path against a parsed document. `None` means the path missed.
    pub fn lookup<'a>(&self, doc: &'a JsonValue) -> Option<&'a JsonValue> {
        self.segments
            .iter()
            .try_fold(doc, |current, segment| match segment {
                PathSegment::Field(name) => current.as_object()?.get(name),
                PathSegment::Index(idx) => current.as_array()?.get(*idx),
            })
    }
}

fn parse_bracket(expr: &str, inner: &str) -> Result<PathSegment, String> {
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
    if let Some(name) = quoted {
        return Ok(PathSegment::Field(name.to_string()));
    }
    inner.parse::<usize>().map(PathSegment::Index).map_err(|_| {
        format!(
            "JSONPath '{}': unsupported selector '[{}]' (only indices and quoted names)",
            expr, inner
        )
    })
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
