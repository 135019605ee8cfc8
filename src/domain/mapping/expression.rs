use super::jsonpath::JsonPath;
use std::fmt;

/// A column mapping expression, resolved once when the mapping is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// Stored as-is.
    Literal(String),
    /// `:name` - a request (path/query) parameter.
    Param(String),
    /// `@.name` - an entry of the document metadata.
    Metadata(String),
    /// `$` - the whole document body.
    WholeBody,
    /// `$.a.b` - a value inside the body, parsed as JSON.
    JsonPath(JsonPath),
}

impl Expression {
    pub fn parse(expr: &str) -> Result<Self, String> {
        if let Some(name) = expr.strip_prefix(':') {
            if name.is_empty() {
                return Err("parameter expression ':' has no parameter name".to_string());
            }
            return Ok(Expression::Param(name.to_string()));
        }
        if let Some(name) = expr.strip_prefix("@.") {
            if name.is_empty() {
                return Err("metadata expression '@.' has no metadata name".to_string());
            }
            return Ok(Expression::Metadata(name.to_string()));
        }
        if expr == "$" {
            return Ok(Expression::WholeBody);
        }
        if expr.starts_with('$') {
            return JsonPath::compile(expr).map(Expression::JsonPath);
        }
        Ok(Expression::Literal(expr.to_string()))
    }

    pub fn is_whole_body(&self) -> bool {
        matches!(self, Expression::WholeBody)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => f.write_str(v),
            Expression::Param(name) => write!(f, ":{}", name),
            Expression::Metadata(name) => write!(f, "@.{}", name),
            Expression::WholeBody => f.write_str("$"),
            Expression::JsonPath(path) => write!(f, "{}", path),
        }
    }
}
