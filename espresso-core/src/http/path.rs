//! Path template parsing
//!
//! Templates such as `/foo/{bar}/baz/{qux+}` are split into separators,
//! literal segments and parameter tokens. `{name}` captures exactly one
//! segment, `{name+}` captures every remaining segment verbatim and must be
//! the last token of the template.

use std::fmt;

/// A template that can't be registered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathTemplateError {
    #[error("path parameter name \"{name}\" contains invalid characters")]
    InvalidParameterName { name: String },

    #[error("path literal segment \"{segment}\" contains invalid characters")]
    InvalidLiteral { segment: String },

    #[error("path template \"{template}\" contains a multi-segment (wildcard) parameter that is not last")]
    WildcardNotLast { template: String },
}

/// One token of a parsed template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    /// A `/`
    Separator,
    /// A literal segment, matched byte for byte
    Literal(String),
    /// `{name}`
    Single(String),
    /// `{name+}`
    Multi(String),
}

impl PathToken {
    /// Parameter name carried by the token, if any
    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            PathToken::Single(name) | PathToken::Multi(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Separator => f.write_str("/"),
            PathToken::Literal(segment) => f.write_str(segment),
            PathToken::Single(name) => write!(f, "{{{}}}", name),
            PathToken::Multi(name) => write!(f, "{{{}+}}", name),
        }
    }
}

/// Split a concrete request path into separators and segments
///
/// A leading `/` is implied. Empty segments are not produced, so `//` yields
/// two consecutive separators.
pub fn parse_path(path: &str) -> Vec<&str> {
    let mut tokens = Vec::with_capacity(8);
    if !path.starts_with('/') {
        tokens.push("/");
    }

    let mut start = 0;
    for (index, ch) in path.char_indices() {
        if ch == '/' {
            if index > start {
                tokens.push(&path[start..index]);
            }
            tokens.push(&path[index..index + 1]);
            start = index + 1;
        }
    }
    if start < path.len() {
        tokens.push(&path[start..]);
    }

    tokens
}

/// Parse a path template into tokens
pub fn parse_path_template(template: &str) -> Result<Vec<PathToken>, PathTemplateError> {
    let mut tokens = Vec::new();
    let mut has_wildcard = false;

    for raw in parse_path(template) {
        if has_wildcard {
            return Err(PathTemplateError::WildcardNotLast { template: template.to_string() });
        }

        if raw == "/" {
            tokens.push(PathToken::Separator);
            continue;
        }

        let token = parse_segment(raw)?;
        has_wildcard = matches!(token, PathToken::Multi(_));
        tokens.push(token);
    }

    Ok(tokens)
}

/// Ordered parameter names declared by a template
pub fn parameter_names(tokens: &[PathToken]) -> Vec<String> {
    tokens.iter().filter_map(|t| t.parameter_name().map(str::to_string)).collect()
}

fn parse_segment(segment: &str) -> Result<PathToken, PathTemplateError> {
    if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        if name.contains(['/', '{', '}']) {
            return Err(PathTemplateError::InvalidParameterName { name: name.to_string() });
        }

        return Ok(match name.strip_suffix('+') {
            Some(name) => PathToken::Multi(name.to_string()),
            None => PathToken::Single(name.to_string()),
        });
    }

    if segment.contains(['{', '}']) {
        return Err(PathTemplateError::InvalidLiteral { segment: segment.to_string() });
    }

    Ok(PathToken::Literal(segment.to_string()))
}
