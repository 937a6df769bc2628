//! Trie based route matching
//!
//! Templates are stored in a path-wise radix trie: every separator, literal
//! segment and parameter is one edge. Matching walks the trie trying, at each
//! node, the literal edge first, then the single-segment parameter edge, then
//! the multi-segment (wildcard) edge. That order alone gives the specificity
//! rule: literal > `{x}` > `{x+}`, and among wildcards the one behind the
//! longest literal prefix wins.
//!
//! Other behaviour worth knowing:
//! - registering the same method and template twice keeps the last value
//! - templates that differ only by parameter names are the same route
//! - parameters never match an empty segment
//! - matching is case sensitive, methods are upper-cased on registration

use std::collections::HashMap;

use super::path::{parameter_names, parse_path, parse_path_template, PathTemplateError, PathToken};

/// Decoded path parameters of a matched route
pub type PathParams = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Literal(String),
    Single,
    Multi,
}

impl From<&PathToken> for NodeKey {
    fn from(token: &PathToken) -> Self {
        match token {
            PathToken::Separator => NodeKey::Literal("/".to_string()),
            PathToken::Literal(segment) => NodeKey::Literal(segment.clone()),
            PathToken::Single(_) => NodeKey::Single,
            PathToken::Multi(_) => NodeKey::Multi,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    parameter_names: Vec<String>,
}

#[derive(Debug, Clone)]
struct Node<V> {
    children: HashMap<NodeKey, Node<V>>,
    methods: HashMap<String, Entry<V>>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self { children: HashMap::new(), methods: HashMap::new() }
    }

    /// Build a fresh chain of nodes for `tokens`, ending at the entry
    fn detached(tokens: &[PathToken], method: String, entry: Entry<V>) -> Self {
        let mut node = Node::new();
        match tokens.split_first() {
            None => {
                node.methods.insert(method, entry);
            }
            Some((token, rest)) => {
                node.children.insert(NodeKey::from(token), Node::detached(rest, method, entry));
            }
        }
        node
    }

    fn insert(&mut self, tokens: &[PathToken], method: String, entry: Entry<V>) {
        let Some((token, rest)) = tokens.split_first() else {
            self.methods.insert(method, entry);
            return;
        };

        let key = NodeKey::from(token);
        match self.children.get_mut(&key) {
            Some(child) => child.insert(rest, method, entry),
            None => {
                // The new branch is complete before it becomes reachable
                let child = Node::detached(rest, method, entry);
                self.children.insert(key, child);
            }
        }
    }
}

/// Outcome of [`Router::find`]
#[derive(Debug)]
pub enum RouteMatch<'a, V> {
    /// A route matches both method and path
    Found { value: &'a V, params: PathParams },
    /// Some route matches the path, but none accepts the method
    PathFound,
    /// Nothing matches the path
    NotFound,
}

impl<'a, V> RouteMatch<'a, V> {
    pub fn is_found(&self) -> bool {
        matches!(self, RouteMatch::Found { .. })
    }

    pub fn value(&self) -> Option<&'a V> {
        match self {
            RouteMatch::Found { value, .. } => Some(value),
            _ => None,
        }
    }
}

enum Walk<'a, V> {
    Found(&'a Entry<V>),
    PathFound,
    NotFound,
}

/// A collection of values keyed by HTTP method and path template
#[derive(Debug, Clone)]
pub struct Router<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for Router<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Router<V> {
    pub fn new() -> Self {
        Self { root: Node::new(), len: 0 }
    }

    /// Register `value` for `method` and `template`
    ///
    /// The template is validated completely before the trie is touched, so a
    /// rejected template leaves the router unchanged.
    pub fn add(&mut self, method: &str, template: &str, value: V) -> Result<(), PathTemplateError> {
        let tokens = parse_path_template(template)?;
        let entry = Entry { value, parameter_names: parameter_names(&tokens) };
        self.root.insert(&tokens, method.to_uppercase(), entry);
        self.len += 1;
        Ok(())
    }

    /// Number of registrations, overwritten ones included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolve the most specific route for `method` and `path`
    pub fn find(&self, method: &str, path: &str) -> RouteMatch<'_, V> {
        let tokens = parse_path(path);
        let mut values = Vec::new();

        match walk(&tokens, method, &self.root, &mut values) {
            Walk::Found(entry) => {
                let params = entry
                    .parameter_names
                    .iter()
                    .cloned()
                    .zip(values.iter().map(|v| decode(v)))
                    .collect();
                RouteMatch::Found { value: &entry.value, params }
            }
            Walk::PathFound => RouteMatch::PathFound,
            Walk::NotFound => RouteMatch::NotFound,
        }
    }
}

fn walk<'a, V>(
    tokens: &[&str],
    method: &str,
    node: &'a Node<V>,
    values: &mut Vec<String>,
) -> Walk<'a, V> {
    let Some((&token, rest)) = tokens.split_first() else {
        if node.methods.is_empty() {
            return Walk::NotFound;
        }
        return match node.methods.get(method) {
            Some(entry) => Walk::Found(entry),
            None => Walk::PathFound,
        };
    };

    if node.children.is_empty() {
        return Walk::NotFound;
    }

    let mut path_found = false;

    if let Some(child) = node.children.get(&NodeKey::Literal(token.to_string())) {
        match walk(rest, method, child, values) {
            Walk::Found(entry) => return Walk::Found(entry),
            Walk::PathFound => path_found = true,
            Walk::NotFound => {}
        }
    }

    if token != "/" {
        if let Some(child) = node.children.get(&NodeKey::Single) {
            values.push(token.to_string());
            match walk(rest, method, child, values) {
                Walk::Found(entry) => return Walk::Found(entry),
                Walk::PathFound => path_found = true,
                Walk::NotFound => {}
            }
            values.pop();
        }
    }

    if let Some(child) = node.children.get(&NodeKey::Multi) {
        values.push(tokens.concat());
        match walk(&[], method, child, values) {
            Walk::Found(entry) => return Walk::Found(entry),
            Walk::PathFound => path_found = true,
            Walk::NotFound => {}
        }
        values.pop();
    }

    if path_found {
        Walk::PathFound
    } else {
        Walk::NotFound
    }
}

/// Percent-decode a parameter value, replacing invalid UTF-8
fn decode(value: &str) -> String {
    match urlencoding::decode(value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(value.as_bytes())).into_owned(),
    }
}
