//! Routing key resolution
//!
//! A routing key that starts with [`DYNAMIC_PREFIX`] is not a backend name but
//! a reference into the call: a transport header, a session attribute or an
//! argument. Such keys are resolved by a [`ResolverChain`], an ordered list of
//! [`KeyResolver`]s where the first resolver that both claims the key and
//! produces a value wins.

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

/// Marker for keys that must be computed per call
pub const DYNAMIC_PREFIX: char = '#';

const HEADER_PREFIX: &str = "#header";
const SESSION_PREFIX: &str = "#session";

/// Whether `key` must go through the resolver chain
pub fn is_dynamic(key: &str) -> bool {
    key.starts_with(DYNAMIC_PREFIX)
}

/// Metadata describing one call, supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    method: String,
    args: Vec<(String, Value)>,
    headers: HeaderMap,
    session: HashMap<String, String>,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    /// Append a named argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    /// Add a transport header; invalid names or values are skipped
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = name, "Ignoring invalid header on invocation"),
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn session_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.session.insert(name.into(), value.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[(String, Value)] {
        &self.args
    }

    /// Argument by name
    pub fn get_arg(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Argument by position
    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.args.get(index).map(|(_, v)| v)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn get_session_attr(&self, name: &str) -> Option<&str> {
        self.session.get(name).map(String::as_str)
    }
}

/// One link of the resolution chain
#[cfg_attr(test, mockall::automock)]
pub trait KeyResolver: Send + Sync {
    /// Whether this resolver handles keys shaped like `key`
    fn matches(&self, key: &str) -> bool;

    /// Compute the routing key, or `None` to defer to the rest of the chain
    fn resolve(&self, invocation: &Invocation, key: &str) -> Option<String>;
}

/// Ordered list of resolvers
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn KeyResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header, then session, then expression resolution
    pub fn standard() -> Self {
        Self::new()
            .with(HeaderResolver)
            .with(SessionResolver)
            .with(ExpressionResolver)
    }

    pub fn with(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// First value produced by a matching resolver
    ///
    /// A matching resolver that yields nothing passes the key on to the
    /// remaining resolvers rather than ending the walk.
    pub fn resolve(&self, invocation: &Invocation, key: &str) -> Option<String> {
        for (position, resolver) in self.resolvers.iter().enumerate() {
            if !resolver.matches(key) {
                continue;
            }
            if let Some(resolved) = resolver.resolve(invocation, key) {
                tracing::trace!(key, resolved = %resolved, position, "Resolved dynamic routing key");
                return Some(resolved);
            }
        }
        None
    }
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverChain")
            .field("len", &self.resolvers.len())
            .finish()
    }
}

// "#header.tenant" -> "tenant": the prefix plus one separator character
fn strip_marker<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let mut chars = rest.chars();
    chars.next()?;
    let name = chars.as_str();
    (!name.is_empty()).then_some(name)
}

/// Reads the key from a transport header: `#header.<name>`
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderResolver;

impl KeyResolver for HeaderResolver {
    fn matches(&self, key: &str) -> bool {
        key.starts_with(HEADER_PREFIX)
    }

    fn resolve(&self, invocation: &Invocation, key: &str) -> Option<String> {
        let name = strip_marker(key, HEADER_PREFIX)?;
        invocation
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Reads the key from a session attribute: `#session.<name>`
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionResolver;

impl KeyResolver for SessionResolver {
    fn matches(&self, key: &str) -> bool {
        key.starts_with(SESSION_PREFIX)
    }

    fn resolve(&self, invocation: &Invocation, key: &str) -> Option<String> {
        let name = strip_marker(key, SESSION_PREFIX)?;
        invocation
            .get_session_attr(name)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Evaluates a path expression against the call's arguments
///
/// Supported forms: `#name`, `#p0` / `#a0` (by position), `#name.field`,
/// `#name[2]`, `#root.method`, `#root.args[0]`. Strings, numbers and booleans
/// become keys; anything else resolves to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionResolver;

impl KeyResolver for ExpressionResolver {
    fn matches(&self, key: &str) -> bool {
        is_dynamic(key)
    }

    fn resolve(&self, invocation: &Invocation, key: &str) -> Option<String> {
        let expression = match parse_expression(key) {
            Ok(expression) => expression,
            Err(e) => {
                tracing::debug!(key, error = %e, "Unparseable routing expression");
                return None;
            }
        };
        evaluate(&expression, invocation).and_then(render)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Expression {
    root: String,
    path: Vec<Segment>,
}

fn parse_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

fn parse_expression(key: &str) -> Result<Expression, String> {
    let body = key
        .strip_prefix(DYNAMIC_PREFIX)
        .ok_or_else(|| format!("missing '{DYNAMIC_PREFIX}' prefix"))?;
    let mut chars = body.trim().chars().peekable();

    let root = parse_ident(&mut chars);
    if root.is_empty() {
        return Err("expected a variable name".to_string());
    }

    let mut path = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let field = parse_ident(&mut chars);
                if field.is_empty() {
                    return Err("expected a field name after '.'".to_string());
                }
                path.push(Segment::Field(field));
            }
            '[' => {
                let mut digits = String::new();
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                    digits.push(d);
                }
                let index = digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("invalid index '{digits}'"))?;
                path.push(Segment::Index(index));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(Expression { root, path })
}

fn positional_index(root: &str) -> Option<usize> {
    let digits = root.strip_prefix('p').or_else(|| root.strip_prefix('a'))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn evaluate(expression: &Expression, invocation: &Invocation) -> Option<Value> {
    let (start, path) = if expression.root == "root" {
        match expression.path.split_first() {
            Some((Segment::Field(field), rest)) if field == "method" => {
                (Value::String(invocation.method().to_string()), rest)
            }
            Some((Segment::Field(field), rest)) if field == "args" => (
                Value::Array(invocation.args().iter().map(|(_, v)| v.clone()).collect()),
                rest,
            ),
            _ => return None,
        }
    } else if let Some(value) = invocation.get_arg(&expression.root) {
        (value.clone(), expression.path.as_slice())
    } else {
        let index = positional_index(&expression.root)?;
        (invocation.positional(index)?.clone(), expression.path.as_slice())
    };

    let mut current = start;
    for segment in path {
        current = match segment {
            Segment::Field(field) => current.get(field.as_str())?.clone(),
            Segment::Index(index) => current.get(*index)?.clone(),
        };
    }
    Some(current)
}

fn render(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation() -> Invocation {
        Invocation::new("upload")
            .arg("role", "archive")
            .arg("user", json!({"tenant": "acme", "shards": [3, 7]}))
            .arg("count", 42)
            .header("X-Tenant", "blue")
            .session_attr("tenant", "green")
    }

    #[test]
    fn test_is_dynamic() {
        assert!(is_dynamic("#role"));
        assert!(!is_dynamic("s3a"));
        assert!(!is_dynamic(""));
    }

    #[test]
    fn test_header_resolver() {
        let resolver = HeaderResolver;
        assert!(resolver.matches("#header.x-tenant"));
        assert!(!resolver.matches("#role"));
        assert_eq!(
            resolver.resolve(&invocation(), "#header.x-tenant"),
            Some("blue".to_string())
        );
        assert_eq!(resolver.resolve(&invocation(), "#header.missing"), None);
        assert_eq!(resolver.resolve(&invocation(), "#header"), None);
    }

    #[test]
    fn test_session_resolver() {
        let resolver = SessionResolver;
        assert!(resolver.matches("#session.tenant"));
        assert_eq!(
            resolver.resolve(&invocation(), "#session.tenant"),
            Some("green".to_string())
        );
        assert_eq!(resolver.resolve(&invocation(), "#session.nope"), None);
    }

    #[test]
    fn test_expression_forms() {
        let resolver = ExpressionResolver;
        let inv = invocation();
        assert_eq!(resolver.resolve(&inv, "#role"), Some("archive".to_string()));
        assert_eq!(resolver.resolve(&inv, "#p0"), Some("archive".to_string()));
        assert_eq!(resolver.resolve(&inv, "#a2"), Some("42".to_string()));
        assert_eq!(resolver.resolve(&inv, "#user.tenant"), Some("acme".to_string()));
        assert_eq!(resolver.resolve(&inv, "#user.shards[1]"), Some("7".to_string()));
        assert_eq!(resolver.resolve(&inv, "#root.method"), Some("upload".to_string()));
        assert_eq!(resolver.resolve(&inv, "#root.args[0]"), Some("archive".to_string()));
    }

    #[test]
    fn test_expression_misses() {
        let resolver = ExpressionResolver;
        let inv = invocation();
        assert_eq!(resolver.resolve(&inv, "#unknown"), None);
        assert_eq!(resolver.resolve(&inv, "#user"), None);
        assert_eq!(resolver.resolve(&inv, "#user.shards[9]"), None);
        assert_eq!(resolver.resolve(&inv, "#p9"), None);
        assert_eq!(resolver.resolve(&inv, "#role + 'x'"), None);
        assert_eq!(resolver.resolve(&inv, "#"), None);
    }

    #[test]
    fn test_parse_expression() {
        let expression = parse_expression("#user.shards[1]").unwrap();
        assert_eq!(expression.root, "user");
        assert_eq!(
            expression.path,
            vec![Segment::Field("shards".to_string()), Segment::Index(1)]
        );
        assert!(parse_expression("#user.").is_err());
        assert!(parse_expression("#user[x]").is_err());
    }

    #[test]
    fn test_standard_chain_header_wins() {
        let chain = ResolverChain::standard();
        assert_eq!(
            chain.resolve(&invocation(), "#header.x-tenant"),
            Some("blue".to_string())
        );
    }

    #[test]
    fn test_standard_chain_header_absent_falls_to_expression() {
        let chain = ResolverChain::standard();
        let inv = Invocation::new("read").arg("role", "archive");
        assert_eq!(chain.resolve(&inv, "#role"), Some("archive".to_string()));
    }

    #[test]
    fn test_chain_skips_non_matching_and_falls_through_on_miss() {
        let mut skipped = MockKeyResolver::new();
        skipped.expect_matches().return_const(false);
        skipped.expect_resolve().times(0);

        let mut missing = MockKeyResolver::new();
        missing.expect_matches().return_const(true);
        missing.expect_resolve().times(1).return_const(None::<String>);

        let mut hit = MockKeyResolver::new();
        hit.expect_matches().return_const(true);
        hit.expect_resolve()
            .times(1)
            .return_const(Some("archive".to_string()));

        let mut never = MockKeyResolver::new();
        never.expect_matches().times(0);
        never.expect_resolve().times(0);

        let chain = ResolverChain::new()
            .with(skipped)
            .with(missing)
            .with(hit)
            .with(never);
        assert_eq!(
            chain.resolve(&Invocation::default(), "#role"),
            Some("archive".to_string())
        );
    }

    #[test]
    fn test_chain_exhausted() {
        let chain = ResolverChain::new().with(HeaderResolver).with(SessionResolver);
        assert_eq!(chain.resolve(&invocation(), "#role"), None);
        assert!(ResolverChain::new().resolve(&invocation(), "#role").is_none());
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let inv = Invocation::new("m").header("bad header", "v");
        assert!(inv.headers().is_empty());
    }
}
