//! Cache key derivation.
//!
//! Keys are colon-separated segments: `[prefix:]namespace:part:part...`.
//! Parts are normalized before rendering so that logically equal inputs
//! always produce the same key, and list queries are canonicalized through
//! [`normalize_list_query`].

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

const SEPARATOR: char = ':';

/// Closed set of key namespaces, one per resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Blog posts (lists and items).
    Blog,
    /// Job board listings.
    Jobs,
    /// Public quiz landing data.
    Quiz,
    /// Per-session user data such as the profile.
    User,
    /// Mercure hub subscriber tokens.
    Mercure,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Blog => "blog",
            Namespace::Jobs => "jobs",
            Namespace::Quiz => "quiz",
            Namespace::User => "user",
            Namespace::Mercure => "mercure",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key segment prior to normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A canonical list query, rendered with its own delimiters escaped.
    Query(CanonicalQuery),
    Absent,
}

impl KeyPart {
    /// Render the part, or `None` when it must be omitted from the key.
    fn render(&self) -> Option<String> {
        match self {
            KeyPart::Text(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| escape_segment(trimmed))
            }
            KeyPart::Int(value) => Some(value.to_string()),
            KeyPart::Float(value) => value.is_finite().then(|| value.to_string()),
            KeyPart::Bool(value) => Some(if *value { "1" } else { "0" }.to_string()),
            KeyPart::Query(query) => (!query.is_empty()).then(|| query.render()),
            KeyPart::Absent => None,
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Text(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Text(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        KeyPart::Text(value.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<f64> for KeyPart {
    fn from(value: f64) -> Self {
        KeyPart::Float(value)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyPart::Absent)
    }
}

impl From<&CanonicalQuery> for KeyPart {
    fn from(query: &CanonicalQuery) -> Self {
        if query.is_empty() {
            KeyPart::Absent
        } else {
            KeyPart::Query(query.clone())
        }
    }
}

/// Build `namespace:part...`, dropping empty or invalid parts.
pub fn build_key<I>(namespace: Namespace, parts: I) -> String
where
    I: IntoIterator,
    I::Item: Into<KeyPart>,
{
    build_prefixed_key(None, namespace, parts)
}

/// Build `prefix:namespace:part...`; a blank prefix is omitted.
pub fn build_prefixed_key<I>(prefix: Option<&str>, namespace: Namespace, parts: I) -> String
where
    I: IntoIterator,
    I::Item: Into<KeyPart>,
{
    let mut segments: Vec<String> = Vec::new();
    if let Some(prefix) = prefix.and_then(|p| KeyPart::from(p).render()) {
        segments.push(prefix);
    }
    segments.push(namespace.as_str().to_string());
    segments.extend(parts.into_iter().filter_map(|part| part.into().render()));
    segments.join(&SEPARATOR.to_string())
}

/// Hex SHA-256 digest of a credential, used in keys instead of the raw value.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize().to_vec())
}

/// Key builder bound to a deployment prefix.
#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    prefix: Option<String>,
}

impl KeySpace {
    pub fn new(prefix: Option<String>) -> Self {
        let prefix = prefix.and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn key<I>(&self, namespace: Namespace, parts: I) -> String
    where
        I: IntoIterator,
        I::Item: Into<KeyPart>,
    {
        build_prefixed_key(self.prefix.as_deref(), namespace, parts)
    }
}

/// Canonical form of a list query: sorted keys, normalized scalar values.
///
/// Multi-value parameters keep their values apart so that `tags=a,b` given
/// as one value never shares a key with `tags=a&tags=b`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalQuery {
    params: BTreeMap<String, Vec<String>>,
}

impl CanonicalQuery {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Value of a parameter as sent upstream, multiple values joined by `,`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.params.get(key).map(|values| values.join(","))
    }

    /// Insert `value` for `key` unless the query already carries one.
    pub fn with_default(mut self, key: &str, value: impl Into<KeyPart>) -> Self {
        if !self.params.contains_key(key) {
            if let Some(rendered) = value.into().render() {
                self.params.insert(key.to_string(), vec![rendered]);
            }
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, String)> {
        self.params
            .iter()
            .map(|(k, values)| (k.as_str(), values.join(",")))
    }

    /// Render as `k=v,v&k=v` in key order, escaping delimiters inside keys
    /// and values.
    pub fn render(&self) -> String {
        self.params
            .iter()
            .map(|(k, values)| {
                let values = values
                    .iter()
                    .map(|value| escape(value, QUERY_RESERVED))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}={values}", escape(k, QUERY_RESERVED))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Canonicalize raw query pairs.
///
/// Repeated keys (and `key[]` array syntax) are merged, values are trimmed,
/// numeric strings are parsed, `true`/`false` become `1`/`0`, and multi-value
/// parameters are deduplicated, sorted and joined with `,`. Blank keys and
/// values are dropped.
pub fn normalize_list_query<I, K, V>(pairs: I) -> CanonicalQuery
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (key, value) in pairs {
        let key = key.as_ref().trim();
        let key = key.strip_suffix("[]").unwrap_or(key).trim();
        if key.is_empty() {
            continue;
        }
        let Some(value) = normalize_query_value(value.as_ref()) else {
            continue;
        };
        grouped.entry(key.to_string()).or_default().push(value);
    }

    let params = grouped
        .into_iter()
        .map(|(key, mut values)| {
            values.sort();
            values.dedup();
            (key, values)
        })
        .collect();

    CanonicalQuery { params }
}

fn normalize_query_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed {
        "true" => return Some("1".to_string()),
        "false" => return Some("0".to_string()),
        _ => {}
    }
    if looks_numeric(trimmed) {
        if let Ok(int) = trimmed.parse::<i64>() {
            return Some(int.to_string());
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            return float.is_finite().then(|| float.to_string());
        }
    }
    Some(trimmed.to_string())
}

fn looks_numeric(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit())
}

const SEGMENT_RESERVED: &[char] = &[SEPARATOR];
const QUERY_RESERVED: &[char] = &[SEPARATOR, '&', '=', ','];

fn escape_segment(value: &str) -> String {
    escape(value, SEGMENT_RESERVED)
}

/// Percent-encode `%` and every reserved delimiter.
fn escape(value: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '%' || reserved.contains(&c) {
            // Reserved characters are all ASCII.
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}
