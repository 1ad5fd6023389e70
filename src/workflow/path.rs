//! Path Resolution
//!
//! A small path-expression language for addressing values inside the JSON
//! execution context.
//!
//! # Syntax
//!
//! ```text
//! $                    the whole document
//! $.getObject.body     object keys
//! $['odd key']         bracketed keys (any characters except an unescaped quote)
//! $.filecontent[0].id  0-based array indices
//! ```
//!
//! Templates embed paths between braces: `process/{$.key}`. A literal brace
//! is written as `{{` or `}}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure while parsing or resolving a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path '{path}' not found in document")]
    NotFound { path: String },

    #[error("path '{path}' expected {expected} but found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid path '{input}': {reason}")]
    Syntax { input: String, reason: String },
}

/// Failure while formatting a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot format template '{template}': {source}")]
pub struct FormatError {
    pub template: String,
    #[source]
    pub source: PathError,
}

/// One addressing step inside a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed reference into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The root path `$`.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a path expression.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let syntax = |reason: &str| PathError::Syntax {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let rest = input
            .trim()
            .strip_prefix('$')
            .ok_or_else(|| syntax("paths must start with '$'"))?;

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
                    if start == i {
                        return Err(syntax("empty key after '.'"));
                    }
                    segments.push(Segment::Key(chars[start..i].iter().collect()));
                }
                '[' => {
                    i += 1;
                    if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
                        let quote = chars[i];
                        i += 1;
                        let mut key = String::new();
                        loop {
                            match chars.get(i) {
                                None => return Err(syntax("unterminated quoted key")),
                                Some('\\') if chars.get(i + 1) == Some(&quote) => {
                                    key.push(quote);
                                    i += 2;
                                }
                                Some(c) if *c == quote => {
                                    i += 1;
                                    break;
                                }
                                Some(c) => {
                                    key.push(*c);
                                    i += 1;
                                }
                            }
                        }
                        if chars.get(i) != Some(&']') {
                            return Err(syntax("expected ']' after quoted key"));
                        }
                        i += 1;
                        segments.push(Segment::Key(key));
                    } else {
                        let start = i;
                        while i < chars.len() && chars[i] != ']' {
                            i += 1;
                        }
                        if i == chars.len() {
                            return Err(syntax("unterminated '['"));
                        }
                        let digits: String = chars[start..i].iter().collect();
                        let index = digits
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| syntax("array index must be a non-negative integer"))?;
                        i += 1;
                        segments.push(Segment::Index(index));
                    }
                }
                _ => return Err(syntax("expected '.' or '[' after '$'")),
            }
        }

        Ok(Self { segments })
    }

    /// Returns the parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true for the root path `$`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path extended by one key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    /// Returns a new path extended by one index.
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    fn prefix(&self, len: usize) -> String {
        Path {
            segments: self.segments[..len].to_vec(),
        }
        .to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                Segment::Index(i) => write!(f, "[{}]", i)?,
                Segment::Key(k) if is_plain_key(k) => write!(f, ".{}", k)?,
                Segment::Key(k) => write!(f, "['{}']", k.replace('\'', "\\'"))?,
            }
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['.', '[', ']', '\'', '"', '{', '}', ' ', ',', '(', ')'])
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

/// Names the JSON kind of a value for diagnostics.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads the value at `path`.
///
/// Missing keys and out-of-range indices are `NotFound`; indexing into a
/// value of the wrong kind is `TypeMismatch`.
pub fn read<'a>(document: &'a Value, path: &Path) -> Result<&'a Value, PathError> {
    let mut current = document;

    for (depth, segment) in path.segments.iter().enumerate() {
        let not_found = || PathError::NotFound {
            path: path.to_string(),
        };

        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key).ok_or_else(not_found)?,
            (Segment::Index(index), Value::Array(items)) => {
                items.get(*index).ok_or_else(not_found)?
            }
            (Segment::Key(_), other) => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    expected: "object",
                    found: kind_of(other),
                })
            }
            (Segment::Index(_), other) => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    expected: "array",
                    found: kind_of(other),
                })
            }
        };
    }

    Ok(current)
}

/// Returns a copy of `document` with `value` installed at `path`.
///
/// Missing intermediate containers (and `null` placeholders) are created: an
/// object for a key segment, an array for an index segment. Writing past the
/// end of an array pads it with `null`. The input document is never touched.
pub fn write(document: &Value, path: &Path, value: Value) -> Result<Value, PathError> {
    let mut updated = document.clone();
    install(&mut updated, path, 0, value)?;
    Ok(updated)
}

fn install(slot: &mut Value, path: &Path, depth: usize, value: Value) -> Result<(), PathError> {
    let Some(segment) = path.segments.get(depth) else {
        *slot = value;
        return Ok(());
    };

    if slot.is_null() {
        *slot = match segment {
            Segment::Key(_) => Value::Object(Map::new()),
            Segment::Index(_) => Value::Array(Vec::new()),
        };
    }

    match (segment, slot) {
        (Segment::Key(key), Value::Object(map)) => {
            let child = map.entry(key.clone()).or_insert(Value::Null);
            install(child, path, depth + 1, value)
        }
        (Segment::Index(index), Value::Array(items)) => {
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            install(&mut items[*index], path, depth + 1, value)
        }
        (Segment::Key(_), other) => Err(PathError::TypeMismatch {
            path: path.prefix(depth + 1),
            expected: "object",
            found: kind_of(other),
        }),
        (Segment::Index(_), other) => Err(PathError::TypeMismatch {
            path: path.prefix(depth + 1),
            expected: "array",
            found: kind_of(other),
        }),
    }
}

/// Renders a value for string interpolation: strings verbatim, everything
/// else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A piece of a [`Template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Ref(Path),
}

/// A string with embedded path references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    /// Parses `text` where `{$...}` marks a path reference.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let syntax = |reason: &str| PathError::Syntax {
            input: text.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut reference = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => reference.push(c),
                            None => return Err(syntax("unterminated '{'")),
                        }
                    }
                    if !literal.is_empty() {
                        parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(TemplatePart::Ref(Path::parse(&reference)?));
                }
                '}' => return Err(syntax("unmatched '}'")),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        Ok(Self { parts })
    }

    /// Builds a template from parts.
    pub fn from_parts(parts: Vec<TemplatePart>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// Iterates over the paths this template references.
    pub fn references(&self) -> impl Iterator<Item = &Path> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Ref(path) => Some(path),
            TemplatePart::Literal(_) => None,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => {
                    write!(f, "{}", text.replace('{', "{{").replace('}', "}}"))?
                }
                TemplatePart::Ref(path) => write!(f, "{{{}}}", path)?,
            }
        }
        Ok(())
    }
}

/// Substitutes every path reference in `template` with the string form of
/// the resolved value.
pub fn format(template: &Template, document: &Value) -> Result<String, FormatError> {
    let mut output = String::new();

    for part in &template.parts {
        match part {
            TemplatePart::Literal(text) => output.push_str(text),
            TemplatePart::Ref(path) => {
                let value = read(document, path).map_err(|source| FormatError {
                    template: template.to_string(),
                    source,
                })?;
                output.push_str(&value_to_string(value));
            }
        }
    }

    Ok(output)
}
