//! Payload Templates
//!
//! Step parameters and result selectors are JSON trees in which any key
//! ending in `.$` holds an expression instead of a literal:
//!
//! ```yaml
//! parameters:
//!   Bucket.$: $.destBucket
//!   Key.$: States.Format('process/{}', $.key)
//!   CopySource.$: "{$.sourceBucket}/inbox/{$.key}"
//!   Mode: copy
//! ```
//!
//! Expressions are parsed once, when the definition is loaded, so a malformed
//! path is a definition error rather than a run-time surprise.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::path::{self, FormatError, Path, PathError, Template, TemplatePart};

const FORMAT_FN: &str = "States.Format";
const STRING_TO_JSON_FN: &str = "States.StringToJson";
const JSON_TO_STRING_FN: &str = "States.JsonToString";

/// Failure while evaluating a payload against a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("{function} at '{path}': {reason}")]
    Intrinsic {
        function: &'static str,
        path: String,
        reason: String,
    },
}

/// A dynamic value computed from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// `$.a.b`
    Path(Path),
    /// `process/{$.key}` or `States.Format('process/{}', $.key)`
    Format(Template),
    /// `States.StringToJson($.Body)`
    StringToJson(Path),
    /// `States.JsonToString($.item)`
    JsonToString(Path),
}

impl Expression {
    /// Parses an expression string.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let text = text.trim();

        if text.starts_with('$') {
            return Ok(Expression::Path(Path::parse(text)?));
        }
        if let Some(args) = call_args(text, FORMAT_FN) {
            return parse_format_call(text, args).map(Expression::Format);
        }
        if let Some(args) = call_args(text, STRING_TO_JSON_FN) {
            return Ok(Expression::StringToJson(Path::parse(args)?));
        }
        if let Some(args) = call_args(text, JSON_TO_STRING_FN) {
            return Ok(Expression::JsonToString(Path::parse(args)?));
        }
        if text.starts_with("States.") {
            return Err(PathError::Syntax {
                input: text.to_string(),
                reason: "unknown intrinsic function".to_string(),
            });
        }

        Template::parse(text).map(Expression::Format)
    }

    /// Evaluates the expression against `document`.
    pub fn evaluate(&self, document: &Value) -> Result<Value, PayloadError> {
        match self {
            Expression::Path(p) => Ok(path::read(document, p)?.clone()),
            Expression::Format(template) => Ok(Value::String(path::format(template, document)?)),
            Expression::StringToJson(p) => {
                let raw = path::read(document, p)?;
                let text = raw.as_str().ok_or_else(|| PayloadError::Intrinsic {
                    function: STRING_TO_JSON_FN,
                    path: p.to_string(),
                    reason: format!("expected string but found {}", path::kind_of(raw)),
                })?;
                serde_json::from_str(text).map_err(|e| PayloadError::Intrinsic {
                    function: STRING_TO_JSON_FN,
                    path: p.to_string(),
                    reason: e.to_string(),
                })
            }
            Expression::JsonToString(p) => {
                Ok(Value::String(path::read(document, p)?.to_string()))
            }
        }
    }

    /// Paths referenced by this expression.
    pub fn references(&self) -> Vec<&Path> {
        match self {
            Expression::Path(p) | Expression::StringToJson(p) | Expression::JsonToString(p) => {
                vec![p]
            }
            Expression::Format(template) => template.references().collect(),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Path(p) => write!(f, "{}", p),
            Expression::Format(template) => {
                // The short form only reads back as a template when nothing
                // else claims its leading text.
                let text = template.to_string();
                if text.trim() == text && !text.starts_with('$') && !text.starts_with("States.") {
                    write!(f, "{}", text)
                } else {
                    write_format_call(f, template)
                }
            }
            Expression::StringToJson(p) => write!(f, "{}({})", STRING_TO_JSON_FN, p),
            Expression::JsonToString(p) => write!(f, "{}({})", JSON_TO_STRING_FN, p),
        }
    }
}

/// Returns the argument text of `name(...)`, if `text` is such a call.
fn call_args<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

/// Parses the arguments of `States.Format('fmt {}', $.a, ...)` into a template.
///
/// Inside the format string `\` escapes the next character, so `\{}` is a
/// literal pair of braces rather than a placeholder.
fn parse_format_call(text: &str, args: &str) -> Result<Template, PathError> {
    let syntax = |reason: &str| PathError::Syntax {
        input: text.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = args.chars();
    if chars.next() != Some('\'') {
        return Err(syntax("format string must be single-quoted"));
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut closed = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(syntax("dangling escape")),
            },
            '\'' => {
                closed = true;
                break;
            }
            '{' if chars.as_str().starts_with('}') => {
                chars.next();
                pieces.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !closed {
        return Err(syntax("unterminated format string"));
    }
    pieces.push(current);

    let remaining = chars.as_str().trim();
    let arguments: Vec<Path> = if remaining.is_empty() {
        Vec::new()
    } else {
        let list = remaining
            .strip_prefix(',')
            .ok_or_else(|| syntax("expected ',' after the format string"))?;
        split_arguments(list)
            .into_iter()
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .map(Path::parse)
            .collect::<Result<_, _>>()?
    };

    if pieces.len() - 1 != arguments.len() {
        return Err(syntax(&format!(
            "format string has {} placeholders but {} arguments",
            pieces.len() - 1,
            arguments.len()
        )));
    }

    let mut parts = Vec::new();
    let mut arguments = arguments.into_iter();
    for piece in pieces {
        if !piece.is_empty() {
            parts.push(TemplatePart::Literal(piece));
        }
        if let Some(arg) = arguments.next() {
            parts.push(TemplatePart::Ref(arg));
        }
    }

    Ok(Template::from_parts(parts))
}

/// Splits a call's argument list on commas outside quoted path keys.
fn split_arguments(list: &str) -> Vec<&str> {
    let mut arguments = Vec::new();
    let mut start = 0;
    let mut quote = None;
    let mut escaped = false;

    for (i, c) in list.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => {
                arguments.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    arguments.push(&list[start..]);
    arguments
}

/// Writes `template` as a `States.Format(...)` call.
fn write_format_call(f: &mut fmt::Formatter<'_>, template: &Template) -> fmt::Result {
    write!(f, "{}('", FORMAT_FN)?;
    for part in template.parts() {
        match part {
            TemplatePart::Literal(text) => {
                for c in text.chars() {
                    if matches!(c, '\\' | '\'' | '{' | '}') {
                        write!(f, "\\")?;
                    }
                    write!(f, "{}", c)?;
                }
            }
            TemplatePart::Ref(_) => write!(f, "{{}}")?,
        }
    }
    write!(f, "'")?;
    for path in template.references() {
        write!(f, ", {}", path)?;
    }
    write!(f, ")")
}

/// A JSON template evaluated into a concrete value at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Payload {
    Literal(Value),
    Expression(Expression),
    Array(Vec<Payload>),
    Object(Vec<(String, Payload)>),
}

impl Payload {
    /// Builds the concrete value for this template.
    pub fn resolve(&self, document: &Value) -> Result<Value, PayloadError> {
        match self {
            Payload::Literal(value) => Ok(value.clone()),
            Payload::Expression(expr) => expr.evaluate(document),
            Payload::Array(items) => items
                .iter()
                .map(|item| item.resolve(document))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Payload::Object(fields) => {
                let mut map = Map::new();
                for (key, field) in fields {
                    map.insert(key.clone(), field.resolve(document)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Every path this template reads.
    pub fn references(&self) -> Vec<&Path> {
        match self {
            Payload::Literal(_) => Vec::new(),
            Payload::Expression(expr) => expr.references(),
            Payload::Array(items) => items.iter().flat_map(Payload::references).collect(),
            Payload::Object(fields) => fields.iter().flat_map(|(_, f)| f.references()).collect(),
        }
    }
}

impl TryFrom<Value> for Payload {
    type Error = PathError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(Payload::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Payload::Array),
            Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, field) in map {
                    match key.strip_suffix(".$") {
                        Some(name) => {
                            let text = field.as_str().ok_or_else(|| PathError::Syntax {
                                input: key.clone(),
                                reason: "expression fields must hold a string".to_string(),
                            })?;
                            fields.push((
                                name.to_string(),
                                Payload::Expression(Expression::parse(text)?),
                            ));
                        }
                        None => fields.push((key, Payload::try_from(field)?)),
                    }
                }
                Ok(Payload::Object(fields))
            }
            scalar => Ok(Payload::Literal(scalar)),
        }
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Literal(value) => value,
            // A bare expression only appears at the top level of hand-built payloads.
            Payload::Expression(expr) => Value::String(expr.to_string()),
            Payload::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Payload::Object(fields) => {
                let mut map = Map::new();
                for (key, field) in fields {
                    match field {
                        Payload::Expression(expr) => {
                            map.insert(format!("{}.$", key), Value::String(expr.to_string()));
                        }
                        other => {
                            map.insert(key, Value::from(other));
                        }
                    }
                }
                Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        Payload::try_from(value).unwrap()
    }

    #[test]
    fn test_literal_payload_passes_through() {
        let p = payload(json!({"TableName": "StepfnExample", "n": [1, 2]}));
        assert_eq!(
            p.resolve(&json!({})).unwrap(),
            json!({"TableName": "StepfnExample", "n": [1, 2]})
        );
    }

    #[test]
    fn test_path_field() {
        let p = payload(json!({"Bucket.$": "$.destBucket"}));
        assert_eq!(
            p.resolve(&json!({"destBucket": "b"})).unwrap(),
            json!({"Bucket": "b"})
        );
    }

    #[test]
    fn test_states_format() {
        let p = payload(json!({
            "Key.$": "States.Format('process/{}',$.key)",
            "CopySource.$": "States.Format('{}/inbox/{}', $.sourceBucket, $.key)"
        }));
        let doc = json!({"sourceBucket": "a", "key": "f.json"});
        assert_eq!(
            p.resolve(&doc).unwrap(),
            json!({"Key": "process/f.json", "CopySource": "a/inbox/f.json"})
        );
    }

    #[test]
    fn test_embedded_template() {
        let p = payload(json!({"Key.$": "archive/{$.key}"}));
        assert_eq!(
            p.resolve(&json!({"key": "f.json"})).unwrap(),
            json!({"Key": "archive/f.json"})
        );
    }

    #[test]
    fn test_string_to_json() {
        let p = payload(json!({"filecontent.$": "States.StringToJson($.Body)"}));
        let doc = json!({"Body": "[{\"id\":\"1\",\"name\":\"x\"}]"});
        assert_eq!(
            p.resolve(&doc).unwrap(),
            json!({"filecontent": [{"id": "1", "name": "x"}]})
        );
    }

    #[test]
    fn test_string_to_json_rejects_invalid() {
        let p = payload(json!({"x.$": "States.StringToJson($.Body)"}));
        assert!(matches!(
            p.resolve(&json!({"Body": "{not json"})),
            Err(PayloadError::Intrinsic { .. })
        ));
        assert!(matches!(
            p.resolve(&json!({"Body": 4})),
            Err(PayloadError::Intrinsic { .. })
        ));
    }

    #[test]
    fn test_json_to_string() {
        let p = payload(json!({"raw.$": "States.JsonToString($.item)"}));
        assert_eq!(
            p.resolve(&json!({"item": {"a": 1}})).unwrap(),
            json!({"raw": "{\"a\":1}"})
        );
    }

    #[test]
    fn test_nested_arrays_of_objects() {
        let p = payload(json!({
            "filesToDelete": [
                {"Bucket.$": "$.sourceBucket", "Key.$": "States.Format('inbox/{}',$.key)"},
                {"Bucket.$": "$.destBucket", "Key.$": "States.Format('process/{}',$.key)"}
            ]
        }));
        let doc = json!({"sourceBucket": "a", "destBucket": "b", "key": "f.json"});
        assert_eq!(
            p.resolve(&doc).unwrap(),
            json!({"filesToDelete": [
                {"Bucket": "a", "Key": "inbox/f.json"},
                {"Bucket": "b", "Key": "process/f.json"}
            ]})
        );
        assert_eq!(p.references().len(), 4);
    }

    #[test]
    fn test_missing_reference_propagates() {
        let p = payload(json!({"Bucket.$": "$.nope"}));
        assert!(matches!(
            p.resolve(&json!({})),
            Err(PayloadError::Path(PathError::NotFound { .. }))
        ));

        let f = payload(json!({"Key.$": "States.Format('x/{}', $.nope)"}));
        assert!(matches!(f.resolve(&json!({})), Err(PayloadError::Format(_))));
    }

    #[test]
    fn test_invalid_expressions_rejected_at_parse() {
        assert!(Payload::try_from(json!({"a.$": "States.Format('{} {}', $.x)"})).is_err());
        assert!(Payload::try_from(json!({"a.$": "States.Unknown($.x)"})).is_err());
        assert!(Payload::try_from(json!({"a.$": 5})).is_err());
        assert!(Payload::try_from(json!({"a.$": "$.bad["})).is_err());
        assert!(Payload::try_from(json!({"a.$": "States.Format(unquoted)"})).is_err());
    }

    #[test]
    fn test_format_arguments_may_quote_commas() {
        let p = payload(json!({"v.$": "States.Format('<{}>', $['a,b'])"}));
        assert_eq!(
            p.resolve(&json!({"a,b": "x"})).unwrap(),
            json!({"v": "<x>"})
        );
        assert!(Payload::try_from(json!({"v.$": "States.Format('{}' $.a)"})).is_err());
    }

    #[test]
    fn test_escaped_braces_are_not_placeholders() {
        let p = payload(json!({"v.$": "States.Format('\\{} {}', $.a)"}));
        assert_eq!(p.resolve(&json!({"a": 1})).unwrap(), json!({"v": "{} 1"}));
    }

    #[test]
    fn test_serialized_format_reloads() {
        let doc = json!({"a": "x", "a,b": "y"});
        for text in [
            "States.Format('${}', $.a)",
            "States.Format('States.{}', $.a)",
            "States.Format(' padded {} ', $.a)",
            "States.Format('it\\'s \\{\\} {}', $['a,b'])",
        ] {
            let first = payload(json!({"k.$": text}));
            let saved: Value = first.clone().into();
            let reloaded = Payload::try_from(saved.clone())
                .unwrap_or_else(|e| panic!("{} saved as {} failed to reload: {}", text, saved, e));
            assert_eq!(reloaded, first);
            assert_eq!(reloaded.resolve(&doc).unwrap(), first.resolve(&doc).unwrap());
        }
    }

    #[test]
    fn test_serialize_restores_expression_keys() {
        let source = json!({
            "Bucket.$": "$.destBucket",
            "Key.$": "process/{$.key}",
            "Body.$": "States.StringToJson($.Body)",
            "Static": "v"
        });
        let value: Value = payload(source.clone()).into();
        assert_eq!(value, source);
    }
}
