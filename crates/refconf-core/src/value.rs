//! Configuration value types
//!
//! [`RawValue`] is what the parser produces: literals plus unresolved
//! references (`<section>`), variable aliases (`$name`) and strings that may
//! still contain `{placeholder}` sequences.
//!
//! [`Value`] is the resolved form. References become shared
//! [`ResolvedSection`] instances; two keys pointing at the same section hold
//! the same `Arc`.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Name of the key that carries a section's constructor symbol
pub const CLASS_KEY: &str = "class";

/// A parsed, unresolved value
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer literal
    Integer(i64),
    /// Float literal (has `.` or an exponent)
    Float(f64),
    /// Quoted string, placeholders left in place
    String(String),
    /// `[a, b, ...]`
    List(Vec<RawValue>),
    /// `(a, b, ...)`
    Tuple(Vec<RawValue>),
    /// `<section>`
    Reference(String),
    /// `$name`
    Variable(String),
    /// Bare dotted name such as `evaluators.BLEUEvaluator`
    Symbol(String),
}

impl RawValue {
    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::None => "none",
            RawValue::Bool(_) => "bool",
            RawValue::Integer(_) => "integer",
            RawValue::Float(_) => "float",
            RawValue::String(_) => "string",
            RawValue::List(_) => "list",
            RawValue::Tuple(_) => "tuple",
            RawValue::Reference(_) => "reference",
            RawValue::Variable(_) => "variable",
            RawValue::Symbol(_) => "symbol",
        }
    }
}

/// Renders the value back into source syntax
impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::None => write!(f, "None"),
            RawValue::Bool(true) => write!(f, "True"),
            RawValue::Bool(false) => write!(f, "False"),
            RawValue::Integer(i) => write!(f, "{}", i),
            // Debug keeps the fractional part so the literal re-parses as a float
            RawValue::Float(n) => write!(f, "{:?}", n),
            RawValue::String(s) => write_quoted(f, s),
            RawValue::List(items) => write_items(f, items, "[", "]"),
            RawValue::Tuple(items) => write_items(f, items, "(", ")"),
            RawValue::Reference(name) => write!(f, "<{}>", name),
            RawValue::Variable(name) => write!(f, "${}", name),
            RawValue::Symbol(name) => write!(f, "{}", name),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

fn write_items<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    open: &str,
    close: &str,
) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

/// A section after resolution: an optional constructor symbol plus the
/// keyword arguments the host passes to it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSection {
    name: String,
    /// Always a `Value::Symbol`, so path lookups can hand out a reference
    class: Option<Value>,
    entries: IndexMap<String, Value>,
}

impl ResolvedSection {
    /// Build a resolved section, lifting a symbol-valued `class` key out of
    /// the entries
    pub fn new(name: impl Into<String>, mut entries: IndexMap<String, Value>) -> Self {
        let class = match entries.get(CLASS_KEY) {
            Some(Value::Symbol(_)) => entries.shift_remove(CLASS_KEY),
            _ => None,
        };
        Self {
            name: name.into(),
            class,
            entries,
        }
    }

    /// Build a section with the class already separated
    pub(crate) fn from_parts(
        name: String,
        class: Option<String>,
        entries: IndexMap<String, Value>,
    ) -> Self {
        Self {
            name,
            class: class.map(Value::Symbol),
            entries,
        }
    }

    /// The section name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The constructor symbol, if the section declares one
    pub fn class(&self) -> Option<&str> {
        self.class.as_ref().and_then(Value::as_symbol)
    }

    /// Get an entry by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// All entries in document order (without the lifted `class`)
    pub fn entries(&self) -> &IndexMap<String, Value> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk a path starting inside this section
    pub(crate) fn get_segments(&self, segments: &[PathSegment], path: &str) -> Result<&Value> {
        let Some((first, rest)) = segments.split_first() else {
            return Err(Error::internal("empty path inside section"));
        };
        match first {
            PathSegment::Key(key) => {
                let value = match (self.entries.get(key.as_str()), &self.class) {
                    (Some(value), _) => value,
                    (None, Some(class)) if key == CLASS_KEY => class,
                    _ => {
                        return Err(Error::unknown_reference(path).with_cause("No such key"));
                    }
                };
                value.get_segments(rest, path)
            }
            PathSegment::Index(_) => Err(Error::unknown_reference(path)
                .with_cause(format!("Section [{}] cannot be indexed", self.name))),
        }
    }
}

impl Serialize for ResolvedSection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.entries.len() + usize::from(self.class.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(class) = self.class() {
            map.serialize_entry(CLASS_KEY, class)?;
        }
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// A fully resolved value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Opaque evaluator expression, interpreted by the host
    Symbol(String),
    /// A referenced section, shared between every key that references it
    Section(Arc<ResolvedSection>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_section(&self) -> bool {
        matches!(self, Value::Section(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float or Integer
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Get the elements of a List or Tuple
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_section(&self) -> Option<&Arc<ResolvedSection>> {
        match self {
            Value::Section(section) => Some(section),
            _ => None,
        }
    }

    /// True when both values are the same shared section instance
    pub fn same_instance(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Section(a), Value::Section(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Symbol(_) => "symbol",
            Value::Section(_) => "section",
        }
    }

    /// Get a nested value by path (e.g., "encoder.dropout" or "runners[0]")
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        let segments = parse_path(path)?;
        self.get_segments(&segments, path)
    }

    pub(crate) fn get_segments(&self, segments: &[PathSegment], path: &str) -> Result<&Value> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(self);
        };
        match (first, self) {
            (_, Value::Section(section)) => section.get_segments(segments, path),
            (PathSegment::Index(idx), Value::List(items) | Value::Tuple(items)) => items
                .get(*idx)
                .ok_or_else(|| {
                    Error::unknown_reference(path)
                        .with_cause(format!("Index {} out of range", idx))
                })?
                .get_segments(rest, path),
            _ => Err(Error::unknown_reference(path).with_cause(format!(
                "Cannot descend into a {}",
                self.type_name()
            ))),
        }
    }

    /// Map every embedded section through `f`, leaving everything else as is
    pub(crate) fn map_sections<F>(&self, f: &F) -> Result<Value>
    where
        F: Fn(&Arc<ResolvedSection>) -> Result<Arc<ResolvedSection>>,
    {
        Ok(match self {
            Value::Section(section) => Value::Section(f(section)?),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| v.map_sections(f))
                    .collect::<Result<_>>()?,
            ),
            Value::Tuple(items) => Value::Tuple(
                items
                    .iter()
                    .map(|v| v.map_sections(f))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Push the names of all directly embedded sections onto `out`
    pub(crate) fn collect_section_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Value::Section(section) => out.push(section.name()),
            Value::List(items) | Value::Tuple(items) => {
                for item in items {
                    item.collect_section_names(out);
                }
            }
            _ => {}
        }
    }
}

/// Host-style stringification, used by interpolation
///
/// Floats always carry a fractional part, booleans are `True`/`False`,
/// strings inside containers are single-quoted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            other => write_repr(f, other),
        }
    }
}

fn write_repr(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::None => write!(f, "None"),
        Value::Bool(true) => write!(f, "True"),
        Value::Bool(false) => write!(f, "False"),
        Value::Integer(i) => write!(f, "{}", i),
        Value::Float(n) => write!(f, "{}", float_repr(*n)),
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
        Value::List(items) => {
            write!(f, "[")?;
            write_repr_items(f, items)?;
            write!(f, "]")
        }
        Value::Tuple(items) => {
            write!(f, "(")?;
            write_repr_items(f, items)?;
            if items.len() == 1 {
                write!(f, ",")?;
            }
            write!(f, ")")
        }
        Value::Symbol(s) => write!(f, "{}", s),
        Value::Section(section) => write!(f, "<{}>", section.name()),
    }
}

/// Shortest round-trip digits. Fixed notation for exponents in `-4..16`
/// (`0.0001`, `1.0`), otherwise `1e-05` / `1.5e+16`.
fn float_repr(n: f64) -> String {
    if !n.is_finite() {
        return match n {
            n if n.is_nan() => "nan".to_string(),
            n if n > 0.0 => "inf".to_string(),
            _ => "-inf".to_string(),
        };
    }
    let scientific = format!("{:e}", n);
    let (mantissa, exp) = match scientific.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if n == 0.0 || (-4..16).contains(&exp) {
        let fixed = n.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.unsigned_abs())
    }
}

fn write_repr_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_repr(f, item)?;
    }
    Ok(())
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::String(s) | Value::Symbol(s) => serializer.serialize_str(s),
            Value::List(items) | Value::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Section(section) => section.serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// A segment in a path expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathSegment {
    /// A key (e.g., "encoder" in "main.encoder")
    Key(String),
    /// An index into a list or tuple (e.g., 0 in "runners[0]")
    Index(usize),
}

/// Parse a path string into segments
/// Supports: "key", "key.subkey", "key[0]", "key[0].subkey"
pub(crate) fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut current_key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
            }
            '[' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
                let mut index_str = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    index_str.push(c);
                }
                if !closed {
                    return Err(Error::unknown_reference(path).with_cause("Unclosed '[' in path"));
                }
                let idx: usize = index_str.parse().map_err(|_| {
                    Error::unknown_reference(path)
                        .with_cause(format!("Invalid index in path: {}", index_str))
                })?;
                segments.push(PathSegment::Index(idx));
            }
            ']' => {
                return Err(Error::unknown_reference(path).with_cause("Unexpected ']' in path"));
            }
            _ => current_key.push(c),
        }
    }

    if !current_key.is_empty() {
        segments.push(PathSegment::Key(current_key));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn section(name: &str, entries: Vec<(&str, Value)>) -> Arc<ResolvedSection> {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Arc::new(ResolvedSection::new(name, map))
    }

    #[test]
    fn test_parse_complex_path() {
        let segments = parse_path("runners[0].output").unwrap();
        assert_eq!(
            segments,
            vec![
                PathSegment::Key("runners".into()),
                PathSegment::Index(0),
                PathSegment::Key("output".into())
            ]
        );
    }

    #[test]
    fn test_parse_path_rejects_bad_index() {
        assert!(parse_path("runners[x]").is_err());
        assert!(parse_path("runners[0").is_err());
        assert!(parse_path("runners]").is_err());
    }

    #[test]
    fn test_class_key_is_lifted() {
        let s = section(
            "encoder",
            vec![
                ("class", Value::Symbol("encoders.SentenceEncoder".into())),
                ("rnn_size", Value::Integer(256)),
            ],
        );

        assert_eq!(s.class(), Some("encoders.SentenceEncoder"));
        assert!(s.get("class").is_none());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_class_reachable_by_path() {
        let encoder = section(
            "encoder",
            vec![("class", Value::Symbol("encoders.SentenceEncoder".into()))],
        );
        let main = Value::Section(section("main", vec![("encoder", Value::Section(encoder))]));

        assert_eq!(
            main.get_path("encoder.class").unwrap(),
            &Value::Symbol("encoders.SentenceEncoder".into())
        );
        assert!(main.get_path("class").is_err());
    }

    #[test]
    fn test_non_symbol_class_stays_an_entry() {
        let s = section("labels", vec![("class", Value::String("positive".into()))]);

        assert_eq!(s.class(), None);
        assert_eq!(s.get("class").unwrap().as_str(), Some("positive"));
    }

    #[test]
    fn test_get_path_through_sections_and_lists() {
        let runner = section("runner", vec![("output", Value::String("series".into()))]);
        let main = Value::Section(section(
            "main",
            vec![("runners", Value::List(vec![Value::Section(runner)]))],
        ));

        assert_eq!(
            main.get_path("runners[0].output").unwrap().as_str(),
            Some("series")
        );
        assert!(main.get_path("runners[1]").is_err());
        assert!(main.get_path("runners[0].missing").is_err());
    }

    #[test]
    fn test_same_instance() {
        let shared = section("vocab", vec![]);
        let a = Value::Section(Arc::clone(&shared));
        let b = Value::Section(Arc::clone(&shared));
        let copy = Value::Section(Arc::new((*shared).clone()));

        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&copy));
        assert_eq!(a, copy);
    }

    #[test]
    fn test_host_style_display() {
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Float(-0.0).to_string(), "-0.0");
        assert_eq!(Value::Float(0.0001).to_string(), "0.0001");
        assert_eq!(Value::Float(1e-5).to_string(), "1e-05");
        assert_eq!(Value::Float(1.5e-8).to_string(), "1.5e-08");
        assert_eq!(Value::Float(1e15).to_string(), "1000000000000000.0");
        assert_eq!(Value::Float(1e16).to_string(), "1e+16");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(
            Value::List(vec![Value::Integer(1), Value::String("a".into())]).to_string(),
            "[1, 'a']"
        );
        assert_eq!(Value::Tuple(vec![Value::Integer(1)]).to_string(), "(1,)");
        assert_eq!(Value::String("plain".into()).to_string(), "plain");
    }

    #[test]
    fn test_raw_display_round_trips_literals() {
        let value = RawValue::List(vec![
            RawValue::Tuple(vec![
                RawValue::String("say \"hi\"".into()),
                RawValue::Symbol("evaluators.BLEU".into()),
            ]),
            RawValue::Float(1.0),
            RawValue::Reference("encoder".into()),
            RawValue::Variable("rnn_size".into()),
        ]);

        assert_eq!(
            value.to_string(),
            r#"[("say \"hi\"", evaluators.BLEU), 1.0, <encoder>, $rnn_size]"#
        );
    }

    #[test]
    fn test_serialize_section_emits_class_first() {
        let value = Value::Section(section(
            "decoder",
            vec![
                ("dropout", Value::Float(0.5)),
                ("class", Value::Symbol("decoders.Decoder".into())),
            ],
        ));

        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"class":"decoders.Decoder","dropout":0.5}"#);
    }
}
