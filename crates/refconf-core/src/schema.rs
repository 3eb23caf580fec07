//! Schema validation and coercion for resolved configuration
//!
//! A schema declares the expected type of each key, per section name or per
//! class symbol:
//!
//! ```yaml
//! sections:
//!   main:
//!     keys:
//!       epochs: integer
//!       runners: {list: section}
//!     required: [epochs]
//! classes:
//!   decoders.Decoder:
//!     keys:
//!       dropout_keep_prob: float
//!       cell: {enum: [GRU, LSTM]}
//!     deny_unknown: true
//! ```
//!
//! Only two coercions exist: integer to float, and a string (or symbol) to a
//! member of a declared enum. Validation stops at the first failure in
//! document order.

use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::value::{ResolvedSection, Value, CLASS_KEY};

/// Expected type of a value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Any,
    None,
    Bool,
    Integer,
    Float,
    String,
    Symbol,
    Section,
    /// A string from a closed set
    Enum(Vec<String>),
    List(Box<ValueType>),
    /// Fixed arity, one type per position
    Tuple(Vec<ValueType>),
    Optional(Box<ValueType>),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "any"),
            ValueType::None => write!(f, "none"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Float => write!(f, "float"),
            ValueType::String => write!(f, "string"),
            ValueType::Symbol => write!(f, "symbol"),
            ValueType::Section => write!(f, "section"),
            ValueType::Enum(members) => write!(f, "one of [{}]", members.join(", ")),
            ValueType::List(item) => write!(f, "list of {}", item),
            ValueType::Tuple(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "tuple ({})", items.join(", "))
            }
            ValueType::Optional(inner) => write!(f, "optional {}", inner),
        }
    }
}

/// Declared keys of one section or class
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SectionSchema {
    /// Expected type per key
    pub keys: IndexMap<String, ValueType>,
    /// Keys that must be present
    pub required: Vec<String>,
    /// Reject keys not listed in `keys`
    pub deny_unknown: bool,
}

/// Schema for validating configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Schema {
    /// Schemas by section name
    pub sections: IndexMap<String, SectionSchema>,
    /// Schemas by class symbol, used when no section schema matches
    pub classes: IndexMap<String, SectionSchema>,
}

impl Schema {
    /// Load a schema from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::invalid_schema(format!("Invalid JSON schema: {}", e)))
    }

    /// Load a schema from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // Through serde_json so that `{list: float}` maps read as enum variants
        let value: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::invalid_schema(format!("Invalid YAML schema: {}", e)))?;
        serde_json::from_value(value)
            .map_err(|e| Error::invalid_schema(format!("Invalid YAML schema: {}", e)))
    }

    /// The schema governing `section`: by name first, then by class
    pub fn schema_for(&self, section: &ResolvedSection) -> Option<&SectionSchema> {
        self.sections.get(section.name()).or_else(|| {
            section
                .class()
                .and_then(|class| self.classes.get(class))
        })
    }

    /// Validate `config` and return a coerced copy
    ///
    /// Sections are rebuilt in resolution order so every reference to a
    /// section points at its single coerced instance.
    pub fn apply(&self, config: &Config) -> Result<Config> {
        log::debug!("Applying schema to {} sections", config.len());

        let mut coerced: IndexMap<String, IndexMap<String, Value>> = IndexMap::new();
        for section in config.sections() {
            let entries = match self.schema_for(section) {
                Some(schema) => check_section(section, schema)?,
                None => section.entries().clone(),
            };
            coerced.insert(section.name().to_string(), entries);
        }

        let mut rebuilt: IndexMap<String, Arc<ResolvedSection>> = IndexMap::new();
        for name in config.resolution_order() {
            let (Some(original), Some(entries)) = (config.section(name), coerced.get(name)) else {
                return Err(Error::internal(format!("section {} missing from schema pass", name)));
            };
            let relink = |s: &Arc<ResolvedSection>| -> Result<Arc<ResolvedSection>> {
                rebuilt.get(s.name()).cloned().ok_or_else(|| {
                    Error::internal(format!("section {} rebuilt out of order", s.name()))
                })
            };
            let entries = entries
                .iter()
                .map(|(key, value)| -> Result<(String, Value)> {
                    Ok((key.clone(), value.map_sections(&relink)?))
                })
                .collect::<Result<IndexMap<_, _>>>()?;
            let section = ResolvedSection::from_parts(
                name.clone(),
                original.class().map(str::to_string),
                entries,
            );
            rebuilt.insert(name.clone(), Arc::new(section));
        }

        let relink = |s: &Arc<ResolvedSection>| -> Result<Arc<ResolvedSection>> {
            rebuilt
                .get(s.name())
                .cloned()
                .ok_or_else(|| Error::internal(format!("section {} was not rebuilt", s.name())))
        };
        let vars = config
            .vars()
            .iter()
            .map(|(key, value)| -> Result<(String, Value)> {
                Ok((key.clone(), value.map_sections(&relink)?))
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        let sections = config
            .sections()
            .map(|s| relink(s).map(|section| (s.name().to_string(), section)))
            .collect::<Result<IndexMap<_, _>>>()?;

        Ok(Config::from_parts(
            vars,
            sections,
            config.resolution_order().to_vec(),
        ))
    }
}

/// Check one section against its schema, returning coerced entries
fn check_section(section: &ResolvedSection, schema: &SectionSchema) -> Result<IndexMap<String, Value>> {
    let name = section.name();

    // The lifted class counts as a `class` key
    if let (Some(class), Some(expected)) = (section.class(), schema.keys.get(CLASS_KEY)) {
        let class = Value::Symbol(class.to_string());
        if coerce(expected, &class).is_none() {
            return Err(Error::type_mismatch(
                name,
                CLASS_KEY,
                expected.to_string(),
                describe(&class),
            ));
        }
    }

    for key in &schema.required {
        let lifted = key == CLASS_KEY && section.class().is_some();
        if !lifted && section.get(key).is_none() {
            let expected = schema
                .keys
                .get(key)
                .map_or_else(|| "a value".to_string(), ToString::to_string);
            return Err(Error::type_mismatch(name, key, expected, "missing"));
        }
    }

    let mut entries = IndexMap::with_capacity(section.len());
    for (key, value) in section.entries() {
        let value = match schema.keys.get(key) {
            Some(expected) => coerce(expected, value).ok_or_else(|| {
                Error::type_mismatch(name, key, expected.to_string(), describe(value))
            })?,
            None if schema.deny_unknown => {
                return Err(Error::type_mismatch(name, key, "no value", describe(value))
                    .with_help(format!("[{}] does not declare '{}'", name, key)));
            }
            None => value.clone(),
        };
        entries.insert(key.clone(), value);
    }
    Ok(entries)
}

/// The coerced value, or `None` if `value` does not fit `expected`
fn coerce(expected: &ValueType, value: &Value) -> Option<Value> {
    match (expected, value) {
        (ValueType::Any, v) => Some(v.clone()),
        (ValueType::None, Value::None)
        | (ValueType::Bool, Value::Bool(_))
        | (ValueType::Integer, Value::Integer(_))
        | (ValueType::Float, Value::Float(_))
        | (ValueType::String, Value::String(_))
        | (ValueType::Symbol, Value::Symbol(_))
        | (ValueType::Section, Value::Section(_)) => Some(value.clone()),
        (ValueType::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
        (ValueType::Enum(members), Value::String(s) | Value::Symbol(s)) => members
            .iter()
            .any(|m| m == s)
            .then(|| Value::String(s.clone())),
        (ValueType::List(item), Value::List(items)) => items
            .iter()
            .map(|v| coerce(item, v))
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        (ValueType::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => types
            .iter()
            .zip(items)
            .map(|(t, v)| coerce(t, v))
            .collect::<Option<Vec<_>>>()
            .map(Value::Tuple),
        (ValueType::Optional(_), Value::None) => Some(Value::None),
        (ValueType::Optional(inner), v) => coerce(inner, v),
        _ => None,
    }
}

/// Actual-type description for mismatch errors
fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("string '{}'", s),
        Value::Tuple(items) => format!("tuple of {}", items.len()),
        other => other.type_name().to_string(),
    }
}
