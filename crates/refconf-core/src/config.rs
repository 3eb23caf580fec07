//! Main Config type for refconf
//!
//! [`Config`] is the resolved graph handed to the host: every section with
//! its references replaced by shared section instances, plus the resolved
//! `vars`. [`ConfigOptions`] controls how a document gets there.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::sync::Arc;

use crate::document::VARS_SECTION;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::resolver::RuntimeTokens;
use crate::schema::Schema;
use crate::value::{parse_path, PathSegment, ResolvedSection, Value};

/// What to do when a key or section header appears twice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateKeyPolicy {
    /// Reject the document
    #[default]
    Error,
    /// Keep the last value (a repeated section merges into the first) and warn
    Overwrite,
}

/// Whether a `vars` entry may refer to another `vars` entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VarChaining {
    #[default]
    Allow,
    /// Reject a variable that uses another one, either directly or through
    /// a section it references
    Deny,
}

/// Configuration options for loading configs
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Handling of repeated keys and section headers
    pub duplicate_keys: DuplicateKeyPolicy,
    /// Whether variables may reference other variables
    pub var_chaining: VarChaining,
    /// Host-provided interpolation tokens
    pub runtime_tokens: RuntimeTokens,
    /// `section.key=value` assignments applied before resolution
    pub overrides: Vec<String>,
    /// Section the host starts instantiation from
    pub entry_point: Option<String>,
    /// Schema to validate and coerce against after resolution
    pub schema: Option<Schema>,
}

impl ConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicate_keys(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_keys = policy;
        self
    }

    pub fn with_var_chaining(mut self, chaining: VarChaining) -> Self {
        self.var_chaining = chaining;
        self
    }

    pub fn with_runtime_tokens(mut self, tokens: RuntimeTokens) -> Self {
        self.runtime_tokens = tokens;
        self
    }

    /// Add one `section.key=value` override
    pub fn with_override(mut self, text: impl Into<String>) -> Self {
        self.overrides.push(text.into());
        self
    }

    pub fn with_entry_point(mut self, section: impl Into<String>) -> Self {
        self.entry_point = Some(section.into());
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// The resolved configuration graph
///
/// Sections keep document order. A section referenced from several places
/// is a single `Arc<ResolvedSection>`, so identity is observable through
/// [`Value::same_instance`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    vars: IndexMap<String, Value>,
    sections: IndexMap<String, Arc<ResolvedSection>>,
    resolution_order: Vec<String>,
}

impl Config {
    pub(crate) fn from_parts(
        vars: IndexMap<String, Value>,
        sections: IndexMap<String, Arc<ResolvedSection>>,
        resolution_order: Vec<String>,
    ) -> Self {
        Self {
            vars,
            sections,
            resolution_order,
        }
    }

    /// Parse and resolve a document with default options
    pub fn load(source: &str) -> Result<Self> {
        Self::load_with_options(source, ConfigOptions::default())
    }

    /// Parse and resolve a document
    pub fn load_with_options(source: &str, options: ConfigOptions) -> Result<Self> {
        Pipeline::new(source, options).run()
    }

    /// A resolved section by name
    pub fn section(&self, name: &str) -> Option<&Arc<ResolvedSection>> {
        self.sections.get(name)
    }

    /// All resolved sections in document order (`vars` excluded)
    pub fn sections(&self) -> impl Iterator<Item = &Arc<ResolvedSection>> {
        self.sections.values()
    }

    /// Resolved `vars` entries in document order
    pub fn vars(&self) -> &IndexMap<String, Value> {
        &self.vars
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Section names in the order they were resolved (dependencies first)
    pub fn resolution_order(&self) -> &[String] {
        &self.resolution_order
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Get a value by path
    ///
    /// The first segment names a section (or `vars`); the rest walks keys,
    /// embedded sections and list/tuple indices, e.g. `main.runners[0].output`.
    pub fn get(&self, path: &str) -> Result<Value> {
        let segments = parse_path(path)?;
        let Some((PathSegment::Key(head), rest)) = segments.split_first() else {
            return Err(Error::unknown_reference(path)
                .with_cause("Path must start with a section name"));
        };

        if let Some(section) = self.sections.get(head.as_str()) {
            if rest.is_empty() {
                return Ok(Value::Section(Arc::clone(section)));
            }
            return section.get_segments(rest, path).cloned();
        }

        if head == VARS_SECTION {
            if let Some((PathSegment::Key(name), rest)) = rest.split_first() {
                let value = self
                    .vars
                    .get(name.as_str())
                    .ok_or_else(|| Error::unknown_variable(name.as_str()).with_path(path))?;
                return value.get_segments(rest, path).cloned();
            }
        }

        Err(Error::unknown_reference(head.as_str()).with_path(path))
    }

    /// Get a string value
    pub fn get_str(&self, path: &str) -> Result<String> {
        match self.get(path)? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(path, "string", &other)),
        }
    }

    /// Get an integer value
    pub fn get_i64(&self, path: &str) -> Result<i64> {
        let value = self.get(path)?;
        value
            .as_i64()
            .ok_or_else(|| mismatch(path, "integer", &value))
    }

    /// Get a float value (integers are widened)
    pub fn get_f64(&self, path: &str) -> Result<f64> {
        let value = self.get(path)?;
        value.as_f64().ok_or_else(|| mismatch(path, "float", &value))
    }

    /// Get a boolean value
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get(path)?;
        value.as_bool().ok_or_else(|| mismatch(path, "bool", &value))
    }

    /// Sections (document order) that `entry` does not reach through
    /// references
    pub fn unreachable_from(&self, entry: &str) -> Result<Vec<&str>> {
        let root = self
            .sections
            .get(entry)
            .ok_or_else(|| Error::unknown_reference(entry))?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&ResolvedSection> = vec![root.as_ref()];
        seen.insert(root.name());

        while let Some(section) = stack.pop() {
            let mut names = Vec::new();
            for value in section.entries().values() {
                value.collect_section_names(&mut names);
            }
            for name in names {
                if seen.insert(name) {
                    if let Some(next) = self.sections.get(name) {
                        stack.push(next.as_ref());
                    }
                }
            }
        }

        Ok(self
            .sections
            .keys()
            .map(String::as_str)
            .filter(|name| !seen.contains(name))
            .collect())
    }

    /// Export the configuration as JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize as JSON: {}", e)))
    }

    /// Export the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::internal(format!("Failed to serialize as YAML: {}", e)))
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> Error {
    let (section, key) = path.split_once('.').unwrap_or((path, ""));
    Error::type_mismatch(section, key, expected, value.type_name()).with_path(path)
}

/// Serializes as `{vars: {...}, <section>: {...}, ...}`; embedded sections
/// are written out in full at every reference
impl Serialize for Config {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let has_vars = !self.vars.is_empty();
        let mut map = serializer.serialize_map(Some(self.sections.len() + usize::from(has_vars)))?;
        if has_vars {
            map.serialize_entry(VARS_SECTION, &self.vars)?;
        }
        for (name, section) in &self.sections {
            map.serialize_entry(name, section.as_ref())?;
        }
        map.end()
    }
}
