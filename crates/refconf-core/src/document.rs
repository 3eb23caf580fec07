//! Parsed document model
//!
//! A [`Document`] is an ordered set of named [`Section`]s, each an ordered
//! mapping of keys to [`RawValue`]s. It is immutable once parsing (and
//! override application) has finished.

use indexmap::IndexMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::parser;
use crate::value::RawValue;

/// The reserved section holding substitution variables
pub const VARS_SECTION: &str = "vars";

/// A single `key=value` line
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: RawValue,
    /// 1-based line the entry starts on (0 for entries added by overrides)
    pub line: usize,
}

/// Entries compare by value only; line numbers are bookkeeping
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// A named block of entries
#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    line: usize,
    entries: IndexMap<String, Entry>,
}

impl PartialEq for Section {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.entries == other.entries
    }
}

impl Section {
    pub(crate) fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
            entries: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line of the section header
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &IndexMap<String, Entry> {
        &self.entries
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an entry, returning the previous one if the key existed
    pub(crate) fn insert(&mut self, key: impl Into<String>, entry: Entry) -> Option<Entry> {
        self.entries.insert(key.into(), entry)
    }
}

/// A parsed configuration document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    sections: IndexMap<String, Section>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document with the default (strict) duplicate policy
    pub fn parse(input: &str) -> Result<Self> {
        parser::parse(input)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn contains_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// All sections in document order, including `vars`
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    /// The `vars` section, if present
    pub fn vars(&self) -> Option<&Section> {
        self.sections.get(VARS_SECTION)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub(crate) fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.get_mut(name)
    }

    pub(crate) fn push_section(&mut self, section: Section) {
        self.sections.insert(section.name.clone(), section);
    }

    /// Apply a `section.key=value` override
    ///
    /// The value uses the same grammar as the document. The target section
    /// must exist, except for `vars` which is created on demand.
    pub fn apply_override(&mut self, text: &str) -> Result<()> {
        let (target, value_text) = text
            .split_once('=')
            .ok_or_else(|| Error::invalid_override(text, "Missing '='"))?;
        let (section_name, key) = target
            .trim()
            .split_once('.')
            .ok_or_else(|| Error::invalid_override(text, "Target must be section.key"))?;

        if section_name.is_empty() || key.is_empty() || !parser::is_identifier(key) {
            return Err(Error::invalid_override(text, "Target must be section.key"));
        }

        let value = parser::parse_value(value_text)
            .map_err(|e| Error::invalid_override(text, e.to_string()))?;

        if section_name == VARS_SECTION && !self.contains_section(VARS_SECTION) {
            self.sections
                .insert(VARS_SECTION.to_string(), Section::new(VARS_SECTION, 0));
        }

        let section = self
            .sections
            .get_mut(section_name)
            .ok_or_else(|| Error::unknown_reference(section_name).with_path(target.trim()))?;

        log::debug!("Override {}.{} = {}", section_name, key, value);
        section.insert(key, Entry { value, line: 0 });
        Ok(())
    }
}

/// Serializes the document back into source text
impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for (key, entry) in &section.entries {
                writeln!(f, "{}={}", key, entry.value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"
[vars]
prefix="exp"
drop_keep_p=0.5

[encoder]
class=encoders.SentenceEncoder
rnn_size=256
dropout_keep_prob=$drop_keep_p
data_id="source"

[main]
encoders=[<encoder>]
output="{prefix}-out"
"#;

    #[test]
    fn test_reserialize_is_idempotent() {
        let doc = Document::parse(SOURCE).unwrap();
        let text = doc.to_string();
        let reparsed = Document::parse(&text).unwrap();

        assert_eq!(doc, reparsed);
        assert_eq!(reparsed.to_string(), text);
    }

    #[test]
    fn test_override_existing_key() {
        let mut doc = Document::parse(SOURCE).unwrap();
        doc.apply_override("encoder.rnn_size=512").unwrap();

        let entry = doc.section("encoder").unwrap().get("rnn_size").unwrap();
        assert_eq!(entry.value, RawValue::Integer(512));
        assert_eq!(entry.line, 0);
    }

    #[test]
    fn test_override_adds_new_key_with_grammar() {
        let mut doc = Document::parse(SOURCE).unwrap();
        doc.apply_override("main.runners=[<encoder>, $drop_keep_p]")
            .unwrap();

        assert_eq!(
            doc.section("main").unwrap().get("runners").unwrap().value,
            RawValue::List(vec![
                RawValue::Reference("encoder".into()),
                RawValue::Variable("drop_keep_p".into()),
            ])
        );
    }

    #[test]
    fn test_override_creates_vars_section() {
        let mut doc = Document::parse("[main]\nx=$y\n").unwrap();
        doc.apply_override("vars.y=3").unwrap();

        assert_eq!(
            doc.vars().unwrap().get("y").unwrap().value,
            RawValue::Integer(3)
        );
    }

    #[test]
    fn test_override_unknown_section_fails() {
        let mut doc = Document::parse(SOURCE).unwrap();
        let err = doc.apply_override("decoder.beam=5").unwrap_err();

        assert_eq!(
            err.kind,
            ErrorKind::UnknownReference {
                name: "decoder".into()
            }
        );
    }

    #[test]
    fn test_override_malformed() {
        let mut doc = Document::parse(SOURCE).unwrap();

        for text in ["main.output", "output=1", "main.=1", "main.x=unquoted"] {
            let err = doc.apply_override(text).unwrap_err();
            assert!(
                matches!(err.kind, ErrorKind::InvalidOverride { .. }),
                "{} should be rejected, got {}",
                text,
                err
            );
        }
    }
}
