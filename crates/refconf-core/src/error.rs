//! Error types for refconf
//!
//! Every error carries enough context (section, key, line) to locate the
//! fault in the source text, plus an actionable help message where one
//! exists. All errors are fatal to the resolution pipeline.

use std::fmt;

/// Result type alias for refconf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for refconf operations
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Location in the document where the error occurred (e.g., "encoder.dropout")
    pub path: Option<String>,
    /// Source position if available
    pub source_location: Option<SourceLocation>,
    /// Actionable help message
    pub help: Option<String>,
    /// Additional detail (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Position in the source text (1-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: Option<usize>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    /// Malformed grammar
    #[error("Syntax error at {line}:{column} near {token}")]
    Syntax {
        line: usize,
        column: usize,
        token: String,
    },
    /// A `<name>` with no matching section
    #[error("Unknown section reference: <{name}>")]
    UnknownReference { name: String },
    /// A `$name` or `{name}` with no matching variable or runtime token
    #[error("Unknown variable: {name}")]
    UnknownVariable { name: String },
    /// Dependency cycle between sections and/or variables
    #[error("Circular reference detected: {}", .members.join(" → "))]
    Cycle { members: Vec<String> },
    /// Value does not match the declared schema type
    #[error("Type mismatch in [{section}] {key}: expected {expected}, got {actual}")]
    TypeMismatch {
        section: String,
        key: String,
        expected: String,
        actual: String,
    },
    /// The same key appears twice in one section
    #[error("Duplicate key '{key}' in section [{section}]")]
    DuplicateKey { section: String, key: String },
    /// The same section header appears twice
    #[error("Duplicate section [{name}]")]
    DuplicateSection { name: String },
    /// A variable refers to another variable while chaining is denied
    #[error("Variable '{var}' refers to variable '{referenced}'")]
    VariableChain { var: String, referenced: String },
    /// A format spec that cannot be applied to the value
    #[error("Cannot format placeholder '{placeholder}'")]
    Format { placeholder: String },
    /// A malformed `section.key=value` override
    #[error("Invalid override: {text}")]
    InvalidOverride { text: String },
    /// A schema document that cannot be loaded
    #[error("Invalid schema")]
    InvalidSchema,
    /// A pipeline step was called out of order
    #[error("Pipeline is {actual}, expected {expected}")]
    InvalidStage { expected: String, actual: String },
    /// Internal error (bug in refconf)
    #[error("Internal error")]
    Internal,
}

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            source_location: None,
            help: None,
            cause: None,
        }
    }

    /// Create a syntax error at the given position
    pub fn syntax(
        line: usize,
        column: usize,
        token: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::from_kind(ErrorKind::Syntax {
            line,
            column,
            token: token.into(),
        });
        err.cause = Some(message.into());
        err
    }

    /// Create an unknown reference error
    pub fn unknown_reference(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut err = Self::from_kind(ErrorKind::UnknownReference { name: name.clone() });
        err.help = Some(format!(
            "Add a [{}] section or fix the reference name",
            name
        ));
        err
    }

    /// Create an unknown variable error
    pub fn unknown_variable(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut err = Self::from_kind(ErrorKind::UnknownVariable { name: name.clone() });
        err.help = Some(format!(
            "Define '{}' in the [vars] section or pass it as a runtime token",
            name
        ));
        err
    }

    /// Create a cycle error naming every member of the cycle
    pub fn cycle(members: Vec<String>) -> Self {
        let mut err = Self::from_kind(ErrorKind::Cycle { members });
        err.help = Some("Break the circular dependency by removing one of the references".into());
        err
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        section: impl Into<String>,
        key: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let section = section.into();
        let key = key.into();
        let expected = expected.into();
        let mut err = Self::from_kind(ErrorKind::TypeMismatch {
            section: section.clone(),
            key: key.clone(),
            expected: expected.clone(),
            actual: actual.into(),
        });
        err.path = Some(format!("{}.{}", section, key));
        err.help = Some(format!("Change the value to {}", expected));
        err
    }

    /// Create a duplicate key error
    pub fn duplicate_key(section: impl Into<String>, key: impl Into<String>) -> Self {
        let section = section.into();
        let key = key.into();
        let mut err = Self::from_kind(ErrorKind::DuplicateKey {
            section: section.clone(),
            key: key.clone(),
        });
        err.path = Some(format!("{}.{}", section, key));
        err.help = Some("Remove one of the definitions or allow overwriting duplicates".into());
        err
    }

    /// Create a duplicate section error
    pub fn duplicate_section(name: impl Into<String>) -> Self {
        let mut err = Self::from_kind(ErrorKind::DuplicateSection { name: name.into() });
        err.help = Some("Merge the two sections or allow overwriting duplicates".into());
        err
    }

    /// Create a variable chaining error
    pub fn variable_chain(var: impl Into<String>, referenced: impl Into<String>) -> Self {
        let var = var.into();
        let mut err = Self::from_kind(ErrorKind::VariableChain {
            var: var.clone(),
            referenced: referenced.into(),
        });
        err.path = Some(format!("vars.{}", var));
        err.help = Some("Inline the value or enable variable chaining".into());
        err
    }

    /// Create a format error
    pub fn format(placeholder: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::from_kind(ErrorKind::Format {
            placeholder: placeholder.into(),
        });
        err.cause = Some(message.into());
        err
    }

    /// Create an invalid override error
    pub fn invalid_override(text: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::from_kind(ErrorKind::InvalidOverride { text: text.into() });
        err.cause = Some(message.into());
        err.help = Some("Overrides have the form section.key=value".into());
        err
    }

    /// Create an invalid schema error
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        let mut err = Self::from_kind(ErrorKind::InvalidSchema);
        err.cause = Some(message.into());
        err
    }

    /// Create an invalid stage error
    pub fn invalid_stage(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::InvalidStage {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Create an internal error (bug in refconf)
    pub fn internal(message: impl Into<String>) -> Self {
        let mut err = Self::from_kind(ErrorKind::Internal);
        err.help = Some("This is likely a bug in refconf. Please report it.".into());
        err.cause = Some(message.into());
        err
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add path context only if none is set yet
    pub fn or_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Add a source line to the error (syntax errors already carry one)
    pub fn with_line(mut self, line: usize) -> Self {
        if !matches!(self.kind, ErrorKind::Syntax { .. }) && self.source_location.is_none() {
            self.source_location = Some(SourceLocation { line, column: None });
        }
        self
    }

    /// Add source location to the error
    pub fn with_source_location(mut self, loc: SourceLocation) -> Self {
        self.source_location = Some(loc);
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add detail to the error
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(loc) = &self.source_location {
            write!(f, "\n  Line: {}", loc.line)?;
            if let Some(column) = loc.column {
                write!(f, ":{}", column)?;
            }
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = Error::syntax(3, 7, "'@'", "expected a value");
        let display = format!("{}", err);

        assert!(display.contains("Syntax error at 3:7 near '@'"));
        assert!(display.contains("expected a value"));
    }

    #[test]
    fn test_cycle_error_display() {
        let err = Error::cycle(vec!["a".into(), "b".into(), "a".into()]);
        let display = format!("{}", err);

        assert!(display.contains("Circular reference detected"));
        assert!(display.contains("a → b → a"));
        assert!(display.contains("Help:"));
    }

    #[test]
    fn test_unknown_reference_error() {
        let err = Error::unknown_reference("missing_section").with_path("main.encoder");
        let display = format!("{}", err);

        assert!(display.contains("Unknown section reference: <missing_section>"));
        assert!(display.contains("Path: main.encoder"));
        assert!(display.contains("Add a [missing_section] section"));
    }

    #[test]
    fn test_unknown_variable_error() {
        let err = Error::unknown_variable("rnn_size");

        assert_eq!(
            err.kind,
            ErrorKind::UnknownVariable {
                name: "rnn_size".into()
            }
        );
        assert!(err.to_string().contains("[vars]"));
    }

    #[test]
    fn test_type_mismatch_sets_path() {
        let err = Error::type_mismatch("decoder", "dropout", "float", "string");
        let display = format!("{}", err);

        assert_eq!(err.path, Some("decoder.dropout".into()));
        assert!(display.contains("expected float, got string"));
    }

    #[test]
    fn test_with_line_skips_syntax_errors() {
        let err = Error::syntax(1, 1, "x", "bad").with_line(10);
        assert!(err.source_location.is_none());

        let err = Error::unknown_variable("x").with_line(10);
        assert_eq!(
            err.source_location,
            Some(SourceLocation {
                line: 10,
                column: None
            })
        );
        assert!(err.to_string().contains("Line: 10"));
    }

    #[test]
    fn test_or_path_keeps_existing() {
        let err = Error::duplicate_key("main", "output").or_path("other.key");
        assert_eq!(err.path, Some("main.output".into()));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("Unexpected state");
        let display = format!("{}", err);

        assert!(display.contains("Internal error"));
        assert!(display.contains("Unexpected state"));
    }
}
