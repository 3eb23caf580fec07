//! Forward-only resolution pipeline
//!
//! `Unparsed → Parsed → Resolving → Resolved | Failed`. A step called out of
//! order fails with [`ErrorKind::InvalidStage`](crate::ErrorKind). Once
//! `Failed`, every step returns the first error again.

use std::fmt;

use crate::config::{Config, ConfigOptions};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::parser;
use crate::resolver::Resolver;

/// Where a [`Pipeline`] currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unparsed,
    Parsed,
    Resolving,
    Resolved,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Unparsed => "unparsed",
            Stage::Parsed => "parsed",
            Stage::Resolving => "resolving",
            Stage::Resolved => "resolved",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives one document from source text to a resolved [`Config`]
#[derive(Debug)]
pub struct Pipeline {
    source: String,
    options: ConfigOptions,
    stage: Stage,
    document: Option<Document>,
    config: Option<Config>,
    error: Option<Error>,
}

impl Pipeline {
    pub fn new(source: impl Into<String>, options: ConfigOptions) -> Self {
        Self {
            source: source.into(),
            options,
            stage: Stage::Unparsed,
            document: None,
            config: None,
            error: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The parsed document (with overrides applied), once parsing succeeded
    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// The resolved configuration, once resolution succeeded
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// The error that moved the pipeline to `Failed`
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Parse the source and apply overrides
    pub fn parse(&mut self) -> Result<&Document> {
        self.expect_stage(Stage::Unparsed)?;

        let parsed = parser::parse_with_policy(&self.source, self.options.duplicate_keys)
            .and_then(|mut document| {
                for text in &self.options.overrides {
                    document.apply_override(text)?;
                }
                Ok(document)
            });

        match parsed {
            Ok(document) => {
                self.transition(Stage::Parsed);
                let document = self.document.insert(document);
                Ok(&*document)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Resolve the parsed document, then apply the schema and entry point
    /// checks if configured
    pub fn resolve(&mut self) -> Result<&Config> {
        self.expect_stage(Stage::Parsed)?;
        self.transition(Stage::Resolving);

        let resolved = match &self.document {
            Some(document) => self.resolve_document(document),
            None => Err(Error::internal("parsed pipeline has no document")),
        };

        match resolved {
            Ok(config) => {
                self.transition(Stage::Resolved);
                let config = self.config.insert(config);
                Ok(&*config)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Run every remaining step and hand back the resolved configuration
    pub fn run(mut self) -> Result<Config> {
        if self.stage == Stage::Unparsed {
            self.parse()?;
        }
        if self.stage == Stage::Parsed {
            self.resolve()?;
        }
        self.expect_stage(Stage::Resolved)?;
        self.config
            .take()
            .ok_or_else(|| Error::internal("resolved pipeline has no config"))
    }

    fn resolve_document(&self, document: &Document) -> Result<Config> {
        let mut config = Resolver::new(document, &self.options).resolve()?;

        if let Some(schema) = &self.options.schema {
            config = schema.apply(&config)?;
        }

        if let Some(entry) = &self.options.entry_point {
            for name in config.unreachable_from(entry)? {
                log::warn!("Section [{}] is not reachable from [{}]", name, entry);
            }
        }

        Ok(config)
    }

    fn expect_stage(&self, expected: Stage) -> Result<()> {
        if self.stage == Stage::Failed {
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
        }
        if self.stage != expected {
            return Err(Error::invalid_stage(expected.to_string(), self.stage.to_string()));
        }
        Ok(())
    }

    fn transition(&mut self, next: Stage) {
        log::debug!("Pipeline {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn fail(&mut self, err: Error) -> Error {
        self.transition(Stage::Failed);
        self.error = Some(err.clone());
        err
    }
}
