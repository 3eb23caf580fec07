//! refconf-core: Resolver for reference-based experiment configuration
//!
//! A configuration document is a set of `[section]` blocks of `key=value`
//! lines. Values may reference whole sections (`<name>`), alias variables
//! from the `[vars]` section (`$name`), or interpolate them into strings
//! (`"{name:.2f}"`). This crate parses such a document and resolves it into
//! an acyclic graph of shared sections for the host to instantiate.
//!
//! # Example
//!
//! ```rust
//! use refconf_core::{Config, Value};
//!
//! let source = r#"
//! [vars]
//! dropout=0.5
//!
//! [main]
//! name="dropout {dropout:.2f}"
//! decoder=<decoder>
//!
//! [decoder]
//! class=decoders.Decoder
//! dropout_keep_prob=$dropout
//! "#;
//!
//! let config = Config::load(source).unwrap();
//! assert_eq!(config.get_str("main.name").unwrap(), "dropout 0.50");
//! assert_eq!(config.get("main.decoder.dropout_keep_prob").unwrap(), Value::Float(0.5));
//! assert_eq!(config.section("decoder").unwrap().class(), Some("decoders.Decoder"));
//! ```

pub mod document;
pub mod error;
pub mod interpolation;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod value;

mod config;

pub use config::{Config, ConfigOptions, DuplicateKeyPolicy, VarChaining};
pub use document::Document;
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Pipeline, Stage};
pub use resolver::{Resolver, RuntimeTokens};
pub use schema::{Schema, SectionSchema, ValueType};
pub use value::{RawValue, ResolvedSection, Value};
