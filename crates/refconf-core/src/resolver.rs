//! Reference and variable resolution
//!
//! Resolution runs in three steps:
//! 1. Build a dependency graph whose nodes are `vars` entries and sections.
//!    Every `<ref>`, `$alias` and `{placeholder}` adds an edge; unknown
//!    targets fail here, in document order.
//! 2. Order the graph with an iterative depth-first search. Meeting a node
//!    that is still on the stack is a cycle.
//! 3. Resolve nodes in that order, so every dependency is already
//!    materialized. Each section is built once and shared through an `Arc`.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, ConfigOptions, VarChaining};
use crate::document::{Document, Entry, VARS_SECTION};
use crate::error::{Error, Result};
use crate::interpolation::Template;
use crate::value::{RawValue, ResolvedSection, Value};

/// Name of the current-time runtime token
pub const TIME_TOKEN: &str = "TIME";

/// Format of the current-time runtime token
pub const TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Host-provided interpolation tokens
///
/// Tokens are usable in `{placeholders}` exactly like `vars` entries, but
/// are not declared in the document and cannot be aliased with `$name`.
/// A `vars` entry with the same name wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeTokens {
    tokens: IndexMap<String, Value>,
}

impl RuntimeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens containing `TIME`, the local time formatted as
    /// `%Y-%m-%d-%H-%M-%S`
    pub fn with_current_time() -> Self {
        Self::new().with(
            TIME_TOKEN,
            chrono::Local::now().format(TIME_FORMAT).to_string(),
        )
    }

    /// Add a token (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tokens.insert(name.into(), Value::String(value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.tokens.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tokens.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A node of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Var(String),
    Section(String),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Var(name) => write!(f, "${}", name),
            Node::Section(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Sections and variables with their dependency edges, in document order
#[derive(Debug, Default)]
struct Graph {
    nodes: Vec<Node>,
    index: HashMap<Node, usize>,
    edges: Vec<Vec<usize>>,
}

impl Graph {
    fn add_node(&mut self, node: Node) {
        self.index.insert(node.clone(), self.nodes.len());
        self.nodes.push(node);
        self.edges.push(Vec::new());
    }

    fn add_edge(&mut self, from: usize, to: &Node) -> Result<()> {
        let to = *self
            .index
            .get(to)
            .ok_or_else(|| Error::internal(format!("edge to unknown node {}", to)))?;
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
        Ok(())
    }

    /// First variable other than `start` reachable from it, walking
    /// through section nodes in edge order
    fn variable_behind(&self, start: usize) -> Option<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self.edges[start].iter().rev().copied().collect();

        while let Some(node) = stack.pop() {
            if std::mem::replace(&mut seen[node], true) || node == start {
                continue;
            }
            match self.nodes[node] {
                Node::Var(_) => return Some(node),
                Node::Section(_) => stack.extend(self.edges[node].iter().rev()),
            }
        }
        None
    }

    /// Dependencies-first order; fails on the first cycle met
    fn topological_order(&self) -> Result<Vec<usize>> {
        let mut marks = vec![Mark::New; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::New {
                continue;
            }
            marks[root] = Mark::Active;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(&dep) = self.edges[node].get(frame.1) {
                    frame.1 += 1;
                    match marks[dep] {
                        Mark::New => {
                            marks[dep] = Mark::Active;
                            stack.push((dep, 0));
                        }
                        Mark::Active => {
                            let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                            let mut members: Vec<String> = stack[start..]
                                .iter()
                                .map(|&(n, _)| self.nodes[n].to_string())
                                .collect();
                            members.push(self.nodes[dep].to_string());
                            return Err(Error::cycle(members));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}

/// Already-resolved values visible while resolving the next node
struct Scope<'s> {
    vars: &'s IndexMap<String, Value>,
    sections: &'s HashMap<String, Arc<ResolvedSection>>,
    tokens: &'s RuntimeTokens,
}

impl Scope<'_> {
    fn lookup(&self, name: &str) -> Result<&Value> {
        self.vars
            .get(name)
            .or_else(|| self.tokens.get(name))
            .ok_or_else(|| Error::unknown_variable(name))
    }
}

/// Resolves a parsed [`Document`] into a [`Config`]
pub struct Resolver<'a> {
    document: &'a Document,
    options: &'a ConfigOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(document: &'a Document, options: &'a ConfigOptions) -> Self {
        Self { document, options }
    }

    /// Resolve every section and variable
    pub fn resolve(&self) -> Result<Config> {
        let graph = self.build_graph()?;
        let order = graph.topological_order()?;
        log::debug!(
            "Resolving {} nodes in dependency order",
            graph.nodes.len()
        );

        let mut vars: IndexMap<String, Value> = IndexMap::new();
        let mut sections: HashMap<String, Arc<ResolvedSection>> = HashMap::new();
        let mut resolution_order = Vec::new();

        for idx in order {
            match &graph.nodes[idx] {
                Node::Var(name) => {
                    let entry = self.vars_entry(name)?;
                    let scope = Scope {
                        vars: &vars,
                        sections: &sections,
                        tokens: &self.options.runtime_tokens,
                    };
                    let value = resolve_raw(&entry.value, entry.line, &scope)
                        .map_err(|e| located(e, VARS_SECTION, name, entry.line))?;
                    log::trace!("Resolved ${} = {}", name, value);
                    vars.insert(name.clone(), value);
                }
                Node::Section(name) => {
                    let section = self.document.section(name).ok_or_else(|| {
                        Error::internal(format!("section {} vanished during resolution", name))
                    })?;
                    let scope = Scope {
                        vars: &vars,
                        sections: &sections,
                        tokens: &self.options.runtime_tokens,
                    };
                    let mut entries = IndexMap::new();
                    for (key, entry) in section.entries() {
                        let value = resolve_raw(&entry.value, entry.line, &scope)
                            .map_err(|e| located(e, name, key, entry.line))?;
                        entries.insert(key.clone(), value);
                    }
                    let resolved = Arc::new(ResolvedSection::new(name.clone(), entries));
                    log::trace!("Resolved section [{}]", name);
                    sections.insert(name.clone(), resolved);
                    resolution_order.push(name.clone());
                }
            }
        }

        // Hand back in document order
        let vars_in_order: IndexMap<String, Value> = match self.document.vars() {
            Some(section) => section
                .entries()
                .keys()
                .filter_map(|k| vars.shift_remove(k).map(|v| (k.clone(), v)))
                .collect(),
            None => IndexMap::new(),
        };
        let sections_in_order: IndexMap<String, Arc<ResolvedSection>> = self
            .document
            .sections()
            .filter(|s| s.name() != VARS_SECTION)
            .filter_map(|s| sections.remove(s.name()).map(|r| (s.name().to_string(), r)))
            .collect();

        Ok(Config::from_parts(
            vars_in_order,
            sections_in_order,
            resolution_order,
        ))
    }

    fn vars_entry(&self, name: &str) -> Result<&'a Entry> {
        self.document
            .vars()
            .and_then(|vars| vars.get(name))
            .ok_or_else(|| Error::internal(format!("variable {} vanished during resolution", name)))
    }

    fn build_graph(&self) -> Result<Graph> {
        let mut graph = Graph::default();

        if let Some(vars) = self.document.vars() {
            for key in vars.entries().keys() {
                graph.add_node(Node::Var(key.clone()));
            }
        }
        for section in self.document.sections() {
            if section.name() != VARS_SECTION {
                graph.add_node(Node::Section(section.name().to_string()));
            }
        }

        for from in 0..graph.nodes.len() {
            let owner = graph.nodes[from].clone();
            let entries: Vec<(&String, &Entry)> = match &owner {
                Node::Var(name) => vec![self.vars_entry(name).map(|entry| (name, entry))?],
                Node::Section(name) => self
                    .document
                    .section(name)
                    .map(|s| s.entries().iter().collect())
                    .unwrap_or_default(),
            };
            let section_name = match &owner {
                Node::Var(_) => VARS_SECTION,
                Node::Section(name) => name.as_str(),
            };

            for (key, entry) in entries {
                let mut deps = Vec::new();
                self.collect_dependencies(&entry.value, entry.line, &mut deps)
                    .map_err(|e| located(e, section_name, key, entry.line))?;

                for dep in deps {
                    if let (Node::Var(var), Node::Var(referenced)) = (&owner, &dep) {
                        if self.options.var_chaining == VarChaining::Deny {
                            return Err(Error::variable_chain(var, referenced)
                                .with_line(entry.line));
                        }
                    }
                    graph.add_edge(from, &dep)?;
                }
            }
        }

        if self.options.var_chaining == VarChaining::Deny {
            for from in 0..graph.nodes.len() {
                let Node::Var(var) = &graph.nodes[from] else {
                    continue;
                };
                if let Some(Node::Var(referenced)) =
                    graph.variable_behind(from).map(|node| &graph.nodes[node])
                {
                    let line = self.vars_entry(var)?.line;
                    return Err(Error::variable_chain(var, referenced).with_line(line));
                }
            }
        }

        Ok(graph)
    }

    fn collect_dependencies(&self, raw: &RawValue, line: usize, out: &mut Vec<Node>) -> Result<()> {
        match raw {
            RawValue::Reference(name) => {
                if name == VARS_SECTION || !self.document.contains_section(name) {
                    return Err(Error::unknown_reference(name));
                }
                out.push(Node::Section(name.clone()));
            }
            RawValue::Variable(name) => {
                if !self.has_var(name) {
                    return Err(Error::unknown_variable(name));
                }
                out.push(Node::Var(name.clone()));
            }
            RawValue::String(text) => {
                let template = Template::parse(text, line)?;
                for name in template.placeholders() {
                    let is_var = self.has_var(name);
                    let is_token = self.options.runtime_tokens.contains(name);
                    if is_var && is_token {
                        log::warn!(
                            "Placeholder {{{}}} names both a variable and a runtime token; using the variable",
                            name
                        );
                    }
                    if is_var {
                        out.push(Node::Var(name.to_string()));
                    } else if !is_token {
                        return Err(Error::unknown_variable(name));
                    }
                }
            }
            RawValue::List(items) | RawValue::Tuple(items) => {
                for item in items {
                    self.collect_dependencies(item, line, out)?;
                }
            }
            RawValue::None
            | RawValue::Bool(_)
            | RawValue::Integer(_)
            | RawValue::Float(_)
            | RawValue::Symbol(_) => {}
        }
        Ok(())
    }

    fn has_var(&self, name: &str) -> bool {
        self.document
            .vars()
            .is_some_and(|vars| vars.contains_key(name))
    }
}

/// Attach section/key/line context to an error
fn located(err: Error, section: &str, key: &str, line: usize) -> Error {
    err.or_path(format!("{}.{}", section, key)).with_line(line)
}

/// Resolve one raw value against already-resolved dependencies
fn resolve_raw(raw: &RawValue, line: usize, scope: &Scope<'_>) -> Result<Value> {
    Ok(match raw {
        RawValue::None => Value::None,
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Integer(i) => Value::Integer(*i),
        RawValue::Float(f) => Value::Float(*f),
        RawValue::Symbol(s) => Value::Symbol(s.clone()),
        RawValue::String(text) => {
            let template = Template::parse(text, line)?;
            Value::String(template.render(|name| scope.lookup(name))?)
        }
        RawValue::List(items) => Value::List(
            items
                .iter()
                .map(|item| resolve_raw(item, line, scope))
                .collect::<Result<_>>()?,
        ),
        RawValue::Tuple(items) => Value::Tuple(
            items
                .iter()
                .map(|item| resolve_raw(item, line, scope))
                .collect::<Result<_>>()?,
        ),
        RawValue::Reference(name) => {
            let section = scope.sections.get(name).ok_or_else(|| {
                Error::internal(format!("section {} used before it was resolved", name))
            })?;
            Value::Section(Arc::clone(section))
        }
        RawValue::Variable(name) => scope
            .vars
            .get(name)
            .cloned()
            .ok_or_else(|| Error::internal(format!("variable {} used before it was resolved", name)))?,
    })
}
