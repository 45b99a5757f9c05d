//! Dependency extraction and circular dependency detection.
//!
//! Dependencies are found by scanning script text for `$`, `$this` and `$var`
//! calls whose first argument is a quoted name. Strings and comments are
//! skipped so that quoted or commented-out lookups are not counted.
use tracing::debug;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Result, VartabError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupKind {
    /// `$('name')`: the value of a variable.
    Value,
    /// `$this('name')`: the value of a derived variable of the same view.
    This,
    /// `$var('name')`: the variable's metadata.
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    kind: LookupKind,
    name: String,
}

impl Dependency {
    pub fn new(kind: LookupKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
    pub fn kind(&self) -> LookupKind {
        self.kind
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Table part of a qualified reference such as `ds.table:variable`.
    pub fn table(&self) -> Option<&str> {
        self.name.rsplit_once(':').map(|(t, _)| t)
    }
    pub fn variable(&self) -> &str {
        self.name.rsplit_once(':').map(|(_, v)| v).unwrap_or(&self.name)
    }
    /// Whether evaluating the dependency reads a value, as opposed to metadata.
    pub fn reads_value(&self) -> bool {
        self.kind != LookupKind::Variable
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
    Regex,
}

/// A `/` after one of these, or at the start, opens a regex literal rather than a division.
fn starts_operand(previous: Option<char>) -> bool {
    previous.is_none_or(|c| "(,=!&|?:[{+-*%<>;".contains(c))
}

/// All lookups of `script` with a literal name, deduplicated and sorted.
pub fn extract(script: &str) -> BTreeSet<Dependency> {
    let chars: Vec<char> = script.chars().collect();
    let mut found = BTreeSet::new();
    let mut state = Scan::Code;
    // last significant character outside strings, comments and regexes
    let mut previous: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            Scan::Quoted(quote) => {
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    state = Scan::Code;
                    previous = Some(c);
                }
            }
            Scan::Regex => {
                if c == '\\' {
                    i += 1;
                } else if c == '/' || c == '\n' {
                    state = Scan::Code;
                    previous = Some(c);
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = Scan::Code;
                    i += 1;
                }
            }
            Scan::Code => match c {
                '\'' | '"' => state = Scan::Quoted(c),
                '/' if next == Some('/') => state = Scan::LineComment,
                '/' if next == Some('*') => {
                    state = Scan::BlockComment;
                    i += 1;
                }
                '/' if starts_operand(previous) => state = Scan::Regex,
                '$' => {
                    if let Some((dependency, end)) = lookup_at(&chars, i) {
                        found.insert(dependency);
                        previous = Some(chars[end - 1]);
                        i = end;
                        continue;
                    }
                    previous = Some(c);
                }
                c if c.is_whitespace() => {}
                _ => previous = Some(c),
            },
        }
        i += 1;
    }
    found
}

/// Reads `$kind ( 'name'` starting at `start`. Returns the dependency and the
/// position just after the closing quote of the name.
fn lookup_at(chars: &[char], start: usize) -> Option<(Dependency, usize)> {
    let mut i = start + 1;
    let word_start = i;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    let word: String = chars[word_start..i].iter().collect();
    let kind = match word.as_str() {
        "" => LookupKind::Value,
        "this" => LookupKind::This,
        "var" => LookupKind::Variable,
        _ => return None,
    };
    i = skip_whitespace(chars, i);
    if chars.get(i) != Some(&'(') {
        return None;
    }
    i = skip_whitespace(chars, i + 1);
    let quote = *chars.get(i).filter(|c| **c == '\'' || **c == '"')?;
    i += 1;
    let mut name = String::new();
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                name.extend(chars.get(i + 1));
                i += 2;
            }
            c if c == quote => return Some((Dependency::new(kind, name), i + 1)),
            c => {
                name.push(c);
                i += 1;
            }
        }
    }
    None
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

// ------------- Cycle detection -------------
/// A variable of a table, printed as `table:variable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    table: String,
    variable: String,
}

impl Node {
    pub fn new(table: impl Into<String>, variable: impl Into<String>) -> Self {
        Self { table: table.into(), variable: variable.into() }
    }
    pub fn table(&self) -> &str {
        &self.table
    }
    pub fn variable(&self) -> &str {
        &self.variable
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.variable)
    }
}

/// Value dependencies between derived variables.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<Node, BTreeSet<Node>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, from: Node, to: Node) {
        self.edges.entry(from).or_default().insert(to);
    }
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.edges.keys()
    }

    /// Fails on the first cycle reachable from `start`. The reported reference
    /// is the smallest node of the cycle, so every member of a cycle reports
    /// the same one.
    pub fn check(&self, start: &Node) -> Result<()> {
        let mut path = Vec::new();
        let mut done = BTreeSet::new();
        self.visit(start, &mut path, &mut done)
    }

    pub fn check_all(&self) -> Result<()> {
        let mut done = BTreeSet::new();
        for node in self.edges.keys() {
            let mut path = Vec::new();
            self.visit(node, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit<'g>(&'g self, node: &'g Node, path: &mut Vec<&'g Node>, done: &mut BTreeSet<&'g Node>) -> Result<()> {
        if done.contains(node) {
            return Ok(());
        }
        if let Some(at) = path.iter().position(|n| *n == node) {
            return Err(cycle_error(&path[at..]));
        }
        path.push(node);
        if let Some(targets) = self.edges.get(node) {
            for target in targets {
                self.visit(target, path, done)?;
            }
        }
        path.pop();
        done.insert(node);
        Ok(())
    }
}

fn cycle_error(cycle: &[&Node]) -> VartabError {
    let smallest = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut path: Vec<String> = cycle[smallest..].iter().chain(cycle[..smallest].iter()).map(|n| n.to_string()).collect();
    let reference = path.first().cloned().unwrap_or_default();
    path.push(reference.clone());
    debug!("circular dependency: {}", path.join(" -> "));
    VartabError::CircularDependency { reference, path }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(script: &str) -> Vec<(LookupKind, String)> {
        extract(script).into_iter().map(|d| (d.kind(), d.name().to_string())).collect()
    }

    #[test]
    fn finds_each_kind_of_lookup() {
        let found = names("$('a').plus($this(\"b\")) + $var( 'c' ).unit()");
        assert_eq!(
            found,
            vec![
                (LookupKind::Value, "a".to_string()),
                (LookupKind::This, "b".to_string()),
                (LookupKind::Variable, "c".to_string()),
            ]
        );
    }

    #[test]
    fn skips_strings_and_comments() {
        let found = names("// $('x')\n'$(\\'y\\')' + /* $('z') */ $('real')");
        assert_eq!(found, vec![(LookupKind::Value, "real".to_string())]);
    }

    #[test]
    fn nested_lookups_are_found() {
        let found = names("$('t:a').eq($('b'))");
        assert_eq!(found.len(), 2);
        let dependency = extract("$('ds.t:a')").into_iter().next().expect("one dependency");
        assert_eq!(dependency.table(), Some("ds.t"));
        assert_eq!(dependency.variable(), "a");
    }

    #[test]
    fn regex_literals_are_skipped() {
        let found = names("$('a').matches(/it's/) + $('b')");
        assert_eq!(found, vec![(LookupKind::Value, "a".to_string()), (LookupKind::Value, "b".to_string())]);
        let found = names("$('a').matches(/\\/$('x')/i)");
        assert_eq!(found, vec![(LookupKind::Value, "a".to_string())]);
    }

    #[test]
    fn division_is_not_a_regex() {
        let found = names("$('a') / 2 + ($('b')) / $('c')");
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn computed_names_are_not_dependencies() {
        assert!(extract("$(name)").is_empty());
        assert!(extract("$other('a')").is_empty());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add(Node::new("v", "a"), Node::new("v", "a"));
        match graph.check(&Node::new("v", "a")) {
            Err(VartabError::CircularDependency { reference, path }) => {
                assert_eq!(reference, "v:a");
                assert_eq!(path, vec!["v:a", "v:a"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn every_member_of_a_cycle_reports_the_same_reference() {
        let mut graph = DependencyGraph::new();
        graph.add(Node::new("v", "c"), Node::new("v", "a"));
        graph.add(Node::new("v", "a"), Node::new("v", "b"));
        graph.add(Node::new("v", "b"), Node::new("v", "c"));
        for start in ["a", "b", "c"] {
            match graph.check(&Node::new("v", start)) {
                Err(VartabError::CircularDependency { reference, path }) => {
                    assert_eq!(reference, "v:a");
                    assert_eq!(path, vec!["v:a", "v:b", "v:c", "v:a"]);
                }
                other => panic!("expected a cycle, got {other:?}"),
            }
        }
    }

    #[test]
    fn diamonds_are_not_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add(Node::new("v", "top"), Node::new("v", "left"));
        graph.add(Node::new("v", "top"), Node::new("v", "right"));
        graph.add(Node::new("v", "left"), Node::new("v", "bottom"));
        graph.add(Node::new("v", "right"), Node::new("v", "bottom"));
        assert!(graph.check_all().is_ok());
    }
}
